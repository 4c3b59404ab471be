//! Maps a transaction (and its receipt, when one was fetched) to a [`Category`].
//!
//! Rules are evaluated in precedence order and the first match wins:
//! failed status, contract creation, log-confirmed mint, log-confirmed swap,
//! selector-based mint/swap, transfer, contract interaction, other.

use std::collections::HashSet;

use ethers_core::types::H256;

use crate::{
    models::{
        address_to_lower_hex, Category, CategoryCounts, FailedTransaction, LogEntry,
        RawTransaction, ReceiptInfo, TxStatus,
    },
    source::SourcedTx,
};

// keccak256 event topics, lowercase without 0x.
const TRANSFER_TOPIC: &str = "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const TRANSFER_SINGLE_TOPIC: &str =
    "c3d58168c5ae7397731d063d5bbf3d657854427343f4c083240f7aacaa2d0f62";
const TRANSFER_BATCH_TOPIC: &str =
    "4a39dc06d4c0dbc64b70af90fd698a233a518aa5d07e595d983b8c0526c8f7fb";
const UNISWAP_V2_SWAP_TOPIC: &str =
    "d78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822";
const UNISWAP_V3_SWAP_TOPIC: &str =
    "c42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67";

pub type Selector = [u8; 4];

pub const TRANSFER_SELECTORS: [Selector; 2] = [
    [0xa9, 0x05, 0x9c, 0xbb], // transfer(address,uint256)
    [0x23, 0xb8, 0x72, 0xdd], // transferFrom(address,address,uint256)
];

pub const SWAP_SELECTORS: [Selector; 5] = [
    [0x38, 0xed, 0x17, 0x39], // swapExactTokensForTokens
    [0x88, 0x03, 0xdb, 0xee], // swapTokensForExactTokens
    [0x7f, 0xf3, 0x6a, 0xb5], // swapExactETHForTokens
    [0x4a, 0x25, 0xd9, 0x4a], // swapTokensForExactETH
    [0x02, 0x2c, 0x0d, 0x9f], // swap(uint256,uint256,address,bytes)
];

pub const MINT_SELECTORS: [Selector; 3] = [
    [0x40, 0xc1, 0x0f, 0x19], // mint(address,uint256)
    [0xa1, 0x44, 0x81, 0x94], // safeMint(address,uint256)
    [0x44, 0x9a, 0x52, 0xf8], // mintTo(address,uint256)
];

pub fn classify(tx: &RawTransaction, receipt: Option<&ReceiptInfo>) -> Category {
    if effective_status(tx, receipt) == TxStatus::Failure {
        return Category::Failed;
    }

    if tx.to.is_none() && receipt.and_then(|r| r.contract_address).is_some() {
        return Category::Contract;
    }

    if let Some(category) = receipt.and_then(|r| classify_logs(&r.logs)) {
        return category;
    }

    let selector = selector(&tx.input);
    if let Some(sel) = selector {
        if MINT_SELECTORS.contains(&sel) {
            return Category::Mint;
        }
        if SWAP_SELECTORS.contains(&sel) {
            return Category::Swap;
        }
    }

    if !tx.value.is_zero() && tx.input.is_empty() {
        return Category::Transfer;
    }
    if selector.is_some_and(|sel| TRANSFER_SELECTORS.contains(&sel)) {
        return Category::Transfer;
    }

    if tx.to.is_some() && !tx.input.is_empty() {
        return Category::Contract;
    }

    Category::Other
}

/// Per-block classification result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockClassification {
    pub counts: CategoryCounts,
    pub failed: Vec<FailedTransaction>,
    /// Repeated hashes skipped within the block.
    pub duplicates: usize,
}

/// Classifies every transaction of a block once, in block order. A hash seen
/// twice in the same block is counted once.
pub fn classify_block(block_number: u64, txs: &[SourcedTx]) -> BlockClassification {
    let mut seen = HashSet::new();
    let mut result = BlockClassification::default();

    for sourced in txs {
        let tx = &sourced.tx;
        if !tx.hash.is_empty() && !seen.insert(tx.hash.as_str()) {
            result.duplicates += 1;
            continue;
        }

        let category = classify(tx, sourced.receipt.as_ref());
        result.counts.increment(category);
        if category == Category::Failed {
            tracing::debug!(hash = %tx.hash, block = block_number, "failed transaction");
            result.failed.push(FailedTransaction {
                hash: tx.hash.clone(),
                from: tx.from.map(address_to_lower_hex),
                to: tx.to.map(address_to_lower_hex),
                value_wei: tx.value.to_string(),
                block_number,
            });
        }
    }

    result
}

/// The transaction's own status when it carries one, the receipt's otherwise.
fn effective_status(tx: &RawTransaction, receipt: Option<&ReceiptInfo>) -> TxStatus {
    if tx.status.is_known() {
        return tx.status;
    }
    receipt.map(|r| r.status).unwrap_or_default()
}

pub fn selector(input: &[u8]) -> Option<Selector> {
    input.get(..4)?.try_into().ok()
}

fn classify_logs(logs: &[LogEntry]) -> Option<Category> {
    if logs.iter().any(is_mint_log) {
        return Some(Category::Mint);
    }
    if logs.iter().any(is_swap_log) {
        return Some(Category::Swap);
    }
    None
}

fn is_mint_log(log: &LogEntry) -> bool {
    let Some(topic0) = log.topics.first() else {
        return false;
    };
    let topic0 = topic_hex(topic0);

    // Transfer(from indexed, to indexed, ...)
    if topic0 == TRANSFER_TOPIC {
        return log.topics.get(1).is_some_and(|from| from.is_zero());
    }
    // TransferSingle/TransferBatch(operator indexed, from indexed, to indexed, ...)
    if topic0 == TRANSFER_SINGLE_TOPIC || topic0 == TRANSFER_BATCH_TOPIC {
        return log.topics.get(2).is_some_and(|from| from.is_zero());
    }
    false
}

fn is_swap_log(log: &LogEntry) -> bool {
    log.topics.first().is_some_and(|topic0| {
        let topic0 = topic_hex(topic0);
        topic0 == UNISWAP_V2_SWAP_TOPIC || topic0 == UNISWAP_V3_SWAP_TOPIC
    })
}

fn topic_hex(topic: &H256) -> String {
    format!("{:x}", topic)
}
