use std::fmt;

use ethers_core::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Execution outcome as reported by the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Success,
    Failure,
    #[default]
    Unknown,
}

impl TxStatus {
    /// Decodes the loosely typed status column of indexer rows.
    ///
    /// Accepts `0`/`1`, `"0"`, `"0x0"`, `true`/`false`; anything else is `Unknown`.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Bool(true) => TxStatus::Success,
            Value::Bool(false) => TxStatus::Failure,
            Value::Number(n) => match n.as_f64() {
                Some(f) if f == 0.0 => TxStatus::Failure,
                Some(_) => TxStatus::Success,
                None => TxStatus::Unknown,
            },
            Value::String(s) => Self::from_str_lenient(s),
            _ => TxStatus::Unknown,
        }
    }

    pub fn from_str_lenient(raw: &str) -> Self {
        let s = raw.trim().to_ascii_lowercase();
        match s.as_str() {
            "true" => return TxStatus::Success,
            "false" => return TxStatus::Failure,
            _ => {}
        }

        let (digits, radix) = match s.strip_prefix("0x") {
            Some(hex) => (hex, 16),
            None => (s.as_str(), 10),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
            return TxStatus::Unknown;
        }
        if digits.chars().all(|c| c == '0') {
            TxStatus::Failure
        } else {
            TxStatus::Success
        }
    }

    pub fn from_receipt(status: Option<U64>) -> Self {
        match status {
            Some(s) if s.is_zero() => TxStatus::Failure,
            Some(_) => TxStatus::Success,
            None => TxStatus::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != TxStatus::Unknown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogEntry {
    pub topics: Vec<H256>,
    pub data: Bytes,
}

/// A transaction as submitted, decoded from an indexer row or an RPC response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawTransaction {
    pub hash: String,
    pub from: Option<Address>,
    /// `None` means contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
    pub status: TxStatus,
    pub gas: Option<U256>,
    pub gas_used: Option<U256>,
    pub gas_price: Option<U256>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReceiptInfo {
    pub status: TxStatus,
    pub contract_address: Option<Address>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Transfer,
    Swap,
    Mint,
    Contract,
    Failed,
    Other,
}

impl Category {
    /// Enumeration order; also the tie-break order for the dominant category.
    pub const ALL: [Category; 6] = [
        Category::Transfer,
        Category::Swap,
        Category::Mint,
        Category::Contract,
        Category::Failed,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Transfer => "transfer",
            Category::Swap => "swap",
            Category::Mint => "mint",
            Category::Contract => "contract",
            Category::Failed => "failed",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub transfer: u64,
    pub swap: u64,
    pub mint: u64,
    pub contract: u64,
    pub failed: u64,
    pub other: u64,
}

impl CategoryCounts {
    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Transfer => self.transfer,
            Category::Swap => self.swap,
            Category::Mint => self.mint,
            Category::Contract => self.contract,
            Category::Failed => self.failed,
            Category::Other => self.other,
        }
    }

    fn slot(&mut self, category: Category) -> &mut u64 {
        match category {
            Category::Transfer => &mut self.transfer,
            Category::Swap => &mut self.swap,
            Category::Mint => &mut self.mint,
            Category::Contract => &mut self.contract,
            Category::Failed => &mut self.failed,
            Category::Other => &mut self.other,
        }
    }

    pub fn increment(&mut self, category: Category) {
        *self.slot(category) += 1;
    }

    pub fn add(&mut self, other: &CategoryCounts) {
        for category in Category::ALL {
            *self.slot(category) += other.get(category);
        }
    }

    pub fn total(&self) -> u64 {
        Category::ALL.iter().map(|c| self.get(*c)).sum()
    }

    /// Highest count wins, earlier categories win ties. All-zero counts report `Other`.
    pub fn dominant(&self) -> Category {
        let mut best = Category::Other;
        let mut max = 0;
        for category in Category::ALL {
            let count = self.get(category);
            if count > max {
                max = count;
                best = category;
            }
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTransaction {
    pub hash: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub value_wei: String,
    pub block_number: u64,
}

/// Header fields read from the chain endpoint for the block being processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: String,
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub number: u64,
    pub hash: String,
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: usize,
    pub failed_transactions: Vec<FailedTransaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub latest_block: u64,
    pub tps: f64,
    pub avg_gas_price: String,
    pub total_txs: usize,
    pub network_hashrate: String,
    pub native_currency: String,
}

/// Emitted once per newly observed block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockEvent {
    pub snapshot: BlockSnapshot,
    pub block_counts: CategoryCounts,
    pub cumulative: CategoryCounts,
    pub stats: NetworkStats,
    pub dominant: Category,
    pub source: String,
}

pub fn address_to_lower_hex(addr: Address) -> String {
    format!("0x{:x}", addr)
}

pub fn hash_to_lower_hex(hash: H256) -> String {
    format!("0x{:x}", hash)
}
