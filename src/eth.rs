use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers_core::types::{Block, BlockId, Transaction, TransactionReceipt, H256, U256};
use ethers_providers::{Http, Middleware, Provider};
use url::Url;

use crate::{
    error::FetchError,
    models::{hash_to_lower_hex, BlockHeader, LogEntry, RawTransaction, ReceiptInfo, TxStatus},
};

/// The chain calls the poller and registry need from an endpoint.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, FetchError>;

    /// `None` when the node does not know the block yet.
    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, FetchError>;

    /// `None` when the endpoint does not expose fee data.
    async fn gas_price(&self) -> Result<Option<U256>, FetchError>;
}

#[derive(Clone)]
pub struct EthClient {
    provider: Provider<Http>,
    url: String,
}

impl EthClient {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;
        let url = Url::parse(rpc_url).with_context(|| format!("invalid RPC url {}", rpc_url))?;
        let transport = Http::new_with_client(url, client);
        let provider = Provider::new(transport);
        Ok(Self {
            provider,
            url: rpc_url.to_string(),
        })
    }

    pub async fn block_hashes(&self, number: u64) -> Result<Option<Vec<H256>>, FetchError> {
        let block = self
            .provider
            .get_block(BlockId::Number(number.into()))
            .await?;
        Ok(block.map(|b| b.transactions))
    }

    /// Fetches a transaction and its receipt. A missing receipt is not an error.
    pub async fn transaction_with_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<(RawTransaction, Option<ReceiptInfo>)>, FetchError> {
        let (tx, receipt) = tokio::join!(
            self.provider.get_transaction(hash),
            self.provider.get_transaction_receipt(hash)
        );
        let Some(tx) = tx? else {
            return Ok(None);
        };
        let receipt = match receipt {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!("receipt for {:#x} unavailable: {}", hash, err);
                None
            }
        };

        let mut raw = normalize_tx(tx);
        if let Some(r) = &receipt {
            raw.gas_used = r.gas_used;
            if raw.gas_price.is_none() {
                raw.gas_price = r.effective_gas_price;
            }
        }
        Ok(Some((raw, receipt.map(normalize_receipt))))
    }
}

#[async_trait]
impl ChainRpc for EthClient {
    async fn block_number(&self) -> Result<u64, FetchError> {
        let latest = self.provider.get_block_number().await?;
        Ok(latest.as_u64())
    }

    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, FetchError> {
        let block = self
            .provider
            .get_block(BlockId::Number(number.into()))
            .await?;
        Ok(block.and_then(normalize_header))
    }

    async fn gas_price(&self) -> Result<Option<U256>, FetchError> {
        match self.provider.get_gas_price().await {
            Ok(price) => Ok(Some(price)),
            Err(err) => {
                tracing::debug!("{} exposes no gas price: {}", self.url, err);
                Ok(None)
            }
        }
    }
}

pub fn normalize_header(block: Block<H256>) -> Option<BlockHeader> {
    Some(BlockHeader {
        number: block.number?.as_u64(),
        hash: block.hash.map(hash_to_lower_hex).unwrap_or_default(),
        timestamp: u256_to_u64_lossy(block.timestamp),
        gas_used: u256_to_u64_lossy(block.gas_used),
        gas_limit: u256_to_u64_lossy(block.gas_limit),
        tx_count: block.transactions.len(),
    })
}

pub fn normalize_tx(tx: Transaction) -> RawTransaction {
    RawTransaction {
        hash: hash_to_lower_hex(tx.hash),
        from: Some(tx.from),
        to: tx.to,
        value: tx.value,
        input: tx.input,
        status: TxStatus::Unknown,
        gas: Some(tx.gas),
        gas_used: None,
        gas_price: tx.gas_price,
    }
}

pub fn normalize_receipt(receipt: TransactionReceipt) -> ReceiptInfo {
    ReceiptInfo {
        status: TxStatus::from_receipt(receipt.status),
        contract_address: receipt.contract_address,
        logs: receipt
            .logs
            .into_iter()
            .map(|log| LogEntry {
                topics: log.topics,
                data: log.data,
            })
            .collect(),
    }
}

fn u256_to_u64_lossy(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::types::{Address, Bytes, Log, U64};

    #[test]
    fn normalize_tx_keeps_call_fields() {
        let mut tx = Transaction::default();
        tx.hash = H256::from_low_u64_be(1);
        tx.from = Address::from_low_u64_be(2);
        tx.to = Some(Address::from_low_u64_be(3));
        tx.value = U256::from(42u64);
        tx.gas = U256::from(21_000u64);
        tx.gas_price = Some(U256::from(1000u64));
        tx.input = Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]);

        let raw = normalize_tx(tx);
        assert_eq!(
            raw.hash,
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
        assert_eq!(raw.to, Some(Address::from_low_u64_be(3)));
        assert_eq!(raw.value, U256::from(42u64));
        assert_eq!(raw.gas_price, Some(U256::from(1000u64)));
        assert_eq!(raw.status, TxStatus::Unknown);
        assert_eq!(raw.input.len(), 4);
    }

    #[test]
    fn normalize_receipt_maps_status_and_logs() {
        let mut receipt = TransactionReceipt::default();
        receipt.status = Some(U64::zero());
        receipt.contract_address = Some(Address::from_low_u64_be(9));
        let mut log = Log::default();
        log.topics = vec![H256::from_low_u64_be(5)];
        receipt.logs = vec![log];

        let info = normalize_receipt(receipt);
        assert_eq!(info.status, TxStatus::Failure);
        assert_eq!(info.contract_address, Some(Address::from_low_u64_be(9)));
        assert_eq!(info.logs.len(), 1);
        assert_eq!(info.logs[0].topics[0], H256::from_low_u64_be(5));
    }

    #[test]
    fn normalize_header_requires_number() {
        let mut block: Block<H256> = Block::default();
        assert!(normalize_header(block.clone()).is_none());

        block.number = Some(U64::from(100u64));
        block.hash = Some(H256::from_low_u64_be(7));
        block.timestamp = U256::from(1_700_000_000u64);
        block.gas_used = U256::from(21_000u64);
        block.gas_limit = U256::from(30_000_000u64);
        block.transactions = vec![H256::from_low_u64_be(1), H256::from_low_u64_be(2)];

        let header = normalize_header(block).unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.tx_count, 2);
        assert_eq!(header.gas_limit, 30_000_000);
        assert_eq!(header.timestamp, 1_700_000_000);
    }
}
