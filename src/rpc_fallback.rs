use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::H256;
use futures_util::future::join_all;

use crate::{
    error::FetchError,
    eth::EthClient,
    source::{BlockSource, BlockTransactions, SourceKind, SourcedTx},
};

/// Hydrates a block transaction by transaction from a node RPC, receipts included.
///
/// Hashes are fetched in batches of `batch_size` issued concurrently, with
/// `batch_delay` between batches to stay under upstream rate limits.
#[derive(Clone)]
pub struct RpcFallbackClient {
    name: String,
    client: EthClient,
    batch_size: usize,
    batch_delay: Duration,
}

impl RpcFallbackClient {
    pub fn new(
        name: impl Into<String>,
        client: EthClient,
        batch_size: usize,
        batch_delay: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            batch_size: batch_size.max(1),
            batch_delay,
        }
    }

    pub async fn fetch_block_with_receipts(
        &self,
        number: u64,
    ) -> Result<BlockTransactions, FetchError> {
        let hashes = match self.client.block_hashes(number).await? {
            Some(hashes) if !hashes.is_empty() => hashes,
            _ => return Err(FetchError::Empty(number)),
        };

        let batches = (hashes.len() + self.batch_size - 1) / self.batch_size;
        let mut out = BlockTransactions::default();

        for (i, batch) in hashes.chunks(self.batch_size).enumerate() {
            tracing::debug!(
                rpc = %self.name,
                block = number,
                "processing batch {}/{} ({} transactions)",
                i + 1,
                batches,
                batch.len()
            );

            let results = join_all(batch.iter().map(|hash| self.fetch_transaction(*hash))).await;
            for (hash, result) in batch.iter().zip(results) {
                match result {
                    Ok(Some(sourced)) => out.transactions.push(sourced),
                    Ok(None) => {
                        tracing::warn!(rpc = %self.name, "transaction {:#x} not found, dropping", hash);
                        out.dropped += 1;
                    }
                    Err(err) => {
                        tracing::warn!(rpc = %self.name, "failed to fetch {:#x}: {}", hash, err);
                        out.dropped += 1;
                    }
                }
            }

            if i + 1 < batches {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        if out.transactions.is_empty() {
            tracing::warn!(
                rpc = %self.name,
                block = number,
                "all {} transactions failed to fetch, reporting empty block",
                out.dropped
            );
        }
        Ok(out)
    }

    pub async fn fetch_transaction(&self, hash: H256) -> Result<Option<SourcedTx>, FetchError> {
        let fetched = self.client.transaction_with_receipt(hash).await?;
        Ok(fetched.map(|(tx, receipt)| SourcedTx { tx, receipt }))
    }
}

#[async_trait]
impl BlockSource for RpcFallbackClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rpc
    }

    async fn fetch_block(&self, number: u64) -> Result<BlockTransactions, FetchError> {
        self.fetch_block_with_receipts(number).await
    }
}
