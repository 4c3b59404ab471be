//! Block data sources and the ordered fallback between them.

use async_trait::async_trait;
use serde::Serialize;

use crate::{
    error::FetchError,
    models::{RawTransaction, ReceiptInfo},
};

#[derive(Debug, Clone, PartialEq)]
pub struct SourcedTx {
    pub tx: RawTransaction,
    pub receipt: Option<ReceiptInfo>,
}

/// Transactions of one block in block order. `dropped` counts transactions the
/// source knew about but could not fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockTransactions {
    pub transactions: Vec<SourcedTx>,
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Indexer,
    Rpc,
}

#[async_trait]
pub trait BlockSource: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// `Err(FetchError::Empty)` means "nothing here, try the next source".
    async fn fetch_block(&self, number: u64) -> Result<BlockTransactions, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBlock {
    pub source: String,
    pub kind: SourceKind,
    pub transactions: BlockTransactions,
}

/// Sources tried in order until one returns data.
#[derive(Default)]
pub struct SourceChain {
    sources: Vec<Box<dyn BlockSource>>,
}

impl SourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl BlockSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub async fn fetch_block(&self, number: u64) -> Result<FetchedBlock, FetchError> {
        for source in &self.sources {
            match source.fetch_block(number).await {
                Ok(transactions) => {
                    tracing::debug!(
                        source = source.name(),
                        block = number,
                        txs = transactions.transactions.len(),
                        "block fetched"
                    );
                    return Ok(FetchedBlock {
                        source: source.name().to_string(),
                        kind: source.kind(),
                        transactions,
                    });
                }
                Err(err) if err.is_empty() => {
                    tracing::info!(source = source.name(), "{}, trying next source", err);
                }
                Err(err) => {
                    tracing::warn!(source = source.name(), block = number, "fetch failed: {}", err);
                }
            }
        }
        Err(FetchError::Exhausted(number))
    }
}
