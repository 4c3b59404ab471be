use std::sync::atomic::{AtomicU64, Ordering};

use crate::source::SourceKind;

/// Pipeline throughput counters, shared between the poller and the HTTP surface.
#[derive(Debug, Default)]
pub struct IngestStats {
    blocks: AtomicU64,
    transactions: AtomicU64,
    indexer_blocks: AtomicU64,
    rpc_blocks: AtomicU64,
    header_only_blocks: AtomicU64,
    dropped_transactions: AtomicU64,
    endpoint_failures: AtomicU64,
    source_exhaustions: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// `source` is `None` when the header reported an empty block and no source was asked.
    pub fn record_block(&self, source: Option<SourceKind>, transactions: u64, dropped: u64) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.transactions.fetch_add(transactions, Ordering::Relaxed);
        self.dropped_transactions.fetch_add(dropped, Ordering::Relaxed);
        let by_source = match source {
            Some(SourceKind::Indexer) => &self.indexer_blocks,
            Some(SourceKind::Rpc) => &self.rpc_blocks,
            None => &self.header_only_blocks,
        };
        by_source.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_endpoint_failures(&self) {
        self.endpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_source_exhaustions(&self) {
        self.source_exhaustions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IngestSnapshot {
        IngestSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            transactions: self.transactions.load(Ordering::Relaxed),
            indexer_blocks: self.indexer_blocks.load(Ordering::Relaxed),
            rpc_blocks: self.rpc_blocks.load(Ordering::Relaxed),
            header_only_blocks: self.header_only_blocks.load(Ordering::Relaxed),
            dropped_transactions: self.dropped_transactions.load(Ordering::Relaxed),
            endpoint_failures: self.endpoint_failures.load(Ordering::Relaxed),
            source_exhaustions: self.source_exhaustions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IngestSnapshot {
    pub blocks: u64,
    pub transactions: u64,
    pub indexer_blocks: u64,
    pub rpc_blocks: u64,
    pub header_only_blocks: u64,
    pub dropped_transactions: u64,
    pub endpoint_failures: u64,
    pub source_exhaustions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_block_splits_by_source() {
        let stats = IngestStats::new();
        stats.record_block(Some(SourceKind::Indexer), 12, 0);
        stats.record_block(Some(SourceKind::Rpc), 3, 2);
        stats.record_block(None, 0, 0);
        stats.inc_endpoint_failures();

        let snap = stats.snapshot();
        assert_eq!(snap.blocks, 3);
        assert_eq!(snap.transactions, 15);
        assert_eq!(snap.indexer_blocks, 1);
        assert_eq!(snap.rpc_blocks, 1);
        assert_eq!(snap.header_only_blocks, 1);
        assert_eq!(snap.dropped_transactions, 2);
        assert_eq!(snap.endpoint_failures, 1);
        assert_eq!(snap.source_exhaustions, 0);
    }
}
