use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers_core::types::U256;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use crate::{
    aggregator::{compute_stats, Aggregator},
    classifier::classify_block,
    error::FetchError,
    ingest_stats::IngestStats,
    models::{BlockEvent, BlockHeader, BlockSnapshot},
    registry::{EndpointRegistry, EndpointStatus},
    source::{FetchedBlock, SourceChain},
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// A single request failed; polling resumes on the next endpoint.
    Transient,
    /// Every endpoint failed; re-selection is retried on each tick.
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Initializing,
    Polling,
    Error(ErrorKind),
}

#[derive(Debug, Clone, Serialize)]
pub struct PollerStatus {
    pub state: PollerState,
    pub active_endpoint: Option<String>,
    pub last_block: Option<u64>,
    pub last_error: Option<String>,
    pub endpoints: Vec<EndpointStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    NewBlock(Box<BlockEvent>),
    NoChange,
    /// Every source failed for this block; it is retried on the next tick.
    FetchFailed(u64),
    EndpointFailed,
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Upper bound for each chain RPC call made by the poller.
    pub call_timeout: Duration,
    pub native_currency: String,
}

/// Drives the ingest loop. Owns the registry, the source chain and the
/// aggregator; it is the only writer of the cumulative counters.
pub struct BlockPoller {
    registry: EndpointRegistry,
    sources: SourceChain,
    aggregator: Aggregator,
    config: PollerConfig,
    stats: Arc<IngestStats>,
    state: PollerState,
    active: Option<usize>,
    last_seen: Option<u64>,
    previous: Option<BlockSnapshot>,
    last_error: Option<String>,
    events: broadcast::Sender<BlockEvent>,
    latest: watch::Sender<Option<BlockEvent>>,
    status: watch::Sender<PollerStatus>,
}

impl BlockPoller {
    pub fn new(
        registry: EndpointRegistry,
        sources: SourceChain,
        config: PollerConfig,
        stats: Arc<IngestStats>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (latest, _) = watch::channel(None);
        let (status, _) = watch::channel(PollerStatus {
            state: PollerState::Initializing,
            active_endpoint: None,
            last_block: None,
            last_error: None,
            endpoints: registry.statuses(),
        });

        Self {
            registry,
            sources,
            aggregator: Aggregator::new(),
            config,
            stats,
            state: PollerState::Initializing,
            active: None,
            last_seen: None,
            previous: None,
            last_error: None,
            events,
            latest,
            status,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockEvent> {
        self.events.subscribe()
    }

    pub fn latest_receiver(&self) -> watch::Receiver<Option<BlockEvent>> {
        self.latest.subscribe()
    }

    pub fn status_receiver(&self) -> watch::Receiver<PollerStatus> {
        self.status.subscribe()
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn active_endpoint(&self) -> Option<&str> {
        self.active.map(|idx| self.registry.endpoint(idx).name.as_str())
    }

    /// Selects a working endpoint before polling starts.
    pub async fn initialize(&mut self) -> PollerState {
        self.reselect().await;
        self.publish_status();
        self.state
    }

    pub async fn run(mut self) {
        if self.state == PollerState::Initializing {
            self.initialize().await;
        }

        // Each tick is awaited to completion; ticks missed meanwhile are skipped,
        // so two polls never overlap.
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.poll_once().await;
        self.publish_status();
        outcome
    }

    async fn poll_once(&mut self) -> TickOutcome {
        let idx = match self.active {
            Some(idx) => idx,
            None => match self.reselect().await {
                Some(idx) => idx,
                None => return TickOutcome::Unavailable,
            },
        };
        let client = self.registry.client(idx);

        let latest = match self.bounded(client.block_number()).await {
            Ok(n) => n,
            Err(err) => return self.endpoint_failed(idx, err).await,
        };
        if self.last_seen.is_some_and(|seen| latest <= seen) {
            self.state = PollerState::Polling;
            return TickOutcome::NoChange;
        }

        let header = match self.bounded(client.block_header(latest)).await {
            Ok(Some(header)) => header,
            Ok(None) => {
                tracing::debug!(block = latest, "block not available yet");
                self.state = PollerState::Polling;
                return TickOutcome::NoChange;
            }
            Err(err) => return self.endpoint_failed(idx, err).await,
        };
        self.state = PollerState::Polling;

        let fetched = if header.tx_count == 0 {
            None
        } else {
            match self.sources.fetch_block(latest).await {
                Ok(fetched) => Some(fetched),
                Err(err) => {
                    tracing::warn!(block = latest, "{}; retrying next tick", err);
                    self.stats.inc_source_exhaustions();
                    self.state = PollerState::Error(ErrorKind::Transient);
                    self.last_error = Some(err.to_string());
                    return TickOutcome::FetchFailed(latest);
                }
            }
        };

        let gas_price = match self.bounded(client.gas_price()).await {
            Ok(price) => price,
            Err(err) => {
                tracing::debug!("gas price unavailable: {}", err);
                None
            }
        };

        match self.process_block(header, fetched, gas_price) {
            Some(event) => TickOutcome::NewBlock(Box::new(event)),
            None => TickOutcome::NoChange,
        }
    }

    fn process_block(
        &mut self,
        header: BlockHeader,
        fetched: Option<FetchedBlock>,
        gas_price: Option<U256>,
    ) -> Option<BlockEvent> {
        let (source, kind, block_txs) = match fetched {
            Some(f) => (f.source, Some(f.kind), f.transactions),
            None => ("header".to_string(), None, Default::default()),
        };

        let classified = classify_block(header.number, &block_txs.transactions);
        if !self.aggregator.apply(header.number, &classified.counts) {
            return None;
        }
        self.last_seen = Some(header.number);
        self.last_error = None;
        self.state = PollerState::Polling;

        // Transactions a source could not deliver are not part of the snapshot.
        let tx_count = if kind.is_some() {
            classified.counts.total() as usize
        } else {
            header.tx_count
        };
        if tx_count != header.tx_count {
            tracing::warn!(
                block = header.number,
                header_txs = header.tx_count,
                classified = tx_count,
                "classified transaction count differs from header"
            );
        }

        let snapshot = BlockSnapshot {
            number: header.number,
            hash: header.hash,
            timestamp: header.timestamp,
            gas_used: header.gas_used,
            gas_limit: header.gas_limit,
            tx_count,
            failed_transactions: classified.failed,
        };
        let stats = compute_stats(
            &snapshot,
            self.previous.as_ref(),
            gas_price,
            &self.config.native_currency,
        );
        self.stats.record_block(
            kind,
            classified.counts.total(),
            block_txs.dropped as u64,
        );

        let event = BlockEvent {
            snapshot: snapshot.clone(),
            block_counts: classified.counts,
            cumulative: self.aggregator.snapshot(),
            stats,
            dominant: self.aggregator.dominant(),
            source,
        };
        tracing::info!(
            block = event.snapshot.number,
            txs = event.block_counts.total(),
            dropped = block_txs.dropped,
            source = %event.source,
            dominant = %event.dominant,
            tps = event.stats.tps,
            "block processed"
        );

        // No subscribers is fine; the latest event is still published below.
        let _ = self.events.send(event.clone());
        self.latest.send_replace(Some(event.clone()));
        self.previous = Some(snapshot);
        Some(event)
    }

    async fn endpoint_failed(&mut self, idx: usize, err: FetchError) -> TickOutcome {
        tracing::warn!(
            endpoint = %self.registry.endpoint(idx).name,
            "request failed: {}",
            err
        );
        self.stats.inc_endpoint_failures();
        self.registry.mark_failed(idx);
        self.active = None;
        self.last_error = Some(err.to_string());

        if self.reselect().await.is_some() {
            self.state = PollerState::Error(ErrorKind::Transient);
        }
        TickOutcome::EndpointFailed
    }

    async fn reselect(&mut self) -> Option<usize> {
        match self.registry.select_working().await {
            Ok(idx) => {
                if self.active != Some(idx) {
                    tracing::info!(endpoint = %self.registry.endpoint(idx).name, "using endpoint");
                }
                self.active = Some(idx);
                self.state = PollerState::Polling;
                Some(idx)
            }
            Err(err) => {
                tracing::error!("{}", err);
                self.active = None;
                self.state = PollerState::Error(ErrorKind::Terminal);
                self.last_error = Some(err.to_string());
                None
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        let limit = self.config.call_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(FetchError::Timeout(limit)))
    }

    fn publish_status(&self) {
        self.status.send_replace(PollerStatus {
            state: self.state,
            active_endpoint: self.active_endpoint().map(str::to_string),
            last_block: self.last_seen,
            last_error: self.last_error.clone(),
            endpoints: self.registry.statuses(),
        });
    }
}
