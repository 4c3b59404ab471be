//! Wiring between configuration, the poller, the archive and the HTTP surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use ethers_core::types::H256;
use serde::Serialize;

use crate::{
    api::{self, AppState},
    classifier::{classify, classify_block},
    config::Config,
    error::FetchError,
    eth::{ChainRpc, EthClient},
    indexer::IndexerClient,
    ingest_stats::IngestStats,
    models::{BlockHeader, Category, CategoryCounts, FailedTransaction, RawTransaction, ReceiptInfo},
    poller::{BlockPoller, PollerConfig},
    registry::{EndpointRegistry, EndpointStatus},
    rpc_fallback::RpcFallbackClient,
    source::{BlockSource, SourceChain},
    storage,
};

pub fn build_registry(config: &Config) -> Result<EndpointRegistry> {
    let mut registry = EndpointRegistry::new(config.endpoint_cooldown, config.probe_timeout);
    for endpoint in &config.rpc_endpoints {
        let client = EthClient::new(&endpoint.url, config.poll_interval)
            .with_context(|| format!("failed to build client for {}", endpoint.name))?;
        registry = registry.with_endpoint(&endpoint.name, &endpoint.url, Arc::new(client));
    }
    Ok(registry)
}

pub fn build_fallback_clients(config: &Config) -> Result<Vec<RpcFallbackClient>> {
    config
        .fallback_rpc_urls
        .iter()
        .enumerate()
        .map(|(i, url)| -> Result<RpcFallbackClient> {
            let client = EthClient::new(url, config.poll_interval)?;
            Ok(RpcFallbackClient::new(
                format!("rpc-{}", i + 1),
                client,
                config.batch_size,
                config.batch_delay,
            ))
        })
        .collect()
}

/// Indexers first, then the fallback RPC mirrors, each in configured order.
pub fn build_source_chain(config: &Config) -> Result<SourceChain> {
    let mut chain = SourceChain::new();
    for (i, url) in config.indexer_urls.iter().enumerate() {
        let client = IndexerClient::new(format!("indexer-{}", i + 1), url, config.poll_interval)
            .with_context(|| format!("failed to build indexer client for {}", url))?;
        chain = chain.with_source(client);
    }
    for client in build_fallback_clients(config)? {
        chain = chain.with_source(client);
    }
    Ok(chain)
}

pub fn build_poller(config: &Config, stats: Arc<IngestStats>) -> Result<BlockPoller> {
    let poller_config = PollerConfig {
        poll_interval: config.poll_interval,
        call_timeout: config.poll_interval,
        native_currency: config.native_currency.clone(),
    };
    let registry = build_registry(config)?;
    let sources = build_source_chain(config)?;
    anyhow::ensure!(!registry.is_empty(), "no RPC endpoints configured");
    anyhow::ensure!(!sources.is_empty(), "no block sources configured");
    tracing::info!(
        endpoints = registry.len(),
        sources = sources.len(),
        "poller configured"
    );
    Ok(BlockPoller::new(registry, sources, poller_config, stats))
}

/// Runs the poller, the HTTP server and, when configured, the archive writer
/// until ctrl-c or until the server stops.
pub async fn run(config: Config, bind: &str) -> Result<()> {
    let stats = Arc::new(IngestStats::new());
    let poller = build_poller(&config, stats.clone())?;

    let pool = match &config.database_url {
        Some(url) => {
            let pool = storage::init_pool(url).await?;
            storage::spawn_archiver(pool.clone(), poller.subscribe());
            tracing::info!("archiving blocks to {}", url);
            Some(pool)
        }
        None => None,
    };

    let state = AppState {
        status: poller.status_receiver(),
        latest: poller.latest_receiver(),
        stats,
        pool,
    };

    let poll_task = tokio::spawn(poller.run());
    let result = tokio::select! {
        res = api::run_http_server(bind, state) => res,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            Ok(())
        }
    };
    poll_task.abort();
    result
}

/// Probes every configured endpoint once.
pub async fn probe_endpoints(config: &Config) -> Result<Vec<EndpointStatus>> {
    let mut registry = build_registry(config)?;
    for idx in 0..registry.len() {
        registry.probe(idx).await;
    }
    Ok(registry.statuses())
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockReport {
    pub header: BlockHeader,
    pub source: String,
    pub counts: CategoryCounts,
    pub dominant: Category,
    pub dropped: usize,
    pub failed_transactions: Vec<FailedTransaction>,
}

/// Fetches and classifies a single block, the latest one when `block` is `None`.
pub async fn classify_block_once(config: &Config, block: Option<u64>) -> Result<BlockReport> {
    let mut registry = build_registry(config)?;
    let idx = registry.select_working().await?;
    let client = registry.client(idx);

    let number = match block {
        Some(n) => n,
        None => client.block_number().await?,
    };
    let header = client
        .block_header(number)
        .await?
        .with_context(|| format!("block {} not found", number))?;

    let (source, transactions) = if header.tx_count == 0 {
        ("header".to_string(), Default::default())
    } else {
        let fetched = build_source_chain(config)?.fetch_block(number).await?;
        (fetched.source, fetched.transactions)
    };

    let classified = classify_block(number, &transactions.transactions);
    Ok(BlockReport {
        header,
        source,
        dominant: classified.counts.dominant(),
        counts: classified.counts,
        dropped: transactions.dropped,
        failed_transactions: classified.failed,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionAnalysis {
    pub source: String,
    pub category: Category,
    pub transaction: RawTransaction,
    pub receipt: Option<ReceiptInfo>,
}

/// Looks the transaction up on each mirror in turn and classifies it with its
/// receipt. `Ok(None)` when a mirror answered and none knew the hash.
pub async fn analyze_transaction(
    clients: &[RpcFallbackClient],
    hash: H256,
) -> Result<Option<TransactionAnalysis>, FetchError> {
    let mut last_err = None;
    let mut answered = false;

    for client in clients {
        match client.fetch_transaction(hash).await {
            Ok(Some(sourced)) => {
                let category = classify(&sourced.tx, sourced.receipt.as_ref());
                return Ok(Some(TransactionAnalysis {
                    source: client.name().to_string(),
                    category,
                    transaction: sourced.tx,
                    receipt: sourced.receipt,
                }));
            }
            Ok(None) => answered = true,
            Err(err) => {
                tracing::warn!(rpc = client.name(), "transaction lookup failed: {}", err);
                last_err = Some(err);
            }
        }
    }

    match last_err {
        Some(err) if !answered => Err(err),
        _ => Ok(None),
    }
}
