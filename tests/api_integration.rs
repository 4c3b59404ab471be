use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::{Client, StatusCode};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use block_pulse::api::{app_router, AppState};
use block_pulse::ingest_stats::IngestStats;
use block_pulse::models::{
    BlockEvent, BlockSnapshot, Category, CategoryCounts, FailedTransaction, NetworkStats,
};
use block_pulse::poller::{PollerState, PollerStatus};
use block_pulse::registry::EndpointStatus;
use block_pulse::source::SourceKind;
use block_pulse::storage::{self, DbPool};

#[tokio::test]
async fn health_endpoint_works() {
    let (base_url, handle) = spawn_app(TestApp::default()).await;
    let client = Client::new();
    let res = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body.get("status").and_then(|s| s.as_str()), Some("ok"));
    handle.abort();
}

#[tokio::test]
async fn status_reports_poller_and_endpoints() {
    let (base_url, handle) = spawn_app(TestApp::default()).await;
    let res = Client::new()
        .get(format!("{}/status", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["state"], "polling");
    assert_eq!(body["active_endpoint"], "Monad Official");
    assert_eq!(body["last_block"], 100);
    let endpoints = body["endpoints"].as_array().cloned().unwrap_or_default();
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[1]["active"], false);
    handle.abort();
}

#[tokio::test]
async fn latest_block_is_404_before_first_block() {
    let app = TestApp {
        latest: None,
        ..TestApp::default()
    };
    let (base_url, handle) = spawn_app(app).await;
    let res = Client::new()
        .get(format!("{}/blocks/latest", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    handle.abort();
}

#[tokio::test]
async fn latest_block_returns_event() {
    let (base_url, handle) = spawn_app(TestApp::default()).await;
    let res = Client::new()
        .get(format!("{}/blocks/latest", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let event: BlockEvent = res.json().await.unwrap();
    assert_eq!(event, block_event(100));
    handle.abort();
}

#[tokio::test]
async fn ingest_stats_returns_counters() {
    let app = TestApp::default();
    app.stats.record_block(Some(SourceKind::Indexer), 3, 0);
    app.stats.record_block(Some(SourceKind::Rpc), 2, 1);
    let (base_url, handle) = spawn_app(app).await;

    let res = Client::new()
        .get(format!("{}/stats/ingest", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["blocks"], 2);
    assert_eq!(body["transactions"], 5);
    assert_eq!(body["rpc_blocks"], 1);
    assert_eq!(body["dropped_transactions"], 1);
    handle.abort();
}

#[tokio::test]
async fn archive_routes_need_a_database() {
    let (base_url, handle) = spawn_app(TestApp::default()).await;
    let res = Client::new()
        .get(format!("{}/tx/failed", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    handle.abort();
}

#[tokio::test]
async fn recent_blocks_returns_archived_rows() {
    let pool = archive_with_blocks(&[100, 101, 102]).await;
    let app = TestApp {
        pool: Some(pool),
        ..TestApp::default()
    };
    let (base_url, handle) = spawn_app(app).await;

    let res = Client::new()
        .get(format!("{}/blocks/recent?limit=2", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    let blocks = body["blocks"].as_array().cloned().unwrap_or_default();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0]["number"], 102);
    assert_eq!(blocks[1]["number"], 101);
    assert_eq!(blocks[0]["counts"]["transfer"], 2);
    assert_eq!(blocks[0]["dominant"], "transfer");
    assert_eq!(blocks[0]["source"], "indexer-1");
    handle.abort();
}

#[tokio::test]
async fn failed_txs_returns_archived_rows() {
    let pool = archive_with_blocks(&[100, 101]).await;
    let app = TestApp {
        pool: Some(pool),
        ..TestApp::default()
    };
    let (base_url, handle) = spawn_app(app).await;

    let res = Client::new()
        .get(format!("{}/tx/failed?limit=5", base_url))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    let body: serde_json::Value = res.json().await.unwrap();
    let arr = body
        .get("transactions")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["block_number"], 101);
    assert_eq!(arr[0]["hash"], failed_hash(101));
    handle.abort();
}

#[tokio::test]
async fn archiver_persists_broadcast_events() {
    let pool = storage::init_pool(&temp_db_url()).await.unwrap();
    let (tx, rx) = tokio::sync::broadcast::channel(8);
    let archiver = storage::spawn_archiver(pool.clone(), rx);

    tx.send(block_event(100)).unwrap();
    tx.send(block_event(101)).unwrap();
    // a replayed block is stored once
    tx.send(block_event(101)).unwrap();
    drop(tx);
    archiver.await.unwrap();

    let blocks = storage::get_recent_blocks(&pool, 10).await.unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].number, 101);
    assert_eq!(blocks[0].counts.failed, 1);
    assert_eq!(blocks[0].dominant, Category::Transfer);
    let failed = storage::get_recent_failed(&pool, 10).await.unwrap();
    assert_eq!(failed.len(), 2);
}

struct TestApp {
    status: PollerStatus,
    latest: Option<BlockEvent>,
    stats: Arc<IngestStats>,
    pool: Option<DbPool>,
}

impl Default for TestApp {
    fn default() -> Self {
        Self {
            status: PollerStatus {
                state: PollerState::Polling,
                active_endpoint: Some("Monad Official".into()),
                last_block: Some(100),
                last_error: None,
                endpoints: vec![
                    EndpointStatus {
                        name: "Monad Official".into(),
                        url: "https://testnet-rpc.monad.xyz".into(),
                        active: true,
                        latency_ms: Some(42),
                    },
                    EndpointStatus {
                        name: "Gelato".into(),
                        url: "https://rpc-monad-testnet.t.raas.gelato.cloud".into(),
                        active: false,
                        latency_ms: None,
                    },
                ],
            },
            latest: Some(block_event(100)),
            stats: Arc::new(IngestStats::new()),
            pool: None,
        }
    }
}

async fn spawn_app(app: TestApp) -> (String, JoinHandle<()>) {
    let (_, status) = watch::channel(app.status);
    let (_, latest) = watch::channel(app.latest);
    let state = AppState {
        status,
        latest,
        stats: app.stats,
        pool: app.pool,
    };
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);
    let server = axum::serve(listener, router);
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });

    (base_url, handle)
}

fn failed_hash(block: u64) -> String {
    format!("0x{:064x}", block * 1000 + 3)
}

fn block_event(number: u64) -> BlockEvent {
    let counts = CategoryCounts {
        transfer: 2,
        failed: 1,
        ..CategoryCounts::default()
    };
    BlockEvent {
        snapshot: BlockSnapshot {
            number,
            hash: format!("0x{:064x}", number),
            timestamp: 1_700_000_000 + number,
            gas_used: 10_000_000,
            gas_limit: 30_000_000,
            tx_count: 3,
            failed_transactions: vec![FailedTransaction {
                hash: failed_hash(number),
                from: Some(format!("0x{:040x}", 0xaa)),
                to: Some(format!("0x{:040x}", 0xbb)),
                value_wei: "0".into(),
                block_number: number,
            }],
        },
        block_counts: counts,
        cumulative: counts,
        stats: NetworkStats {
            latest_block: number,
            tps: 0.0,
            avg_gas_price: "1.0000".into(),
            total_txs: 3,
            network_hashrate: "1.2 TH/s".into(),
            native_currency: "MON".into(),
        },
        dominant: Category::Transfer,
        source: "indexer-1".into(),
    }
}

async fn archive_with_blocks(numbers: &[u64]) -> DbPool {
    let pool = storage::init_pool(&temp_db_url()).await.unwrap();
    for n in numbers {
        storage::insert_block_event(&pool, &block_event(*n)).await.unwrap();
    }
    pool
}

fn temp_db_url() -> String {
    let dir = std::env::temp_dir();
    let _ = std::fs::create_dir_all(&dir);
    let file = format!(
        "block_pulse_test_{}_{}.sqlite",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    );
    let path = dir.join(file);
    let _ = std::fs::File::create(&path);
    format!("sqlite://{}", path.to_string_lossy())
}
