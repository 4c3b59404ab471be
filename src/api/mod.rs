use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{
    ingest_stats::{IngestSnapshot, IngestStats},
    models::{BlockEvent, FailedTransaction},
    poller::PollerStatus,
    storage::{self, ArchivedBlock, DbPool},
};

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub status: watch::Receiver<PollerStatus>,
    pub latest: watch::Receiver<Option<BlockEvent>>,
    pub stats: Arc<IngestStats>,
    /// `None` when the archive is disabled.
    pub pool: Option<DbPool>,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("no block processed yet")]
    NoBlockYet,
    #[error("block archive is not enabled")]
    ArchiveDisabled,
    #[error("archive query failed: {0}")]
    Archive(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NoBlockYet => StatusCode::NOT_FOUND,
            ApiError::ArchiveDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Archive(err) => {
                tracing::error!("archive query failed: {:#}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<i64>,
}

impl LimitParams {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Serialize)]
struct RecentBlocksResponse {
    blocks: Vec<ArchivedBlock>,
}

#[derive(Serialize)]
struct FailedTxsResponse {
    transactions: Vec<FailedTransaction>,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status(State(state): State<AppState>) -> Json<PollerStatus> {
    Json(state.status.borrow().clone())
}

async fn latest_block(State(state): State<AppState>) -> Result<Json<BlockEvent>, ApiError> {
    let latest = state.latest.borrow().clone();
    latest.map(Json).ok_or(ApiError::NoBlockYet)
}

async fn ingest_stats(State(state): State<AppState>) -> Json<IngestSnapshot> {
    Json(state.stats.snapshot())
}

async fn recent_blocks(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<RecentBlocksResponse>, ApiError> {
    let pool = state.pool.as_ref().ok_or(ApiError::ArchiveDisabled)?;
    let blocks = storage::get_recent_blocks(pool, params.limit()).await?;
    Ok(Json(RecentBlocksResponse { blocks }))
}

async fn recent_failed(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<FailedTxsResponse>, ApiError> {
    let pool = state.pool.as_ref().ok_or(ApiError::ArchiveDisabled)?;
    let transactions = storage::get_recent_failed(pool, params.limit()).await?;
    Ok(Json(FailedTxsResponse { transactions }))
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/blocks/latest", get(latest_block))
        .route("/blocks/recent", get(recent_blocks))
        .route("/stats/ingest", get(ingest_stats))
        .route("/tx/failed", get(recent_failed))
        .with_state(state)
}

pub async fn run_http_server(addr: &str, state: AppState) -> Result<()> {
    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
