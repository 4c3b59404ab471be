//! Optional SQLite archive of processed blocks.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::{BlockEvent, Category, CategoryCounts, FailedTransaction};

pub type DbPool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    ensure_dir_exists(database_url)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .context("failed to connect to SQLite")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blocks (
            block_number INTEGER PRIMARY KEY,
            block_hash TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            gas_used INTEGER NOT NULL,
            gas_limit INTEGER NOT NULL,
            tx_count INTEGER NOT NULL,
            transfer INTEGER NOT NULL,
            swap INTEGER NOT NULL,
            mint INTEGER NOT NULL,
            contract INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            other INTEGER NOT NULL,
            dominant TEXT NOT NULL,
            source TEXT NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS failed_transactions (
            hash TEXT PRIMARY KEY,
            block_number INTEGER NOT NULL,
            from_addr TEXT,
            to_addr TEXT,
            value_wei TEXT NOT NULL,
            FOREIGN KEY(block_number) REFERENCES blocks(block_number)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_failed_transactions_block_number
        ON failed_transactions(block_number);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Stores one block event. Re-inserting a block number is ignored.
pub async fn insert_block_event(pool: &SqlitePool, event: &BlockEvent) -> Result<()> {
    let snapshot = &event.snapshot;
    let counts = &event.block_counts;
    let mut txn = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO blocks (
            block_number, block_hash, timestamp, gas_used, gas_limit, tx_count,
            transfer, swap, mint, contract, failed, other, dominant, source
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        ON CONFLICT(block_number) DO NOTHING;
        "#,
    )
    .bind(to_i64(snapshot.number))
    .bind(&snapshot.hash)
    .bind(to_i64(snapshot.timestamp))
    .bind(to_i64(snapshot.gas_used))
    .bind(to_i64(snapshot.gas_limit))
    .bind(snapshot.tx_count as i64)
    .bind(to_i64(counts.transfer))
    .bind(to_i64(counts.swap))
    .bind(to_i64(counts.mint))
    .bind(to_i64(counts.contract))
    .bind(to_i64(counts.failed))
    .bind(to_i64(counts.other))
    .bind(counts.dominant().as_str())
    .bind(&event.source)
    .execute(&mut *txn)
    .await?;

    for failed in &snapshot.failed_transactions {
        sqlx::query(
            r#"
            INSERT INTO failed_transactions (hash, block_number, from_addr, to_addr, value_wei)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(hash) DO NOTHING;
            "#,
        )
        .bind(&failed.hash)
        .bind(to_i64(failed.block_number))
        .bind(&failed.from)
        .bind(&failed.to)
        .bind(&failed.value_wei)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedBlock {
    pub number: u64,
    pub hash: String,
    pub timestamp: u64,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub tx_count: u64,
    pub counts: CategoryCounts,
    pub dominant: Category,
    pub source: String,
}

pub async fn get_recent_blocks(pool: &SqlitePool, limit: i64) -> Result<Vec<ArchivedBlock>> {
    #[derive(FromRow)]
    struct BlockRow {
        block_number: i64,
        block_hash: String,
        timestamp: i64,
        gas_used: i64,
        gas_limit: i64,
        tx_count: i64,
        transfer: i64,
        swap: i64,
        mint: i64,
        contract: i64,
        failed: i64,
        other: i64,
        source: String,
    }

    let rows = sqlx::query_as::<_, BlockRow>(
        r#"
        SELECT block_number, block_hash, timestamp, gas_used, gas_limit, tx_count,
               transfer, swap, mint, contract, failed, other, source
        FROM blocks
        ORDER BY block_number DESC
        LIMIT ?1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let counts = CategoryCounts {
                transfer: to_u64(row.transfer),
                swap: to_u64(row.swap),
                mint: to_u64(row.mint),
                contract: to_u64(row.contract),
                failed: to_u64(row.failed),
                other: to_u64(row.other),
            };
            ArchivedBlock {
                number: to_u64(row.block_number),
                hash: row.block_hash,
                timestamp: to_u64(row.timestamp),
                gas_used: to_u64(row.gas_used),
                gas_limit: to_u64(row.gas_limit),
                tx_count: to_u64(row.tx_count),
                dominant: counts.dominant(),
                counts,
                source: row.source,
            }
        })
        .collect())
}

pub async fn get_recent_failed(pool: &SqlitePool, limit: i64) -> Result<Vec<FailedTransaction>> {
    #[derive(FromRow)]
    struct FailedRow {
        hash: String,
        block_number: i64,
        from_addr: Option<String>,
        to_addr: Option<String>,
        value_wei: String,
    }

    let rows = sqlx::query_as::<_, FailedRow>(
        r#"
        SELECT hash, block_number, from_addr, to_addr, value_wei
        FROM failed_transactions
        ORDER BY block_number DESC, hash
        LIMIT ?1;
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| FailedTransaction {
            hash: row.hash,
            from: row.from_addr,
            to: row.to_addr,
            value_wei: row.value_wei,
            block_number: to_u64(row.block_number),
        })
        .collect())
}

/// Writes every event received on `events` until the channel closes.
pub fn spawn_archiver(pool: DbPool, mut events: broadcast::Receiver<BlockEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = insert_block_event(&pool, &event).await {
                        tracing::warn!(block = event.snapshot.number, "failed archiving block: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("archiver lagged, {} blocks not archived", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

// SQLite integers are signed.
fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
