//! Client for a HyperSync-style indexer: one `POST /query` per block.
//!
//! The indexer returns transaction fields only, never receipts or logs, so
//! transactions fetched here are classified with selector heuristics for the
//! log-dependent categories.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ethers_core::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::FetchError,
    models::{RawTransaction, TxStatus},
    source::{BlockSource, BlockTransactions, SourceKind, SourcedTx},
};

pub const TRANSACTION_FIELDS: [&str; 11] = [
    "block_number",
    "transaction_index",
    "hash",
    "from",
    "to",
    "value",
    "input",
    "status",
    "gas",
    "gas_used",
    "gas_price",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexerQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub field_selection: FieldSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSelection {
    pub transaction: Vec<&'static str>,
}

impl IndexerQuery {
    /// Half-open range `[number, number + 1)`.
    pub fn for_block(number: u64) -> Self {
        Self {
            from_block: number,
            to_block: number.saturating_add(1),
            field_selection: FieldSelection {
                transaction: TRANSACTION_FIELDS.to_vec(),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexerResponse {
    pub data: Option<IndexerData>,
    pub next_block: Option<u64>,
    pub archive_height: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexerData {
    pub transactions: Option<Vec<IndexerTx>>,
}

/// Indexer row. Every column is kept as raw JSON and decoded leniently.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct IndexerTx {
    pub block_number: Option<Value>,
    pub transaction_index: Option<Value>,
    pub hash: Option<Value>,
    pub from: Option<Value>,
    pub to: Option<Value>,
    pub value: Option<Value>,
    pub input: Option<Value>,
    pub status: Option<Value>,
    pub gas: Option<Value>,
    pub gas_used: Option<Value>,
    pub gas_price: Option<Value>,
}

impl IndexerTx {
    pub fn to_raw(&self) -> RawTransaction {
        RawTransaction {
            hash: self
                .hash
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_lowercase)
                .unwrap_or_default(),
            from: self.from.as_ref().and_then(parse_address),
            to: self.to.as_ref().and_then(parse_address),
            value: self.value.as_ref().and_then(parse_u256).unwrap_or_default(),
            input: self.input.as_ref().map(parse_bytes).unwrap_or_default(),
            status: self
                .status
                .as_ref()
                .map(TxStatus::from_json)
                .unwrap_or_default(),
            gas: self.gas.as_ref().and_then(parse_u256),
            gas_used: self.gas_used.as_ref().and_then(parse_u256),
            gas_price: self.gas_price.as_ref().and_then(parse_u256),
        }
    }

    fn block_number(&self) -> Option<u64> {
        self.block_number.as_ref().and_then(parse_u64)
    }

    fn transaction_index(&self) -> Option<u64> {
        self.transaction_index.as_ref().and_then(parse_u64)
    }
}

#[derive(Clone)]
pub struct IndexerClient {
    name: String,
    url: String,
    http: reqwest::Client,
}

impl IndexerClient {
    pub fn new(name: impl Into<String>, url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name: name.into(),
            url: url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Transactions of `number` in block order. An empty result set is `FetchError::Empty`.
    pub async fn query_block(&self, number: u64) -> Result<Vec<RawTransaction>, FetchError> {
        let query = IndexerQuery::for_block(number);
        let response = self
            .http
            .post(format!("{}/query", self.url))
            .json(&query)
            .send()
            .await?
            .error_for_status()?;
        let body: IndexerResponse = response.json().await?;

        tracing::debug!(
            indexer = %self.name,
            next_block = ?body.next_block,
            archive_height = ?body.archive_height,
            "indexer response"
        );

        let mut rows: Vec<IndexerTx> = body
            .data
            .and_then(|d| d.transactions)
            .unwrap_or_default()
            .into_iter()
            .filter(|row| row.block_number().map_or(true, |n| n == number))
            .collect();
        if rows.is_empty() {
            return Err(FetchError::Empty(number));
        }
        rows.sort_by_key(|row| row.transaction_index().unwrap_or(u64::MAX));

        Ok(rows.iter().map(IndexerTx::to_raw).collect())
    }
}

#[async_trait]
impl BlockSource for IndexerClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Indexer
    }

    async fn fetch_block(&self, number: u64) -> Result<BlockTransactions, FetchError> {
        let transactions = self
            .query_block(number)
            .await?
            .into_iter()
            .map(|tx| SourcedTx { tx, receipt: None })
            .collect();
        Ok(BlockTransactions {
            transactions,
            dropped: 0,
        })
    }
}

/// JSON number, decimal string or `0x` hex string.
pub fn parse_u256(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => parse_json_number(n),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some("") => None,
                Some(hex) => U256::from_str_radix(hex, 16).ok(),
                None => U256::from_dec_str(s).ok(),
            }
        }
        _ => None,
    }
}

// Integers above u64 arrive as f64 (e.g. `1e20`) unless serde_json keeps the literal text.
fn parse_json_number(n: &serde_json::Number) -> Option<U256> {
    if let Some(v) = n.as_u64() {
        return Some(U256::from(v));
    }
    if let Ok(v) = U256::from_dec_str(&n.to_string()) {
        return Some(v);
    }
    let f = n.as_f64()?;
    if !f.is_finite() || f < 0.0 || f.fract() != 0.0 {
        return None;
    }
    U256::from_dec_str(&format!("{:.0}", f)).ok()
}

fn parse_u64(value: &Value) -> Option<u64> {
    parse_u256(value).and_then(|v| u64::try_from(v).ok())
}

fn parse_address(value: &Value) -> Option<Address> {
    let s = value.as_str()?.trim();
    if s.is_empty() || s == "0x" {
        return None;
    }
    Address::from_str(s).ok()
}

fn parse_bytes(value: &Value) -> Bytes {
    value
        .as_str()
        .and_then(|s| Bytes::from_str(s.trim()).ok())
        .unwrap_or_default()
}
