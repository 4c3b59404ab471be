//! In-process fakes for the upstream services: a HyperSync-style indexer and a
//! JSON-RPC node, both served by axum on an ephemeral port.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

pub const TRANSFER_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub fn hash(n: u64) -> String {
    format!("0x{:064x}", n)
}

pub fn addr(n: u64) -> String {
    format!("0x{:040x}", n)
}

fn hex(n: u64) -> String {
    format!("0x{:x}", n)
}

fn parse_hex(value: &Value) -> Option<u64> {
    let s = value.as_str()?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

pub async fn serve(router: Router) -> (String, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);
    let server = axum::serve(listener, router);
    let handle = tokio::spawn(async move {
        let _ = server.await;
    });
    (base_url, handle)
}

/// An address nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[derive(Debug, Clone)]
pub struct FakeTx {
    pub seed: u64,
    pub from: u64,
    pub to: Option<u64>,
    pub value: u64,
    pub input: String,
    pub success: bool,
    pub logs: Vec<Value>,
    pub contract_address: Option<u64>,
}

impl FakeTx {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            from: 0xaa,
            to: Some(0xbb),
            value: 0,
            input: "0x".to_string(),
            success: true,
            logs: Vec::new(),
            contract_address: None,
        }
    }

    pub fn native_transfer(seed: u64, value: u64) -> Self {
        Self {
            value,
            ..Self::new(seed)
        }
    }

    pub fn erc20_transfer(seed: u64) -> Self {
        Self {
            to: Some(0x70c3),
            input: format!("0xa9059cbb{:064x}{:064x}", 0xcc, 1000),
            logs: vec![transfer_log(0x70c3, 0xaa, 0xcc)],
            ..Self::new(seed)
        }
    }

    pub fn failed(seed: u64) -> Self {
        Self {
            input: "0xdeadbeef".to_string(),
            success: false,
            ..Self::new(seed)
        }
    }

    pub fn hash(&self) -> String {
        hash(self.seed)
    }

    /// The row the indexer returns for this transaction.
    pub fn indexer_row(&self, block: u64, index: u64) -> Value {
        json!({
            "block_number": block,
            "transaction_index": index,
            "hash": self.hash(),
            "from": addr(self.from),
            "to": self.to.map(addr),
            "value": hex(self.value),
            "input": self.input,
            "status": if self.success { 1 } else { 0 },
            "gas": "0x5208",
            "gas_used": "0x5208",
            "gas_price": "0x3b9aca00",
        })
    }

    fn rpc_tx(&self, block: u64, index: u64) -> Value {
        json!({
            "hash": self.hash(),
            "nonce": "0x0",
            "blockHash": hash(block),
            "blockNumber": hex(block),
            "transactionIndex": hex(index),
            "from": addr(self.from),
            "to": self.to.map(addr),
            "value": hex(self.value),
            "gasPrice": "0x3b9aca00",
            "gas": "0x5208",
            "input": self.input,
            "v": "0x1b",
            "r": "0x1",
            "s": "0x1",
            "type": "0x0",
        })
    }

    fn rpc_receipt(&self, block: u64, index: u64) -> Value {
        let logs: Vec<Value> = self
            .logs
            .iter()
            .enumerate()
            .map(|(i, log)| {
                let mut log = log.clone();
                log["blockHash"] = json!(hash(block));
                log["blockNumber"] = json!(hex(block));
                log["transactionHash"] = json!(self.hash());
                log["transactionIndex"] = json!(hex(index));
                log["logIndex"] = json!(hex(i as u64));
                log["removed"] = json!(false);
                log
            })
            .collect();
        json!({
            "transactionHash": self.hash(),
            "transactionIndex": hex(index),
            "blockHash": hash(block),
            "blockNumber": hex(block),
            "from": addr(self.from),
            "to": self.to.map(addr),
            "cumulativeGasUsed": "0x5208",
            "gasUsed": "0x5208",
            "contractAddress": self.contract_address.map(addr),
            "logs": logs,
            "status": if self.success { "0x1" } else { "0x0" },
            "logsBloom": format!("0x{}", "0".repeat(512)),
            "effectiveGasPrice": "0x3b9aca00",
            "type": "0x0",
        })
    }
}

pub fn transfer_log(token: u64, from: u64, to: u64) -> Value {
    json!({
        "address": addr(token),
        "topics": [TRANSFER_TOPIC, format!("0x{:064x}", from), format!("0x{:064x}", to)],
        "data": format!("0x{:064x}", 1000),
    })
}

/// Native transfer, ERC-20 transfer and a failed call.
pub fn block_100_txs() -> Vec<FakeTx> {
    vec![
        FakeTx::native_transfer(1, 5),
        FakeTx::erc20_transfer(2),
        FakeTx::failed(3),
    ]
}

#[derive(Default)]
pub struct FakeNode {
    pub latest: AtomicU64,
    blocks: Mutex<HashMap<u64, Vec<String>>>,
    txs: Mutex<HashMap<String, (Value, Value)>>,
    broken: Mutex<HashSet<String>>,
    pub tx_lookups: AtomicUsize,
}

impl FakeNode {
    pub fn new(latest: u64) -> Arc<Self> {
        let node = Self::default();
        node.latest.store(latest, Ordering::SeqCst);
        Arc::new(node)
    }

    pub fn add_block(&self, number: u64, txs: &[FakeTx]) {
        let mut stored = self.txs.lock().unwrap();
        for (i, tx) in txs.iter().enumerate() {
            stored.insert(
                tx.hash(),
                (tx.rpc_tx(number, i as u64), tx.rpc_receipt(number, i as u64)),
            );
        }
        self.blocks
            .lock()
            .unwrap()
            .insert(number, txs.iter().map(FakeTx::hash).collect());
    }

    /// Lookups for `hash` answer with a JSON-RPC error.
    pub fn break_tx(&self, hash: String) {
        self.broken.lock().unwrap().insert(hash);
    }

    fn block_json(&self, number: u64) -> Value {
        let blocks = self.blocks.lock().unwrap();
        let Some(hashes) = blocks.get(&number) else {
            return Value::Null;
        };
        json!({
            "hash": hash(number),
            "parentHash": hash(number.saturating_sub(1)),
            "sha3Uncles": hash(0),
            "miner": addr(0),
            "stateRoot": hash(0),
            "transactionsRoot": hash(0),
            "receiptsRoot": hash(0),
            "number": hex(number),
            "gasUsed": "0x989680",
            "gasLimit": "0x1c9c380",
            "extraData": "0x",
            "logsBloom": format!("0x{}", "0".repeat(512)),
            "timestamp": hex(1_700_000_000 + number),
            "difficulty": "0x0",
            "totalDifficulty": "0x0",
            "sealFields": [],
            "uncles": [],
            "transactions": hashes,
            "size": "0x100",
            "mixHash": hash(0),
            "nonce": "0x0000000000000000",
            "baseFeePerGas": "0x3b9aca00",
        })
    }

    fn lookup(&self, params: &Value, receipt: bool) -> Result<Value, String> {
        let hash = params[0].as_str().unwrap_or_default().to_lowercase();
        if self.broken.lock().unwrap().contains(&hash) {
            return Err(format!("upstream unavailable for {}", hash));
        }
        let txs = self.txs.lock().unwrap();
        Ok(txs
            .get(&hash)
            .map(|(tx, rcpt)| if receipt { rcpt.clone() } else { tx.clone() })
            .unwrap_or(Value::Null))
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/", post(handle_rpc))
            .with_state(self.clone())
    }
}

async fn handle_rpc(State(node): State<Arc<FakeNode>>, Json(req): Json<Value>) -> Json<Value> {
    let id = req["id"].clone();
    let params = &req["params"];
    let result = match req["method"].as_str().unwrap_or_default() {
        "eth_blockNumber" => Ok(json!(hex(node.latest.load(Ordering::SeqCst)))),
        "eth_gasPrice" => Ok(json!("0x3b9aca00")),
        "eth_getBlockByNumber" => Ok(parse_hex(&params[0])
            .map(|n| node.block_json(n))
            .unwrap_or(Value::Null)),
        "eth_getTransactionByHash" => {
            node.tx_lookups.fetch_add(1, Ordering::SeqCst);
            node.lookup(params, false)
        }
        "eth_getTransactionReceipt" => node.lookup(params, true),
        other => Err(format!("method {} not supported", other)),
    };

    Json(match result {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(message) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32000, "message": message },
        }),
    })
}

#[derive(Default)]
pub struct FakeIndexer {
    rows: Mutex<HashMap<u64, Vec<Value>>>,
    pub queries: Mutex<Vec<Value>>,
}

impl FakeIndexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_rows(&self, block: u64, rows: Vec<Value>) {
        self.rows.lock().unwrap().insert(block, rows);
    }

    pub fn add_block(&self, block: u64, txs: &[FakeTx]) {
        let rows = txs
            .iter()
            .enumerate()
            .map(|(i, tx)| tx.indexer_row(block, i as u64))
            .collect();
        self.set_rows(block, rows);
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/query", post(handle_query))
            .with_state(self.clone())
    }
}

async fn handle_query(
    State(indexer): State<Arc<FakeIndexer>>,
    Json(query): Json<Value>,
) -> Json<Value> {
    let from = query["from_block"].as_u64().unwrap_or_default();
    indexer.queries.lock().unwrap().push(query);
    let rows = indexer
        .rows
        .lock()
        .unwrap()
        .get(&from)
        .cloned()
        .unwrap_or_default();
    Json(json!({
        "data": { "transactions": rows },
        "next_block": from + 1,
        "archive_height": 1_000_000,
    }))
}
