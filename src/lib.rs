pub mod aggregator;
pub mod api;
pub mod app;
pub mod classifier;
pub mod config;
pub mod error;
pub mod eth;
pub mod indexer;
pub mod ingest_stats;
pub mod models;
pub mod poller;
pub mod registry;
pub mod rpc_fallback;
pub mod source;
pub mod storage;
