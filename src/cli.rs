use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "block-pulse", version, about = "Block ingestion and transaction classification")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll for new blocks and serve the HTTP API
    Run {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
    /// Probe every configured RPC endpoint once
    Probe,
    /// Fetch and classify one block (latest by default)
    ClassifyBlock {
        #[arg(long)]
        block: Option<u64>,
    },
    /// Fetch a transaction with its receipt and classify it
    AnalyzeTx {
        #[arg(long)]
        hash: String,
    },
    /// Print archived blocks, newest first
    RecentBlocks {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}
