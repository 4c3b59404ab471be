mod cli;

use anyhow::{bail, Context};
use clap::Parser;
use ethers_core::types::H256;

use block_pulse::{app, config::Config, storage};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    match cli.command {
        Commands::Run { addr } => {
            let bind = addr.unwrap_or_else(|| config.http_bind_addr.clone());
            app::run(config, &bind).await?;
        }
        Commands::Probe => {
            let statuses = app::probe_endpoints(&config).await?;
            print_json(&statuses)?;
        }
        Commands::ClassifyBlock { block } => {
            let report = app::classify_block_once(&config, block).await?;
            print_json(&report)?;
        }
        Commands::AnalyzeTx { hash } => {
            let hash: H256 = hash
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid transaction hash {}: {}", hash, e))?;
            let clients = app::build_fallback_clients(&config)?;
            match app::analyze_transaction(&clients, hash).await? {
                Some(analysis) => print_json(&analysis)?,
                None => bail!("transaction {:#x} not found", hash),
            }
        }
        Commands::RecentBlocks { limit } => {
            let Some(url) = config.database_url.as_deref() else {
                bail!("DATABASE_URL is not set");
            };
            let pool = storage::init_pool(url).await?;
            let blocks = storage::get_recent_blocks(&pool, limit).await?;
            print_json(&blocks)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();
}
