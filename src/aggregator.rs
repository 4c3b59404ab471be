use ethers_core::types::U256;

use crate::models::{BlockSnapshot, Category, CategoryCounts, NetworkStats};

pub const DEFAULT_GAS_PRICE_GWEI: &str = "0.0001";
pub const DEFAULT_HASHRATE: &str = "1.2 TH/s";

/// Cumulative per-category counters for the lifetime of the process.
#[derive(Debug, Default)]
pub struct Aggregator {
    cumulative: CategoryCounts,
    last_applied: Option<u64>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one block's counts. A block number at or below the last applied one
    /// is ignored and `false` is returned.
    pub fn apply(&mut self, block_number: u64, counts: &CategoryCounts) -> bool {
        if self.last_applied.is_some_and(|last| block_number <= last) {
            tracing::debug!(block_number, "block already applied, skipping");
            return false;
        }
        self.cumulative.add(counts);
        self.last_applied = Some(block_number);
        true
    }

    pub fn snapshot(&self) -> CategoryCounts {
        self.cumulative
    }

    pub fn total(&self) -> u64 {
        self.cumulative.total()
    }

    pub fn dominant(&self) -> Category {
        self.cumulative.dominant()
    }
}

pub fn compute_stats(
    current: &BlockSnapshot,
    previous: Option<&BlockSnapshot>,
    gas_price_wei: Option<U256>,
    native_currency: &str,
) -> NetworkStats {
    let elapsed = previous.map(|prev| current.timestamp.saturating_sub(prev.timestamp));

    let tps = match elapsed {
        Some(secs) => current.tx_count as f64 / secs.max(1) as f64,
        None => 0.0,
    };

    let avg_gas_price = gas_price_wei
        .map(format_gwei)
        .unwrap_or_else(|| DEFAULT_GAS_PRICE_GWEI.to_string());

    let network_hashrate = match elapsed {
        Some(secs) if current.gas_limit > 0 => {
            let used_ratio = current.gas_used as f64 / current.gas_limit as f64;
            format!("{:.1} TH/s", used_ratio * secs as f64 * 1.5)
        }
        _ => DEFAULT_HASHRATE.to_string(),
    };

    NetworkStats {
        latest_block: current.number,
        tps: (tps * 100.0).round() / 100.0,
        avg_gas_price,
        total_txs: current.tx_count,
        network_hashrate,
        native_currency: native_currency.to_string(),
    }
}

fn format_gwei(wei: U256) -> String {
    let wei = if wei > U256::from(u128::MAX) {
        u128::MAX
    } else {
        wei.as_u128()
    };
    format!("{:.4}", wei as f64 / 1e9)
}
