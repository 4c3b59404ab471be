use std::env;
use std::time::Duration;

pub const DEFAULT_RPC_ENDPOINTS: &str = "Monad Official=https://testnet-rpc.monad.xyz,\
Gelato=https://rpc-monad-testnet.t.raas.gelato.cloud,\
Alchemy=https://monad-testnet.g.alchemy.com/v2/demo";
pub const DEFAULT_INDEXER_URLS: &str =
    "https://monad-testnet.hypersync.xyz,https://10143.hypersync.xyz";
pub const DEFAULT_FALLBACK_RPC_URLS: &str =
    "https://monad-testnet.rpc.hypersync.xyz,https://10143.rpc.hypersync.xyz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedUrl {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_endpoints: Vec<NamedUrl>,
    pub indexer_urls: Vec<String>,
    pub fallback_rpc_urls: Vec<String>,
    pub poll_interval: Duration,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub endpoint_cooldown: Duration,
    pub probe_timeout: Duration,
    pub native_currency: String,
    pub http_bind_addr: String,
    pub database_url: Option<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must list at least one endpoint")]
    NoEndpoints(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let rpc_endpoints = parse_named_urls(&var("RPC_ENDPOINTS", DEFAULT_RPC_ENDPOINTS));
        if rpc_endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints("RPC_ENDPOINTS"));
        }
        let indexer_urls = parse_list(&var("INDEXER_URLS", DEFAULT_INDEXER_URLS));
        let fallback_rpc_urls = parse_list(&var("FALLBACK_RPC_URLS", DEFAULT_FALLBACK_RPC_URLS));
        if indexer_urls.is_empty() && fallback_rpc_urls.is_empty() {
            return Err(ConfigError::NoEndpoints("INDEXER_URLS or FALLBACK_RPC_URLS"));
        }

        let poll_interval: u64 = parse_num("POLL_INTERVAL_SECS", &var("POLL_INTERVAL_SECS", "8"))?;
        let batch_size: usize = parse_num("BATCH_SIZE", &var("BATCH_SIZE", "10"))?;
        let batch_delay: u64 = parse_num("BATCH_DELAY_MS", &var("BATCH_DELAY_MS", "100"))?;
        let cooldown: u64 = parse_num("ENDPOINT_COOLDOWN_SECS", &var("ENDPOINT_COOLDOWN_SECS", "30"))?;
        let probe_timeout: u64 = parse_num("PROBE_TIMEOUT_SECS", &var("PROBE_TIMEOUT_SECS", "5"))?;

        if poll_interval == 0 {
            return Err(ConfigError::Invalid {
                name: "POLL_INTERVAL_SECS",
                value: "0".into(),
            });
        }
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "BATCH_SIZE",
                value: "0".into(),
            });
        }

        Ok(Self {
            rpc_endpoints,
            indexer_urls,
            fallback_rpc_urls,
            poll_interval: Duration::from_secs(poll_interval),
            batch_size,
            batch_delay: Duration::from_millis(batch_delay),
            endpoint_cooldown: Duration::from_secs(cooldown),
            probe_timeout: Duration::from_secs(probe_timeout),
            native_currency: var("NATIVE_CURRENCY", "MON"),
            http_bind_addr: var("HTTP_BIND", "127.0.0.1:8080"),
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
        })
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `name=url` pairs; a bare url is named after its host.
fn parse_named_urls(raw: &str) -> Vec<NamedUrl> {
    parse_list(raw)
        .into_iter()
        .map(|item| match item.split_once('=') {
            Some((name, url)) if !url.contains("://") || name.contains("://") => NamedUrl {
                name: host_of(&item),
                url: item,
            },
            Some((name, url)) => NamedUrl {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            None => NamedUrl {
                name: host_of(&item),
                url: item,
            },
        })
        .collect()
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

fn parse_num<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
