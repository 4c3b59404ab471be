use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::{error::RegistryError, eth::ChainRpc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Active,
    Failed { since: Instant },
}

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub liveness: Liveness,
    pub latency: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub name: String,
    pub url: String,
    pub active: bool,
    pub latency_ms: Option<u64>,
}

struct Entry {
    endpoint: Endpoint,
    client: Arc<dyn ChainRpc>,
}

/// Chain endpoints in priority order with their liveness.
///
/// A failed endpoint is skipped until `cooldown` has elapsed since its failure,
/// after which it is eligible again without any explicit reset.
pub struct EndpointRegistry {
    entries: Vec<Entry>,
    cooldown: Duration,
    probe_timeout: Duration,
}

impl EndpointRegistry {
    pub fn new(cooldown: Duration, probe_timeout: Duration) -> Self {
        Self {
            entries: Vec::new(),
            cooldown,
            probe_timeout,
        }
    }

    pub fn with_endpoint(
        mut self,
        name: impl Into<String>,
        url: impl Into<String>,
        client: Arc<dyn ChainRpc>,
    ) -> Self {
        self.entries.push(Entry {
            endpoint: Endpoint {
                name: name.into(),
                url: url.into(),
                liveness: Liveness::Active,
                latency: None,
            },
            client,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn endpoint(&self, idx: usize) -> &Endpoint {
        &self.entries[idx].endpoint
    }

    pub fn client(&self, idx: usize) -> Arc<dyn ChainRpc> {
        Arc::clone(&self.entries[idx].client)
    }

    pub fn is_usable(&self, idx: usize) -> bool {
        match self.entries[idx].endpoint.liveness {
            Liveness::Active => true,
            Liveness::Failed { since } => since.elapsed() >= self.cooldown,
        }
    }

    /// First usable endpoint in priority order, without any I/O.
    pub fn select_active(&mut self) -> Option<usize> {
        self.restore_expired();
        (0..self.entries.len()).find(|&idx| self.is_usable(idx))
    }

    pub fn mark_failed(&mut self, idx: usize) {
        let endpoint = &mut self.entries[idx].endpoint;
        endpoint.liveness = Liveness::Failed {
            since: Instant::now(),
        };
        endpoint.latency = None;
        tracing::warn!(
            endpoint = %endpoint.name,
            cooldown_secs = self.cooldown.as_secs(),
            "endpoint marked failed"
        );
    }

    /// Issues `eth_blockNumber` bounded by the probe timeout. Records latency on
    /// success and marks the endpoint failed otherwise.
    pub async fn probe(&mut self, idx: usize) -> bool {
        let client = self.client(idx);
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, client.block_number()).await;

        match outcome {
            Ok(Ok(block)) => {
                let endpoint = &mut self.entries[idx].endpoint;
                endpoint.liveness = Liveness::Active;
                endpoint.latency = Some(started.elapsed());
                tracing::info!(endpoint = %endpoint.name, block, "endpoint probe ok");
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(endpoint = %self.entries[idx].endpoint.name, "probe failed: {}", err);
                self.mark_failed(idx);
                false
            }
            Err(_) => {
                tracing::warn!(
                    endpoint = %self.entries[idx].endpoint.name,
                    "probe timed out after {:?}",
                    self.probe_timeout
                );
                self.mark_failed(idx);
                false
            }
        }
    }

    /// Probes usable endpoints in priority order and returns the first that answers.
    pub async fn select_working(&mut self) -> Result<usize, RegistryError> {
        self.restore_expired();
        for idx in 0..self.entries.len() {
            if !self.is_usable(idx) {
                continue;
            }
            if self.probe(idx).await {
                return Ok(idx);
            }
        }
        Err(RegistryError::NoEndpointAvailable(self.entries.len()))
    }

    pub fn statuses(&self) -> Vec<EndpointStatus> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| EndpointStatus {
                name: entry.endpoint.name.clone(),
                url: entry.endpoint.url.clone(),
                active: self.is_usable(idx),
                latency_ms: entry.endpoint.latency.map(|d| d.as_millis() as u64),
            })
            .collect()
    }

    fn restore_expired(&mut self) {
        let cooldown = self.cooldown;
        for entry in &mut self.entries {
            if let Liveness::Failed { since } = entry.endpoint.liveness {
                if since.elapsed() >= cooldown {
                    tracing::info!(endpoint = %entry.endpoint.name, "endpoint eligible again");
                    entry.endpoint.liveness = Liveness::Active;
                }
            }
        }
    }
}
