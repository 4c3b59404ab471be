use std::time::Duration;

use ethers_providers::ProviderError;

/// Failure of a single data-source or chain RPC request.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    Protocol(String),
    /// Well-formed response without data; the caller moves on to the next source.
    #[error("no data for block {0}")]
    Empty(u64),
    #[error("every block source failed for block {0}")]
    Exhausted(u64),
}

impl FetchError {
    pub fn is_empty(&self) -> bool {
        matches!(self, FetchError::Empty(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Protocol(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

impl From<ProviderError> for FetchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::SerdeJson(e) => FetchError::Protocol(e.to_string()),
            other => FetchError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no endpoint available: all {0} configured endpoints failed")]
    NoEndpointAvailable(usize),
}
