//! Error types shared across the resolution pipeline.

use sled::transaction::TransactionError;
use thiserror::Error;

/// Failure of a single upstream provider call
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{provider} request timed out")]
    Timeout { provider: &'static str },

    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: &'static str },

    #[error("Underlying request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned status {status}")]
    Status {
        provider: &'static str,
        status: String,
    },

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Classify a reqwest failure, keeping timeouts distinct
    pub fn from_request(provider: &'static str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { provider }
        } else {
            ProviderError::Http(err)
        }
    }
}

/// Failure reading or writing the cache store
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Cache entry encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<TransactionError<CacheError>> for CacheError {
    fn from(err: TransactionError<CacheError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => CacheError::Storage(e),
        }
    }
}

/// Error returned to callers of `resolve_resources`
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Missing or invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Rate limited by {provider}")]
    RateLimited { provider: &'static str },

    #[error(transparent)]
    Cache(#[from] CacheError),
}
