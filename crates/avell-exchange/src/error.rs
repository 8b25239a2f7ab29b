//! Exchange error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Not connected")]
    NotConnected,

    #[error("Unknown order: {0}")]
    UnknownOrder(u64),

    #[error("Invalid order parameters: {0}")]
    InvalidOrder(String),

    #[error("Operation not supported by this venue: {0}")]
    Unsupported(&'static str),
}

impl ExchangeError {
    /// Whether the failure is worth a retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited | Self::Timeout(_)
        )
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
