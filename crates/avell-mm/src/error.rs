//! Quoting engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Estimator invariant violated: {0}")]
    Fatal(String),
}

pub type QuoteResult<T> = Result<T, QuoteError>;
