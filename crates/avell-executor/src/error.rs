//! Executor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] avell_exchange::ExchangeError),

    #[error("Flatten incomplete: {0}")]
    FlattenIncomplete(String),
}

pub type ExecResult<T> = Result<T, ExecError>;
