//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Risk breach: {kind}: {reason}")]
    Breach { kind: String, reason: String },
}

pub type RiskResult<T> = Result<T, RiskError>;
