//! Detector error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type DetectorResult<T> = Result<T, DetectorError>;
