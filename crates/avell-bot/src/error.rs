//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] avell_feed::FeedError),

    #[error("Quoting error: {0}")]
    Quote(#[from] avell_mm::QuoteError),

    #[error("Risk error: {0}")]
    Risk(#[from] avell_risk::RiskError),

    #[error("Detector error: {0}")]
    Detector(#[from] avell_detector::DetectorError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] avell_exchange::ExchangeError),

    #[error("Executor error: {0}")]
    Executor(#[from] avell_executor::ExecError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] avell_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fatal: {0}")]
    Fatal(String),
}

pub type AppResult<T> = Result<T, AppError>;
