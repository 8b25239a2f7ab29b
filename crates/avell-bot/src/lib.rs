//! Bot controller: wires the feed, quoting engine, risk manager,
//! patient detector, and execution engine into one event loop.

pub mod app;
pub mod config;
pub mod error;

pub use app::{apply_multipliers, Bot};
pub use config::BotConfig;
pub use error::{AppError, AppResult};
