//! Avellaneda-Stoikov quoting engine.
//!
//! Maintains the volatility and trade-intensity estimators and derives
//! two-sided quotes (reservation price, half-spread, ladder sizes) on
//! demand from the latest market and inventory state.

pub mod config;
pub mod engine;
pub mod error;
pub mod estimators;
pub mod inventory;

pub use config::{StoikovConfig, TimezoneProfile};
pub use engine::{StoikovEngine, StoikovQuotes};
pub use error::{QuoteError, QuoteResult};
pub use estimators::{IntensityEstimator, VolatilityEstimator};
pub use inventory::InventoryState;
