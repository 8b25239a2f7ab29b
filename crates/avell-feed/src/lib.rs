//! Market-data processing for the avell engine.
//!
//! Validates raw L2 snapshots, tracks sequence continuity, and derives
//! the microstructure features (mid, microprice, OBI, depth, impact)
//! published as `MarketState`.

pub mod error;
pub mod market_state;
pub mod processor;

pub use error::{FeedError, FeedResult};
pub use market_state::MarketState;
pub use processor::{BookProcessor, FeedConfig};
