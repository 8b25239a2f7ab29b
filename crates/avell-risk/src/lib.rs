//! Risk management for the avell engine.
//!
//! Aggregates inventory, PnL, drift, and volatility into limit events,
//! a trade gate, and size/spread multipliers. Risk breaches are never
//! recoverable locally; they surface as flatten or stop demands.

pub mod error;
pub mod limits;
pub mod manager;

pub use error::{RiskError, RiskResult};
pub use limits::RiskLimits;
pub use manager::{
    RiskAction, RiskEvent, RiskKind, RiskLevel, RiskManager, RiskMetrics, RiskSeverity,
};
