//! Derived market state published by the book processor.

use avell_core::Price;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Microstructure snapshot derived from one validated book.
///
/// `volatility` and `intensity` are filled by the quoting engine, which
/// exclusively owns those estimators; the processor publishes them as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    /// Simple midpoint of the top of book.
    pub mid: Price,
    /// Size-weighted midpoint over the configured level count.
    pub microprice: Price,
    /// Top-of-book spread.
    pub spread: Decimal,
    /// Spread relative to mid, in basis points.
    pub spread_bps: Decimal,
    /// Order-book imbalance over top-N, in [-1, 1].
    pub obi: Decimal,
    /// Sum of top-N bid sizes.
    pub top_bid_depth: Decimal,
    /// Sum of top-N ask sizes.
    pub top_ask_depth: Decimal,
    /// Top-of-book size-weighted mid.
    pub weighted_mid: Price,
    /// Average fill price for selling the probe notional into bids.
    /// Zero when the book cannot absorb it.
    pub impact_bid: Price,
    /// Average fill price for buying the probe notional from asks.
    /// Zero when the book cannot absorb it.
    pub impact_ask: Price,
    /// Annualised volatility (filled by the quoting engine).
    pub volatility: f64,
    /// Trade-arrival intensity in trades/sec (filled by the quoting engine).
    pub intensity: f64,
    /// Book timestamp (Unix milliseconds).
    pub timestamp_ms: u64,
}
