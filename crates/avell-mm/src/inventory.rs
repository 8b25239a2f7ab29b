//! Inventory state derived from venue truth.
//!
//! Rebuilt from the venue position after every fill and at periodic
//! sync intervals; the engine and risk manager hold read-only copies.

use avell_core::{Price, POSITION_EPSILON};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Signed inventory snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InventoryState {
    /// Signed position in base units (positive = long).
    pub position: Decimal,
    /// |exposure| / NAV * 100.
    pub nav_pct: Decimal,
    /// Average entry price of the current position.
    pub entry_price: Price,
    /// Mark-to-market PnL of the open position.
    pub unrealized_pnl: Decimal,
    /// Signed deviation of the current mid from the entry price, in bps.
    pub drift_bps: Decimal,
}

impl InventoryState {
    /// Flat inventory.
    pub fn flat() -> Self {
        Self {
            position: Decimal::ZERO,
            nav_pct: Decimal::ZERO,
            entry_price: Price::ZERO,
            unrealized_pnl: Decimal::ZERO,
            drift_bps: Decimal::ZERO,
        }
    }

    /// Build from venue-reported position and the current mid.
    ///
    /// `nav` must be positive; exposure is marked at `mid`.
    pub fn from_venue(position: Decimal, entry_price: Price, mid: Price, nav: Decimal) -> Self {
        let exposure = (position * mid.inner()).abs();
        let nav_pct = if nav > Decimal::ZERO {
            exposure / nav * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        let unrealized_pnl = if entry_price.is_zero() {
            Decimal::ZERO
        } else {
            (mid.inner() - entry_price.inner()) * position
        };

        let drift_bps = if entry_price.is_zero() || position.is_zero() {
            Decimal::ZERO
        } else {
            mid.bps_from(entry_price).unwrap_or(Decimal::ZERO)
        };

        Self {
            position,
            nav_pct,
            entry_price,
            unrealized_pnl,
            drift_bps,
        }
    }

    /// Whether the position is flat within the epsilon tolerance.
    pub fn is_flat(&self) -> bool {
        self.position.abs().to_f64().unwrap_or(0.0) < POSITION_EPSILON
    }

    /// Signed position for estimator math.
    pub fn position_f64(&self) -> f64 {
        self.position.to_f64().unwrap_or(0.0)
    }

    /// nav_pct for estimator math.
    pub fn nav_pct_f64(&self) -> f64 {
        self.nav_pct.to_f64().unwrap_or(0.0)
    }
}
