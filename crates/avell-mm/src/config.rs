//! Quoting engine configuration.

use crate::error::{QuoteError, QuoteResult};
use chrono::Timelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading-session profile used for the regime multiplier.
///
/// Quoting outside the configured session widens the spread by 20%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimezoneProfile {
    /// 00:00-08:00 UTC.
    Asia,
    /// 07:00-16:00 UTC.
    Eu,
    /// 13:00-22:00 UTC.
    Us,
    /// Always in session.
    #[default]
    Global,
}

impl TimezoneProfile {
    /// Whether the given wall-clock time falls inside the session window.
    pub fn in_session(&self, timestamp_ms: u64) -> bool {
        let hour = chrono::DateTime::from_timestamp_millis(timestamp_ms as i64)
            .map(|dt| dt.hour())
            .unwrap_or(0);
        match self {
            Self::Asia => hour < 8,
            Self::Eu => (7..16).contains(&hour),
            Self::Us => (13..22).contains(&hour),
            Self::Global => true,
        }
    }

    /// Spread factor: 1.0 inside the session, 1.2 outside.
    pub fn factor(&self, timestamp_ms: u64) -> f64 {
        if self.in_session(timestamp_ms) {
            1.0
        } else {
            1.2
        }
    }
}

fn default_gamma() -> f64 {
    0.6
}
fn default_volatility_window_ms() -> u64 {
    60_000
}
fn default_intensity_window_ms() -> u64 {
    60_000
}
fn default_max_inventory_pct() -> f64 {
    5.0
}
fn default_obi_weight() -> f64 {
    0.0
}
fn default_post_only_offset() -> Decimal {
    Decimal::ONE
}
fn default_ttl_ms() -> u64 {
    500
}
fn default_repost_ms() -> u64 {
    200
}
fn default_ladder_levels() -> u32 {
    3
}
fn default_alpha_size_ratio() -> Decimal {
    Decimal::ONE
}
fn default_base_notional() -> Decimal {
    Decimal::from(1_000)
}
fn default_vol_regime_scaler() -> f64 {
    0.5
}

/// Stoikov quoting parameters.
///
/// `validate()` must pass before the engine is constructed; out-of-range
/// parameters are a fatal configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoikovConfig {
    /// Risk aversion γ.
    #[serde(default = "default_gamma")]
    pub gamma: f64,

    /// EWMA window for the volatility estimator.
    #[serde(default = "default_volatility_window_ms")]
    pub volatility_window_ms: u64,

    /// Sliding window for trade-arrival intensity.
    #[serde(default = "default_intensity_window_ms")]
    pub intensity_window_ms: u64,

    /// Hard inventory cap as percent of NAV.
    #[serde(default = "default_max_inventory_pct")]
    pub max_inventory_pct: f64,

    /// Reservation-price lean per unit of order-book imbalance.
    /// Applied as `obi_weight * obi * spread / 2`.
    #[serde(default = "default_obi_weight")]
    pub obi_weight: f64,

    /// Use the microprice instead of the mid as the reservation base.
    #[serde(default)]
    pub microprice_bias: bool,

    /// Ladder offset step, in ticks.
    #[serde(default = "default_post_only_offset")]
    pub post_only_offset: Decimal,

    /// Per-order time-to-live.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Minimum interval between ladder placements.
    #[serde(default = "default_repost_ms")]
    pub repost_ms: u64,

    /// Quote levels per side.
    #[serde(default = "default_ladder_levels")]
    pub ladder_levels: u32,

    /// Scale factor applied to the base notional.
    #[serde(default = "default_alpha_size_ratio")]
    pub alpha_size_ratio: Decimal,

    /// Base quoting notional per side.
    #[serde(default = "default_base_notional")]
    pub base_notional: Decimal,

    /// Trading-session profile for the regime multiplier.
    #[serde(default)]
    pub timezone_profile: TimezoneProfile,

    /// Sensitivity of the regime multiplier to volatility deviations
    /// from the 0.3 annualised reference.
    #[serde(default = "default_vol_regime_scaler")]
    pub vol_regime_scaler: f64,
}

impl Default for StoikovConfig {
    fn default() -> Self {
        Self {
            gamma: default_gamma(),
            volatility_window_ms: default_volatility_window_ms(),
            intensity_window_ms: default_intensity_window_ms(),
            max_inventory_pct: default_max_inventory_pct(),
            obi_weight: default_obi_weight(),
            microprice_bias: false,
            post_only_offset: default_post_only_offset(),
            ttl_ms: default_ttl_ms(),
            repost_ms: default_repost_ms(),
            ladder_levels: default_ladder_levels(),
            alpha_size_ratio: default_alpha_size_ratio(),
            base_notional: default_base_notional(),
            timezone_profile: TimezoneProfile::default(),
            vol_regime_scaler: default_vol_regime_scaler(),
        }
    }
}

impl StoikovConfig {
    /// Validate parameter ranges. Called at engine construction;
    /// violations are fatal.
    pub fn validate(&self) -> QuoteResult<()> {
        if !(self.gamma > 0.0 && self.gamma <= 5.0) {
            return Err(QuoteError::InvalidConfig(format!(
                "gamma must be in (0, 5], got {}",
                self.gamma
            )));
        }
        if !(1_000..=600_000).contains(&self.volatility_window_ms) {
            return Err(QuoteError::InvalidConfig(format!(
                "volatility_window_ms must be in [1s, 10min], got {}",
                self.volatility_window_ms
            )));
        }
        if !(self.max_inventory_pct > 0.0 && self.max_inventory_pct <= 50.0) {
            return Err(QuoteError::InvalidConfig(format!(
                "max_inventory_pct must be in (0, 50], got {}",
                self.max_inventory_pct
            )));
        }
        if !(100..=5_000).contains(&self.ttl_ms) {
            return Err(QuoteError::InvalidConfig(format!(
                "ttl_ms must be in [100ms, 5s], got {}",
                self.ttl_ms
            )));
        }
        if !(50..=1_000).contains(&self.repost_ms) {
            return Err(QuoteError::InvalidConfig(format!(
                "repost_ms must be in [50ms, 1s], got {}",
                self.repost_ms
            )));
        }
        if self.intensity_window_ms == 0 {
            return Err(QuoteError::InvalidConfig(
                "intensity_window_ms must be positive".to_string(),
            ));
        }
        if self.ladder_levels == 0 {
            return Err(QuoteError::InvalidConfig(
                "ladder_levels must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
