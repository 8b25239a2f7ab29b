//! Risk limit configuration.

use crate::error::{RiskError, RiskResult};
use serde::{Deserialize, Serialize};

fn default_max_inventory_pct() -> f64 {
    5.0
}
fn default_drift_cut_bps() -> f64 {
    50.0
}
fn default_session_dd_limit_pct() -> f64 {
    2.0
}
fn default_daily_dd_limit_pct() -> f64 {
    5.0
}
fn default_max_consecutive_fails() -> u32 {
    5
}
fn default_max_orders_per_second() -> f64 {
    10.0
}
fn default_max_spread_multiplier() -> f64 {
    3.0
}
fn default_vol_spike_threshold() -> f64 {
    2.0
}
fn default_vol_spike_cooldown_ms() -> u64 {
    30_000
}
fn default_warn_fraction_pct() -> f64 {
    80.0
}
fn default_cooldown_ms() -> u64 {
    5_000
}
fn default_news_pause_ms() -> u64 {
    300_000
}

/// Hard limits and thresholds for the risk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Hard inventory cap as percent of NAV.
    #[serde(default = "default_max_inventory_pct")]
    pub max_inventory_pct: f64,

    /// Flatten when |drift| exceeds this many basis points.
    #[serde(default = "default_drift_cut_bps")]
    pub drift_cut_bps: f64,

    /// Session drawdown limit in percent of the high-water mark.
    #[serde(default = "default_session_dd_limit_pct")]
    pub session_dd_limit_pct: f64,

    /// Daily drawdown limit; breaching it stops the bot for the day.
    #[serde(default = "default_daily_dd_limit_pct")]
    pub daily_dd_limit_pct: f64,

    /// Venue failures tolerated in the trailing 5 minutes.
    #[serde(default = "default_max_consecutive_fails")]
    pub max_consecutive_fails: u32,

    /// Order submission rate cap.
    #[serde(default = "default_max_orders_per_second")]
    pub max_orders_per_second: f64,

    /// Upper bound on the spread multiplier.
    #[serde(default = "default_max_spread_multiplier")]
    pub max_spread_multiplier: f64,

    /// Volatility spike ratio (current over 1h baseline) that triggers
    /// size reduction and a cooldown.
    #[serde(default = "default_vol_spike_threshold")]
    pub vol_spike_threshold: f64,

    /// Cooldown started on a volatility spike.
    #[serde(default = "default_vol_spike_cooldown_ms")]
    pub vol_spike_cooldown_ms: u64,

    /// Warning fraction of each limit, in percent.
    #[serde(default = "default_warn_fraction_pct")]
    pub warn_fraction_pct: f64,

    /// Quiet period after a risk-driven flatten.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Pause duration for a manual news stop.
    #[serde(default = "default_news_pause_ms")]
    pub news_pause_ms: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_inventory_pct: default_max_inventory_pct(),
            drift_cut_bps: default_drift_cut_bps(),
            session_dd_limit_pct: default_session_dd_limit_pct(),
            daily_dd_limit_pct: default_daily_dd_limit_pct(),
            max_consecutive_fails: default_max_consecutive_fails(),
            max_orders_per_second: default_max_orders_per_second(),
            max_spread_multiplier: default_max_spread_multiplier(),
            vol_spike_threshold: default_vol_spike_threshold(),
            vol_spike_cooldown_ms: default_vol_spike_cooldown_ms(),
            warn_fraction_pct: default_warn_fraction_pct(),
            cooldown_ms: default_cooldown_ms(),
            news_pause_ms: default_news_pause_ms(),
        }
    }
}

impl RiskLimits {
    /// Validate limit ranges; violations are fatal at construction.
    pub fn validate(&self) -> RiskResult<()> {
        if !(self.max_inventory_pct > 0.0 && self.max_inventory_pct <= 50.0) {
            return Err(RiskError::InvalidConfig(format!(
                "max_inventory_pct must be in (0, 50], got {}",
                self.max_inventory_pct
            )));
        }
        if self.drift_cut_bps <= 0.0 {
            return Err(RiskError::InvalidConfig(
                "drift_cut_bps must be positive".to_string(),
            ));
        }
        if self.session_dd_limit_pct <= 0.0 || self.daily_dd_limit_pct <= 0.0 {
            return Err(RiskError::InvalidConfig(
                "drawdown limits must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.warn_fraction_pct) {
            return Err(RiskError::InvalidConfig(format!(
                "warn_fraction_pct must be in [0, 100], got {}",
                self.warn_fraction_pct
            )));
        }
        if self.max_spread_multiplier < 1.0 {
            return Err(RiskError::InvalidConfig(
                "max_spread_multiplier must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}
