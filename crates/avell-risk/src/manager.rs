//! Risk aggregation, limit evaluation, and trade gating.
//!
//! The manager exclusively owns PnL watermarks and the windowed failure,
//! order-rate, and volatility buffers. Limit breaches produce typed
//! events with a prescribed action; they are never retried.

use std::collections::VecDeque;

use avell_mm::InventoryState;
use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::limits::RiskLimits;

/// Window for the consecutive-failure counter (5 minutes).
const FAILURE_WINDOW_MS: u64 = 300_000;

/// Window for the order-rate counter (1 second).
const ORDER_RATE_WINDOW_MS: u64 = 1_000;

/// Window for the volatility baseline (1 hour).
const VOL_BASELINE_WINDOW_MS: u64 = 3_600_000;

/// Spike ratio above which the spread multiplier starts scaling.
const SPIKE_SPREAD_TRIGGER: f64 = 1.5;

/// What a breached limit demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskAction {
    /// Close the net position and cancel all quotes.
    Flatten,
    /// Stop trading entirely until manual reset.
    Stop,
    /// Keep quoting with reduced size.
    ReduceSize,
    /// Informational only.
    Warn,
    /// Pause quoting for a configured duration.
    Pause,
}

/// Which limit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskKind {
    InventoryLimit,
    DriftLimit,
    SessionDrawdown,
    DailyDrawdown,
    ConsecutiveFailures,
    VolSpike,
    RateLimit,
    EmergencyStop,
    NewsStop,
}

impl std::fmt::Display for RiskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InventoryLimit => "inventory_limit",
            Self::DriftLimit => "drift_limit",
            Self::SessionDrawdown => "session_dd",
            Self::DailyDrawdown => "daily_dd",
            Self::ConsecutiveFailures => "consecutive_failures",
            Self::VolSpike => "vol_spike",
            Self::RateLimit => "rate_limit",
            Self::EmergencyStop => "emergency_stop",
            Self::NewsStop => "news_stop",
        };
        write!(f, "{s}")
    }
}

/// Warning (approaching the limit) or the limit itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskSeverity {
    Warning,
    Limit,
}

/// A limit or warning event raised during evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvent {
    pub kind: RiskKind,
    pub severity: RiskSeverity,
    pub action: RiskAction,
    /// Observed value.
    pub value: f64,
    /// Configured limit.
    pub limit: f64,
    pub at_ms: u64,
}

/// Aggregate risk level derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Read-only metrics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub inventory_pct: f64,
    pub drift_bps: f64,
    pub session_dd_pct: f64,
    pub daily_dd_pct: f64,
    pub consecutive_failures: u32,
    pub orders_per_second: f64,
    pub vol_spike_ratio: f64,
    pub overall_risk_score: f64,
    pub risk_level: RiskLevel,
    pub is_flat: bool,
    pub in_cooldown: bool,
    pub emergency_stopped: bool,
}

/// The risk manager.
pub struct RiskManager {
    limits: RiskLimits,
    inventory: Option<InventoryState>,
    session_pnl: f64,
    daily_pnl: f64,
    session_hwm: f64,
    daily_hwm: f64,
    /// Venue failure timestamps inside the trailing window.
    failures: VecDeque<u64>,
    /// Order submission timestamps inside the trailing window.
    orders: VecDeque<u64>,
    /// Volatility samples for the baseline.
    vol_samples: VecDeque<(u64, f64)>,
    current_vol: f64,
    cooldown_until_ms: u64,
    news_until_ms: u64,
    emergency_stopped: bool,
    last_reset_date: Option<NaiveDate>,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> crate::error::RiskResult<Self> {
        limits.validate()?;
        Ok(Self {
            limits,
            inventory: None,
            session_pnl: 0.0,
            daily_pnl: 0.0,
            session_hwm: 0.0,
            daily_hwm: 0.0,
            failures: VecDeque::new(),
            orders: VecDeque::new(),
            vol_samples: VecDeque::new(),
            current_vol: 0.0,
            cooldown_until_ms: 0,
            news_until_ms: 0,
            emergency_stopped: false,
            last_reset_date: None,
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Ingest the latest inventory snapshot.
    pub fn update_inventory(&mut self, inventory: InventoryState) {
        self.inventory = Some(inventory);
    }

    /// Record realised PnL (positive or negative) against both the
    /// session and the daily watermarks.
    pub fn record_pnl(&mut self, delta: f64) {
        self.session_pnl += delta;
        self.daily_pnl += delta;
        self.session_hwm = self.session_hwm.max(self.session_pnl);
        self.daily_hwm = self.daily_hwm.max(self.daily_pnl);
    }

    /// Record a venue failure (rejected order, timeout, network error).
    pub fn record_failure(&mut self, now_ms: u64) {
        self.failures.push_back(now_ms);
    }

    /// Record an order submission, for rate accounting.
    pub fn record_order(&mut self, now_ms: u64) {
        self.orders.push_back(now_ms);
    }

    /// Record a volatility sample for the baseline and spike ratio.
    pub fn record_volatility(&mut self, sigma: f64, now_ms: u64) {
        if sigma >= 0.0 && sigma.is_finite() {
            self.current_vol = sigma;
            self.vol_samples.push_back((now_ms, sigma));
        }
    }

    /// Manual emergency stop.
    pub fn trigger_emergency_stop(&mut self) {
        warn!("emergency stop engaged");
        self.emergency_stopped = true;
    }

    /// Clear the emergency stop and cancel any running cooldown.
    pub fn reset_emergency_stop(&mut self) {
        info!("emergency stop reset");
        self.emergency_stopped = false;
        self.cooldown_until_ms = 0;
    }

    /// Manual news stop: pause quoting for the configured duration.
    pub fn trigger_news_stop(&mut self, now_ms: u64) {
        self.news_until_ms = now_ms + self.limits.news_pause_ms;
        warn!(until_ms = self.news_until_ms, "news stop engaged");
    }

    /// Start the post-flatten cooldown.
    pub fn start_cooldown(&mut self, now_ms: u64, duration_ms: u64) {
        self.cooldown_until_ms = self.cooldown_until_ms.max(now_ms + duration_ms);
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        now_ms < self.cooldown_until_ms
    }

    /// True iff not emergency-stopped, not news-stopped, and not cooling down.
    pub fn can_trade(&self, now_ms: u64) -> bool {
        !self.emergency_stopped && now_ms >= self.news_until_ms && !self.in_cooldown(now_ms)
    }

    /// Session drawdown in percent of the high-water mark.
    ///
    /// Zero while the HWM is non-positive, so a session that never went
    /// profitable cannot divide by a meaningless watermark.
    pub fn session_dd_pct(&self) -> f64 {
        drawdown_pct(self.session_hwm, self.session_pnl)
    }

    pub fn daily_dd_pct(&self) -> f64 {
        drawdown_pct(self.daily_hwm, self.daily_pnl)
    }

    /// Mean volatility over the trailing hour.
    pub fn baseline_sigma(&self, now_ms: u64) -> f64 {
        let cutoff = now_ms.saturating_sub(VOL_BASELINE_WINDOW_MS);
        let mut sum = 0.0;
        let mut n = 0usize;
        for &(ts, sigma) in &self.vol_samples {
            if ts >= cutoff {
                sum += sigma;
                n += 1;
            }
        }
        if n == 0 {
            0.0
        } else {
            sum / n as f64
        }
    }

    /// Volatility spike ratio against the hourly baseline.
    pub fn vol_spike_ratio(&self, now_ms: u64) -> f64 {
        let baseline = self.baseline_sigma(now_ms);
        if baseline <= 0.0 {
            return 1.0;
        }
        self.current_vol / baseline
    }

    fn failures_in_window(&self, now_ms: u64) -> u32 {
        let cutoff = now_ms.saturating_sub(FAILURE_WINDOW_MS);
        self.failures.iter().filter(|&&ts| ts >= cutoff).count() as u32
    }

    fn orders_per_second(&self, now_ms: u64) -> f64 {
        let cutoff = now_ms.saturating_sub(ORDER_RATE_WINDOW_MS);
        self.orders.iter().filter(|&&ts| ts >= cutoff).count() as f64
    }

    /// Evaluate every limit. Intended to run at 1 Hz or faster.
    pub fn evaluate(&mut self, now_ms: u64) -> Vec<RiskEvent> {
        let mut events = Vec::new();
        let warn_frac = self.limits.warn_fraction_pct / 100.0;

        let (nav_pct, drift_bps) = self
            .inventory
            .as_ref()
            .map(|inv| (inv.nav_pct_f64(), decimal_f64(inv.drift_bps)))
            .unwrap_or((0.0, 0.0));

        check_limit(
            &mut events,
            RiskKind::InventoryLimit,
            RiskAction::Flatten,
            nav_pct.abs(),
            self.limits.max_inventory_pct,
            warn_frac,
            now_ms,
        );
        check_limit(
            &mut events,
            RiskKind::DriftLimit,
            RiskAction::Flatten,
            drift_bps.abs(),
            self.limits.drift_cut_bps,
            warn_frac,
            now_ms,
        );
        check_limit(
            &mut events,
            RiskKind::SessionDrawdown,
            RiskAction::Flatten,
            self.session_dd_pct(),
            self.limits.session_dd_limit_pct,
            warn_frac,
            now_ms,
        );

        let daily_dd = self.daily_dd_pct();
        if daily_dd > self.limits.daily_dd_limit_pct {
            // Daily drawdown engages the emergency stop.
            events.push(RiskEvent {
                kind: RiskKind::DailyDrawdown,
                severity: RiskSeverity::Limit,
                action: RiskAction::Stop,
                value: daily_dd,
                limit: self.limits.daily_dd_limit_pct,
                at_ms: now_ms,
            });
            if !self.emergency_stopped {
                self.trigger_emergency_stop();
            }
        } else if daily_dd > self.limits.daily_dd_limit_pct * warn_frac {
            events.push(RiskEvent {
                kind: RiskKind::DailyDrawdown,
                severity: RiskSeverity::Warning,
                action: RiskAction::Warn,
                value: daily_dd,
                limit: self.limits.daily_dd_limit_pct,
                at_ms: now_ms,
            });
        }

        let failures = self.failures_in_window(now_ms);
        if failures >= self.limits.max_consecutive_fails {
            events.push(RiskEvent {
                kind: RiskKind::ConsecutiveFailures,
                severity: RiskSeverity::Limit,
                action: RiskAction::Flatten,
                value: failures as f64,
                limit: self.limits.max_consecutive_fails as f64,
                at_ms: now_ms,
            });
        }

        let spike = self.vol_spike_ratio(now_ms);
        if spike > self.limits.vol_spike_threshold {
            events.push(RiskEvent {
                kind: RiskKind::VolSpike,
                severity: RiskSeverity::Limit,
                action: RiskAction::ReduceSize,
                value: spike,
                limit: self.limits.vol_spike_threshold,
                at_ms: now_ms,
            });
            self.start_cooldown(now_ms, self.limits.vol_spike_cooldown_ms);
        }

        let rate = self.orders_per_second(now_ms);
        if rate > self.limits.max_orders_per_second {
            events.push(RiskEvent {
                kind: RiskKind::RateLimit,
                severity: RiskSeverity::Limit,
                action: RiskAction::Warn,
                value: rate,
                limit: self.limits.max_orders_per_second,
                at_ms: now_ms,
            });
        }

        events
    }

    /// Normalised component scores and the weighted overall score.
    pub fn overall_risk_score(&self) -> f64 {
        let (nav_pct, drift_bps) = self
            .inventory
            .as_ref()
            .map(|inv| (inv.nav_pct_f64(), decimal_f64(inv.drift_bps)))
            .unwrap_or((0.0, 0.0));

        let inv_score = (nav_pct.abs() / self.limits.max_inventory_pct).clamp(0.0, 1.0);
        let drift_score = (drift_bps.abs() / self.limits.drift_cut_bps).clamp(0.0, 1.0);
        let dd_score = (self.session_dd_pct() / self.limits.session_dd_limit_pct)
            .max(self.daily_dd_pct() / self.limits.daily_dd_limit_pct)
            .clamp(0.0, 1.0);

        0.4 * inv_score + 0.3 * drift_score + 0.3 * dd_score
    }

    pub fn risk_level(&self) -> RiskLevel {
        RiskLevel::from_score(self.overall_risk_score())
    }

    /// Size multiplier applied to quote sizes: 0 at critical, 0.5 at
    /// high, 0.8 at medium, 1.0 otherwise.
    pub fn size_multiplier(&self) -> f64 {
        match self.risk_level() {
            RiskLevel::Critical => 0.0,
            RiskLevel::High => 0.5,
            RiskLevel::Medium => 0.8,
            RiskLevel::Low => 1.0,
        }
    }

    /// Spread multiplier: spike-scaled base times a level extra, capped.
    pub fn spread_multiplier(&self, now_ms: u64) -> f64 {
        let spike = self.vol_spike_ratio(now_ms);
        let base = if spike > SPIKE_SPREAD_TRIGGER {
            spike.max(1.0)
        } else {
            1.0
        };
        let extra = match self.risk_level() {
            RiskLevel::Critical => 2.0,
            RiskLevel::High => 1.5,
            _ => 1.0,
        };
        (base * extra).min(self.limits.max_spread_multiplier)
    }

    /// Metrics snapshot, copied out.
    pub fn metrics(&self, now_ms: u64) -> RiskMetrics {
        let (nav_pct, drift_bps, is_flat) = self
            .inventory
            .as_ref()
            .map(|inv| (inv.nav_pct_f64(), decimal_f64(inv.drift_bps), inv.is_flat()))
            .unwrap_or((0.0, 0.0, true));

        let score = self.overall_risk_score();
        RiskMetrics {
            inventory_pct: nav_pct,
            drift_bps,
            session_dd_pct: self.session_dd_pct(),
            daily_dd_pct: self.daily_dd_pct(),
            consecutive_failures: self.failures_in_window(now_ms),
            orders_per_second: self.orders_per_second(now_ms),
            vol_spike_ratio: self.vol_spike_ratio(now_ms),
            overall_risk_score: score,
            risk_level: RiskLevel::from_score(score),
            is_flat,
            in_cooldown: self.in_cooldown(now_ms),
            emergency_stopped: self.emergency_stopped,
        }
    }

    /// Drop expired entries from the windowed buffers.
    pub fn cleanup(&mut self, now_ms: u64) {
        prune(&mut self.failures, now_ms.saturating_sub(FAILURE_WINDOW_MS));
        prune(&mut self.orders, now_ms.saturating_sub(ORDER_RATE_WINDOW_MS));
        let vol_cutoff = now_ms.saturating_sub(VOL_BASELINE_WINDOW_MS);
        while let Some(&(ts, _)) = self.vol_samples.front() {
            if ts < vol_cutoff {
                self.vol_samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Reset daily counters once per UTC day.
    pub fn maybe_daily_reset(&mut self, now_ms: u64) {
        let Some(today) = DateTime::from_timestamp_millis(now_ms as i64)
            .map(|dt| dt.date_naive())
        else {
            return;
        };

        match self.last_reset_date {
            Some(last) if last.num_days_from_ce() >= today.num_days_from_ce() => {}
            _ => {
                if self.last_reset_date.is_some() {
                    info!(%today, "daily risk reset");
                    self.daily_pnl = 0.0;
                    self.daily_hwm = 0.0;
                }
                self.last_reset_date = Some(today);
            }
        }
    }
}

fn drawdown_pct(hwm: f64, pnl: f64) -> f64 {
    if hwm <= 0.0 {
        return 0.0;
    }
    ((hwm - pnl) / hwm.abs() * 100.0).max(0.0)
}

fn prune(buf: &mut VecDeque<u64>, cutoff: u64) {
    while let Some(&front) = buf.front() {
        if front < cutoff {
            buf.pop_front();
        } else {
            break;
        }
    }
}

fn check_limit(
    events: &mut Vec<RiskEvent>,
    kind: RiskKind,
    action: RiskAction,
    value: f64,
    limit: f64,
    warn_frac: f64,
    now_ms: u64,
) {
    if value > limit {
        events.push(RiskEvent {
            kind,
            severity: RiskSeverity::Limit,
            action,
            value,
            limit,
            at_ms: now_ms,
        });
    } else if value > limit * warn_frac {
        events.push(RiskEvent {
            kind,
            severity: RiskSeverity::Warning,
            action: RiskAction::Warn,
            value,
            limit,
            at_ms: now_ms,
        });
    }
}

fn decimal_f64(d: rust_decimal::Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}
