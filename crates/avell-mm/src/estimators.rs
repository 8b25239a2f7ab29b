//! Rolling volatility and trade-intensity estimators.
//!
//! Both estimators run in `f64`; their outputs only meet `Decimal`
//! arithmetic at the quote boundary. Time is injected as `now_ms` so
//! tests control the clock.

use std::collections::VecDeque;

/// Seconds of trading assumed per year when annualising variance.
const ANNUALISATION_SECONDS: f64 = 252.0 * 86_400.0;

/// EWMA volatility over squared log returns.
///
/// With window `W` seconds the decay is `α = 2/(W+1)`. A gap longer
/// than the window discards the accumulated state, so stale history
/// never leaks into the estimate.
#[derive(Debug, Clone)]
pub struct VolatilityEstimator {
    window_ms: u64,
    alpha: f64,
    /// EWMA of squared log returns (per-sample variance).
    variance: Option<f64>,
    last_mid: Option<f64>,
    last_update_ms: u64,
}

impl VolatilityEstimator {
    pub fn new(window_ms: u64) -> Self {
        let window_secs = (window_ms as f64 / 1_000.0).max(1.0);
        Self {
            window_ms,
            alpha: 2.0 / (window_secs + 1.0),
            variance: None,
            last_mid: None,
            last_update_ms: 0,
        }
    }

    /// Seed the estimator with an annualised volatility, used before the
    /// first window of observations accumulates.
    pub fn seed_annualized(&mut self, sigma: f64) {
        if sigma >= 0.0 {
            self.variance = Some(sigma * sigma / ANNUALISATION_SECONDS);
        }
    }

    /// Record a new mid price observation.
    pub fn update(&mut self, mid: f64, now_ms: u64) {
        if mid <= 0.0 {
            return;
        }

        // Data older than the window is discarded wholesale.
        if self.last_update_ms > 0 && now_ms.saturating_sub(self.last_update_ms) > self.window_ms {
            self.last_mid = None;
        }

        if let Some(prev) = self.last_mid {
            let r = (mid / prev).ln();
            let r2 = r * r;
            self.variance = Some(match self.variance {
                Some(v) => self.alpha * r2 + (1.0 - self.alpha) * v,
                None => r2,
            });
        }

        self.last_mid = Some(mid);
        self.last_update_ms = now_ms;
    }

    /// Annualised volatility. Zero until any estimate exists.
    pub fn sigma(&self) -> f64 {
        match self.variance {
            Some(v) if v >= 0.0 => (v * ANNUALISATION_SECONDS).sqrt(),
            _ => 0.0,
        }
    }

    /// Whether an estimate is available.
    pub fn has_estimate(&self) -> bool {
        self.variance.is_some()
    }
}

/// Trade-arrival intensity over a sliding window.
#[derive(Debug, Clone)]
pub struct IntensityEstimator {
    window_ms: u64,
    timestamps: VecDeque<u64>,
}

impl IntensityEstimator {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            timestamps: VecDeque::new(),
        }
    }

    /// Record one trade print.
    pub fn record(&mut self, timestamp_ms: u64) {
        self.timestamps.push_back(timestamp_ms);
    }

    /// Trades per second over the window ending at `now_ms`.
    pub fn intensity(&mut self, now_ms: u64) -> f64 {
        self.prune(now_ms);
        let window_secs = self.window_ms as f64 / 1_000.0;
        if window_secs <= 0.0 {
            return 0.0;
        }
        self.timestamps.len() as f64 / window_secs
    }

    /// Trades currently inside the window.
    pub fn count(&self) -> usize {
        self.timestamps.len()
    }

    fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while let Some(&front) = self.timestamps.front() {
            if front < cutoff {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
