//! Patient detector: book observation against the active snapshot.
//!
//! The executor owns the `QuoteSnapshot`; the detector only reads it.
//! Raised events are jittered and gated so no two emissions land closer
//! than `min_requote_interval_ms`; the backlog drains in priority order.

use avell_core::{L2Book, LevelKey, OrderSide, Price, QuoteSnapshot};
use avell_feed::MarketState;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::events::PatientEvent;

fn default_top_n_threshold() -> usize {
    3
}
fn default_queue_ahead_ratio() -> Decimal {
    Decimal::TWO
}
fn default_drift_threshold_bps() -> Decimal {
    Decimal::TEN
}
fn default_drift_check_interval_ms() -> u64 {
    500
}
fn default_max_session_ttl_ms() -> u64 {
    30_000
}
fn default_level_ttl_ms() -> u64 {
    5_000
}
fn default_min_requote_interval_ms() -> u64 {
    200
}
fn default_jitter_ms() -> u64 {
    50
}
fn default_improvement_ticks() -> u32 {
    1
}
fn default_improvement_max() -> u32 {
    3
}

/// Level-improvement settings for queue-ahead responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelImprovementConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ticks of improvement per step.
    #[serde(default = "default_improvement_ticks")]
    pub ticks: u32,
    /// Maximum improvements per level per session.
    #[serde(default = "default_improvement_max")]
    pub max: u32,
}

impl Default for LevelImprovementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ticks: default_improvement_ticks(),
            max: default_improvement_max(),
        }
    }
}

/// Patient detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientConfig {
    /// Our quote must sit within the top N of its side.
    #[serde(default = "default_top_n_threshold")]
    pub top_n_threshold: usize,

    /// Queue-ahead threshold as a multiple of same-side top depth.
    #[serde(default = "default_queue_ahead_ratio")]
    pub queue_ahead_threshold_ratio: Decimal,

    /// Mid drift since post that triggers a requote, in bps.
    #[serde(default = "default_drift_threshold_bps")]
    pub drift_threshold_bps: Decimal,

    /// Minimum interval between drift checks.
    #[serde(default = "default_drift_check_interval_ms")]
    pub drift_check_interval_ms: u64,

    /// Session lifetime before a full requote.
    #[serde(default = "default_max_session_ttl_ms")]
    pub max_session_ttl_ms: u64,

    /// Per-level lifetime before a level requote.
    #[serde(default = "default_level_ttl_ms")]
    pub level_ttl_ms: u64,

    /// Emission gate: no two events closer than this.
    #[serde(default = "default_min_requote_interval_ms")]
    pub min_requote_interval_ms: u64,

    /// Upper bound of the uniform jitter added to each event.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Level improvement behaviour.
    #[serde(default)]
    pub level_improvement: LevelImprovementConfig,
}

impl Default for PatientConfig {
    fn default() -> Self {
        Self {
            top_n_threshold: default_top_n_threshold(),
            queue_ahead_threshold_ratio: default_queue_ahead_ratio(),
            drift_threshold_bps: default_drift_threshold_bps(),
            drift_check_interval_ms: default_drift_check_interval_ms(),
            max_session_ttl_ms: default_max_session_ttl_ms(),
            level_ttl_ms: default_level_ttl_ms(),
            min_requote_interval_ms: default_min_requote_interval_ms(),
            jitter_ms: default_jitter_ms(),
            level_improvement: LevelImprovementConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: PatientEvent,
    due_ms: u64,
    seq: u64,
}

/// Observes book updates against the active quote snapshot.
pub struct PatientDetector {
    config: PatientConfig,
    tick_size: Price,
    pending: Vec<QueuedEvent>,
    last_emit_ms: u64,
    last_drift_check_ms: u64,
    /// Session the dedup state belongs to.
    session_created_ms: u64,
    session_ttl_raised: bool,
    level_ttl_raised: HashSet<LevelKey>,
    seq: u64,
    rng: StdRng,
}

impl PatientDetector {
    pub fn new(config: PatientConfig, tick_size: Price) -> Self {
        Self {
            config,
            tick_size,
            pending: Vec::new(),
            last_emit_ms: 0,
            last_drift_check_ms: 0,
            session_created_ms: 0,
            session_ttl_raised: false,
            level_ttl_raised: HashSet::new(),
            seq: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic construction for tests.
    pub fn with_seed(config: PatientConfig, tick_size: Price, seed: u64) -> Self {
        let mut d = Self::new(config, tick_size);
        d.rng = StdRng::seed_from_u64(seed);
        d
    }

    pub fn config(&self) -> &PatientConfig {
        &self.config
    }

    /// Check the live book/market against the snapshot, queuing any
    /// triggered events. Call once per book update.
    pub fn observe(
        &mut self,
        book: &L2Book,
        market: &MarketState,
        snapshot: &QuoteSnapshot,
        now_ms: u64,
    ) {
        if snapshot.is_empty() {
            return;
        }

        self.roll_session(snapshot);

        self.check_top_n(book, snapshot, now_ms);
        self.check_queue_ahead(book, snapshot, now_ms);
        self.check_drift(market, snapshot, now_ms);
        self.check_level_ttl(snapshot, now_ms);
        self.check_session_ttl(snapshot, now_ms);
    }

    /// Emit the next due event, honouring the minimum interval gate.
    /// Drains in priority order, FIFO within a priority.
    pub fn poll(&mut self, now_ms: u64) -> Option<PatientEvent> {
        if now_ms.saturating_sub(self.last_emit_ms) < self.config.min_requote_interval_ms {
            return None;
        }

        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, q)| q.due_ms <= now_ms)
            .max_by(|(_, a), (_, b)| {
                a.event
                    .priority()
                    .cmp(&b.event.priority())
                    .then(b.seq.cmp(&a.seq))
            })
            .map(|(i, _)| i)?;

        let queued = self.pending.remove(idx);
        self.last_emit_ms = now_ms;
        debug!(event = %queued.event, "patient event emitted");
        Some(queued.event)
    }

    /// Pending events not yet due or gated.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop all queued events (session ended).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    fn roll_session(&mut self, snapshot: &QuoteSnapshot) {
        if snapshot.created_at_ms != self.session_created_ms {
            self.session_created_ms = snapshot.created_at_ms;
            self.session_ttl_raised = false;
            self.level_ttl_raised.clear();
            self.pending.clear();
        }
    }

    fn check_top_n(&mut self, book: &L2Book, snapshot: &QuoteSnapshot, now_ms: u64) {
        let n = self.config.top_n_threshold;
        let tick = self.tick_size;

        let keys: Vec<(LevelKey, Price)> = snapshot
            .levels
            .iter()
            .map(|(key, lvl)| (*key, lvl.price))
            .collect();

        for (key, price) in keys {
            // Sub-tick tolerance: a level one full tick away is a
            // different price, not ours.
            let in_top_n = book
                .side(key.side)
                .iter()
                .take(n)
                .any(|lvl| lvl.price.abs_diff(price) < tick.inner());

            if !in_top_n {
                self.enqueue(
                    PatientEvent::TopNExit {
                        side: key.side,
                        price,
                        top_n: n,
                    },
                    now_ms,
                );
            }
        }
    }

    fn check_queue_ahead(&mut self, book: &L2Book, snapshot: &QuoteSnapshot, now_ms: u64) {
        let tick = self.tick_size;
        let ratio = self.config.queue_ahead_threshold_ratio;

        let keys: Vec<(LevelKey, Price)> = snapshot
            .levels
            .iter()
            .map(|(key, lvl)| (*key, lvl.price))
            .collect();

        for (key, price) in keys {
            let side_levels = book.side(key.side);
            let Some(top) = side_levels.first() else {
                continue;
            };
            let top_depth = top.size.inner();
            if top_depth.is_zero() {
                continue;
            }

            // Queue-behind estimate: resting size at our exact price.
            let resting: Decimal = side_levels
                .iter()
                .filter(|lvl| lvl.price.abs_diff(price) < tick.inner())
                .map(|lvl| lvl.size.inner())
                .sum();

            if resting > ratio * top_depth {
                self.enqueue(PatientEvent::QueueAhead { key }, now_ms);
            }
        }
    }

    fn check_drift(&mut self, market: &MarketState, snapshot: &QuoteSnapshot, now_ms: u64) {
        if now_ms.saturating_sub(self.last_drift_check_ms) < self.config.drift_check_interval_ms {
            return;
        }
        self.last_drift_check_ms = now_ms;

        let Some(drift_bps) = market.mid.bps_from(snapshot.mid_at_post) else {
            return;
        };

        if drift_bps.abs() > self.config.drift_threshold_bps {
            self.enqueue(PatientEvent::Drift { drift_bps }, now_ms);
        }
    }

    fn check_level_ttl(&mut self, snapshot: &QuoteSnapshot, now_ms: u64) {
        for key in snapshot.expired_levels(now_ms) {
            if self.level_ttl_raised.insert(key) {
                self.enqueue(PatientEvent::LevelTtl { key }, now_ms);
            }
        }
    }

    fn check_session_ttl(&mut self, snapshot: &QuoteSnapshot, now_ms: u64) {
        if !self.session_ttl_raised && snapshot.session_expired(now_ms) {
            self.session_ttl_raised = true;
            self.enqueue(PatientEvent::SessionTtl, now_ms);
        }
    }

    fn enqueue(&mut self, event: PatientEvent, now_ms: u64) {
        // One pending event per trigger target.
        if self.pending.iter().any(|q| same_trigger(&q.event, &event)) {
            return;
        }

        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.config.jitter_ms)
        };

        self.seq += 1;
        self.pending.push(QueuedEvent {
            event,
            due_ms: now_ms + jitter,
            seq: self.seq,
        });
    }
}

/// Whether two events refer to the same trigger target.
fn same_trigger(a: &PatientEvent, b: &PatientEvent) -> bool {
    match (a, b) {
        (
            PatientEvent::TopNExit { side: sa, .. },
            PatientEvent::TopNExit { side: sb, .. },
        ) => sa == sb,
        (PatientEvent::QueueAhead { key: ka }, PatientEvent::QueueAhead { key: kb }) => ka == kb,
        (PatientEvent::Drift { .. }, PatientEvent::Drift { .. }) => true,
        (PatientEvent::LevelTtl { key: ka }, PatientEvent::LevelTtl { key: kb }) => ka == kb,
        (PatientEvent::SessionTtl, PatientEvent::SessionTtl) => true,
        _ => false,
    }
}

/// Compute the improved price for a queue-ahead response: one step
/// closer to the touch, better for us.
pub fn improved_price(side: OrderSide, price: Price, ticks: u32, tick_size: Price) -> Price {
    let step = tick_size.inner() * Decimal::from(ticks);
    match side {
        OrderSide::Buy => Price::new(price.inner() + step),
        OrderSide::Sell => Price::new(price.inner() - step),
    }
}
