//! The execution engine and per-order state machine.
//!
//! `MakerPlaced` is the steady state; everything else is transit. The
//! engine exclusively owns the live `ManagedOrder`s and the active
//! `QuoteSnapshot`, and is the only component that talks to the venue.
//!
//! # State machine
//!
//! ```text
//! Idle        --new quote-->            Placing
//! Placing     --ack-->                  MakerPlaced (TTL armed)
//! Placing     --reject-->               Error (retry <= max, 1s * n backoff)
//! MakerPlaced --full fill-->            Filled (requote queued)
//! MakerPlaced --partial >= threshold--> PartialFilled (remainder reposted)
//! MakerPlaced --ttl/book/queue-->       Replacing (cancel + place)
//! MakerPlaced --drift/dd-->             Flattening (IOC close-out)
//! Flattening  --complete-->             Cooldown --expiry--> Idle
//! Error       --recovered-->            Idle
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use avell_core::{
    ClientOrderId, LevelKey, ManagedOrder, OrderSide, OrderState, PatientOrderState, Price,
    QuoteSnapshot, Size, SnapshotLevel,
};
use avell_detector::{improved_price, LevelImprovementConfig, PatientEvent};
use avell_exchange::{
    ExchangeClient, ExchangeError, ExchangeOrder, OrderRequest, OrderStatus, SymbolFilters,
};
use avell_mm::StoikovQuotes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExecError, ExecResult};
use crate::ladder::build_ladder;
use crate::repost::{RepostQueue, RepostReason};
use crate::stats::{ExecStats, ExecStatsSnapshot};

/// Linear backoff step between submission retries.
const RETRY_BACKOFF_MS: u64 = 1_000;

/// Minimum gap between improvements of the same level.
const IMPROVEMENT_MIN_INTERVAL_MS: u64 = 5_000;

/// Cancel/replace strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelReplaceMode {
    /// Single venue call where available, falling back to batch.
    Atomic,
    /// Cancel, short delay, then place.
    #[default]
    Batch,
}

fn default_ladder_levels() -> u32 {
    3
}
fn default_ttl_ms() -> u64 {
    500
}
fn default_repost_ms() -> u64 {
    200
}
fn default_post_only_offset() -> Decimal {
    Decimal::ONE
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_delay_ms() -> u64 {
    50
}
fn default_cooldown_ms() -> u64 {
    5_000
}
fn default_partial_fill_threshold_pct() -> Decimal {
    Decimal::from(50)
}
fn default_flatten_timeout_ms() -> u64 {
    10_000
}
fn default_repost_queue_cap() -> usize {
    16
}
fn default_session_ttl_ms() -> u64 {
    30_000
}
fn default_level_ttl_ms() -> u64 {
    5_000
}
fn default_session_jitter_ms() -> u64 {
    50
}

/// Execution engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "default_ladder_levels")]
    pub ladder_levels: u32,

    /// Per-order time-to-live.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Minimum interval between ladder placements.
    #[serde(default = "default_repost_ms")]
    pub repost_ms: u64,

    /// Ladder offset step, in ticks.
    #[serde(default = "default_post_only_offset")]
    pub post_only_offset: Decimal,

    /// Submission retries before an order is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub cancel_replace: CancelReplaceMode,

    /// Collision-avoidance delay between cancel and place in batch mode.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Quiet period after a flatten.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Cumulative fill percentage that triggers a remainder repost.
    #[serde(default = "default_partial_fill_threshold_pct")]
    pub partial_fill_threshold_pct: Decimal,

    /// Deadline for a flatten before escalation.
    #[serde(default = "default_flatten_timeout_ms")]
    pub flatten_timeout_ms: u64,

    /// Bound on the coalescing repost queue.
    #[serde(default = "default_repost_queue_cap")]
    pub repost_queue_cap: usize,

    /// Quote-session lifetime (jitter added on creation).
    #[serde(default = "default_session_ttl_ms")]
    pub session_ttl_ms: u64,

    /// Per-level lifetime inside a session.
    #[serde(default = "default_level_ttl_ms")]
    pub level_ttl_ms: u64,

    /// Upper bound of the session-expiry jitter.
    #[serde(default = "default_session_jitter_ms")]
    pub session_jitter_ms: u64,

    /// Level improvement on queue-ahead events.
    #[serde(default)]
    pub level_improvement: LevelImprovementConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            ladder_levels: default_ladder_levels(),
            ttl_ms: default_ttl_ms(),
            repost_ms: default_repost_ms(),
            post_only_offset: default_post_only_offset(),
            max_retries: default_max_retries(),
            cancel_replace: CancelReplaceMode::default(),
            batch_delay_ms: default_batch_delay_ms(),
            cooldown_ms: default_cooldown_ms(),
            partial_fill_threshold_pct: default_partial_fill_threshold_pct(),
            flatten_timeout_ms: default_flatten_timeout_ms(),
            repost_queue_cap: default_repost_queue_cap(),
            session_ttl_ms: default_session_ttl_ms(),
            level_ttl_ms: default_level_ttl_ms(),
            session_jitter_ms: default_session_jitter_ms(),
            level_improvement: LevelImprovementConfig::default(),
        }
    }
}

impl ExecConfig {
    pub fn validate(&self) -> ExecResult<()> {
        if self.ladder_levels == 0 {
            return Err(ExecError::InvalidConfig(
                "ladder_levels must be positive".to_string(),
            ));
        }
        if self.partial_fill_threshold_pct <= Decimal::ZERO
            || self.partial_fill_threshold_pct > Decimal::from(100)
        {
            return Err(ExecError::InvalidConfig(
                "partial_fill_threshold_pct must be in (0, 100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fill notification surfaced to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEvent {
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub full: bool,
}

/// Outcome of one ladder placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementReport {
    pub placed: u32,
    pub failed: u32,
    /// True when the rate gate or cooldown suppressed the placement.
    pub gated: bool,
}

/// Outcome of one scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub retried: u32,
    pub abandoned: u32,
    pub failed: u32,
}

/// The execution engine.
pub struct ExecutionEngine<C: ExchangeClient> {
    config: ExecConfig,
    symbol: String,
    filters: SymbolFilters,
    exchange: Arc<C>,
    orders: HashMap<ClientOrderId, ManagedOrder>,
    by_exchange_id: HashMap<u64, ClientOrderId>,
    snapshot: Option<QuoteSnapshot>,
    engine_state: PatientOrderState,
    last_repost_ms: u64,
    repost_queue: RepostQueue,
    cooldown_until_ms: u64,
    stats: ExecStats,
    rng: StdRng,
}

impl<C: ExchangeClient> ExecutionEngine<C> {
    pub fn new(
        config: ExecConfig,
        symbol: impl Into<String>,
        filters: SymbolFilters,
        exchange: Arc<C>,
    ) -> ExecResult<Self> {
        config.validate()?;
        let queue_cap = config.repost_queue_cap;
        Ok(Self {
            config,
            symbol: symbol.into(),
            filters,
            exchange,
            orders: HashMap::new(),
            by_exchange_id: HashMap::new(),
            snapshot: None,
            engine_state: PatientOrderState::Idle,
            last_repost_ms: 0,
            repost_queue: RepostQueue::new(queue_cap),
            cooldown_until_ms: 0,
            stats: ExecStats::default(),
            rng: StdRng::from_entropy(),
        })
    }

    pub fn engine_state(&self) -> PatientOrderState {
        self.engine_state
    }

    pub fn snapshot(&self) -> Option<&QuoteSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn live_order_count(&self) -> usize {
        self.orders.values().filter(|o| o.state.is_live()).count()
    }

    pub fn stats_snapshot(&self) -> ExecStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn in_cooldown(&self, now_ms: u64) -> bool {
        now_ms < self.cooldown_until_ms
    }

    /// Queue a requote request.
    pub fn request_repost(&mut self, reason: RepostReason) {
        self.repost_queue.push(reason);
    }

    /// Pop the next requote request if the rate gate allows a ladder now.
    pub fn take_due_repost(&mut self, now_ms: u64) -> Option<RepostReason> {
        if self.in_cooldown(now_ms) {
            return None;
        }
        if now_ms.saturating_sub(self.last_repost_ms) < self.config.repost_ms {
            return None;
        }
        self.repost_queue.pop()
    }

    /// Place (or replace) the two-sided ladder for a quote.
    ///
    /// `mid` is captured into the snapshot for drift detection. The
    /// placement is suppressed while cooling down or inside the repost
    /// interval.
    pub async fn place_ladder(
        &mut self,
        quotes: &StoikovQuotes,
        mid: Price,
        now_ms: u64,
    ) -> ExecResult<PlacementReport> {
        let mut report = PlacementReport::default();

        if self.in_cooldown(now_ms)
            || (self.last_repost_ms > 0
                && now_ms.saturating_sub(self.last_repost_ms) < self.config.repost_ms)
        {
            report.gated = true;
            return Ok(report);
        }

        let ladder = build_ladder(
            quotes,
            &self.filters,
            self.config.ladder_levels,
            self.config.post_only_offset,
        );
        if ladder.is_empty() {
            return Ok(report);
        }

        self.engine_state = PatientOrderState::QuotePlacing;

        // Existing per-level orders, reusable for atomic replace.
        let mut replaceable: HashMap<LevelKey, u64> = HashMap::new();
        if self.config.cancel_replace == CancelReplaceMode::Atomic {
            for order in self.orders.values() {
                if order.state.is_live() {
                    if let Some(eid) = order.exchange_id {
                        replaceable.insert(LevelKey::new(order.side, order.ladder_level), eid);
                    }
                }
            }
            // Cancel levels the new ladder does not cover.
            let new_keys: Vec<LevelKey> = ladder
                .iter()
                .map(|o| LevelKey::new(o.side, o.level))
                .collect();
            let stale: Vec<u64> = replaceable
                .iter()
                .filter(|(key, _)| !new_keys.contains(key))
                .map(|(_, &eid)| eid)
                .collect();
            for eid in stale {
                self.cancel_by_exchange_id(eid).await;
            }
            replaceable.retain(|key, _| new_keys.contains(key));
        } else {
            self.cancel_session().await;
            if self.config.batch_delay_ms > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(
                    self.config.batch_delay_ms,
                ))
                .await;
            }
        }

        // Errored submissions from the previous session have no venue
        // presence; the new ladder supersedes their retries.
        self.purge_dead_orders();

        let jitter = if self.config.session_jitter_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.config.session_jitter_ms)
        };
        let mut snapshot =
            QuoteSnapshot::new(mid, now_ms + self.config.session_ttl_ms + jitter, now_ms);

        for ladder_order in &ladder {
            let key = LevelKey::new(ladder_order.side, ladder_order.level);
            let client_id = ClientOrderId::new();
            let mut managed = ManagedOrder::new(
                client_id.clone(),
                ladder_order.side,
                ladder_order.price,
                ladder_order.size,
                ladder_order.level,
                now_ms,
                self.config.ttl_ms,
            );

            let request = OrderRequest::post_only_limit(
                self.symbol.clone(),
                ladder_order.side,
                ladder_order.price,
                ladder_order.size,
                client_id.clone(),
            );

            let result = match replaceable.remove(&key) {
                Some(eid) => match self.exchange.replace_order(eid, request.clone()).await {
                    Err(ExchangeError::Unsupported(_)) => {
                        self.cancel_by_exchange_id(eid).await;
                        self.exchange.place_order(request).await
                    }
                    other => {
                        self.forget_exchange_id(eid);
                        other
                    }
                },
                None => self.exchange.place_order(request).await,
            };

            match result {
                Ok(ack) => {
                    managed.state = OrderState::MakerPlaced;
                    managed.exchange_id = Some(ack.exchange_id);
                    self.by_exchange_id.insert(ack.exchange_id, client_id.clone());
                    snapshot.insert_level(
                        key,
                        SnapshotLevel {
                            price: ladder_order.price,
                            size: ladder_order.size,
                            client_id: client_id.clone(),
                            ttl_expiry_ms: now_ms + self.config.level_ttl_ms,
                            improvement_count: 0,
                            last_improvement_ms: 0,
                        },
                    );
                    self.orders.insert(client_id, managed);
                    self.stats.placed += 1;
                    report.placed += 1;
                }
                Err(e) => {
                    warn!(side = %ladder_order.side, level = ladder_order.level, %e, "placement failed");
                    self.stats.failed += 1;
                    report.failed += 1;
                    if self.config.max_retries > 0 {
                        managed.state = OrderState::Error;
                        managed.last_update_ms = now_ms;
                        self.orders.insert(client_id, managed);
                    }
                }
            }
        }

        self.last_repost_ms = now_ms;
        self.stats.reposts += 1;
        if report.placed > 0 {
            self.engine_state = PatientOrderState::WaitingInQueue;
            self.snapshot = Some(snapshot);
        } else {
            self.snapshot = None;
        }

        debug!(
            placed = report.placed,
            failed = report.failed,
            live = self.live_order_count(),
            "ladder placed"
        );
        Ok(report)
    }

    /// Apply a venue order update to the state machine.
    ///
    /// Returns a fill event when size executed, so the controller can
    /// refresh inventory from venue truth.
    pub fn on_order_update(&mut self, update: &ExchangeOrder, now_ms: u64) -> Option<FillEvent> {
        let client_id = update
            .client_id
            .clone()
            .filter(|cid| self.orders.contains_key(cid))
            .or_else(|| self.by_exchange_id.get(&update.exchange_id).cloned())?;

        let order = self.orders.get_mut(&client_id)?;
        order.last_update_ms = now_ms;

        match update.status {
            OrderStatus::New => {
                if matches!(order.state, OrderState::Placing | OrderState::Replacing) {
                    order.state = OrderState::MakerPlaced;
                    order.ttl_expiry_ms = now_ms + self.config.ttl_ms;
                }
                order.exchange_id = Some(update.exchange_id);
                self.by_exchange_id.insert(update.exchange_id, client_id);
                None
            }
            OrderStatus::PartiallyFilled => {
                let delta = update.filled - order.filled_size;
                order.filled_size = update.filled;
                order.state = OrderState::PartialFilled;
                self.engine_state = PatientOrderState::PartialFilled;

                if order.filled_pct() >= self.config.partial_fill_threshold_pct {
                    // Repost the remainder instead of leaving a stale
                    // small order on the book.
                    self.repost_queue.push(RepostReason::PartialFill);
                }
                if delta.is_positive() {
                    Some(FillEvent {
                        side: update.side,
                        price: update.last_fill_price,
                        size: delta,
                        full: false,
                    })
                } else {
                    None
                }
            }
            OrderStatus::Filled => {
                let delta = update.filled - order.filled_size;
                let latency = now_ms.saturating_sub(order.placed_time_ms);
                let key = LevelKey::new(order.side, order.ladder_level);

                self.stats.filled += 1;
                self.stats.record_fill_latency(latency);
                self.remove_order(&client_id);
                if let Some(snapshot) = self.snapshot.as_mut() {
                    snapshot.remove_level(&key);
                }
                self.repost_queue.push(RepostReason::Requote);
                if self.live_order_count() == 0 {
                    self.engine_state = PatientOrderState::Idle;
                }

                if delta.is_positive() {
                    Some(FillEvent {
                        side: update.side,
                        price: update.last_fill_price,
                        size: delta,
                        full: true,
                    })
                } else {
                    None
                }
            }
            OrderStatus::Canceled => {
                let key = LevelKey::new(order.side, order.ladder_level);
                // Replacing orders keep their slot; anything else is gone.
                if order.state != OrderState::Replacing {
                    self.remove_order(&client_id);
                    if let Some(snapshot) = self.snapshot.as_mut() {
                        snapshot.remove_level(&key);
                    }
                }
                None
            }
            OrderStatus::Rejected | OrderStatus::Expired => {
                self.stats.rejected += 1;
                if order.retry_count < self.config.max_retries {
                    order.state = OrderState::Error;
                } else {
                    warn!(%client_id, "order abandoned after max retries");
                    self.remove_order(&client_id);
                }
                None
            }
        }
    }

    /// Translate a patient event into execution behaviour.
    pub async fn on_patient_event(&mut self, event: &PatientEvent, now_ms: u64) -> ExecResult<()> {
        match event {
            PatientEvent::TopNExit { .. } => {
                self.engine_state = PatientOrderState::TopNExit;
                self.repost_queue.push(RepostReason::Requote);
            }
            PatientEvent::Drift { .. } => {
                self.engine_state = PatientOrderState::DriftTriggered;
                self.repost_queue.push(RepostReason::Requote);
            }
            PatientEvent::QueueAhead { key } => {
                self.engine_state = PatientOrderState::QueueAheadTriggered;
                let improved = self.config.level_improvement.enabled
                    && self.improve_level(*key, now_ms).await?;
                if !improved {
                    self.repost_queue.push(RepostReason::QueueAhead);
                }
            }
            PatientEvent::LevelTtl { .. } => {
                self.repost_queue.push(RepostReason::TtlExpired);
            }
            PatientEvent::SessionTtl => {
                self.repost_queue.push(RepostReason::SessionExpired);
            }
        }
        Ok(())
    }

    /// Improve one level toward the touch after a queue-ahead breach.
    ///
    /// Bounded per level by `level_improvement.max` and a five-second
    /// spacing between improvements.
    pub async fn improve_level(&mut self, key: LevelKey, now_ms: u64) -> ExecResult<bool> {
        let improvement = self.config.level_improvement.clone();
        let Some(snapshot) = self.snapshot.as_ref() else {
            return Ok(false);
        };
        let Some(level) = snapshot.levels.get(&key) else {
            return Ok(false);
        };
        if level.improvement_count >= improvement.max
            || now_ms.saturating_sub(level.last_improvement_ms) < IMPROVEMENT_MIN_INTERVAL_MS
                && level.last_improvement_ms > 0
        {
            return Ok(false);
        }

        let client_id = level.client_id.clone();
        let Some(order) = self.orders.get(&client_id) else {
            return Ok(false);
        };
        if !order.state.is_live() {
            return Ok(false);
        }

        let new_price = improved_price(
            key.side,
            level.price,
            improvement.ticks,
            self.filters.tick_size,
        );
        let remaining = order.remaining_size();
        let old_eid = order.exchange_id;

        let new_client_id = ClientOrderId::new();
        let request = OrderRequest::post_only_limit(
            self.symbol.clone(),
            key.side,
            new_price,
            remaining,
            new_client_id.clone(),
        );

        self.engine_state = PatientOrderState::ReplacingLevel;
        if let Some(order) = self.orders.get_mut(&client_id) {
            order.state = OrderState::Replacing;
        }

        let result = match old_eid {
            Some(eid) => match self.exchange.replace_order(eid, request.clone()).await {
                Err(ExchangeError::Unsupported(_)) => {
                    self.cancel_by_exchange_id(eid).await;
                    self.exchange.place_order(request).await
                }
                other => {
                    self.forget_exchange_id(eid);
                    other
                }
            },
            None => self.exchange.place_order(request).await,
        };

        match result {
            Ok(ack) => {
                self.remove_order(&client_id);
                let mut managed = ManagedOrder::new(
                    new_client_id.clone(),
                    key.side,
                    new_price,
                    remaining,
                    key.level,
                    now_ms,
                    self.config.ttl_ms,
                );
                managed.state = OrderState::MakerPlaced;
                managed.exchange_id = Some(ack.exchange_id);
                self.by_exchange_id
                    .insert(ack.exchange_id, new_client_id.clone());
                self.orders.insert(new_client_id.clone(), managed);

                if let Some(snapshot) = self.snapshot.as_mut() {
                    if let Some(level) = snapshot.levels.get_mut(&key) {
                        level.price = new_price;
                        level.client_id = new_client_id;
                        level.improvement_count += 1;
                        level.last_improvement_ms = now_ms;
                    }
                }
                info!(%key, price = %new_price, "level improved");
                self.engine_state = PatientOrderState::WaitingInQueue;
                Ok(true)
            }
            Err(e) => {
                warn!(%key, %e, "level improvement failed");
                self.stats.failed += 1;
                if let Some(order) = self.orders.get_mut(&client_id) {
                    order.state = OrderState::Error;
                    order.last_update_ms = now_ms;
                }
                Ok(false)
            }
        }
    }

    /// Periodic maintenance: cooldown expiry, TTL checks, and retry of
    /// errored submissions with linear backoff.
    pub async fn on_tick(&mut self, now_ms: u64) -> ExecResult<TickReport> {
        let mut report = TickReport::default();

        if self.engine_state == PatientOrderState::Cooldown && !self.in_cooldown(now_ms) {
            self.engine_state = PatientOrderState::Idle;
        }

        // TTL expiry queues a low-priority replace for the ladder.
        let any_expired = self.orders.values().any(|o| {
            matches!(o.state, OrderState::MakerPlaced | OrderState::PartialFilled)
                && o.ttl_expired(now_ms)
        });
        if any_expired {
            self.repost_queue.push(RepostReason::TtlExpired);
        }

        // Retries due under the linear backoff schedule.
        let due: Vec<ClientOrderId> = self
            .orders
            .iter()
            .filter(|(_, o)| {
                o.state == OrderState::Error
                    && now_ms
                        >= o.last_update_ms + RETRY_BACKOFF_MS * (o.retry_count as u64 + 1)
            })
            .map(|(cid, _)| cid.clone())
            .collect();

        for client_id in due {
            let Some(order) = self.orders.get(&client_id) else {
                continue;
            };
            let request = OrderRequest::post_only_limit(
                self.symbol.clone(),
                order.side,
                order.price,
                order.remaining_size(),
                client_id.clone(),
            );

            match self.exchange.place_order(request).await {
                Ok(ack) => {
                    report.retried += 1;
                    self.stats.placed += 1;
                    let order = self.orders.get_mut(&client_id).expect("order present");
                    order.state = OrderState::MakerPlaced;
                    order.exchange_id = Some(ack.exchange_id);
                    order.ttl_expiry_ms = now_ms + self.config.ttl_ms;
                    order.last_update_ms = now_ms;
                    self.by_exchange_id.insert(ack.exchange_id, client_id);
                }
                Err(e) => {
                    report.failed += 1;
                    self.stats.failed += 1;
                    let order = self.orders.get_mut(&client_id).expect("order present");
                    order.retry_count += 1;
                    order.last_update_ms = now_ms;
                    if order.retry_count >= self.config.max_retries {
                        warn!(%client_id, %e, "order abandoned after max retries");
                        report.abandoned += 1;
                        self.remove_order(&client_id);
                    } else {
                        debug!(%client_id, retry = order.retry_count, %e, "retry failed, backing off");
                    }
                }
            }
        }

        Ok(report)
    }

    /// Cancel every live order and drop the snapshot.
    pub async fn cancel_all(&mut self) -> ExecResult<u32> {
        let cancelled = self.cancel_session().await;
        self.snapshot = None;
        self.repost_queue.clear();
        Ok(cancelled)
    }

    /// Flatten the net position: cancel everything, close via IOC
    /// market, then enter cooldown.
    pub async fn flatten(&mut self, position: Decimal, now_ms: u64) -> ExecResult<()> {
        info!(%position, "flattening");
        self.engine_state = PatientOrderState::Flattening;
        self.cancel_all().await?;

        let size = Size::new(position.abs()).floor_to_lot(self.filters.lot_step);
        if size.is_positive() {
            let side = if position > Decimal::ZERO {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let request = OrderRequest::flatten_market(self.symbol.clone(), side, size);
            self.exchange.place_order(request).await?;
        }

        self.cooldown_until_ms = now_ms + self.config.cooldown_ms;
        self.engine_state = PatientOrderState::Cooldown;
        Ok(())
    }

    /// Flag a risk breach; quoting stops until flatten completes.
    pub fn mark_risk_breach(&mut self) {
        self.engine_state = PatientOrderState::RiskBreach;
    }

    async fn cancel_session(&mut self) -> u32 {
        let live: Vec<(ClientOrderId, Option<u64>)> = self
            .orders
            .iter()
            .filter(|(_, o)| o.state.is_live())
            .map(|(cid, o)| (cid.clone(), o.exchange_id))
            .collect();

        let mut cancelled = 0u32;
        for (client_id, eid) in live {
            if let Some(order) = self.orders.get_mut(&client_id) {
                order.state = OrderState::Cancelling;
            }
            if let Some(eid) = eid {
                match self.exchange.cancel_order(eid, &self.symbol).await {
                    Ok(true) => {
                        cancelled += 1;
                        self.stats.cancelled += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!(exchange_id = eid, %e, "cancel failed"),
                }
            }
            self.remove_order(&client_id);
        }
        cancelled
    }

    async fn cancel_by_exchange_id(&mut self, eid: u64) {
        match self.exchange.cancel_order(eid, &self.symbol).await {
            Ok(true) => self.stats.cancelled += 1,
            Ok(false) => {}
            Err(e) => warn!(exchange_id = eid, %e, "cancel failed"),
        }
        if let Some(client_id) = self.by_exchange_id.remove(&eid) {
            self.orders.remove(&client_id);
        }
    }

    fn forget_exchange_id(&mut self, eid: u64) {
        if let Some(client_id) = self.by_exchange_id.remove(&eid) {
            self.orders.remove(&client_id);
        }
    }

    fn remove_order(&mut self, client_id: &ClientOrderId) {
        if let Some(order) = self.orders.remove(client_id) {
            if let Some(eid) = order.exchange_id {
                self.by_exchange_id.remove(&eid);
            }
        }
    }

    fn purge_dead_orders(&mut self) {
        let dead: Vec<ClientOrderId> = self
            .orders
            .iter()
            .filter(|(_, o)| !o.state.is_live())
            .map(|(cid, _)| cid.clone())
            .collect();
        for client_id in dead {
            self.remove_order(&client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avell_exchange::MockExchange;
    use rust_decimal_macros::dec;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            tick_size: Price::new(dec!(0.01)),
            lot_step: Size::new(dec!(0.001)),
            min_notional: Some(dec!(10)),
        }
    }

    fn quotes() -> StoikovQuotes {
        StoikovQuotes {
            reservation_price: Price::new(dec!(100.05)),
            half_spread: dec!(0.05),
            bid_price: Price::new(dec!(100.00)),
            ask_price: Price::new(dec!(100.10)),
            bid_size: Size::new(dec!(0.5)),
            ask_size: Size::new(dec!(0.5)),
            skew_factor: dec!(0),
            regime_multiplier: dec!(1),
            timestamp_ms: 1_000,
        }
    }

    fn engine_with(config: ExecConfig) -> (ExecutionEngine<MockExchange>, Arc<MockExchange>) {
        let exchange = Arc::new(MockExchange::new(filters()));
        let engine =
            ExecutionEngine::new(config, "BTCUSDT", filters(), exchange.clone()).unwrap();
        (engine, exchange)
    }

    fn config() -> ExecConfig {
        ExecConfig {
            batch_delay_ms: 0,
            session_jitter_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_place_ladder_full() {
        let (mut engine, exchange) = engine_with(config());
        let report = engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        assert_eq!(report.placed, 6);
        assert_eq!(report.failed, 0);
        assert_eq!(engine.live_order_count(), 6);
        assert_eq!(exchange.open_order_count(), 6);
        assert_eq!(engine.engine_state(), PatientOrderState::WaitingInQueue);

        // Live orders bounded by ladder_levels * 2.
        assert!(engine.live_order_count() <= 6);
        let snap = engine.snapshot().unwrap();
        assert_eq!(snap.levels.len(), 6);
        assert_eq!(snap.mid_at_post, Price::new(dec!(100.05)));
    }

    #[tokio::test]
    async fn test_repost_rate_gated() {
        let (mut engine, _) = engine_with(config());
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        // Inside the repost window: gated.
        let report = engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_100)
            .await
            .unwrap();
        assert!(report.gated);

        // After the window: replaced, still bounded.
        let report = engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_300)
            .await
            .unwrap();
        assert!(!report.gated);
        assert_eq!(engine.live_order_count(), 6);
    }

    #[tokio::test]
    async fn test_unique_client_ids() {
        let (mut engine, _) = engine_with(config());
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        let ids: std::collections::HashSet<_> =
            engine.orders.keys().map(|c| c.as_str().to_string()).collect();
        assert_eq!(ids.len(), engine.orders.len());
    }

    #[tokio::test]
    async fn test_full_fill_requotes() {
        let (mut engine, exchange) = engine_with(config());
        let mut events = exchange.take_events();
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();
        // Drain placement acks.
        while events.try_recv().is_ok() {}

        let open = exchange.get_open_orders("BTCUSDT").await.unwrap();
        let bid = open.iter().find(|o| o.side == OrderSide::Buy).unwrap();
        exchange
            .fill_order(bid.exchange_id, Size::new(dec!(1)))
            .unwrap();

        let update = match events.try_recv().unwrap() {
            avell_exchange::ExchangeEvent::OrderUpdate(o) => o,
            other => panic!("expected update, got {other:?}"),
        };
        let fill = engine.on_order_update(&update, 1_200).unwrap();
        assert!(fill.full);
        assert_eq!(fill.side, OrderSide::Buy);

        // Full fill queues a high-priority requote.
        assert_eq!(engine.take_due_repost(1_300), Some(RepostReason::Requote));
        assert_eq!(engine.live_order_count(), 5);
    }

    #[tokio::test]
    async fn test_partial_fill_threshold_repost() {
        let (mut engine, exchange) = engine_with(config());
        let mut events = exchange.take_events();
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();
        while events.try_recv().is_ok() {}

        let open = exchange.get_open_orders("BTCUSDT").await.unwrap();
        let bid = open.iter().find(|o| o.side == OrderSide::Buy).unwrap();
        let original = bid.amount;

        // Fill 30%: below the 50% threshold, no repost queued.
        exchange
            .fill_order(bid.exchange_id, Size::new(original.inner() * dec!(0.3)))
            .unwrap();
        let update = match events.try_recv().unwrap() {
            avell_exchange::ExchangeEvent::OrderUpdate(o) => o,
            other => panic!("unexpected {other:?}"),
        };
        let fill = engine.on_order_update(&update, 1_100).unwrap();
        assert!(!fill.full);
        assert!(engine.take_due_repost(1_300).is_none());

        // Another 30%: cumulative 60% crosses the threshold.
        exchange
            .fill_order(bid.exchange_id, Size::new(original.inner() * dec!(0.3)))
            .unwrap();
        let update = match events.try_recv().unwrap() {
            avell_exchange::ExchangeEvent::OrderUpdate(o) => o,
            other => panic!("unexpected {other:?}"),
        };
        engine.on_order_update(&update, 1_200).unwrap();
        assert_eq!(
            engine.take_due_repost(1_300),
            Some(RepostReason::PartialFill)
        );
    }

    #[tokio::test]
    async fn test_ttl_expiry_queues_replace() {
        let (mut engine, _) = engine_with(config());
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        // Before TTL: nothing queued.
        engine.on_tick(1_400).await.unwrap();
        assert!(engine.take_due_repost(1_100).is_none());

        // After the 500ms TTL: one coalesced low-priority replace.
        engine.on_tick(1_600).await.unwrap();
        assert_eq!(
            engine.take_due_repost(1_600),
            Some(RepostReason::TtlExpired)
        );
        assert!(engine.take_due_repost(1_700).is_none());
    }

    #[tokio::test]
    async fn test_placement_failure_retries_then_abandons() {
        let exec_config = ExecConfig {
            max_retries: 2,
            ladder_levels: 1,
            ..config()
        };
        let (mut engine, exchange) = engine_with(exec_config);
        // Every submission fails.
        exchange.fail_next_orders(100);

        let report = engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();
        assert_eq!(report.placed, 0);
        assert_eq!(report.failed, 2);

        // First retry due at +1s per order.
        let tick = engine.on_tick(2_100).await.unwrap();
        assert_eq!(tick.failed, 2);
        assert_eq!(tick.abandoned, 0);

        // Second failure hits max_retries and abandons.
        let tick = engine.on_tick(4_200).await.unwrap();
        assert_eq!(tick.abandoned, 2);
        assert_eq!(engine.orders.len(), 0);
    }

    #[tokio::test]
    async fn test_retry_recovers() {
        let exec_config = ExecConfig {
            ladder_levels: 1,
            ..config()
        };
        let (mut engine, exchange) = engine_with(exec_config);
        exchange.fail_next_orders(2);

        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();
        assert_eq!(engine.live_order_count(), 0);

        let tick = engine.on_tick(2_100).await.unwrap();
        assert_eq!(tick.retried, 2);
        assert_eq!(engine.live_order_count(), 2);
    }

    #[tokio::test]
    async fn test_flatten_cancels_and_cools_down() {
        let (mut engine, exchange) = engine_with(config());
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();
        assert_eq!(exchange.open_order_count(), 6);

        exchange.set_position(dec!(1.5), Price::new(dec!(100)));
        engine.flatten(dec!(1.5), 2_000).await.unwrap();

        // All quotes cancelled, position closed by the market order.
        assert_eq!(exchange.open_order_count(), 0);
        assert_eq!(exchange.position(), Decimal::ZERO);
        assert_eq!(engine.live_order_count(), 0);
        assert!(engine.snapshot().is_none());
        assert_eq!(engine.engine_state(), PatientOrderState::Cooldown);
        assert!(engine.in_cooldown(2_500));

        // Cooldown suppresses placements, then expires back to Idle.
        let report = engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 3_000)
            .await
            .unwrap();
        assert!(report.gated);
        engine.on_tick(2_000 + engine.config.cooldown_ms + 1).await.unwrap();
        assert_eq!(engine.engine_state(), PatientOrderState::Idle);
    }

    #[tokio::test]
    async fn test_patient_events_map_to_reposts() {
        let (mut engine, _) = engine_with(config());
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        engine
            .on_patient_event(
                &PatientEvent::TopNExit {
                    side: OrderSide::Buy,
                    price: Price::new(dec!(100.00)),
                    top_n: 3,
                },
                1_100,
            )
            .await
            .unwrap();
        assert_eq!(engine.engine_state(), PatientOrderState::TopNExit);

        engine
            .on_patient_event(&PatientEvent::SessionTtl, 1_150)
            .await
            .unwrap();

        // High priority first, then medium.
        assert_eq!(engine.take_due_repost(1_300), Some(RepostReason::Requote));
        assert_eq!(
            engine.take_due_repost(1_600),
            Some(RepostReason::SessionExpired)
        );
    }

    #[tokio::test]
    async fn test_level_improvement() {
        let exec_config = ExecConfig {
            ladder_levels: 1,
            level_improvement: LevelImprovementConfig {
                enabled: true,
                ticks: 1,
                max: 2,
            },
            ..config()
        };
        let (mut engine, exchange) = engine_with(exec_config);
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        let key = LevelKey::new(OrderSide::Buy, 0);
        let improved = engine.improve_level(key, 10_000).await.unwrap();
        assert!(improved);

        let level = engine.snapshot().unwrap().levels.get(&key).unwrap();
        assert_eq!(level.price, Price::new(dec!(100.01)));
        assert_eq!(level.improvement_count, 1);

        // Too soon for a second improvement.
        assert!(!engine.improve_level(key, 12_000).await.unwrap());

        // After the spacing, second improvement allowed.
        assert!(engine.improve_level(key, 16_000).await.unwrap());

        // Max reached: no third improvement.
        assert!(!engine.improve_level(key, 30_000).await.unwrap());
        assert_eq!(exchange.open_order_count(), 2);
    }

    #[tokio::test]
    async fn test_cancel_all_clears_everything() {
        let (mut engine, exchange) = engine_with(config());
        engine
            .place_ladder(&quotes(), Price::new(dec!(100.05)), 1_000)
            .await
            .unwrap();

        let cancelled = engine.cancel_all().await.unwrap();
        assert_eq!(cancelled, 6);
        assert_eq!(exchange.open_order_count(), 0);
        assert_eq!(engine.live_order_count(), 0);
        assert!(engine.snapshot().is_none());
    }
}
