//! Bot wiring and event loop.
//!
//! One task owns every component; exchange I/O lands here as messages.
//! Book snapshots feed the processor and the quoting engine, order
//! updates drive the execution state machine, fills refresh inventory
//! from venue truth, and the risk manager gates every quote cycle.

use std::sync::Arc;
use std::time::Duration;

use avell_core::{L2Book, OrderSide, Price, Size};
use avell_detector::PatientDetector;
use avell_exchange::{ExchangeClient, ExchangeEvent, ExchangeOrder, OrderStatus};
use avell_executor::ExecutionEngine;
use avell_feed::BookProcessor;
use avell_mm::{InventoryState, StoikovEngine, StoikovQuotes};
use avell_risk::{RiskAction, RiskManager, RiskSeverity};
use rust_decimal::prelude::{Signed, ToPrimitive};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::BotConfig;
use crate::error::AppResult;

/// Wall-clock milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Apply the risk multipliers to a quote: `bid' = r - δ·sm`,
/// `ask' = r + δ·sm`, sizes scaled by the size multiplier.
pub fn apply_multipliers(
    quotes: &StoikovQuotes,
    spread_multiplier: f64,
    size_multiplier: f64,
) -> StoikovQuotes {
    let sm = Decimal::from_f64_retain(spread_multiplier).unwrap_or(Decimal::ONE);
    let nm = Decimal::from_f64_retain(size_multiplier).unwrap_or(Decimal::ONE);

    let half_spread = quotes.half_spread * sm;
    let r = quotes.reservation_price.inner();

    StoikovQuotes {
        half_spread,
        bid_price: Price::new(r - half_spread),
        ask_price: Price::new(r + half_spread),
        bid_size: Size::new(quotes.bid_size.inner() * nm),
        ask_size: Size::new(quotes.ask_size.inner() * nm),
        ..quotes.clone()
    }
}

/// Realised-PnL ledger over fills.
///
/// Reduced positions realise against the weighted average entry;
/// position flips re-anchor the entry at the flip price. Re-synced to
/// venue truth on every inventory refresh.
#[derive(Debug, Default)]
struct FillLedger {
    position: Decimal,
    avg_entry: Decimal,
}

impl FillLedger {
    /// Apply a fill; returns the realised PnL delta.
    fn on_fill(&mut self, side: OrderSide, price: Price, size: Size) -> Decimal {
        let fill_price = price.inner();
        let fill_size = size.inner();
        let signed = fill_size * Decimal::from(side.sign());

        let old = self.position;
        let new = old + signed;

        let mut realized = Decimal::ZERO;
        if (old > Decimal::ZERO && signed < Decimal::ZERO)
            || (old < Decimal::ZERO && signed > Decimal::ZERO)
        {
            let reduce = signed.abs().min(old.abs());
            realized = if old > Decimal::ZERO {
                (fill_price - self.avg_entry) * reduce
            } else {
                (self.avg_entry - fill_price) * reduce
            };
        }

        if new.is_zero() {
            self.avg_entry = Decimal::ZERO;
        } else if new.signum() != old.signum() && !old.is_zero() {
            // Position flipped: the remainder entered at the fill price.
            self.avg_entry = fill_price;
        } else if new.signum() == signed.signum() || old.is_zero() {
            // Adding to (or opening) a position: weighted average.
            let old_notional = old.abs() * self.avg_entry;
            let new_notional = fill_size * fill_price;
            let total = new.abs();
            if !total.is_zero() {
                self.avg_entry = (old_notional + new_notional) / total;
            }
        }
        // Pure reduction keeps the entry.

        self.position = new;
        realized
    }

    fn resync(&mut self, position: Decimal, entry: Price) {
        self.position = position;
        self.avg_entry = entry.inner();
    }
}

/// The bot controller.
pub struct Bot<C: ExchangeClient> {
    config: BotConfig,
    exchange: Arc<C>,
    feed: BookProcessor,
    quoting: StoikovEngine,
    risk: RiskManager,
    detector: PatientDetector,
    executor: ExecutionEngine<C>,
    ledger: FillLedger,
    last_mid: Price,
    feed_healthy: bool,
    shutting_down: bool,
}

impl<C: ExchangeClient> Bot<C> {
    /// Build and wire every component. Fetches symbol filters from the
    /// venue; the filter cache is read-only afterwards.
    pub async fn initialize(config: BotConfig, exchange: Arc<C>) -> AppResult<Self> {
        config.validate()?;

        let filters = exchange.symbol_filters(&config.symbol).await?;
        info!(
            symbol = %config.symbol,
            tick = %filters.tick_size,
            lot = %filters.lot_step,
            "symbol filters cached"
        );

        let feed = BookProcessor::new(config.feed.clone());
        let mut quoting = StoikovEngine::new(config.stoikov.clone(), filters.tick_size)?;
        if let Some(sigma) = config.seed_volatility {
            quoting.seed_volatility(sigma);
        }
        let risk = RiskManager::new(config.risk.clone())?;
        let detector = PatientDetector::new(config.patient.clone(), filters.tick_size);
        let executor = ExecutionEngine::new(
            config.exec.clone(),
            config.symbol.clone(),
            filters,
            exchange.clone(),
        )?;

        Ok(Self {
            config,
            exchange,
            feed,
            quoting,
            risk,
            detector,
            executor,
            ledger: FillLedger::default(),
            last_mid: Price::ZERO,
            feed_healthy: true,
            shutting_down: false,
        })
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn executor(&self) -> &ExecutionEngine<C> {
        &self.executor
    }

    pub fn quoting_mut(&mut self) -> &mut StoikovEngine {
        &mut self.quoting
    }

    /// Dispatch one exchange event.
    pub async fn handle_event(&mut self, event: ExchangeEvent, now_ms: u64) -> AppResult<()> {
        match event {
            ExchangeEvent::Book(book) => self.handle_book(book, now_ms).await?,
            ExchangeEvent::Trade(trade) => {
                self.feed.record_trade(&trade);
                self.quoting.on_trade(trade.timestamp_ms);
            }
            ExchangeEvent::OrderUpdate(update) => {
                self.handle_order_update(update, now_ms).await?;
            }
            ExchangeEvent::Error(e) => {
                warn!(error = %e, "venue error");
                self.risk.record_failure(now_ms);
            }
        }
        Ok(())
    }

    async fn handle_book(&mut self, book: L2Book, now_ms: u64) -> AppResult<()> {
        let state = match self.feed.process_book(book.clone(), now_ms) {
            Ok(state) => state,
            Err(e) => {
                debug!(%e, "book dropped");
                return Ok(());
            }
        };

        self.last_mid = state.mid;
        self.quoting.on_market_state(state, now_ms);
        self.risk.record_volatility(self.quoting.sigma(), now_ms);

        if let Some(snapshot) = self.executor.snapshot().cloned() {
            if let Some(market) = self.quoting.market_state(now_ms) {
                self.detector.observe(&book, &market, &snapshot, now_ms);
            }
        }

        self.drain_patient_events(now_ms).await
    }

    async fn handle_order_update(&mut self, update: ExchangeOrder, now_ms: u64) -> AppResult<()> {
        if matches!(update.status, OrderStatus::Rejected | OrderStatus::Expired) {
            self.risk.record_failure(now_ms);
        }

        if let Some(fill) = self.executor.on_order_update(&update, now_ms) {
            info!(
                side = %fill.side,
                price = %fill.price,
                size = %fill.size,
                full = fill.full,
                "fill"
            );
            let realized = self.ledger.on_fill(fill.side, fill.price, fill.size);
            if !realized.is_zero() {
                self.risk.record_pnl(realized.to_f64().unwrap_or(0.0));
            }
            // Venue truth is authoritative after every fill.
            self.refresh_inventory(now_ms).await?;
        }
        Ok(())
    }

    /// Periodic executor maintenance: retries, TTL checks, cooldown
    /// expiry, feed health, and patient-event forwarding.
    pub async fn maintenance_cycle(&mut self, now_ms: u64) -> AppResult<()> {
        let report = self.executor.on_tick(now_ms).await?;
        for _ in 0..report.failed {
            self.risk.record_failure(now_ms);
        }

        // State-change-only logging for the feed health signal.
        let healthy = self.feed.health(now_ms).is_ok();
        if healthy != self.feed_healthy {
            if healthy {
                info!("market data recovered");
            } else {
                warn!("sequence gap burst, resubscription needed");
            }
            self.feed_healthy = healthy;
        }

        self.drain_patient_events(now_ms).await
    }

    /// Forward due patient events into the execution engine.
    pub async fn drain_patient_events(&mut self, now_ms: u64) -> AppResult<()> {
        while let Some(event) = self.detector.poll(now_ms) {
            self.executor.on_patient_event(&event, now_ms).await?;
        }
        Ok(())
    }

    /// Rebuild inventory from the venue position and push it into the
    /// quoting engine and risk manager.
    pub async fn refresh_inventory(&mut self, _now_ms: u64) -> AppResult<InventoryState> {
        let positions = self.exchange.get_positions(&self.config.symbol).await?;
        let (position, entry) = positions
            .iter()
            .find(|p| p.symbol == self.config.symbol)
            .map(|p| (p.position, p.entry_price))
            .unwrap_or((Decimal::ZERO, Price::ZERO));

        self.ledger.resync(position, entry);

        let mid = if self.last_mid.is_zero() {
            entry
        } else {
            self.last_mid
        };
        let inventory = InventoryState::from_venue(position, entry, mid, self.config.nav);
        self.quoting.on_inventory(inventory);
        self.risk.update_inventory(inventory);
        Ok(inventory)
    }

    /// One quoting pass: runs when a requote is due (or nothing rests),
    /// the risk gate allows trading, and a quote can be derived.
    pub async fn quote_cycle(&mut self, now_ms: u64) -> AppResult<()> {
        if self.shutting_down || !self.risk.can_trade(now_ms) {
            return Ok(());
        }

        let due = self.executor.take_due_repost(now_ms).is_some()
            || self.executor.live_order_count() == 0;
        if !due {
            return Ok(());
        }

        let Some(quotes) = self.quoting.compute_quotes(now_ms) else {
            return Ok(());
        };

        let size_multiplier = self.risk.size_multiplier();
        if size_multiplier <= 0.0 {
            debug!("size multiplier zero, not quoting");
            return Ok(());
        }
        let spread_multiplier = self.risk.spread_multiplier(now_ms);
        let adjusted = apply_multipliers(&quotes, spread_multiplier, size_multiplier);

        let report = self
            .executor
            .place_ladder(&adjusted, self.last_mid, now_ms)
            .await?;
        for _ in 0..report.placed {
            self.risk.record_order(now_ms);
        }
        for _ in 0..report.failed {
            self.risk.record_failure(now_ms);
        }
        Ok(())
    }

    /// One risk pass: evaluate limits and act on breaches.
    pub async fn risk_cycle(&mut self, now_ms: u64) -> AppResult<()> {
        self.risk.maybe_daily_reset(now_ms);
        self.risk.cleanup(now_ms);

        let events = self.risk.evaluate(now_ms);
        let mut breach = false;
        for event in &events {
            match (event.severity, event.action) {
                (RiskSeverity::Limit, RiskAction::Flatten) => {
                    warn!(
                        kind = %event.kind,
                        value = event.value,
                        limit = event.limit,
                        "risk limit breached, flattening"
                    );
                    breach = true;
                }
                (RiskSeverity::Limit, RiskAction::Stop) => {
                    error!(
                        kind = %event.kind,
                        value = event.value,
                        limit = event.limit,
                        "hard stop"
                    );
                    breach = true;
                }
                (RiskSeverity::Limit, RiskAction::ReduceSize) => {
                    warn!(kind = %event.kind, value = event.value, "reducing size");
                }
                (RiskSeverity::Warning, _) => {
                    debug!(kind = %event.kind, value = event.value, "risk warning");
                }
                _ => {}
            }
        }

        if breach {
            self.executor.mark_risk_breach();
            self.do_flatten(now_ms).await?;
        }
        Ok(())
    }

    /// Flatten with a deadline; a miss escalates to emergency stop.
    async fn do_flatten(&mut self, now_ms: u64) -> AppResult<()> {
        let inventory = self.refresh_inventory(now_ms).await?;
        let deadline = Duration::from_millis(self.config.exec.flatten_timeout_ms);

        match tokio::time::timeout(deadline, self.executor.flatten(inventory.position, now_ms))
            .await
        {
            Ok(Ok(())) => {
                self.risk
                    .start_cooldown(now_ms, self.config.risk.cooldown_ms);
                self.refresh_inventory(now_ms).await?;
                info!("flatten complete, cooling down");
            }
            Ok(Err(e)) => {
                error!(%e, "flatten failed, escalating to emergency stop");
                self.risk.trigger_emergency_stop();
            }
            Err(_) => {
                error!(
                    timeout_ms = self.config.exec.flatten_timeout_ms,
                    "flatten deadline exceeded, escalating to emergency stop"
                );
                self.risk.trigger_emergency_stop();
            }
        }
        Ok(())
    }

    /// Run the main loop until shutdown.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ExchangeEvent>) -> AppResult<()> {
        info!(symbol = %self.config.symbol, "starting bot");

        self.exchange.connect().await?;
        self.exchange
            .subscribe_order_book(&self.config.symbol)
            .await?;
        self.exchange.subscribe_trades(&self.config.symbol).await?;
        self.refresh_inventory(now_ms()).await?;

        let mut quote_interval =
            tokio::time::interval(Duration::from_millis(self.config.exec.repost_ms.max(50)));
        let mut risk_interval = tokio::time::interval(Duration::from_secs(1));
        let mut maintenance_interval = tokio::time::interval(Duration::from_millis(100));

        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(event) => {
                            let now = now_ms();
                            self.handle_event(event, now).await?;
                            self.quote_cycle(now).await?;
                        }
                        None => {
                            warn!("event stream closed");
                            break;
                        }
                    }
                }
                _ = quote_interval.tick() => {
                    self.quote_cycle(now_ms()).await?;
                }
                _ = risk_interval.tick() => {
                    self.risk_cycle(now_ms()).await?;
                }
                _ = maintenance_interval.tick() => {
                    self.maintenance_cycle(now_ms()).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    /// Cancel everything and flatten any residual position.
    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.shutting_down = true;
        let now = now_ms();

        self.executor.cancel_all().await?;
        let inventory = self.refresh_inventory(now).await?;

        if !inventory.is_flat() {
            let deadline = Duration::from_millis(self.config.exec.flatten_timeout_ms);
            match tokio::time::timeout(deadline, self.executor.flatten(inventory.position, now))
                .await
            {
                Ok(Ok(())) => info!("flattened on shutdown"),
                Ok(Err(e)) => {
                    error!(%e, "flatten failed on shutdown");
                    self.risk.trigger_emergency_stop();
                }
                Err(_) => {
                    error!("flatten deadline exceeded on shutdown");
                    self.risk.trigger_emergency_stop();
                }
            }
        }

        let stats = self.executor.stats_snapshot();
        info!(
            placed = stats.placed,
            filled = stats.filled,
            cancelled = stats.cancelled,
            fill_ratio = stats.fill_ratio,
            "final execution statistics"
        );
        self.exchange.disconnect().await?;
        Ok(())
    }
}
