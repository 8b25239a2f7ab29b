//! Quote derivation: reservation price, half-spread, ladder sizes.
//!
//! The reservation price shifts against inventory (`r = r0 - γσ²q`), the
//! half-spread follows the closed form `γσ²/2k + ln(1 + γ/k)/γ` with a
//! microstructure floor, and sizes shrink and skew as inventory builds.

use avell_core::{Price, Size, POSITION_EPSILON};
use avell_feed::MarketState;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::StoikovConfig;
use crate::error::QuoteResult;
use crate::estimators::{IntensityEstimator, VolatilityEstimator};
use crate::inventory::InventoryState;

/// Intensity floor used in the spread formula to avoid division blow-ups.
const INTENSITY_FLOOR: f64 = 0.1;

/// Reference annualised volatility for the regime multiplier.
const SIGMA_REFERENCE: f64 = 0.3;

/// Cap on the relative inventory skew (10 bps).
const SKEW_CAP: f64 = 0.001;

/// A two-sided quote produced by the engine.
///
/// Prices are unrounded; the execution boundary rounds bids down and
/// asks up to tick and sizes down to lot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoikovQuotes {
    /// Inventory-adjusted reservation price.
    pub reservation_price: Price,
    /// Distance from the reservation price to each side.
    pub half_spread: Decimal,
    /// `reservation_price - half_spread`.
    pub bid_price: Price,
    /// `reservation_price + half_spread`.
    pub ask_price: Price,
    /// Per-level bid size in base units.
    pub bid_size: Size,
    /// Per-level ask size in base units.
    pub ask_size: Size,
    /// Absolute price shift applied by the inventory skew.
    pub skew_factor: Decimal,
    /// Combined volatility-regime and session multiplier.
    pub regime_multiplier: Decimal,
    /// When the quote was derived (Unix milliseconds).
    pub timestamp_ms: u64,
}

/// The Stoikov quoting engine.
///
/// Exclusively owns the volatility and intensity estimators. Produces a
/// quote only when both a market state and an inventory state are present.
pub struct StoikovEngine {
    config: StoikovConfig,
    tick_size: Price,
    volatility: VolatilityEstimator,
    intensity: IntensityEstimator,
    market: Option<MarketState>,
    inventory: Option<InventoryState>,
}

impl StoikovEngine {
    /// Create an engine with validated parameters.
    pub fn new(config: StoikovConfig, tick_size: Price) -> QuoteResult<Self> {
        config.validate()?;
        let volatility = VolatilityEstimator::new(config.volatility_window_ms);
        let intensity = IntensityEstimator::new(config.intensity_window_ms);
        Ok(Self {
            config,
            tick_size,
            volatility,
            intensity,
            market: None,
            inventory: None,
        })
    }

    pub fn config(&self) -> &StoikovConfig {
        &self.config
    }

    /// Seed the volatility estimator before live data accumulates.
    pub fn seed_volatility(&mut self, sigma_annualized: f64) {
        self.volatility.seed_annualized(sigma_annualized);
    }

    /// Ingest a market state; updates the volatility estimator.
    pub fn on_market_state(&mut self, state: MarketState, now_ms: u64) {
        self.volatility.update(state.mid.to_f64(), now_ms);
        self.market = Some(state);
    }

    /// Ingest a trade print; feeds the intensity estimator.
    pub fn on_trade(&mut self, timestamp_ms: u64) {
        self.intensity.record(timestamp_ms);
    }

    /// Ingest the latest inventory snapshot.
    pub fn on_inventory(&mut self, inventory: InventoryState) {
        self.inventory = Some(inventory);
    }

    /// Latest market state with volatility/intensity filled in.
    pub fn market_state(&mut self, now_ms: u64) -> Option<MarketState> {
        let mut state = self.market.clone()?;
        state.volatility = self.volatility.sigma();
        state.intensity = self.intensity.intensity(now_ms);
        Some(state)
    }

    /// Current annualised volatility.
    pub fn sigma(&self) -> f64 {
        self.volatility.sigma()
    }

    /// Derive a two-sided quote from the latest state.
    ///
    /// Returns `None` until both market and inventory state are present,
    /// or when the derived spread degenerates.
    pub fn compute_quotes(&mut self, now_ms: u64) -> Option<StoikovQuotes> {
        let market = self.market.as_ref()?;
        let inventory = self.inventory.as_ref()?;

        let sigma = self.volatility.sigma();
        if !sigma.is_finite() {
            debug!(sigma, "volatility estimate unusable, skipping quote");
            return None;
        }
        let k = self.intensity.intensity(now_ms).max(INTENSITY_FLOOR);

        let mid = market.mid.to_f64();
        let micro = market.microprice.to_f64();
        let spread = decimal_to_f64(market.spread);
        let tick = self.tick_size.to_f64();
        let gamma = self.config.gamma;
        let q = inventory.position_f64();

        // Reservation base, optionally leaning on microprice and OBI.
        let mut r = if self.config.microprice_bias { micro } else { mid };
        let obi = decimal_to_f64(market.obi);
        r += self.config.obi_weight * obi * spread / 2.0;
        let r0 = r;

        // Inventory shift.
        r -= gamma * sigma * sigma * q;

        // Optimal half-spread with microstructure floor.
        let delta_total = gamma * sigma * sigma / (2.0 * k) + (1.0 + gamma / k).ln() / gamma;
        let floor = (0.3 * spread).max(decimal_to_f64(self.config.post_only_offset) * tick);
        let half = (delta_total / 2.0).max(floor);

        // Inventory skew, capped at ~10 bps, pushing toward unload.
        let rho = inventory.nav_pct_f64() / self.config.max_inventory_pct;
        let skew_rel = (2.0 * rho).tanh() * SKEW_CAP;
        let skew_px = if q > POSITION_EPSILON {
            -skew_rel * r0
        } else if q < -POSITION_EPSILON {
            skew_rel * r0
        } else {
            0.0
        };
        r += skew_px;

        // Regime multiplier: volatility deviation from reference, scaled,
        // times the session factor.
        let regime_base =
            (1.0 + (sigma / SIGMA_REFERENCE - 1.0) * self.config.vol_regime_scaler).max(0.1);
        let multiplier = regime_base * self.config.timezone_profile.factor(now_ms);
        let half_spread = (half * multiplier).max(floor);

        if !(half_spread > 0.0 && r.is_finite()) {
            debug!(half_spread, r, "degenerate quote, skipping");
            return None;
        }

        let bid = r - half_spread;
        let ask = r + half_spread;
        if bid <= 0.0 {
            debug!(bid, "non-positive bid, skipping quote");
            return None;
        }

        // Sizes: shrink with inventory, skew toward the unloading side,
        // split per ladder level.
        let rho_clamped = rho.abs().min(1.0);
        let shrink = 1.0 - 0.5 * rho_clamped;
        let base_notional =
            decimal_to_f64(self.config.base_notional * self.config.alpha_size_ratio) * shrink;
        let (bid_mult, ask_mult) = if q > POSITION_EPSILON {
            (0.7, 1.3)
        } else if q < -POSITION_EPSILON {
            (1.3, 0.7)
        } else {
            (1.0, 1.0)
        };
        let levels = self.config.ladder_levels as f64;
        let bid_size = base_notional * bid_mult / levels / bid;
        let ask_size = base_notional * ask_mult / levels / ask;

        trace!(
            r,
            half_spread,
            sigma,
            k,
            q,
            "quote derived"
        );

        Some(StoikovQuotes {
            reservation_price: Price::new(Decimal::from_f64_retain(r)?),
            half_spread: Decimal::from_f64_retain(half_spread)?,
            bid_price: Price::new(Decimal::from_f64_retain(bid)?),
            ask_price: Price::new(Decimal::from_f64_retain(ask)?),
            bid_size: Size::new(Decimal::from_f64_retain(bid_size)?),
            ask_size: Size::new(Decimal::from_f64_retain(ask_size)?),
            skew_factor: Decimal::from_f64_retain(skew_px)?,
            regime_multiplier: Decimal::from_f64_retain(multiplier)?,
            timestamp_ms: now_ms,
        })
    }
}

fn decimal_to_f64(d: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    d.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avell_core::{L2Book, PriceLevel};
    use avell_feed::{BookProcessor, FeedConfig};
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(Price::new(price), Size::new(size))
    }

    fn market_state() -> MarketState {
        let book = L2Book::new(
            vec![level(dec!(100.00), dec!(10))],
            vec![level(dec!(100.10), dec!(10))],
            1,
            60_000,
        );
        BookProcessor::new(FeedConfig::default())
            .process_book(book, 60_000)
            .unwrap()
    }

    fn engine() -> StoikovEngine {
        let mut e = StoikovEngine::new(StoikovConfig::default(), Price::new(dec!(0.01))).unwrap();
        e.seed_volatility(0.3);
        e
    }

    fn feed_trades(e: &mut StoikovEngine) {
        // Two trades per second over the last 60 seconds.
        for i in 0..120u64 {
            e.on_trade(i * 500);
        }
    }

    #[test]
    fn test_no_quote_without_state() {
        let mut e = engine();
        assert!(e.compute_quotes(60_000).is_none());

        e.on_market_state(market_state(), 60_000);
        assert!(e.compute_quotes(60_000).is_none());

        e.on_inventory(InventoryState::flat());
        assert!(e.compute_quotes(60_000).is_some());
    }

    #[test]
    fn test_symmetric_quote_flat_inventory() {
        let mut e = engine();
        feed_trades(&mut e);
        e.on_market_state(market_state(), 60_000);
        e.on_inventory(InventoryState::flat());

        let q = e.compute_quotes(60_000).unwrap();

        // Flat inventory: reservation stays at mid, no skew.
        assert_eq!(q.skew_factor, Decimal::ZERO);
        let r = q.reservation_price.inner();
        assert!((r - dec!(100.05)).abs() < dec!(0.0001));

        // Half-spread respects the floor: 0.3 * 0.10 = 0.03.
        assert!(q.half_spread >= dec!(0.03));
        assert!(q.bid_price.inner() <= dec!(100.02));
        assert!(q.ask_price.inner() >= dec!(100.08));
        assert!(q.bid_price < q.ask_price);
    }

    #[test]
    fn test_quote_midpoint_is_reservation() {
        let mut e = engine();
        feed_trades(&mut e);
        e.on_market_state(market_state(), 60_000);
        e.on_inventory(InventoryState::from_venue(
            dec!(1),
            Price::new(dec!(100)),
            Price::new(dec!(100.05)),
            dec!(10_000),
        ));

        let q = e.compute_quotes(60_000).unwrap();
        let midpoint = (q.bid_price.inner() + q.ask_price.inner()) / Decimal::TWO;
        let gap = (midpoint - q.reservation_price.inner()).abs();
        assert!(gap <= q.skew_factor.abs() + dec!(0.000001));
    }

    #[test]
    fn test_long_inventory_lowers_reservation() {
        let mut e = engine();
        e.seed_volatility(0.5);
        feed_trades(&mut e);
        e.on_market_state(market_state(), 60_000);
        e.on_inventory(InventoryState::from_venue(
            dec!(1),
            Price::new(dec!(100)),
            Price::new(dec!(100.05)),
            dec!(10_000),
        ));

        let q = e.compute_quotes(60_000).unwrap();
        // r = mid - γσ²q < mid, plus negative skew.
        assert!(q.reservation_price.inner() < dec!(100.05));
        assert!(q.skew_factor < Decimal::ZERO);
        // Long: bid notional shrinks (0.7), ask grows (1.3).
        let bid_notional = q.bid_size.notional(q.bid_price);
        let ask_notional = q.ask_size.notional(q.ask_price);
        assert!(bid_notional < ask_notional);
        let ratio = ask_notional / bid_notional;
        assert!((ratio - dec!(1.3) / dec!(0.7)).abs() < dec!(0.01));
    }

    #[test]
    fn test_reservation_monotone_in_inventory() {
        let mut last_r = None;
        for q_units in [-2i64, -1, 0, 1, 2] {
            let mut e = engine();
            feed_trades(&mut e);
            e.on_market_state(market_state(), 60_000);
            e.on_inventory(InventoryState::from_venue(
                Decimal::from(q_units),
                Price::new(dec!(100)),
                Price::new(dec!(100.05)),
                dec!(100_000),
            ));
            let q = e.compute_quotes(60_000).unwrap();
            if let Some(prev) = last_r {
                assert!(
                    q.reservation_price.inner() < prev,
                    "reservation must strictly decrease as inventory grows"
                );
                assert!(q.bid_price.inner() < prev);
            }
            last_r = Some(q.reservation_price.inner());
        }
    }

    #[test]
    fn test_sizes_shrink_with_inventory() {
        let mut last_bid_size = None;
        for units in [0i64, 1, 2, 3] {
            let mut e = engine();
            feed_trades(&mut e);
            e.on_market_state(market_state(), 60_000);
            e.on_inventory(InventoryState::from_venue(
                Decimal::from(units),
                Price::new(dec!(100)),
                Price::new(dec!(100.05)),
                dec!(10_000),
            ));
            let q = e.compute_quotes(60_000).unwrap();
            if let Some(prev) = last_bid_size {
                assert!(
                    q.bid_size.inner() <= prev,
                    "bid size must not grow with inventory"
                );
            }
            last_bid_size = Some(q.bid_size.inner());
        }
    }

    #[test]
    fn test_per_level_size_split() {
        let config = StoikovConfig {
            ladder_levels: 4,
            ..Default::default()
        };
        let mut e4 = StoikovEngine::new(config, Price::new(dec!(0.01))).unwrap();
        e4.seed_volatility(0.3);
        e4.on_market_state(market_state(), 60_000);
        e4.on_inventory(InventoryState::flat());

        let mut e1 = StoikovEngine::new(
            StoikovConfig {
                ladder_levels: 1,
                ..Default::default()
            },
            Price::new(dec!(0.01)),
        )
        .unwrap();
        e1.seed_volatility(0.3);
        e1.on_market_state(market_state(), 60_000);
        e1.on_inventory(InventoryState::flat());

        let q4 = e4.compute_quotes(60_000).unwrap();
        let q1 = e1.compute_quotes(60_000).unwrap();
        let ratio = q1.bid_size.inner() / q4.bid_size.inner();
        assert!((ratio - dec!(4)).abs() < dec!(0.001));
    }

    #[test]
    fn test_regime_multiplier_widens_on_high_vol() {
        let mut calm = engine();
        feed_trades(&mut calm);
        calm.on_market_state(market_state(), 60_000);
        calm.on_inventory(InventoryState::flat());
        let q_calm = calm.compute_quotes(60_000).unwrap();

        let mut hot = StoikovEngine::new(StoikovConfig::default(), Price::new(dec!(0.01))).unwrap();
        hot.seed_volatility(0.9);
        feed_trades(&mut hot);
        hot.on_market_state(market_state(), 60_000);
        hot.on_inventory(InventoryState::flat());
        let q_hot = hot.compute_quotes(60_000).unwrap();

        assert!(q_hot.regime_multiplier > q_calm.regime_multiplier);
        assert!(q_hot.half_spread > q_calm.half_spread);
    }

    #[test]
    fn test_microprice_bias_base() {
        // Heavier asks pull the microprice below mid; with the bias on,
        // the reservation follows it.
        let book = L2Book::new(
            vec![level(dec!(100.00), dec!(1))],
            vec![level(dec!(100.10), dec!(9))],
            1,
            60_000,
        );
        let state = BookProcessor::new(FeedConfig::default())
            .process_book(book, 60_000)
            .unwrap();

        let mut biased = StoikovEngine::new(
            StoikovConfig {
                microprice_bias: true,
                ..Default::default()
            },
            Price::new(dec!(0.01)),
        )
        .unwrap();
        biased.seed_volatility(0.3);
        biased.on_market_state(state.clone(), 60_000);
        biased.on_inventory(InventoryState::flat());

        let mut plain = engine();
        plain.on_market_state(state, 60_000);
        plain.on_inventory(InventoryState::flat());

        let qb = biased.compute_quotes(60_000).unwrap();
        let qp = plain.compute_quotes(60_000).unwrap();
        assert!(qb.reservation_price < qp.reservation_price);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = StoikovConfig {
            gamma: 9.0,
            ..Default::default()
        };
        assert!(StoikovEngine::new(config, Price::new(dec!(0.01))).is_err());
    }
}
