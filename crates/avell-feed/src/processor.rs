//! Book validation and microstructure feature computation.
//!
//! The processor owns the latest validated book and the sequence cursor.
//! Invalid books are dropped and counted; sequence gaps are informational
//! (resync is the venue adapter's job) and logged at most once per second.

use crate::error::{FeedError, FeedResult};
use crate::market_state::MarketState;
use avell_core::{L2Book, OrderSide, Price, Trade};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

fn default_top_n_depth() -> usize {
    5
}
fn default_microprice_levels() -> usize {
    3
}
fn default_impact_notional() -> Decimal {
    Decimal::from(10_000)
}

/// Feed processor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Levels aggregated for OBI and depth sums.
    #[serde(default = "default_top_n_depth")]
    pub top_n_depth: usize,
    /// Levels aggregated for the microprice.
    #[serde(default = "default_microprice_levels")]
    pub microprice_levels: usize,
    /// Probe notional for the impact price walk.
    #[serde(default = "default_impact_notional")]
    pub impact_notional: Decimal,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            top_n_depth: default_top_n_depth(),
            microprice_levels: default_microprice_levels(),
            impact_notional: default_impact_notional(),
        }
    }
}

/// Gaps inside this window flag the feed as unhealthy.
const GAP_BURST_WINDOW_MS: u64 = 10_000;

/// Gap count within the window that trips the health signal.
const GAP_BURST_THRESHOLD: usize = 5;

/// Validates L2 snapshots and derives `MarketState`.
#[derive(Debug)]
pub struct BookProcessor {
    config: FeedConfig,
    /// Next sequence number we expect from the venue.
    expected_sequence: Option<u64>,
    /// Total sequence gaps observed.
    gap_count: u64,
    /// Gap timestamps inside the burst window.
    recent_gaps: std::collections::VecDeque<u64>,
    /// Most recent gap, kept for the health signal.
    last_gap: Option<(u64, u64)>,
    /// Books dropped for validation failures.
    invalid_count: u64,
    /// Trades seen (forwarded to the intensity estimator by the caller).
    trade_count: u64,
    /// Last time a gap was logged (Unix milliseconds).
    last_gap_log_ms: u64,
    /// Latest validated book.
    latest_book: Option<L2Book>,
}

impl BookProcessor {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            expected_sequence: None,
            gap_count: 0,
            recent_gaps: std::collections::VecDeque::new(),
            last_gap: None,
            invalid_count: 0,
            trade_count: 0,
            last_gap_log_ms: 0,
            latest_book: None,
        }
    }

    /// Process one raw book snapshot.
    ///
    /// Returns the derived `MarketState` on success. Invalid books are
    /// dropped with an error; the sequence cursor advances either way.
    pub fn process_book(&mut self, mut book: L2Book, now_ms: u64) -> FeedResult<MarketState> {
        self.track_sequence(book.sequence, now_ms);

        book.normalize();
        if let Err(e) = self.validate(&book) {
            self.invalid_count += 1;
            debug!(sequence = book.sequence, %e, "dropping invalid book");
            return Err(e);
        }

        let state = self.derive_state(&book);
        self.latest_book = Some(book);
        Ok(state)
    }

    fn validate(&self, book: &L2Book) -> FeedResult<()> {
        let top_bid = book.best_bid().ok_or(FeedError::EmptySide("bid"))?;
        let top_ask = book.best_ask().ok_or(FeedError::EmptySide("ask"))?;

        if !top_bid.price.is_positive() || !top_ask.price.is_positive() {
            return Err(FeedError::InvalidBook("non-positive top price".to_string()));
        }
        if top_bid.price >= top_ask.price {
            return Err(FeedError::CrossedBook {
                bid: top_bid.price.to_string(),
                ask: top_ask.price.to_string(),
            });
        }
        Ok(())
    }

    /// Health signal: a burst of sequence gaps means the stream needs
    /// resubscription. The caller owns the recovery.
    pub fn health(&mut self, now_ms: u64) -> FeedResult<()> {
        let cutoff = now_ms.saturating_sub(GAP_BURST_WINDOW_MS);
        while let Some(&front) = self.recent_gaps.front() {
            if front < cutoff {
                self.recent_gaps.pop_front();
            } else {
                break;
            }
        }

        if self.recent_gaps.len() >= GAP_BURST_THRESHOLD {
            let (expected, got) = self.last_gap.unwrap_or((0, 0));
            return Err(FeedError::SequenceGap { expected, got });
        }
        Ok(())
    }

    /// Record a trade print. Counting only; the quoting engine owns the
    /// intensity estimator.
    pub fn record_trade(&mut self, _trade: &Trade) {
        self.trade_count += 1;
    }

    /// Latest validated book, if any.
    pub fn latest_book(&self) -> Option<&L2Book> {
        self.latest_book.as_ref()
    }

    /// Total sequence gaps observed.
    pub fn gap_count(&self) -> u64 {
        self.gap_count
    }

    /// Books dropped for validation failures.
    pub fn invalid_count(&self) -> u64 {
        self.invalid_count
    }

    fn track_sequence(&mut self, sequence: u64, now_ms: u64) {
        if let Some(expected) = self.expected_sequence {
            if sequence != expected {
                self.gap_count += 1;
                self.recent_gaps.push_back(now_ms);
                self.last_gap = Some((expected, sequence));
                // At most one gap log per second; resync is the venue
                // adapter's responsibility.
                if now_ms.saturating_sub(self.last_gap_log_ms) >= 1_000 {
                    warn!(
                        expected,
                        got = sequence,
                        total_gaps = self.gap_count,
                        "book sequence gap"
                    );
                    self.last_gap_log_ms = now_ms;
                }
            }
        }
        self.expected_sequence = Some(sequence + 1);
    }

    fn derive_state(&self, book: &L2Book) -> MarketState {
        let top_bid = book.bids[0];
        let top_ask = book.asks[0];

        let mid = (top_bid.price.inner() + top_ask.price.inner()) / Decimal::TWO;
        let spread = top_ask.price.inner() - top_bid.price.inner();
        let spread_bps = if mid.is_zero() {
            Decimal::ZERO
        } else {
            spread / mid * Decimal::from(10_000)
        };

        let n = self.config.top_n_depth;
        let top_bid_depth: Decimal = book.bids.iter().take(n).map(|l| l.size.inner()).sum();
        let top_ask_depth: Decimal = book.asks.iter().take(n).map(|l| l.size.inner()).sum();

        let obi = if (top_bid_depth + top_ask_depth).is_zero() {
            Decimal::ZERO
        } else {
            (top_bid_depth - top_ask_depth) / (top_bid_depth + top_ask_depth)
        };

        let weighted_mid = {
            let denom = top_bid.size.inner() + top_ask.size.inner();
            if denom.is_zero() {
                mid
            } else {
                (top_bid.price.inner() * top_ask.size.inner()
                    + top_ask.price.inner() * top_bid.size.inner())
                    / denom
            }
        };

        MarketState {
            mid: Price::new(mid),
            microprice: Price::new(microprice(book, self.config.microprice_levels, mid)),
            spread,
            spread_bps,
            obi,
            top_bid_depth,
            top_ask_depth,
            weighted_mid: Price::new(weighted_mid),
            impact_bid: impact_price(book, OrderSide::Buy, self.config.impact_notional),
            impact_ask: impact_price(book, OrderSide::Sell, self.config.impact_notional),
            volatility: 0.0,
            intensity: 0.0,
            timestamp_ms: book.timestamp_ms,
        }
    }
}

/// Microprice over the top `levels` levels.
///
/// The bid VWAP is weighted by ask volume and vice versa, so the price
/// leans toward the larger side. Falls back to the simple mid when
/// either side's volume is zero.
fn microprice(book: &L2Book, levels: usize, mid: Decimal) -> Decimal {
    let vb: Decimal = book.bids.iter().take(levels).map(|l| l.size.inner()).sum();
    let va: Decimal = book.asks.iter().take(levels).map(|l| l.size.inner()).sum();

    if vb.is_zero() || va.is_zero() {
        return mid;
    }

    let bid_vwap: Decimal = book
        .bids
        .iter()
        .take(levels)
        .map(|l| l.price.inner() * l.size.inner())
        .sum::<Decimal>()
        / vb;
    let ask_vwap: Decimal = book
        .asks
        .iter()
        .take(levels)
        .map(|l| l.price.inner() * l.size.inner())
        .sum::<Decimal>()
        / va;

    (bid_vwap * va + ask_vwap * vb) / (vb + va)
}

/// Notional-weighted average fill price for sweeping `notional` through
/// one side of the book.
///
/// `side` is the book side being consumed: `Buy` walks the bids (a sell
/// impact), `Sell` walks the asks (a buy impact). Returns `Price::ZERO`
/// when the book cannot absorb the notional.
pub fn impact_price(book: &L2Book, side: OrderSide, notional: Decimal) -> Price {
    if notional <= Decimal::ZERO {
        return Price::ZERO;
    }

    let levels = book.side(side);
    let mut remaining = notional;
    let mut units = Decimal::ZERO;

    for level in levels {
        let level_notional = level.size.notional(level.price);
        if remaining <= level_notional {
            units += remaining / level.price.inner();
            remaining = Decimal::ZERO;
            break;
        }
        units += level.size.inner();
        remaining -= level_notional;
    }

    if !remaining.is_zero() || units.is_zero() {
        return Price::ZERO;
    }

    Price::new(notional / units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use avell_core::{PriceLevel, Size};
    use rust_decimal_macros::dec;

    fn level(price: Decimal, size: Decimal) -> PriceLevel {
        PriceLevel::new(Price::new(price), Size::new(size))
    }

    fn simple_book(sequence: u64) -> L2Book {
        L2Book::new(
            vec![level(dec!(100.00), dec!(10))],
            vec![level(dec!(100.10), dec!(10))],
            sequence,
            1_000,
        )
    }

    fn deep_book() -> L2Book {
        L2Book::new(
            vec![
                level(dec!(100.00), dec!(2)),
                level(dec!(99.90), dec!(4)),
                level(dec!(99.80), dec!(6)),
            ],
            vec![
                level(dec!(100.10), dec!(1)),
                level(dec!(100.20), dec!(3)),
                level(dec!(100.30), dec!(5)),
            ],
            7,
            1_000,
        )
    }

    #[test]
    fn test_symmetric_book_metrics() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        let state = proc.process_book(simple_book(1), 1_000).unwrap();

        assert_eq!(state.mid, Price::new(dec!(100.05)));
        assert_eq!(state.spread, dec!(0.10));
        assert_eq!(state.obi, dec!(0));
        assert_eq!(state.microprice, Price::new(dec!(100.05)));
        assert_eq!(state.weighted_mid, Price::new(dec!(100.05)));
        // spread_bps = 0.10 / 100.05 * 10000 ≈ 9.995
        assert!(state.spread_bps > dec!(9.9) && state.spread_bps < dec!(10));
    }

    #[test]
    fn test_crossed_book_dropped() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        let book = L2Book::new(
            vec![level(dec!(100.20), dec!(5))],
            vec![level(dec!(100.10), dec!(5))],
            1,
            1_000,
        );
        assert!(proc.process_book(book, 1_000).is_err());
        assert_eq!(proc.invalid_count(), 1);
        assert!(proc.latest_book().is_none());
    }

    #[test]
    fn test_empty_side_dropped() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        let book = L2Book::new(vec![], vec![level(dec!(100.10), dec!(5))], 1, 1_000);
        assert!(proc.process_book(book, 1_000).is_err());
        assert_eq!(proc.invalid_count(), 1);
    }

    #[test]
    fn test_sequence_gap_counted_and_cursor_advances() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        proc.process_book(simple_book(1), 1_000).unwrap();
        assert_eq!(proc.gap_count(), 0);

        // 2 skipped: gap recorded, cursor still advances to 4
        proc.process_book(simple_book(3), 2_000).unwrap();
        assert_eq!(proc.gap_count(), 1);

        proc.process_book(simple_book(4), 3_000).unwrap();
        assert_eq!(proc.gap_count(), 1);
    }

    #[test]
    fn test_gap_burst_health_signal() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        proc.process_book(simple_book(1), 0).unwrap();
        // Five consecutive updates each skip a sequence number.
        for i in 0..5u64 {
            proc.process_book(simple_book(3 + i * 2), 1_000 + i).unwrap();
        }
        assert!(matches!(
            proc.health(2_000),
            Err(FeedError::SequenceGap { .. })
        ));
        // The burst ages out of the window.
        assert!(proc.health(60_000).is_ok());
    }

    #[test]
    fn test_idempotent_metrics() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        let s1 = proc.process_book(deep_book(), 1_000).unwrap();
        // Re-processing the identical snapshot records a gap (sequence
        // repeats) but must produce the identical state.
        let s2 = proc.process_book(deep_book(), 2_000).unwrap();
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_obi_leans_toward_bids() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        let state = proc.process_book(deep_book(), 1_000).unwrap();
        // Vb = 12, Va = 9 → obi = 3/21
        assert_eq!(state.top_bid_depth, dec!(12));
        assert_eq!(state.top_ask_depth, dec!(9));
        assert_eq!(state.obi.round_dp(4), dec!(0.1429));
        assert!(state.obi > dec!(0) && state.obi <= dec!(1));
    }

    #[test]
    fn test_microprice_leans_toward_larger_side() {
        // Heavier asks: microprice weights the bid VWAP by ask volume,
        // pulling the output below mid.
        let book = L2Book::new(
            vec![level(dec!(100.00), dec!(1))],
            vec![level(dec!(100.10), dec!(9))],
            1,
            1_000,
        );
        let mut proc = BookProcessor::new(FeedConfig::default());
        let state = proc.process_book(book, 1_000).unwrap();
        assert!(state.microprice.inner() < dec!(100.05));
    }

    #[test]
    fn test_impact_price_within_one_level() {
        let book = deep_book();
        // Buy 100.10 * 1 = 100.1 notional exactly consumes level one.
        let px = impact_price(&book, OrderSide::Sell, dec!(100.10));
        assert_eq!(px, Price::new(dec!(100.10)));
    }

    #[test]
    fn test_impact_price_across_levels() {
        let book = deep_book();
        // 100.10*1 + 100.20*1 = 200.30 notional: one unit at each of the
        // first two ask levels → average 100.15.
        let px = impact_price(&book, OrderSide::Sell, dec!(200.30));
        assert_eq!(px, Price::new(dec!(100.15)));
    }

    #[test]
    fn test_impact_price_insufficient_depth() {
        let book = deep_book();
        let px = impact_price(&book, OrderSide::Sell, dec!(1_000_000));
        assert_eq!(px, Price::ZERO);
    }

    #[test]
    fn test_unsorted_input_normalized() {
        let mut proc = BookProcessor::new(FeedConfig::default());
        let book = L2Book::new(
            vec![level(dec!(99.90), dec!(4)), level(dec!(100.00), dec!(2))],
            vec![level(dec!(100.20), dec!(3)), level(dec!(100.10), dec!(1))],
            1,
            1_000,
        );
        let state = proc.process_book(book, 1_000).unwrap();
        assert_eq!(state.mid, Price::new(dec!(100.05)));
    }
}
