//! Execution lifecycle types.
//!
//! This module provides:
//! - `OrderState` / `ManagedOrder`: per-order lifecycle tracking
//! - `PatientOrderState`: engine-level state for the patient variant
//! - `QuoteSnapshot`: the set of live quote levels a session posted
//!
//! The execution engine exclusively owns live `ManagedOrder`s and the
//! `QuoteSnapshot`; other components receive read-only views.

use crate::order::{ClientOrderId, OrderSide};
use crate::{Price, Size};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position magnitude below which inventory counts as flat (base units).
pub const POSITION_EPSILON: f64 = 1e-3;

/// State of a managed order in its lifecycle.
///
/// `MakerPlaced` is the steady state for a resting post-only quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OrderState {
    /// No order outstanding.
    #[default]
    Idle,
    /// Submission sent, awaiting venue ack.
    Placing,
    /// Resting on the book as a maker.
    MakerPlaced,
    /// Partially filled, remainder still resting.
    PartialFilled,
    /// Completely filled.
    Filled,
    /// Cancel sent, awaiting ack.
    Cancelling,
    /// Cancel/replace in flight.
    Replacing,
    /// Being closed out via IOC/market.
    Flattening,
    /// Post-flatten quiet period.
    Cooldown,
    /// Rejected or failed; retry pending or abandoned.
    Error,
}

impl OrderState {
    /// Returns true if the order is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Idle)
    }

    /// Returns true if the order may still rest on or reach the book.
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Placing | Self::MakerPlaced | Self::PartialFilled | Self::Replacing
        )
    }
}

/// Engine-level state for the patient event-driven variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PatientOrderState {
    #[default]
    Idle,
    QuotePlacing,
    WaitingInQueue,
    PartialFilled,
    TopNExit,
    DriftTriggered,
    QueueAheadTriggered,
    ReplacingLevel,
    RiskBreach,
    Flattening,
    Cooldown,
    Error,
}

impl PatientOrderState {
    /// Returns true if the engine has quotes resting or in flight.
    #[must_use]
    pub fn is_quoting(&self) -> bool {
        matches!(
            self,
            Self::QuotePlacing | Self::WaitingInQueue | Self::PartialFilled | Self::ReplacingLevel
        )
    }
}

/// An order owned and driven by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedOrder {
    /// Locally unique client ID.
    pub client_id: ClientOrderId,
    /// Venue-assigned ID, stored on ack.
    pub exchange_id: Option<u64>,
    /// Order side.
    pub side: OrderSide,
    /// Limit price.
    pub price: Price,
    /// Original order size.
    pub original_size: Size,
    /// Amount filled so far.
    pub filled_size: Size,
    /// Current lifecycle state.
    pub state: OrderState,
    /// When the order was submitted (Unix milliseconds).
    pub placed_time_ms: u64,
    /// Last state change (Unix milliseconds).
    pub last_update_ms: u64,
    /// When the TTL timer fires (Unix milliseconds).
    pub ttl_expiry_ms: u64,
    /// Submission retries so far.
    pub retry_count: u32,
    /// Ladder level index (0 = tightest).
    pub ladder_level: u32,
    /// Whether the order carries the post-only flag.
    pub is_post_only: bool,
}

impl ManagedOrder {
    /// Create a managed order in the `Placing` state.
    pub fn new(
        client_id: ClientOrderId,
        side: OrderSide,
        price: Price,
        size: Size,
        ladder_level: u32,
        now_ms: u64,
        ttl_ms: u64,
    ) -> Self {
        Self {
            client_id,
            exchange_id: None,
            side,
            price,
            original_size: size,
            filled_size: Size::ZERO,
            state: OrderState::Placing,
            placed_time_ms: now_ms,
            last_update_ms: now_ms,
            ttl_expiry_ms: now_ms + ttl_ms,
            retry_count: 0,
            ladder_level,
            is_post_only: true,
        }
    }

    /// Remaining unfilled size.
    #[must_use]
    pub fn remaining_size(&self) -> Size {
        self.original_size - self.filled_size
    }

    /// Cumulative fill as a fraction of original size, in percent.
    #[must_use]
    pub fn filled_pct(&self) -> rust_decimal::Decimal {
        if self.original_size.is_zero() {
            return rust_decimal::Decimal::ZERO;
        }
        self.filled_size.inner() / self.original_size.inner() * rust_decimal::Decimal::from(100)
    }

    /// Whether the TTL timer has expired.
    #[must_use]
    pub fn ttl_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.ttl_expiry_ms
    }
}

/// Key identifying one quote level within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelKey {
    pub side: OrderSide,
    pub level: u32,
}

impl LevelKey {
    pub fn new(side: OrderSide, level: u32) -> Self {
        Self { side, level }
    }
}

impl std::fmt::Display for LevelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.side, self.level)
    }
}

/// Per-level bookkeeping inside a `QuoteSnapshot`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLevel {
    /// Posted price.
    pub price: Price,
    /// Posted size.
    pub size: Size,
    /// Client ID of the order resting at this level.
    pub client_id: ClientOrderId,
    /// Per-level TTL expiry (Unix milliseconds).
    pub ttl_expiry_ms: u64,
    /// How many times this level has been improved.
    pub improvement_count: u32,
    /// When the level was last improved (Unix milliseconds).
    pub last_improvement_ms: u64,
}

/// Snapshot of the quote session the engine currently has on the book.
///
/// Created when a ladder is placed, discarded when the session ends
/// (fully filled, cancelled, replaced, or expired).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSnapshot {
    /// Placed levels keyed by `(side, level_index)`.
    pub levels: HashMap<LevelKey, SnapshotLevel>,
    /// Mid price captured when the quotes were placed.
    pub mid_at_post: Price,
    /// Session expiry (Unix milliseconds), jitter already applied.
    pub session_expiry_ms: u64,
    /// When the session began (Unix milliseconds).
    pub created_at_ms: u64,
}

impl QuoteSnapshot {
    pub fn new(mid_at_post: Price, session_expiry_ms: u64, created_at_ms: u64) -> Self {
        Self {
            levels: HashMap::new(),
            mid_at_post,
            session_expiry_ms,
            created_at_ms,
        }
    }

    /// Insert or replace a level.
    pub fn insert_level(&mut self, key: LevelKey, level: SnapshotLevel) {
        self.levels.insert(key, level);
    }

    /// Remove a level, returning it if present.
    pub fn remove_level(&mut self, key: &LevelKey) -> Option<SnapshotLevel> {
        self.levels.remove(key)
    }

    /// Whether the session TTL has elapsed.
    #[must_use]
    pub fn session_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.session_expiry_ms
    }

    /// Levels whose per-level TTL has elapsed.
    pub fn expired_levels(&self, now_ms: u64) -> Vec<LevelKey> {
        self.levels
            .iter()
            .filter(|(_, lvl)| now_ms >= lvl.ttl_expiry_ms)
            .map(|(key, _)| *key)
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide) -> ManagedOrder {
        ManagedOrder::new(
            ClientOrderId::new(),
            side,
            Price::new(dec!(100)),
            Size::new(dec!(2)),
            0,
            1_000,
            500,
        )
    }

    #[test]
    fn test_new_order_is_placing() {
        let o = order(OrderSide::Buy);
        assert_eq!(o.state, OrderState::Placing);
        assert!(o.state.is_live());
        assert_eq!(o.ttl_expiry_ms, 1_500);
        assert!(o.is_post_only);
    }

    #[test]
    fn test_remaining_and_filled_pct() {
        let mut o = order(OrderSide::Sell);
        o.filled_size = Size::new(dec!(0.5));
        assert_eq!(o.remaining_size(), Size::new(dec!(1.5)));
        assert_eq!(o.filled_pct(), dec!(25));
    }

    #[test]
    fn test_ttl_expired() {
        let o = order(OrderSide::Buy);
        assert!(!o.ttl_expired(1_499));
        assert!(o.ttl_expired(1_500));
    }

    #[test]
    fn test_order_state_classification() {
        assert!(OrderState::MakerPlaced.is_live());
        assert!(OrderState::Placing.is_live());
        assert!(OrderState::PartialFilled.is_live());
        assert!(OrderState::Replacing.is_live());
        assert!(!OrderState::Cooldown.is_live());
        assert!(OrderState::Filled.is_terminal());
        assert!(OrderState::Idle.is_terminal());
        assert!(!OrderState::Error.is_terminal());
    }

    #[test]
    fn test_snapshot_level_expiry() {
        let mut snap = QuoteSnapshot::new(Price::new(dec!(100.05)), 10_000, 1_000);
        let key = LevelKey::new(OrderSide::Buy, 0);
        snap.insert_level(
            key,
            SnapshotLevel {
                price: Price::new(dec!(100.02)),
                size: Size::new(dec!(1)),
                client_id: ClientOrderId::new(),
                ttl_expiry_ms: 2_000,
                improvement_count: 0,
                last_improvement_ms: 0,
            },
        );

        assert!(snap.expired_levels(1_999).is_empty());
        assert_eq!(snap.expired_levels(2_000), vec![key]);
        assert!(!snap.session_expired(9_999));
        assert!(snap.session_expired(10_000));
    }
}
