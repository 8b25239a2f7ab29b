//! L2 order-book and trade-tape primitives.
//!
//! An `L2Book` carries raw venue depth plus a monotonic sequence number.
//! Validation (sorted sides, non-crossed top) lives here so every consumer
//! sees the same acceptance rules.

use crate::error::{CoreError, Result};
use crate::order::OrderSide;
use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// A single depth level: price and resting size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub size: Size,
}

impl PriceLevel {
    pub fn new(price: Price, size: Size) -> Self {
        Self { price, size }
    }

    /// Notional resting at this level.
    pub fn notional(&self) -> rust_decimal::Decimal {
        self.size.notional(self.price)
    }
}

/// L2 order-book snapshot.
///
/// Bids are held in descending price order, asks ascending. `sequence`
/// is venue-monotonic; gaps are detected by the feed processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Book {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub sequence: u64,
    pub timestamp_ms: u64,
}

impl L2Book {
    pub fn new(
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
        sequence: u64,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            bids,
            asks,
            sequence,
            timestamp_ms,
        }
    }

    /// Best bid level. None when the side is empty.
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    /// Best ask level. None when the side is empty.
    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Sort both sides into canonical order (bids descending, asks ascending).
    pub fn normalize(&mut self) {
        self.bids.sort_by(|a, b| b.price.cmp(&a.price));
        self.asks.sort_by(|a, b| a.price.cmp(&b.price));
    }

    /// Validate the canonical-order book.
    ///
    /// Rejects empty sides, non-positive prices, and crossed tops.
    /// Call `normalize()` first if level ordering is not guaranteed.
    pub fn validate(&self) -> Result<()> {
        let top_bid = self
            .best_bid()
            .ok_or_else(|| CoreError::InvalidBook("empty bid side".to_string()))?;
        let top_ask = self
            .best_ask()
            .ok_or_else(|| CoreError::InvalidBook("empty ask side".to_string()))?;

        if !top_bid.price.is_positive() || !top_ask.price.is_positive() {
            return Err(CoreError::InvalidBook("non-positive top price".to_string()));
        }

        if top_bid.price >= top_ask.price {
            return Err(CoreError::InvalidBook(format!(
                "crossed book: bid {} >= ask {}",
                top_bid.price, top_ask.price
            )));
        }

        Ok(())
    }

    /// Levels for one side, in canonical order.
    pub fn side(&self, side: OrderSide) -> &[PriceLevel] {
        match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        }
    }
}

/// A single print from the trade tape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub price: Price,
    pub size: Size,
    pub side: OrderSide,
    pub timestamp_ms: u64,
}

impl Trade {
    pub fn new(price: Price, size: Size, side: OrderSide, timestamp_ms: u64) -> Self {
        Self {
            price,
            size,
            side,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: rust_decimal::Decimal, size: rust_decimal::Decimal) -> PriceLevel {
        PriceLevel::new(Price::new(price), Size::new(size))
    }

    #[test]
    fn test_valid_book() {
        let book = L2Book::new(
            vec![level(dec!(100.00), dec!(10))],
            vec![level(dec!(100.10), dec!(10))],
            1,
            0,
        );
        assert!(book.validate().is_ok());
    }

    #[test]
    fn test_crossed_book_rejected() {
        let book = L2Book::new(
            vec![level(dec!(100.20), dec!(5))],
            vec![level(dec!(100.10), dec!(5))],
            1,
            0,
        );
        assert!(matches!(book.validate(), Err(CoreError::InvalidBook(_))));
    }

    #[test]
    fn test_empty_side_rejected() {
        let book = L2Book::new(vec![], vec![level(dec!(100.10), dec!(5))], 1, 0);
        assert!(book.validate().is_err());

        let book = L2Book::new(vec![level(dec!(100.00), dec!(5))], vec![], 1, 0);
        assert!(book.validate().is_err());
    }

    #[test]
    fn test_normalize_sorts_sides() {
        let mut book = L2Book::new(
            vec![level(dec!(99.90), dec!(1)), level(dec!(100.00), dec!(2))],
            vec![level(dec!(100.20), dec!(1)), level(dec!(100.10), dec!(2))],
            1,
            0,
        );
        book.normalize();
        assert_eq!(book.bids[0].price, Price::new(dec!(100.00)));
        assert_eq!(book.asks[0].price, Price::new(dec!(100.10)));
        assert!(book.validate().is_ok());
    }

    #[test]
    fn test_touching_book_rejected() {
        let book = L2Book::new(
            vec![level(dec!(100.10), dec!(5))],
            vec![level(dec!(100.10), dec!(5))],
            1,
            0,
        );
        assert!(book.validate().is_err());
    }
}
