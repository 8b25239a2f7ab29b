//! Ladder construction and venue-filter rounding.
//!
//! Level 0 sits at the quote price; deeper levels step away by
//! `tick * (level + 1) * post_only_offset`. Bids round down to tick,
//! asks round up, sizes round down to lot, and sub-min-notional sizes
//! are bumped upward by whole lot steps.

use avell_core::{OrderSide, Price, Size};
use avell_exchange::SymbolFilters;
use avell_mm::StoikovQuotes;
use rust_decimal::Decimal;

/// One order of the ladder, rounded and filter-checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LadderOrder {
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    pub level: u32,
}

/// Build the two-sided ladder from a quote.
///
/// Orders that remain invalid after rounding (non-positive price or
/// size) are dropped rather than sent to the venue.
pub fn build_ladder(
    quotes: &StoikovQuotes,
    filters: &SymbolFilters,
    levels: u32,
    post_only_offset: Decimal,
) -> Vec<LadderOrder> {
    let tick = filters.tick_size;
    let mut out = Vec::with_capacity(levels as usize * 2);

    for level in 0..levels {
        let offset = if level == 0 {
            Decimal::ZERO
        } else {
            tick.inner() * Decimal::from(level + 1) * post_only_offset
        };

        let bid_raw = Price::new(quotes.bid_price.inner() - offset);
        let ask_raw = Price::new(quotes.ask_price.inner() + offset);

        if let Some(order) = rounded_order(OrderSide::Buy, bid_raw, quotes.bid_size, level, filters)
        {
            out.push(order);
        }
        if let Some(order) =
            rounded_order(OrderSide::Sell, ask_raw, quotes.ask_size, level, filters)
        {
            out.push(order);
        }
    }

    out
}

/// Round one order to the venue filters; `None` when it stays invalid.
pub fn rounded_order(
    side: OrderSide,
    price: Price,
    size: Size,
    level: u32,
    filters: &SymbolFilters,
) -> Option<LadderOrder> {
    let price = match side {
        OrderSide::Buy => price.floor_to_tick(filters.tick_size),
        OrderSide::Sell => price.ceil_to_tick(filters.tick_size),
    };
    if !price.is_positive() {
        return None;
    }

    let mut size = size.floor_to_lot(filters.lot_step);

    // Bump to min notional by whole lot steps.
    if let Some(min_notional) = filters.min_notional {
        let lot = filters.lot_step;
        if !lot.is_zero() {
            while size.notional(price) < min_notional {
                size = size + lot;
            }
        } else if size.notional(price) < min_notional {
            return None;
        }
    }

    if !size.is_positive() {
        return None;
    }

    Some(LadderOrder {
        side,
        price,
        size,
        level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
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
            bid_price: Price::new(dec!(100.004)),
            ask_price: Price::new(dec!(100.096)),
            bid_size: Size::new(dec!(0.5004)),
            ask_size: Size::new(dec!(0.5004)),
            skew_factor: dec!(0),
            regime_multiplier: dec!(1),
            timestamp_ms: 1_000,
        }
    }

    #[test]
    fn test_level_zero_at_quote_price() {
        let ladder = build_ladder(&quotes(), &filters(), 1, dec!(1));
        assert_eq!(ladder.len(), 2);

        let bid = ladder.iter().find(|o| o.side == OrderSide::Buy).unwrap();
        let ask = ladder.iter().find(|o| o.side == OrderSide::Sell).unwrap();

        // Bid floors, ask ceils.
        assert_eq!(bid.price, Price::new(dec!(100.00)));
        assert_eq!(ask.price, Price::new(dec!(100.10)));
        // Sizes floor to lot.
        assert_eq!(bid.size, Size::new(dec!(0.500)));
    }

    #[test]
    fn test_deeper_levels_step_away() {
        let ladder = build_ladder(&quotes(), &filters(), 3, dec!(2));
        assert_eq!(ladder.len(), 6);

        let bids: Vec<_> = ladder
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .collect();
        // Level 1 offset: 0.01 * 2 * 2 = 0.04; level 2: 0.01 * 3 * 2 = 0.06.
        assert_eq!(bids[0].price, Price::new(dec!(100.00)));
        assert_eq!(bids[1].price, Price::new(dec!(99.96)));
        assert_eq!(bids[2].price, Price::new(dec!(99.94)));

        let asks: Vec<_> = ladder
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .collect();
        assert_eq!(asks[0].price, Price::new(dec!(100.10)));
        assert_eq!(asks[1].price, Price::new(dec!(100.14)));
        assert_eq!(asks[2].price, Price::new(dec!(100.16)));
    }

    #[test]
    fn test_min_notional_bump() {
        let mut q = quotes();
        // 0.05 * 100 = 5 notional, below the 10 minimum.
        q.bid_size = Size::new(dec!(0.05));
        q.ask_size = Size::new(dec!(0.05));

        let ladder = build_ladder(&q, &filters(), 1, dec!(1));
        for order in &ladder {
            assert!(order.size.notional(order.price) >= dec!(10));
            // Bumped by whole lots.
            let lots = order.size.inner() / dec!(0.001);
            assert_eq!(lots, lots.trunc());
        }
    }

    #[test]
    fn test_invalid_orders_dropped() {
        let mut q = quotes();
        q.bid_price = Price::new(dec!(-1));
        q.bid_size = Size::ZERO;
        q.ask_size = Size::ZERO;

        let ladder = build_ladder(&q, &filters(), 1, dec!(1));
        // Negative bid dropped; zero-size ask bumped to min notional.
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder[0].side, OrderSide::Sell);
    }

    #[test]
    fn test_ladder_respects_level_cap() {
        let ladder = build_ladder(&quotes(), &filters(), 4, dec!(1));
        assert!(ladder.len() <= 8);
    }
}
