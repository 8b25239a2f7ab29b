//! Wire types for the exchange capability.
//!
//! Order updates and events are closed sum types; nothing here carries
//! open maps or dynamic payloads.

use avell_core::{ClientOrderId, L2Book, OrderSide, OrderType, Price, Size, TimeInForce, Trade};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A new-order request toward the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub amount: Size,
    /// Required for limit orders, ignored for market orders.
    pub price: Option<Price>,
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    pub client_id: Option<ClientOrderId>,
}

impl OrderRequest {
    /// Post-only limit order (the quoting workhorse).
    pub fn post_only_limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: Price,
        amount: Size,
        client_id: ClientOrderId,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            amount,
            price: Some(price),
            time_in_force: TimeInForce::GoodTilCrossing,
            post_only: true,
            client_id: Some(client_id),
        }
    }

    /// IOC market order used for flattening.
    pub fn flatten_market(symbol: impl Into<String>, side: OrderSide, amount: Size) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            time_in_force: TimeInForce::ImmediateOrCancel,
            post_only: false,
            client_id: Some(ClientOrderId::new()),
        }
    }

    /// Validate basic order parameters: finite positive amount, and a
    /// positive price on limit orders.
    pub fn validate(&self) -> Result<(), String> {
        if !self.amount.is_positive() {
            return Err(format!("non-positive amount {}", self.amount));
        }
        match self.order_type {
            OrderType::Limit | OrderType::Stop => match self.price {
                Some(p) if p.is_positive() => Ok(()),
                _ => Err("limit order requires a positive price".to_string()),
            },
            OrderType::Market => Ok(()),
        }
    }
}

/// Venue order status, as streamed in order updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }
}

/// An order as reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Venue-assigned order ID.
    pub exchange_id: u64,
    /// Echoed client ID, if one was supplied.
    pub client_id: Option<ClientOrderId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub amount: Size,
    pub filled: Size,
    /// Price of the most recent fill, zero when none.
    pub last_fill_price: Price,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    pub post_only: bool,
    /// Venue-assigned timestamp (Unix milliseconds).
    pub timestamp_ms: u64,
}

impl ExchangeOrder {
    pub fn remaining(&self) -> Size {
        self.amount - self.filled
    }
}

/// Venue-side representation of an order (string-typed wire form).
///
/// Round-trip mapping preserves every field except the venue-assigned
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub order_id: u64,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub price: Option<String>,
    pub orig_qty: String,
    pub executed_qty: String,
    pub last_fill_price: String,
    pub status: OrderStatus,
    pub time_in_force: String,
    pub post_only: bool,
    pub transact_time: u64,
}

impl From<&ExchangeOrder> for VenueOrder {
    fn from(o: &ExchangeOrder) -> Self {
        Self {
            order_id: o.exchange_id,
            client_order_id: o.client_id.as_ref().map(|c| c.as_str().to_string()),
            symbol: o.symbol.clone(),
            side: o.side.to_string(),
            order_type: o.order_type.to_string(),
            price: o.price.map(|p| p.to_string()),
            orig_qty: o.amount.to_string(),
            executed_qty: o.filled.to_string(),
            last_fill_price: o.last_fill_price.to_string(),
            status: o.status,
            time_in_force: o.time_in_force.to_string(),
            post_only: o.post_only,
            transact_time: o.timestamp_ms,
        }
    }
}

impl TryFrom<&VenueOrder> for ExchangeOrder {
    type Error = String;

    fn try_from(v: &VenueOrder) -> Result<Self, Self::Error> {
        let side = match v.side.as_str() {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            other => return Err(format!("unknown side {other}")),
        };
        let order_type = match v.order_type.as_str() {
            "limit" => OrderType::Limit,
            "market" => OrderType::Market,
            "stop" => OrderType::Stop,
            other => return Err(format!("unknown order type {other}")),
        };
        let time_in_force = match v.time_in_force.as_str() {
            "GTC" => TimeInForce::GoodTilCancelled,
            "IOC" => TimeInForce::ImmediateOrCancel,
            "FOK" => TimeInForce::FillOrKill,
            "GTX" => TimeInForce::GoodTilCrossing,
            other => return Err(format!("unknown time in force {other}")),
        };
        let parse_price = |s: &String| s.parse::<Price>().map_err(|e| e.to_string());

        Ok(Self {
            exchange_id: v.order_id,
            client_id: v
                .client_order_id
                .as_ref()
                .map(|s| ClientOrderId::from_string(s.clone())),
            symbol: v.symbol.clone(),
            side,
            order_type,
            price: v.price.as_ref().map(parse_price).transpose()?,
            amount: v.orig_qty.parse().map_err(|e: rust_decimal::Error| e.to_string())?,
            filled: v
                .executed_qty
                .parse()
                .map_err(|e: rust_decimal::Error| e.to_string())?,
            last_fill_price: parse_price(&v.last_fill_price)?,
            status: v.status,
            time_in_force,
            post_only: v.post_only,
            timestamp_ms: v.transact_time,
        })
    }
}

/// Position as reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    /// Signed base-unit position (positive = long).
    pub position: Decimal,
    /// Average entry price; zero when flat.
    pub entry_price: Price,
}

/// Account balance for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
}

/// Symbol trading filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub tick_size: Price,
    pub lot_step: Size,
    pub min_notional: Option<Decimal>,
}

/// Streamed exchange events, delivered into the bot loop.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    Book(L2Book),
    Trade(Trade),
    OrderUpdate(ExchangeOrder),
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_order() -> ExchangeOrder {
        ExchangeOrder {
            exchange_id: 42,
            client_id: Some(ClientOrderId::from_string("avell_1_abc".to_string())),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            price: Some(Price::new(dec!(100.02))),
            amount: Size::new(dec!(1.5)),
            filled: Size::new(dec!(0.5)),
            last_fill_price: Price::new(dec!(100.02)),
            status: OrderStatus::PartiallyFilled,
            time_in_force: TimeInForce::GoodTilCrossing,
            post_only: true,
            timestamp_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_venue_round_trip() {
        let order = sample_order();
        let venue = VenueOrder::from(&order);
        let back = ExchangeOrder::try_from(&venue).unwrap();
        // Every field round-trips; the timestamp is venue-assigned and
        // carried through verbatim here.
        assert_eq!(order, back);
    }

    #[test]
    fn test_round_trip_market_order() {
        let order = ExchangeOrder {
            order_type: OrderType::Market,
            price: None,
            time_in_force: TimeInForce::ImmediateOrCancel,
            post_only: false,
            ..sample_order()
        };
        let back = ExchangeOrder::try_from(&VenueOrder::from(&order)).unwrap();
        assert_eq!(order, back);
    }

    #[test]
    fn test_request_validation() {
        let good = OrderRequest::post_only_limit(
            "BTCUSDT",
            OrderSide::Buy,
            Price::new(dec!(100)),
            Size::new(dec!(1)),
            ClientOrderId::new(),
        );
        assert!(good.validate().is_ok());

        let zero_amount = OrderRequest {
            amount: Size::ZERO,
            ..good.clone()
        };
        assert!(zero_amount.validate().is_err());

        let no_price = OrderRequest {
            price: None,
            ..good
        };
        assert!(no_price.validate().is_err());

        let market = OrderRequest::flatten_market("BTCUSDT", OrderSide::Sell, Size::new(dec!(1)));
        assert!(market.validate().is_ok());
    }

    #[test]
    fn test_order_status_terminal() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
    }
}
