//! In-memory exchange for tests.
//!
//! Matches the capability surface without any I/O: limit orders rest
//! until a test fills or cancels them, market orders fill immediately
//! at the current mark, and every transition is streamed as an
//! `ExchangeEvent` just like a live adapter would.

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{
    Balance, ExchangeEvent, ExchangeOrder, OrderRequest, OrderStatus, PositionInfo, SymbolFilters,
};
use async_trait::async_trait;
use avell_core::{L2Book, OrderSide, OrderType, Price, Size, Trade};
use parking_lot::Mutex;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct MockState {
    next_oid: u64,
    clock_ms: u64,
    open_orders: HashMap<u64, ExchangeOrder>,
    position: Decimal,
    entry_price: Price,
    balances: Vec<Balance>,
    filters: SymbolFilters,
    book: Option<L2Book>,
    mark_price: Price,
    /// Orders rejected before the next acceptance (simulates venue errors).
    reject_next: u32,
    /// Network failures injected before the next success.
    fail_next: u32,
    placed_count: u64,
    cancelled_count: u64,
}

/// In-memory `ExchangeClient` implementation.
pub struct MockExchange {
    state: Arc<Mutex<MockState>>,
    connected: AtomicBool,
    event_tx: mpsc::UnboundedSender<ExchangeEvent>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<ExchangeEvent>>>,
}

impl MockExchange {
    pub fn new(filters: SymbolFilters) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_oid: 1,
                clock_ms: 0,
                open_orders: HashMap::new(),
                position: Decimal::ZERO,
                entry_price: Price::ZERO,
                balances: vec![Balance {
                    asset: "USDT".to_string(),
                    total: Decimal::from(100_000),
                    available: Decimal::from(100_000),
                }],
                filters,
                book: None,
                mark_price: Price::ZERO,
                reject_next: 0,
                fail_next: 0,
                placed_count: 0,
                cancelled_count: 0,
            })),
            connected: AtomicBool::new(false),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event stream; callable once.
    pub fn take_events(&self) -> mpsc::UnboundedReceiver<ExchangeEvent> {
        self.event_rx
            .lock()
            .take()
            .expect("event stream already taken")
    }

    /// Advance the mock clock used for venue timestamps.
    pub fn set_clock(&self, now_ms: u64) {
        self.state.lock().clock_ms = now_ms;
    }

    /// Install a book and stream it as an event.
    pub fn push_book(&self, book: L2Book) {
        let mut state = self.state.lock();
        if let Some(top_bid) = book.best_bid() {
            if let Some(top_ask) = book.best_ask() {
                state.mark_price = Price::new(
                    (top_bid.price.inner() + top_ask.price.inner()) / Decimal::TWO,
                );
            }
        }
        state.book = Some(book.clone());
        drop(state);
        let _ = self.event_tx.send(ExchangeEvent::Book(book));
    }

    /// Stream a trade print.
    pub fn push_trade(&self, trade: Trade) {
        let _ = self.event_tx.send(ExchangeEvent::Trade(trade));
    }

    /// Override the venue position (e.g. to seed a scenario).
    pub fn set_position(&self, position: Decimal, entry_price: Price) {
        let mut state = self.state.lock();
        state.position = position;
        state.entry_price = entry_price;
    }

    /// Reject the next `n` order placements.
    pub fn reject_next_orders(&self, n: u32) {
        self.state.lock().reject_next = n;
    }

    /// Fail the next `n` placements with a network error.
    pub fn fail_next_orders(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Fill a resting order (fully or partially) and stream the update.
    pub fn fill_order(&self, exchange_id: u64, fill: Size) -> ExchangeResult<()> {
        let mut state = self.state.lock();
        let order = state
            .open_orders
            .get_mut(&exchange_id)
            .ok_or(ExchangeError::UnknownOrder(exchange_id))?;

        let fill = Size::new(fill.inner().min(order.remaining().inner()));
        order.filled = order.filled + fill;
        let price = order.price.unwrap_or(order.last_fill_price);
        order.last_fill_price = price;
        order.status = if order.remaining().is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        let update = order.clone();
        let side = order.side;
        let done = order.status == OrderStatus::Filled;

        // Venue-truth position update.
        let signed = fill.inner() * Decimal::from(side.sign());
        let old_position = state.position;
        state.position += signed;
        if old_position.is_zero() || old_position.signum() == signed.signum() {
            state.entry_price = price;
        }
        if done {
            state.open_orders.remove(&exchange_id);
        }
        drop(state);

        let _ = self.event_tx.send(ExchangeEvent::OrderUpdate(update));
        Ok(())
    }

    pub fn open_order_count(&self) -> usize {
        self.state.lock().open_orders.len()
    }

    pub fn position(&self) -> Decimal {
        self.state.lock().position
    }

    pub fn placed_count(&self) -> u64 {
        self.state.lock().placed_count
    }

    pub fn cancelled_count(&self) -> u64 {
        self.state.lock().cancelled_count
    }

    fn send_update(&self, order: ExchangeOrder) {
        let _ = self.event_tx.send(ExchangeEvent::OrderUpdate(order));
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new(SymbolFilters {
            tick_size: Price::new(Decimal::new(1, 2)),
            lot_step: Size::new(Decimal::new(1, 3)),
            min_notional: Some(Decimal::from(10)),
        })
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn connect(&self) -> ExchangeResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ExchangeResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn subscribe_order_book(&self, _symbol: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn unsubscribe_order_book(&self, _symbol: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn subscribe_trades(&self, _symbol: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn unsubscribe_trades(&self, _symbol: &str) -> ExchangeResult<()> {
        Ok(())
    }

    async fn place_order(&self, request: OrderRequest) -> ExchangeResult<ExchangeOrder> {
        request
            .validate()
            .map_err(ExchangeError::InvalidOrder)?;

        let mut state = self.state.lock();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(ExchangeError::Network("injected failure".to_string()));
        }
        if state.reject_next > 0 {
            state.reject_next -= 1;
            return Err(ExchangeError::Rejected("injected reject".to_string()));
        }

        // Post-only orders that would cross the book are rejected, as a
        // GTX venue would.
        if request.post_only {
            if let (Some(price), Some(book)) = (request.price, state.book.as_ref()) {
                let crosses = match request.side {
                    OrderSide::Buy => book.best_ask().is_some_and(|a| price >= a.price),
                    OrderSide::Sell => book.best_bid().is_some_and(|b| price <= b.price),
                };
                if crosses {
                    return Err(ExchangeError::Rejected("post-only would cross".to_string()));
                }
            }
        }

        let oid = state.next_oid;
        state.next_oid += 1;
        state.placed_count += 1;

        let mut order = ExchangeOrder {
            exchange_id: oid,
            client_id: request.client_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            amount: request.amount,
            filled: Size::ZERO,
            last_fill_price: Price::ZERO,
            status: OrderStatus::New,
            time_in_force: request.time_in_force,
            post_only: request.post_only,
            timestamp_ms: state.clock_ms,
        };

        if request.order_type == OrderType::Market {
            // Fill immediately at mark.
            let price = state.mark_price;
            order.filled = order.amount;
            order.last_fill_price = price;
            order.status = OrderStatus::Filled;
            let signed = order.amount.inner() * Decimal::from(order.side.sign());
            state.position += signed;
            let update = order.clone();
            drop(state);
            self.send_update(update);
            return Ok(order);
        }

        state.open_orders.insert(oid, order.clone());
        drop(state);
        self.send_update(order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, exchange_id: u64, _symbol: &str) -> ExchangeResult<bool> {
        let mut state = self.state.lock();
        match state.open_orders.remove(&exchange_id) {
            Some(mut order) => {
                state.cancelled_count += 1;
                order.status = OrderStatus::Canceled;
                drop(state);
                self.send_update(order);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_order(
        &self,
        exchange_id: u64,
        request: OrderRequest,
    ) -> ExchangeResult<ExchangeOrder> {
        let cancelled = self.cancel_order(exchange_id, &request.symbol).await?;
        if !cancelled {
            return Err(ExchangeError::UnknownOrder(exchange_id));
        }
        self.place_order(request).await
    }

    async fn get_order(&self, exchange_id: u64, _symbol: &str) -> ExchangeResult<ExchangeOrder> {
        self.state
            .lock()
            .open_orders
            .get(&exchange_id)
            .cloned()
            .ok_or(ExchangeError::UnknownOrder(exchange_id))
    }

    async fn get_open_orders(&self, _symbol: &str) -> ExchangeResult<Vec<ExchangeOrder>> {
        Ok(self.state.lock().open_orders.values().cloned().collect())
    }

    async fn get_positions(&self, symbol: &str) -> ExchangeResult<Vec<PositionInfo>> {
        let state = self.state.lock();
        Ok(vec![PositionInfo {
            symbol: symbol.to_string(),
            position: state.position,
            entry_price: state.entry_price,
        }])
    }

    async fn get_balance(&self) -> ExchangeResult<Vec<Balance>> {
        Ok(self.state.lock().balances.clone())
    }

    async fn get_order_book(&self, _symbol: &str, depth: usize) -> ExchangeResult<L2Book> {
        let state = self.state.lock();
        let mut book = state
            .book
            .clone()
            .ok_or_else(|| ExchangeError::Network("no book".to_string()))?;
        book.bids.truncate(depth);
        book.asks.truncate(depth);
        Ok(book)
    }

    async fn symbol_filters(&self, _symbol: &str) -> ExchangeResult<SymbolFilters> {
        Ok(self.state.lock().filters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avell_core::{ClientOrderId, PriceLevel};
    use rust_decimal_macros::dec;

    fn mock() -> MockExchange {
        MockExchange::new(SymbolFilters {
            tick_size: Price::new(dec!(0.01)),
            lot_step: Size::new(dec!(0.001)),
            min_notional: Some(dec!(10)),
        })
    }

    fn book() -> L2Book {
        L2Book::new(
            vec![PriceLevel::new(Price::new(dec!(100.00)), Size::new(dec!(10)))],
            vec![PriceLevel::new(Price::new(dec!(100.10)), Size::new(dec!(10)))],
            1,
            1_000,
        )
    }

    fn limit_request(price: Decimal) -> OrderRequest {
        OrderRequest::post_only_limit(
            "BTCUSDT",
            OrderSide::Buy,
            Price::new(price),
            Size::new(dec!(1)),
            ClientOrderId::new(),
        )
    }

    #[tokio::test]
    async fn test_place_and_cancel() {
        let ex = mock();
        let order = ex.place_order(limit_request(dec!(99.50))).await.unwrap();
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(ex.open_order_count(), 1);

        assert!(ex.cancel_order(order.exchange_id, "BTCUSDT").await.unwrap());
        assert_eq!(ex.open_order_count(), 0);
        // Cancelling again reports not-live.
        assert!(!ex.cancel_order(order.exchange_id, "BTCUSDT").await.unwrap());
    }

    #[tokio::test]
    async fn test_post_only_cross_rejected() {
        let ex = mock();
        ex.push_book(book());
        // Bid at/through the ask must be rejected.
        let res = ex.place_order(limit_request(dec!(100.10))).await;
        assert!(matches!(res, Err(ExchangeError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_fill_updates_position() {
        let ex = mock();
        let order = ex.place_order(limit_request(dec!(99.50))).await.unwrap();

        ex.fill_order(order.exchange_id, Size::new(dec!(0.4))).unwrap();
        assert_eq!(ex.position(), dec!(0.4));
        assert_eq!(ex.open_order_count(), 1);

        ex.fill_order(order.exchange_id, Size::new(dec!(0.6))).unwrap();
        assert_eq!(ex.position(), dec!(1));
        assert_eq!(ex.open_order_count(), 0);
    }

    #[tokio::test]
    async fn test_market_order_fills_at_mark() {
        let ex = mock();
        ex.push_book(book());
        ex.set_position(dec!(2), Price::new(dec!(99)));

        let order = ex
            .place_order(OrderRequest::flatten_market(
                "BTCUSDT",
                OrderSide::Sell,
                Size::new(dec!(2)),
            ))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.last_fill_price, Price::new(dec!(100.05)));
        assert_eq!(ex.position(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let ex = mock();
        ex.reject_next_orders(1);
        assert!(matches!(
            ex.place_order(limit_request(dec!(99.50))).await,
            Err(ExchangeError::Rejected(_))
        ));

        ex.fail_next_orders(1);
        let err = ex.place_order(limit_request(dec!(99.50))).await.unwrap_err();
        assert!(err.is_retryable());

        // Next attempt succeeds.
        assert!(ex.place_order(limit_request(dec!(99.50))).await.is_ok());
    }

    #[tokio::test]
    async fn test_events_streamed() {
        let ex = mock();
        let mut events = ex.take_events();

        ex.push_book(book());
        let order = ex.place_order(limit_request(dec!(99.50))).await.unwrap();
        ex.fill_order(order.exchange_id, Size::new(dec!(1))).unwrap();

        assert!(matches!(events.recv().await, Some(ExchangeEvent::Book(_))));
        match events.recv().await {
            Some(ExchangeEvent::OrderUpdate(o)) => assert_eq!(o.status, OrderStatus::New),
            other => panic!("expected order update, got {other:?}"),
        }
        match events.recv().await {
            Some(ExchangeEvent::OrderUpdate(o)) => assert_eq!(o.status, OrderStatus::Filled),
            other => panic!("expected fill update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_atomic_replace() {
        let ex = mock();
        let order = ex.place_order(limit_request(dec!(99.50))).await.unwrap();

        let replaced = ex
            .replace_order(order.exchange_id, limit_request(dec!(99.60)))
            .await
            .unwrap();
        assert_ne!(replaced.exchange_id, order.exchange_id);
        assert_eq!(ex.open_order_count(), 1);
    }
}
