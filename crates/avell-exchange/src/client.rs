//! The exchange capability trait.

use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{
    Balance, ExchangeOrder, OrderRequest, PositionInfo, SymbolFilters,
};
use async_trait::async_trait;
use avell_core::L2Book;

/// Venue-independent capability set required by the core.
///
/// Implementations deliver streamed events (`ExchangeEvent`) over an
/// mpsc channel into the bot loop; how that channel is obtained is
/// adapter-specific (the mock exposes `take_events()`).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn connect(&self) -> ExchangeResult<()>;
    async fn disconnect(&self) -> ExchangeResult<()>;
    fn is_connected(&self) -> bool;

    async fn subscribe_order_book(&self, symbol: &str) -> ExchangeResult<()>;
    async fn unsubscribe_order_book(&self, symbol: &str) -> ExchangeResult<()>;
    async fn subscribe_trades(&self, symbol: &str) -> ExchangeResult<()>;
    async fn unsubscribe_trades(&self, symbol: &str) -> ExchangeResult<()>;

    /// Submit a new order. The returned order carries the venue ID.
    async fn place_order(&self, request: OrderRequest) -> ExchangeResult<ExchangeOrder>;

    /// Cancel by venue ID. Returns whether the order was live.
    async fn cancel_order(&self, exchange_id: u64, symbol: &str) -> ExchangeResult<bool>;

    /// Atomic cancel/replace where the venue supports it. The default
    /// reports the capability as missing so callers fall back to the
    /// cancel-then-place strategy.
    async fn replace_order(
        &self,
        _exchange_id: u64,
        _request: OrderRequest,
    ) -> ExchangeResult<ExchangeOrder> {
        Err(ExchangeError::Unsupported("replace_order"))
    }

    async fn get_order(&self, exchange_id: u64, symbol: &str) -> ExchangeResult<ExchangeOrder>;
    async fn get_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<ExchangeOrder>>;
    async fn get_positions(&self, symbol: &str) -> ExchangeResult<Vec<PositionInfo>>;
    async fn get_balance(&self) -> ExchangeResult<Vec<Balance>>;
    async fn get_order_book(&self, symbol: &str, depth: usize) -> ExchangeResult<L2Book>;

    /// Symbol filters (tick, lot, min notional). Cached by the caller.
    async fn symbol_filters(&self, symbol: &str) -> ExchangeResult<SymbolFilters>;
}
