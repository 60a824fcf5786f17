//! Exchange connectivity
//!
//! `ExchangeAdapter` is the single wire-format contract a backend has to
//! implement; `ExchangeClient` owns the domain registries, the background
//! daemons and the retry policy on top of it.

mod client;
mod daemons;
mod retry;

pub use client::ExchangeClient;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::orderbook::{BookSnapshot, Order, Side};

/// One market as reported by a backend's discovery endpoint. How a backend
/// encodes these fields is the adapter's problem; the client only sees this
/// normalized record.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub ticker: String,
    pub base_symbol: String,
    pub quote_symbol: String,
    pub minimum_step: Decimal,
    pub active: bool,
}

/// Wire contract implemented once per backend.
///
/// Implementations translate backend payloads and error codes into the
/// engine's types; they never retry, cache or touch domain state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// True when no trading credentials are configured. The owning client
    /// then suppresses every mutating operation.
    fn is_read_only(&self) -> bool;

    /// True while this backend delivers books over a push channel; the book
    /// poll daemon idles as long as this holds.
    fn push_book_delivery(&self) -> bool {
        false
    }

    async fn fetch_book(&self, ticker: &str) -> Result<BookSnapshot>;

    /// Available and locked balance for a symbol, in that order.
    async fn fetch_balance(&self, symbol: &str) -> Result<(Decimal, Decimal)>;

    /// Open orders for a market, both sides, tagged with side and id.
    async fn fetch_active_orders(&self, ticker: &str) -> Result<Vec<Order>>;

    /// Fails with a local error for already-settled or unknown orders.
    async fn cancel_order(&self, order: &Order) -> Result<()>;

    /// Place an order. `limit_price: None` means a market order, for which
    /// backends return nothing.
    async fn create_order(
        &self,
        ticker: &str,
        amount: Decimal,
        side: Side,
        limit_price: Option<Decimal>,
    ) -> Result<Option<Order>>;

    async fn discover_markets(&self) -> Result<Vec<MarketInfo>>;

    /// Activate push delivery or any backend-side subscription for a market.
    /// Idempotent; poll-only backends can leave the default no-op.
    async fn subscribe(&self, ticker: &str) -> Result<()> {
        let _ = ticker;
        Ok(())
    }

    async fn unsubscribe(&self, ticker: &str) -> Result<()> {
        let _ = ticker;
        Ok(())
    }
}
