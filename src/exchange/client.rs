//! Exchange client
//!
//! Owns the pair/currency registries for one backend, runs the background
//! refresh daemons, wraps every remote call in the retry policy, and is the
//! only component allowed to talk to the adapter.

use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::daemons;
use super::{ExchangeAdapter, MarketInfo, RetryPolicy};
use crate::currency::Currency;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::orderbook::{BookSnapshot, Order, Side};
use crate::pair::Pair;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DaemonKey {
    Book(String),
    Balance(String),
}

struct DaemonHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// One backend's connectivity engine.
pub struct ExchangeClient {
    name: String,
    adapter: Arc<dyn ExchangeAdapter>,
    engine: Engine,
    read_only: bool,
    retry: RetryPolicy,
    pairs: RwLock<Vec<Arc<Pair>>>,
    pairs_by_ticker: RwLock<HashMap<String, Arc<Pair>>>,
    currencies: RwLock<Vec<Arc<Currency>>>,
    currencies_by_symbol: RwLock<HashMap<String, Arc<Currency>>>,
    /// Tickers whose books keep polling even while the pair is disabled
    always_update: RwLock<HashSet<String>>,
    daemons: Mutex<HashMap<DaemonKey, DaemonHandle>>,
}

impl ExchangeClient {
    /// Discover the backend's markets and stand up the client. Balance
    /// daemons start here; book daemons start lazily on subscription.
    pub async fn connect(adapter: Arc<dyn ExchangeAdapter>, engine: Engine) -> Result<Arc<Self>> {
        let config = engine.config();
        let client = Arc::new(Self {
            name: adapter.name().to_string(),
            read_only: adapter.is_read_only(),
            retry: RetryPolicy::new(config.retry_attempts, config.retry_backoff()),
            adapter,
            engine: engine.clone(),
            pairs: RwLock::new(Vec::new()),
            pairs_by_ticker: RwLock::new(HashMap::new()),
            currencies: RwLock::new(Vec::new()),
            currencies_by_symbol: RwLock::new(HashMap::new()),
            always_update: RwLock::new(HashSet::new()),
            daemons: Mutex::new(HashMap::new()),
        });

        if client.read_only {
            info!(
                exchange = %client.name,
                "no trading credentials configured, running read-only"
            );
        }

        match client.discover().await {
            Ok(()) => {}
            Err(EngineError::NotSupported(reason)) => {
                // Some backends cannot enumerate their markets; callers
                // register pairs manually via `register_market`.
                info!(exchange = %client.name, reason, "market discovery unsupported");
            }
            Err(err) => return Err(err),
        }

        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn engine(&self) -> &Engine {
        &self.engine
    }

    pub(crate) fn push_book_delivery(&self) -> bool {
        self.adapter.push_book_delivery()
    }

    // ----- registries -----

    pub fn pairs(&self) -> Vec<Arc<Pair>> {
        self.pairs.read().unwrap().clone()
    }

    pub fn currencies(&self) -> Vec<Arc<Currency>> {
        self.currencies.read().unwrap().clone()
    }

    pub fn pair_by_ticker(&self, ticker: &str) -> Option<Arc<Pair>> {
        self.pairs_by_ticker
            .read()
            .unwrap()
            .get(&ticker.to_lowercase())
            .cloned()
    }

    pub fn currency_by_symbol(&self, symbol: &str) -> Option<Arc<Currency>> {
        self.currencies_by_symbol
            .read()
            .unwrap()
            .get(&symbol.to_uppercase())
            .cloned()
    }

    pub fn set_always_update(&self, ticker: &str, always: bool) {
        let mut set = self.always_update.write().unwrap();
        if always {
            set.insert(ticker.to_lowercase());
        } else {
            set.remove(&ticker.to_lowercase());
        }
    }

    pub(crate) fn is_always_update(&self, ticker: &str) -> bool {
        self.always_update
            .read()
            .unwrap()
            .contains(&ticker.to_lowercase())
    }

    /// Fetch the market list, filter inactive markets and the optional
    /// whitelist, and register one pair per market plus any newly seen
    /// currency. Currencies are deduplicated by symbol.
    async fn discover(self: &Arc<Self>) -> Result<()> {
        let markets = self
            .retry
            .run("discover_markets", || self.adapter.discover_markets())
            .await?;
        let whitelist = self.engine.config().ticker_whitelist.clone();

        for market in markets {
            if !market.active {
                continue;
            }
            if let Some(whitelist) = &whitelist {
                if !whitelist
                    .iter()
                    .any(|ticker| ticker.eq_ignore_ascii_case(&market.ticker))
                {
                    continue;
                }
            }
            self.register_market(&market);
        }

        info!(
            exchange = %self.name,
            pairs = self.pairs.read().unwrap().len(),
            currencies = self.currencies.read().unwrap().len(),
            "market discovery complete"
        );
        Ok(())
    }

    /// Register one market, creating any currency not seen before. Used by
    /// discovery and by callers whose backend cannot enumerate markets.
    /// Registering an already known ticker returns the existing pair.
    pub fn register_market(self: &Arc<Self>, market: &MarketInfo) -> Arc<Pair> {
        if let Some(existing) = self.pair_by_ticker(&market.ticker) {
            return existing;
        }
        let base = self.currency_for(&market.base_symbol);
        let quote = self.currency_for(&market.quote_symbol);
        let pair = Pair::create(
            &market.ticker,
            base,
            quote,
            market.minimum_step,
            self.engine.bus().clone(),
        );
        self.pairs.write().unwrap().push(pair.clone());
        self.pairs_by_ticker
            .write()
            .unwrap()
            .insert(market.ticker.to_lowercase(), pair.clone());
        pair
    }

    fn currency_for(self: &Arc<Self>, symbol: &str) -> Arc<Currency> {
        if let Some(existing) = self.currency_by_symbol(symbol) {
            return existing;
        }
        let currency = Currency::new(
            symbol,
            symbol,
            self.engine.config().empty_balance_usd,
            self.engine.bus().clone(),
        );
        self.currencies.write().unwrap().push(currency.clone());
        self.currencies_by_symbol
            .write()
            .unwrap()
            .insert(currency.symbol().to_string(), currency.clone());
        self.engine.prices().register(&currency);
        if !self.read_only {
            self.ensure_balance_daemon(&currency);
        }
        currency
    }

    // ----- retry-wrapped primitives -----

    pub async fn get_book(&self, pair: &Pair) -> Result<BookSnapshot> {
        self.retry
            .run("get_book", || self.adapter.fetch_book(pair.ticker()))
            .await
    }

    /// Fetch the book and feed it into the pair, publishing on change.
    pub async fn refresh_book(&self, pair: &Pair) -> Result<()> {
        let book = self.get_book(pair).await?;
        pair.apply_book(&book)
    }

    /// Refresh a currency's balance from the backend. No-op in read-only
    /// mode.
    pub async fn refresh_balance(&self, currency: &Arc<Currency>) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let (available, locked) = self
            .retry
            .run("get_balance", || {
                self.adapter.fetch_balance(currency.symbol())
            })
            .await?;
        currency.set_balance(available, locked);
        Ok(())
    }

    /// Refresh the pair's locally cached open orders. No-op in read-only
    /// mode.
    pub async fn refresh_active_orders(&self, pair: &Pair) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let orders = self
            .retry
            .run("get_active_orders", || {
                self.adapter.fetch_active_orders(pair.ticker())
            })
            .await?;
        let (asks, bids): (Vec<Order>, Vec<Order>) =
            orders.into_iter().partition(|order| order.side == Side::Ask);
        pair.set_active_orders(Side::Ask, asks);
        pair.set_active_orders(Side::Bid, bids);
        Ok(())
    }

    /// Cancel one order. The cache entry is dropped even when the backend
    /// reports the order already gone, so repeated sweeps make progress.
    pub async fn cancel_order(&self, pair: &Pair, order: &Order) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let result = self
            .retry
            .run("cancel_order", || self.adapter.cancel_order(order))
            .await;
        pair.remove_order(order);
        result
    }

    /// Cancel every locally known order on one side.
    pub async fn cancel_all(&self, pair: &Pair, side: Side) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        loop {
            let orders = pair.active_orders(side);
            if orders.is_empty() {
                return Ok(());
            }
            for order in orders {
                self.cancel_order(pair, &order).await?;
            }
        }
    }

    /// Place a limit order and append it to the pair's cache.
    pub async fn create_limit_order(
        &self,
        pair: &Pair,
        amount: Decimal,
        side: Side,
        limit_price: Decimal,
    ) -> Result<Option<Order>> {
        if self.read_only {
            return Ok(None);
        }
        let order = self
            .retry
            .run("create_order", || {
                self.adapter
                    .create_order(pair.ticker(), amount, side, Some(limit_price))
            })
            .await?;
        if let Some(order) = &order {
            pair.push_order(order.clone());
        }
        Ok(order)
    }

    /// Place a market order. Backends return nothing for these.
    pub async fn create_market_order(
        &self,
        pair: &Pair,
        amount: Decimal,
        side: Side,
    ) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.retry
            .run("create_order", || {
                self.adapter.create_order(pair.ticker(), amount, side, None)
            })
            .await?;
        Ok(())
    }

    // ----- pair lifecycle -----

    /// Record a side's status and run the full transition: subscription
    /// management, order refresh, side sweep, balance refresh, notification.
    pub async fn set_side_status(
        self: &Arc<Self>,
        pair: &Arc<Pair>,
        side: Side,
        enabled: bool,
    ) -> Result<()> {
        self.transition(pair, side, enabled, true).await
    }

    pub async fn toggle_side_status(self: &Arc<Self>, pair: &Arc<Pair>, side: Side) -> Result<()> {
        self.set_side_status(pair, side, !pair.status(side)).await
    }

    /// Enable both sides, publishing a single combined notification.
    pub async fn enable(self: &Arc<Self>, pair: &Arc<Pair>) -> Result<()> {
        self.change_both_sides(pair, true).await
    }

    /// Disable both sides, publishing a single combined notification.
    pub async fn disable(self: &Arc<Self>, pair: &Arc<Pair>) -> Result<()> {
        self.change_both_sides(pair, false).await
    }

    async fn change_both_sides(self: &Arc<Self>, pair: &Arc<Pair>, enabled: bool) -> Result<()> {
        self.transition(pair, Side::Ask, enabled, false).await?;
        self.transition(pair, Side::Bid, enabled, false).await?;
        self.engine.bus().publish(EngineEvent::StatusChanged {
            ticker: pair.ticker().to_string(),
        });
        Ok(())
    }

    async fn transition(
        self: &Arc<Self>,
        pair: &Arc<Pair>,
        side: Side,
        enabled: bool,
        publish: bool,
    ) -> Result<()> {
        pair.set_status(side, enabled);

        if enabled {
            self.subscribe(pair).await?;
        } else if !pair.status(side.opposite()) {
            // Last active side went dark: tear the subscription down and
            // forget the stale book.
            self.unsubscribe(pair).await?;
            pair.reset_orderbook();
        }

        self.refresh_active_orders(pair).await?;
        self.cancel_all(pair, side).await?;
        self.refresh_balance(pair.quote()).await?;
        self.refresh_balance(pair.base()).await?;

        if publish {
            self.engine.bus().publish(EngineEvent::StatusChanged {
                ticker: pair.ticker().to_string(),
            });
        }
        Ok(())
    }

    /// Activate book delivery for a pair. Idempotent: the daemon is started
    /// at most once per pair.
    pub async fn subscribe(self: &Arc<Self>, pair: &Arc<Pair>) -> Result<()> {
        self.retry
            .run("subscribe", || self.adapter.subscribe(pair.ticker()))
            .await?;
        self.ensure_book_daemon(pair);
        Ok(())
    }

    /// Deactivate backend-side delivery. The poll daemon stays alive and
    /// idles; it resumes when the pair is re-enabled.
    pub async fn unsubscribe(&self, pair: &Pair) -> Result<()> {
        self.retry
            .run("unsubscribe", || self.adapter.unsubscribe(pair.ticker()))
            .await
    }

    // ----- daemon management -----

    fn ensure_book_daemon(self: &Arc<Self>, pair: &Arc<Pair>) {
        let key = DaemonKey::Book(pair.ticker().to_lowercase());
        let mut daemons = self.daemons.lock().unwrap();
        if let Some(handle) = daemons.get(&key) {
            if !handle.task.is_finished() {
                return;
            }
        }
        debug!(exchange = %self.name, ticker = %pair.ticker(), "starting book daemon");
        let (stop, stop_rx) = watch::channel(false);
        let task = daemons::spawn_book_daemon(self.clone(), pair.clone(), stop_rx);
        daemons.insert(key, DaemonHandle { stop, task });
    }

    fn ensure_balance_daemon(self: &Arc<Self>, currency: &Arc<Currency>) {
        let key = DaemonKey::Balance(currency.symbol().to_string());
        let mut daemons = self.daemons.lock().unwrap();
        if let Some(handle) = daemons.get(&key) {
            if !handle.task.is_finished() {
                return;
            }
        }
        debug!(exchange = %self.name, symbol = %currency.symbol(), "starting balance daemon");
        let (stop, stop_rx) = watch::channel(false);
        let task = daemons::spawn_balance_daemon(self.clone(), currency.clone(), stop_rx);
        daemons.insert(key, DaemonHandle { stop, task });
    }

    /// Signal every daemon to stop at its next cancellation point.
    pub fn shutdown(&self) {
        for handle in self.daemons.lock().unwrap().values() {
            let _ = handle.stop.send(true);
        }
    }
}

impl Drop for ExchangeClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
