//! Shared engine services
//!
//! Everything the original design kept as process globals lives here instead
//! and is injected at construction: the event bus, the trade lock guarding
//! compound cancel/create sequences, and the global price service.

use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::currency::Currency;
use crate::events::EventBus;
use crate::oracle::PriceRouter;

/// Shared services handed to every client, manager and strategy.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    bus: Arc<EventBus>,
    trade_lock: AsyncMutex<()>,
    config: Config,
    prices: PriceService,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self::with_router(config, PriceRouter::with_default_feeds())
    }

    pub fn with_router(config: Config, router: PriceRouter) -> Self {
        let prices = PriceService::new(router, config.price_refresh_interval());
        Self {
            inner: Arc::new(EngineInner {
                bus: Arc::new(EventBus::new()),
                trade_lock: AsyncMutex::new(()),
                config,
                prices,
            }),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn prices(&self) -> &PriceService {
        &self.inner.prices
    }

    /// Take the process-wide trade lock. Held for the whole of every
    /// compound cancel+create sequence so that two actors never interleave
    /// order mutations against the same account.
    pub async fn lock_trading(&self) -> MutexGuard<'_, ()> {
        self.inner.trade_lock.lock().await
    }

    pub fn shutdown(&self) {
        self.inner.prices.stop_all();
    }
}

struct SymbolWatch {
    currencies: Arc<Mutex<Vec<Weak<Currency>>>>,
    stop: watch::Sender<bool>,
}

/// Refreshes global prices with one daemon per distinct symbol, no matter how
/// many currencies across how many clients share that symbol.
pub struct PriceService {
    router: Arc<PriceRouter>,
    refresh_interval: Duration,
    watches: Mutex<HashMap<String, SymbolWatch>>,
}

impl PriceService {
    fn new(router: PriceRouter, refresh_interval: Duration) -> Self {
        Self {
            router: Arc::new(router),
            refresh_interval,
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Track a currency. The first registration of a symbol starts its
    /// refresh daemon; later ones only join the fan-out list.
    pub fn register(&self, currency: &Arc<Currency>) {
        let symbol = currency.symbol().to_string();
        let mut watches = self.watches.lock().unwrap();
        if let Some(existing) = watches.get(&symbol) {
            existing
                .currencies
                .lock()
                .unwrap()
                .push(Arc::downgrade(currency));
            return;
        }

        let currencies = Arc::new(Mutex::new(vec![Arc::downgrade(currency)]));
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(price_daemon(
            self.router.clone(),
            symbol.clone(),
            currencies.clone(),
            self.refresh_interval,
            stop_rx,
        ));
        watches.insert(
            symbol,
            SymbolWatch {
                currencies,
                stop: stop_tx,
            },
        );
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.watches.lock().unwrap().keys().cloned().collect()
    }

    pub fn stop_all(&self) {
        for watch in self.watches.lock().unwrap().values() {
            let _ = watch.stop.send(true);
        }
    }
}

async fn price_daemon(
    router: Arc<PriceRouter>,
    symbol: String,
    currencies: Arc<Mutex<Vec<Weak<Currency>>>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    // Spread daemon start-up so freshly discovered markets don't stampede
    // the feeds in one burst.
    if wait_or_stop(&mut stop, start_jitter(interval)).await {
        return;
    }
    debug!(symbol, "price daemon started");

    loop {
        match router.price(&symbol).await {
            Ok(price) => {
                let watchers = currencies.lock().unwrap();
                for currency in watchers.iter().filter_map(Weak::upgrade) {
                    currency.set_global_price(price);
                }
            }
            Err(err) if err.is_local() => {
                // No feed will ever quote this symbol; fail-stop this one
                // daemon rather than hammering the chain forever.
                warn!(symbol, error = %err, "price resolution unrecoverable, stopping daemon");
                return;
            }
            Err(err) => {
                // Keep the last known price and try again next cycle.
                warn!(symbol, error = %err, "transient price failure");
            }
        }
        if wait_or_stop(&mut stop, interval).await {
            info!(symbol, "price daemon stopped");
            return;
        }
    }
}

/// Random delay in `[0, interval]` applied before a daemon's first cycle.
pub(crate) fn start_jitter(interval: Duration) -> Duration {
    let ceiling = (interval.as_millis() as u64).max(1);
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

/// Sleep that doubles as a cancellation point. Returns true when the daemon
/// should exit.
pub(crate) async fn wait_or_stop(stop: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}
