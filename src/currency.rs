//! Currency domain model
//!
//! A tradable asset with an account balance and a USD-denominated global
//! price. Currencies are created once per distinct symbol per client during
//! market discovery and live for the process lifetime.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use crate::events::{EngineEvent, EventBus};
use crate::oracle::{classify, AssetClass, STABLECOIN_SYMBOLS};
use crate::pair::Pair;

/// Account balance record. `total` always equals `available + locked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Balance {
    pub available: Decimal,
    pub locked: Decimal,
    pub total: Decimal,
    /// Monetary currency code; stablecoins normalize to "USD"
    pub currency: String,
}

impl Balance {
    fn empty(currency: impl Into<String>) -> Self {
        Self {
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
            total: Decimal::ZERO,
            currency: currency.into(),
        }
    }
}

/// A tradable asset on one exchange client
pub struct Currency {
    symbol: String,
    name: String,
    empty_value_usd: Decimal,
    balance: RwLock<Balance>,
    global_price: RwLock<Decimal>,
    base_pairs: RwLock<Vec<Weak<Pair>>>,
    quote_pairs: RwLock<Vec<Weak<Pair>>>,
    bus: Arc<EventBus>,
}

impl Currency {
    pub fn new(
        symbol: impl Into<String>,
        name: impl Into<String>,
        empty_value_usd: Decimal,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let symbol = symbol.into().to_uppercase();
        // USD-pegged assets are worth 1 by definition; everything else starts
        // at the "price unknown" sentinel until the first oracle pass.
        let initial_price = match classify(&symbol) {
            AssetClass::UsdPegged => Decimal::ONE,
            _ => Decimal::ZERO,
        };
        Arc::new(Self {
            balance: RwLock::new(Balance::empty(normalize_monetary_code(&symbol))),
            global_price: RwLock::new(initial_price),
            symbol,
            name: name.into(),
            empty_value_usd,
            base_pairs: RwLock::new(Vec::new()),
            quote_pairs: RwLock::new(Vec::new()),
            bus,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn empty_value_usd(&self) -> Decimal {
        self.empty_value_usd
    }

    pub fn balance(&self) -> Balance {
        self.balance.read().unwrap().clone()
    }

    /// Store a fresh balance from the backend and publish `BalanceUpdated`.
    pub fn set_balance(&self, available: Decimal, locked: Decimal) {
        {
            let mut balance = self.balance.write().unwrap();
            *balance = Balance {
                available,
                locked,
                total: available + locked,
                currency: normalize_monetary_code(&self.symbol),
            };
        }
        self.bus.publish(EngineEvent::BalanceUpdated {
            symbol: self.symbol.clone(),
        });
    }

    /// USD per unit. Zero means "price unknown", never a real valuation.
    pub fn global_price(&self) -> Decimal {
        *self.global_price.read().unwrap()
    }

    pub fn set_global_price(&self, price: Decimal) {
        *self.global_price.write().unwrap() = price;
    }

    /// True when the USD-equivalent total sits below the empty threshold.
    /// Publishes `BalanceEmpty` as a side effect, a hint for daemons to slow
    /// their polling. An unknown price reads as "not empty": the balance
    /// cannot be valued at all.
    pub fn balance_is_empty(&self) -> bool {
        let price = self.global_price();
        if price.is_zero() {
            return false;
        }
        let total = self.balance.read().unwrap().total;
        if total * price < self.empty_value_usd {
            self.bus.publish(EngineEvent::BalanceEmpty {
                symbol: self.symbol.clone(),
            });
            true
        } else {
            false
        }
    }

    /// Units of `other` per unit of self. `None` while either price is
    /// unknown.
    pub fn cross_rate(&self, other: &Currency) -> Option<Decimal> {
        let own = self.global_price();
        let theirs = other.global_price();
        if own.is_zero() || theirs.is_zero() {
            return None;
        }
        Some(own / theirs)
    }

    /// True while at least one pair referencing this currency is enabled.
    pub fn has_active_pair(&self) -> bool {
        let check = |pairs: &RwLock<Vec<Weak<Pair>>>| {
            pairs
                .read()
                .unwrap()
                .iter()
                .filter_map(Weak::upgrade)
                .any(|pair| pair.is_enabled())
        };
        check(&self.base_pairs) || check(&self.quote_pairs)
    }

    pub(crate) fn register_base_pair(&self, pair: &Arc<Pair>) {
        self.base_pairs.write().unwrap().push(Arc::downgrade(pair));
    }

    pub(crate) fn register_quote_pair(&self, pair: &Arc<Pair>) {
        self.quote_pairs.write().unwrap().push(Arc::downgrade(pair));
    }
}

impl PartialEq for Currency {
    fn eq(&self, other: &Self) -> bool {
        self.symbol == other.symbol
    }
}

impl fmt::Debug for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Currency")
            .field("symbol", &self.symbol)
            .field("global_price", &self.global_price())
            .finish()
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Stablecoins hold USD for monetary purposes.
fn normalize_monetary_code(symbol: &str) -> String {
    if STABLECOIN_SYMBOLS.contains(&symbol) {
        "USD".to_string()
    } else {
        symbol.to_string()
    }
}
