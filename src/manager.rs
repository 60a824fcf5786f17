//! Balance allocation across active pairs
//!
//! Computes, per currency, how much of the balance each currently-active
//! pair may use, with an optional reserved offset and per-pair percentage
//! caps.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use crate::currency::Currency;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::exchange::ExchangeClient;
use crate::orderbook::Side;
use crate::pair::Pair;

#[derive(Debug, Clone, Copy, Default)]
struct PairCaps {
    base: Option<Decimal>,
    quote: Option<Decimal>,
}

/// Per-currency allocation over one client's pairs (or an explicit subset).
pub struct PairManager {
    client: Arc<ExchangeClient>,
    pairs: Vec<Arc<Pair>>,
    currencies: Vec<Arc<Currency>>,
    usage: RwLock<HashMap<String, u32>>,
    offsets: RwLock<HashMap<String, Decimal>>,
    amounts: RwLock<HashMap<String, Decimal>>,
    pct_by_currency: RwLock<HashMap<String, Decimal>>,
    pct_by_pair: RwLock<HashMap<String, PairCaps>>,
}

impl PairManager {
    /// Manage every pair the client discovered.
    pub fn new(client: Arc<ExchangeClient>) -> Arc<Self> {
        let pairs = client.pairs();
        Self::with_pairs(client, pairs)
    }

    /// Manage an explicit subset of pairs.
    pub fn with_pairs(client: Arc<ExchangeClient>, pairs: Vec<Arc<Pair>>) -> Arc<Self> {
        let mut currencies: Vec<Arc<Currency>> = Vec::new();
        for pair in &pairs {
            for currency in [pair.quote(), pair.base()] {
                if !currencies.iter().any(|seen| seen.symbol() == currency.symbol()) {
                    currencies.push(currency.clone());
                }
            }
        }

        let manager = Arc::new(Self {
            client,
            pairs,
            currencies,
            usage: RwLock::new(HashMap::new()),
            offsets: RwLock::new(HashMap::new()),
            amounts: RwLock::new(HashMap::new()),
            pct_by_currency: RwLock::new(HashMap::new()),
            pct_by_pair: RwLock::new(HashMap::new()),
        });
        manager.set_amounts();

        // Allocations track every status flip, delivered synchronously on
        // the bus.
        let weak: Weak<Self> = Arc::downgrade(&manager);
        manager.client.engine().bus().subscribe(move |event| {
            if matches!(event, EngineEvent::StatusChanged { .. }) {
                if let Some(manager) = weak.upgrade() {
                    manager.set_amounts();
                }
            }
        });

        manager
    }

    pub fn pairs(&self) -> &[Arc<Pair>] {
        &self.pairs
    }

    pub fn currencies(&self) -> &[Arc<Currency>] {
        &self.currencies
    }

    pub fn active_pairs(&self) -> Vec<Arc<Pair>> {
        self.pairs
            .iter()
            .filter(|pair| pair.is_enabled())
            .cloned()
            .collect()
    }

    pub fn currency_by_symbol(&self, symbol: &str) -> Option<Arc<Currency>> {
        self.currencies
            .iter()
            .find(|currency| currency.symbol().eq_ignore_ascii_case(symbol))
            .cloned()
    }

    pub fn pair_by_ticker(&self, ticker: &str) -> Option<Arc<Pair>> {
        self.pairs
            .iter()
            .find(|pair| pair.ticker().eq_ignore_ascii_case(ticker))
            .cloned()
    }

    /// Reserve part of a currency's balance away from allocation.
    pub fn set_offset(&self, symbol: &str, offset: Decimal) -> Result<()> {
        let currency = self
            .currency_by_symbol(symbol)
            .ok_or_else(|| EngineError::UnknownCurrency {
                symbol: symbol.to_string(),
            })?;
        self.offsets
            .write()
            .unwrap()
            .insert(currency.symbol().to_string(), offset);
        self.set_amounts();
        Ok(())
    }

    /// Recompute per-currency usage counts and allocatable amounts.
    ///
    /// A bid side in use counts against the quote currency, an ask side
    /// against the base. A currency used by no active pair keeps its full
    /// balance (minus offset) with no division.
    pub fn set_amounts(&self) {
        let mut usage: HashMap<String, u32> = self
            .currencies
            .iter()
            .map(|currency| (currency.symbol().to_string(), 0))
            .collect();

        for pair in self.active_pairs() {
            if pair.status(Side::Bid) {
                *usage.entry(pair.quote().symbol().to_string()).or_default() += 1;
            }
            if pair.status(Side::Ask) {
                *usage.entry(pair.base().symbol().to_string()).or_default() += 1;
            }
        }

        let offsets = self.offsets.read().unwrap().clone();
        let mut amounts = HashMap::new();
        for currency in &self.currencies {
            let symbol = currency.symbol().to_string();
            let total = currency.balance().total;
            let offset = offsets.get(&symbol).copied().unwrap_or(Decimal::ZERO);
            let count = usage.get(&symbol).copied().unwrap_or(0);
            let amount = if count == 0 {
                total - offset
            } else {
                (total - offset) / Decimal::from(count)
            };
            amounts.insert(symbol, amount);
        }

        *self.usage.write().unwrap() = usage;
        *self.amounts.write().unwrap() = amounts;
    }

    /// The amount one active pair may currently use of a currency.
    pub fn allocation(&self, symbol: &str) -> Option<Decimal> {
        self.amounts
            .read()
            .unwrap()
            .get(&symbol.to_uppercase())
            .copied()
    }

    pub fn usage_count(&self, symbol: &str) -> u32 {
        self.usage
            .read()
            .unwrap()
            .get(&symbol.to_uppercase())
            .copied()
            .unwrap_or(0)
    }

    /// Cap a pair's usage of its base and/or quote currency to a percentage
    /// of the balance. Rejects caps that would push a currency's aggregate
    /// across all pairs above 100%.
    pub fn set_max_percent_usage(
        &self,
        pair: &Arc<Pair>,
        base: Option<Decimal>,
        quote: Option<Decimal>,
    ) -> Result<()> {
        if base.is_none() && quote.is_none() {
            return Err(EngineError::Config(
                "a percentage cap for at least one leg is required".to_string(),
            ));
        }

        let ticker = pair.ticker().to_string();
        let previous = self
            .pct_by_pair
            .read()
            .unwrap()
            .get(&ticker)
            .copied()
            .unwrap_or_default();

        let mut aggregates = self.pct_by_currency.write().unwrap();
        let legs = [
            (pair.base().symbol().to_string(), previous.base, base),
            (pair.quote().symbol().to_string(), previous.quote, quote),
        ];
        // Validate both legs against the aggregate, net of this pair's
        // previous caps, before committing anything.
        for (symbol, old, new) in &legs {
            if let Some(new) = new {
                let current = aggregates.get(symbol).copied().unwrap_or(Decimal::ZERO)
                    - old.unwrap_or(Decimal::ZERO);
                if current + *new > Decimal::ONE_HUNDRED {
                    return Err(EngineError::InvalidAllocation {
                        symbol: symbol.clone(),
                    });
                }
            }
        }
        for (symbol, old, new) in legs {
            let entry = aggregates.entry(symbol).or_insert(Decimal::ZERO);
            *entry = *entry - old.unwrap_or(Decimal::ZERO) + new.unwrap_or(Decimal::ZERO);
        }
        drop(aggregates);

        self.pct_by_pair
            .write()
            .unwrap()
            .insert(ticker, PairCaps { base, quote });
        self.set_amounts();
        Ok(())
    }

    /// Balance available to one pair per currency, with percentage caps
    /// applied.
    pub fn get_amounts(&self, pair: &Arc<Pair>) -> HashMap<String, Decimal> {
        self.set_amounts();
        let caps = self
            .pct_by_pair
            .read()
            .unwrap()
            .get(pair.ticker())
            .copied()
            .unwrap_or_default();

        let mut result = HashMap::new();
        for (currency, cap) in [(pair.base(), caps.base), (pair.quote(), caps.quote)] {
            let total = currency.balance().total;
            let amount = match cap {
                Some(pct) => total * pct / Decimal::ONE_HUNDRED,
                None => total,
            };
            result.insert(currency.symbol().to_string(), amount);
        }
        result
    }

    /// Sweep every resting order funded by a currency: asks where it quotes,
    /// bids where it bases.
    pub async fn cancel_orders(&self, currency: &Arc<Currency>) -> Result<()> {
        for pair in &self.pairs {
            if pair.quote().symbol() == currency.symbol() {
                self.client.refresh_active_orders(pair).await?;
                self.client.cancel_all(pair, Side::Ask).await?;
            }
            if pair.base().symbol() == currency.symbol() {
                self.client.refresh_active_orders(pair).await?;
                self.client.cancel_all(pair, Side::Bid).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::Engine;
    use crate::exchange::{MarketInfo, MockExchangeAdapter};
    use crate::oracle::PriceRouter;
    use rust_decimal_macros::dec;

    fn market(ticker: &str, base: &str, quote: &str) -> MarketInfo {
        MarketInfo {
            ticker: ticker.to_string(),
            base_symbol: base.to_string(),
            quote_symbol: quote.to_string(),
            minimum_step: dec!(0.0001),
            active: true,
        }
    }

    async fn test_manager() -> Arc<PairManager> {
        let mut adapter = MockExchangeAdapter::new();
        adapter.expect_name().return_const("stub".to_string());
        adapter.expect_is_read_only().return_const(true);
        adapter.expect_push_book_delivery().return_const(false);
        adapter.expect_subscribe().returning(|_| Ok(()));
        adapter.expect_unsubscribe().returning(|_| Ok(()));
        adapter.expect_discover_markets().returning(|| {
            Ok(vec![
                market("btc-clp", "BTC", "CLP"),
                market("eth-clp", "ETH", "CLP"),
            ])
        });

        let config = Config {
            book_poll_interval_ms: 120_000,
            ..Config::default()
        };
        let engine = Engine::with_router(config, PriceRouter::new(vec![], vec![]));
        let client = ExchangeClient::connect(Arc::new(adapter), engine)
            .await
            .unwrap();
        PairManager::new(client)
    }

    #[tokio::test]
    async fn idle_currency_keeps_its_full_balance_minus_offset() {
        let manager = test_manager().await;
        let clp = manager.currency_by_symbol("CLP").unwrap();
        clp.set_balance(dec!(1000), dec!(0));

        manager.set_amounts();
        assert_eq!(manager.usage_count("CLP"), 0);
        assert_eq!(manager.allocation("CLP").unwrap(), dec!(1000));

        manager.set_offset("CLP", dec!(100)).unwrap();
        assert_eq!(manager.allocation("CLP").unwrap(), dec!(900));
    }

    #[tokio::test]
    async fn shared_currency_splits_across_active_pairs() {
        let manager = test_manager().await;
        let clp = manager.currency_by_symbol("CLP").unwrap();
        clp.set_balance(dec!(1000), dec!(0));

        // Both pairs buy with CLP.
        manager
            .pair_by_ticker("btc-clp")
            .unwrap()
            .set_status(Side::Bid, true);
        manager
            .pair_by_ticker("eth-clp")
            .unwrap()
            .set_status(Side::Bid, true);
        manager.set_offset("CLP", dec!(100)).unwrap();

        assert_eq!(manager.usage_count("CLP"), 2);
        assert_eq!(manager.allocation("CLP").unwrap(), dec!(450));
    }

    #[tokio::test]
    async fn ask_sides_count_against_the_base_currency() {
        let manager = test_manager().await;
        let btc = manager.currency_by_symbol("BTC").unwrap();
        btc.set_balance(dec!(2), dec!(0));

        manager
            .pair_by_ticker("btc-clp")
            .unwrap()
            .set_status(Side::Ask, true);
        manager.set_amounts();

        assert_eq!(manager.usage_count("BTC"), 1);
        assert_eq!(manager.allocation("BTC").unwrap(), dec!(2));
        // The quote leg is untouched by an ask-only pair.
        assert_eq!(manager.usage_count("CLP"), 0);
    }

    #[tokio::test]
    async fn percentage_caps_cannot_exceed_one_hundred() {
        let manager = test_manager().await;
        let first = manager.pair_by_ticker("btc-clp").unwrap();
        let second = manager.pair_by_ticker("eth-clp").unwrap();

        manager
            .set_max_percent_usage(&first, None, Some(dec!(60)))
            .unwrap();
        let err = manager
            .set_max_percent_usage(&second, None, Some(dec!(50)))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAllocation { .. }));

        // Replacing a pair's own cap nets out its previous share.
        manager
            .set_max_percent_usage(&first, None, Some(dec!(40)))
            .unwrap();
        manager
            .set_max_percent_usage(&second, None, Some(dec!(50)))
            .unwrap();
    }

    #[tokio::test]
    async fn get_amounts_applies_the_caps() {
        let manager = test_manager().await;
        let pair = manager.pair_by_ticker("btc-clp").unwrap();
        pair.base().set_balance(dec!(2), dec!(0));
        pair.quote().set_balance(dec!(1000), dec!(0));

        manager
            .set_max_percent_usage(&pair, Some(dec!(50)), None)
            .unwrap();
        let amounts = manager.get_amounts(&pair);

        assert_eq!(amounts["BTC"], dec!(1));
        assert_eq!(amounts["CLP"], dec!(1000));
    }

    #[tokio::test]
    async fn allocations_follow_status_events() {
        let manager = test_manager().await;
        let clp = manager.currency_by_symbol("CLP").unwrap();
        clp.set_balance(dec!(1000), dec!(0));

        let pair = manager.pair_by_ticker("btc-clp").unwrap();
        pair.set_status(Side::Bid, true);
        // A StatusChanged event triggers the recomputation subscribers.
        manager
            .client
            .engine()
            .bus()
            .publish(EngineEvent::StatusChanged {
                ticker: "btc-clp".to_string(),
            });

        assert_eq!(manager.usage_count("CLP"), 1);
        assert_eq!(manager.allocation("CLP").unwrap(), dec!(1000));
    }
}
