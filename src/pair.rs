//! Pair domain model
//!
//! A tradable market between a base and a quote currency, owning its order
//! book and the locally known open orders. Lifecycle operations that talk to
//! the backend live on `ExchangeClient`; the pair itself is pure state.

use rust_decimal::Decimal;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::currency::Currency;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::orderbook::{sort_active_orders, BookSnapshot, Order, Orderbook, PerSide, Side};

/// USD amount used to probe both sides for a representative top order when
/// computing midpoint-derived figures.
const LIQUIDITY_PROBE_USD: u32 = 60;

/// A tradable market on one exchange client
pub struct Pair {
    ticker: String,
    base: Arc<Currency>,
    quote: Arc<Currency>,
    minimum_step: Decimal,
    status: RwLock<PerSide<bool>>,
    orders: RwLock<PerSide<Vec<Order>>>,
    orderbook: Orderbook,
    bus: Arc<EventBus>,
}

impl Pair {
    /// Build a pair and register it with both of its currencies.
    pub fn create(
        ticker: impl Into<String>,
        base: Arc<Currency>,
        quote: Arc<Currency>,
        minimum_step: Decimal,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        let pair = Arc::new(Self {
            ticker: ticker.into(),
            base: base.clone(),
            quote: quote.clone(),
            minimum_step,
            status: RwLock::new(PerSide::new(false, false)),
            orders: RwLock::new(PerSide::new(Vec::new(), Vec::new())),
            orderbook: Orderbook::new(),
            bus,
        });
        base.register_base_pair(&pair);
        quote.register_quote_pair(&pair);
        pair
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn base(&self) -> &Arc<Currency> {
        &self.base
    }

    pub fn quote(&self) -> &Arc<Currency> {
        &self.quote
    }

    pub fn minimum_step(&self) -> Decimal {
        self.minimum_step
    }

    pub fn orderbook(&self) -> &Orderbook {
        &self.orderbook
    }

    // ----- per-side status -----

    pub fn status(&self, side: Side) -> bool {
        *self.status.read().unwrap().get(side)
    }

    pub(crate) fn set_status(&self, side: Side, enabled: bool) {
        *self.status.write().unwrap().get_mut(side) = enabled;
    }

    /// True while at least one side is enabled.
    pub fn is_enabled(&self) -> bool {
        let status = self.status.read().unwrap();
        status.ask || status.bid
    }

    // ----- active-order cache -----

    pub fn active_orders(&self, side: Side) -> Vec<Order> {
        self.orders.read().unwrap().get(side).clone()
    }

    pub(crate) fn set_active_orders(&self, side: Side, mut orders: Vec<Order>) {
        sort_active_orders(side, &mut orders);
        *self.orders.write().unwrap().get_mut(side) = orders;
    }

    pub(crate) fn push_order(&self, order: Order) {
        self.orders.write().unwrap().get_mut(order.side).push(order);
    }

    /// Drop an order from the cache. Already-gone orders are fine; the cache
    /// only ever trails the exchange.
    pub(crate) fn remove_order(&self, order: &Order) {
        let mut orders = self.orders.write().unwrap();
        let side_orders = orders.get_mut(order.side);
        if let Some(position) = side_orders.iter().position(|candidate| candidate == order) {
            side_orders.remove(position);
        }
    }

    /// Price of the account's top resting order on a side, if any.
    pub fn own_top_price(&self, side: Side) -> Option<Decimal> {
        self.orders
            .read()
            .unwrap()
            .get(side)
            .first()
            .map(|order| order.price)
    }

    // ----- order book -----

    /// Apply a fresh snapshot and publish `BookChanged` when the content
    /// materially differs from the stored book.
    pub fn apply_book(&self, snapshot: &BookSnapshot) -> Result<()> {
        if self.orderbook.update(snapshot)? {
            self.bus.publish(EngineEvent::BookChanged {
                ticker: self.ticker.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn reset_orderbook(&self) {
        self.orderbook.reset();
    }

    /// First order on `side` worth at least `usd_threshold`, excluding the
    /// account's own top order. `None` while the book or the base price is
    /// unusable.
    pub fn get_order_above(&self, side: Side, usd_threshold: Decimal) -> Option<Order> {
        self.orderbook.side(side).order_above(
            usd_threshold,
            self.base.global_price(),
            self.own_top_price(side),
        )
    }

    /// Longest prefix of `side` satisfying the side-aware price comparison.
    pub fn orders_up_until(&self, side: Side, price_threshold: Decimal) -> Vec<Order> {
        self.orderbook.side(side).orders_up_until(price_threshold)
    }

    /// Amount resting on each side within `pct` of the midpoint.
    pub fn liquidity(&self, pct: Decimal) -> Option<PerSide<Decimal>> {
        let probe = Decimal::from(LIQUIDITY_PROBE_USD);
        let first_ask = self.get_order_above(Side::Ask, probe)?;
        let first_bid = self.get_order_above(Side::Bid, probe)?;

        let midpoint = first_bid.price + (first_ask.price - first_bid.price) / Decimal::TWO;
        let asks = self.orders_up_until(Side::Ask, midpoint * (Decimal::ONE + pct));
        let bids = self.orders_up_until(Side::Bid, midpoint * (Decimal::ONE - pct));

        Some(PerSide::new(
            asks.iter().map(|order| order.amount).sum(),
            bids.iter().map(|order| order.amount).sum(),
        ))
    }

    /// Relative spread `(ask - bid) / ask` between representative top orders.
    pub fn spread(&self, usd_threshold: Decimal) -> Option<Decimal> {
        let first_ask = self.get_order_above(Side::Ask, usd_threshold)?;
        let first_bid = self.get_order_above(Side::Bid, usd_threshold)?;
        Some((first_ask.price - first_bid.price) / first_ask.price)
    }
}

/// Pair identity is the (quote, base) symbol combination.
impl PartialEq for Pair {
    fn eq(&self, other: &Self) -> bool {
        (self.quote.symbol(), self.base.symbol()) == (other.quote.symbol(), other.base.symbol())
    }
}

impl fmt::Debug for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pair")
            .field("ticker", &self.ticker)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Level;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_pair(bus: Arc<EventBus>) -> Arc<Pair> {
        let base = Currency::new("BTC", "Bitcoin", dec!(20), bus.clone());
        let quote = Currency::new("CLP", "Chilean Peso", dec!(20), bus.clone());
        base.set_global_price(dec!(1));
        quote.set_global_price(dec!(0.001));
        Pair::create("btc-clp", base, quote, dec!(0.0001), bus)
    }

    fn snapshot(asks: &[(Decimal, Decimal)], bids: &[(Decimal, Decimal)]) -> BookSnapshot {
        BookSnapshot::new(
            asks.iter().map(|&(p, a)| Level::new(p, a)).collect(),
            bids.iter().map(|&(p, a)| Level::new(p, a)).collect(),
        )
    }

    #[test]
    fn enablement_follows_either_side() {
        let pair = test_pair(Arc::new(EventBus::new()));
        assert!(!pair.is_enabled());

        pair.set_status(Side::Ask, true);
        assert!(pair.is_enabled());

        pair.set_status(Side::Ask, false);
        pair.set_status(Side::Bid, true);
        assert!(pair.is_enabled());
    }

    #[test]
    fn identity_is_by_quote_and_base_symbols() {
        let bus = Arc::new(EventBus::new());
        let first = test_pair(bus.clone());
        let second = test_pair(bus.clone());
        assert_eq!(*first, *second);

        let base = Currency::new("ETH", "Ether", dec!(20), bus.clone());
        let quote = Currency::new("CLP", "Chilean Peso", dec!(20), bus.clone());
        let other = Pair::create("eth-clp", base, quote, dec!(0.0001), bus);
        assert_ne!(*first, *other);
    }

    #[test]
    fn currencies_see_their_pairs_activity() {
        let pair = test_pair(Arc::new(EventBus::new()));
        assert!(!pair.base().has_active_pair());

        pair.set_status(Side::Bid, true);
        assert!(pair.base().has_active_pair());
        assert!(pair.quote().has_active_pair());
    }

    #[test]
    fn book_change_publishes_once_per_material_change() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe(move |event| {
            if matches!(event, EngineEvent::BookChanged { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let pair = test_pair(bus);
        pair.apply_book(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Different content fires again.
        pair.apply_book(&snapshot(&[(dec!(101), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Identical content stays silent.
        pair.apply_book(&snapshot(&[(dec!(101), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn book_change_event_carries_the_ticker() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| {
            if let EngineEvent::BookChanged { ticker } = event {
                sink.lock().unwrap().push(ticker.clone());
            }
        });

        let pair = test_pair(bus);
        pair.apply_book(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["btc-clp".to_string()]);
    }

    #[test]
    fn spread_of_a_one_percent_book() {
        let pair = test_pair(Arc::new(EventBus::new()));
        pair.apply_book(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();

        assert_eq!(pair.spread(Decimal::ZERO).unwrap(), dec!(0.01));
    }

    #[test]
    fn spread_needs_usable_orders_on_both_sides() {
        let pair = test_pair(Arc::new(EventBus::new()));
        assert!(pair.spread(Decimal::ZERO).is_none());

        pair.apply_book(&snapshot(&[(dec!(100), dec!(1))], &[]))
            .unwrap();
        assert!(pair.spread(Decimal::ZERO).is_none());
    }

    #[test]
    fn get_order_above_skips_own_resting_order() {
        let pair = test_pair(Arc::new(EventBus::new()));
        pair.apply_book(&snapshot(
            &[(dec!(100), dec!(500)), (dec!(102), dec!(400))],
            &[(dec!(99), dec!(1))],
        ))
        .unwrap();

        // Our own order sits at the top of the ask book.
        pair.set_active_orders(
            Side::Ask,
            vec![Order::with_id(dec!(100), dec!(500), Side::Ask, "mine", "btc-clp")],
        );

        let order = pair.get_order_above(Side::Ask, dec!(60)).unwrap();
        assert_eq!(order.price, dec!(102));
    }

    #[test]
    fn liquidity_sums_each_side_inside_the_band() {
        let pair = test_pair(Arc::new(EventBus::new()));
        pair.apply_book(&snapshot(
            &[
                (dec!(100), dec!(70)),
                (dec!(102), dec!(80)),
                (dec!(200), dec!(90)), // outside +4%
            ],
            &[
                (dec!(99), dec!(60)),
                (dec!(97), dec!(50)),
                (dec!(50), dec!(40)), // outside -4%
            ],
        ))
        .unwrap();

        // Midpoint 99.5; band [95.52, 103.48].
        let liquidity = pair.liquidity(dec!(0.04)).unwrap();
        assert_eq!(liquidity.ask, dec!(150));
        assert_eq!(liquidity.bid, dec!(110));
    }

    #[test]
    fn active_order_cache_sorts_and_prunes() {
        let pair = test_pair(Arc::new(EventBus::new()));
        pair.set_active_orders(
            Side::Bid,
            vec![
                Order::with_id(dec!(98), dec!(1), Side::Bid, "a", "btc-clp"),
                Order::with_id(dec!(99), dec!(1), Side::Bid, "b", "btc-clp"),
            ],
        );
        assert_eq!(pair.own_top_price(Side::Bid), Some(dec!(99)));

        let top = pair.active_orders(Side::Bid)[0].clone();
        pair.remove_order(&top);
        assert_eq!(pair.own_top_price(Side::Bid), Some(dec!(98)));

        // Removing an order that is already gone is a no-op.
        pair.remove_order(&top);
        assert_eq!(pair.active_orders(Side::Bid).len(), 1);
    }
}
