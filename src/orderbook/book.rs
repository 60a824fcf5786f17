//! Order book state and change detection

use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::{BookSnapshot, Level, Order, Side};
use crate::error::{EngineError, Result};

/// One side of a book, captured as an owned read snapshot.
///
/// Levels stay raw; `Order` values are materialized on access so that
/// high-frequency updates never pay for object construction.
#[derive(Debug, Clone)]
pub struct OrderbookSide {
    side: Side,
    levels: Vec<Level>,
}

impl OrderbookSide {
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Order> {
        self.levels
            .get(index)
            .map(|level| Order::new(level.price, level.amount, self.side))
    }

    pub fn first(&self) -> Option<Order> {
        self.get(0)
    }

    /// The first `n` levels, materialized.
    pub fn top(&self, n: usize) -> Vec<Order> {
        self.iter().take(n).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = Order> + '_ {
        self.levels
            .iter()
            .map(|level| Order::new(level.price, level.amount, self.side))
    }

    /// First order worth at least `usd_threshold` (converted through the base
    /// currency's USD price) whose price is not the top of the account's own
    /// resting orders on this side. `None` means the book is not usable yet.
    pub fn order_above(
        &self,
        usd_threshold: Decimal,
        base_price_usd: Decimal,
        own_top_price: Option<Decimal>,
    ) -> Option<Order> {
        if base_price_usd.is_zero() {
            // Price unknown; nothing in this book can be valued.
            return None;
        }
        let amount_floor = usd_threshold / base_price_usd;
        self.iter()
            .find(|order| order.amount >= amount_floor && own_top_price != Some(order.price))
    }

    /// Longest prefix whose prices satisfy the side-aware comparison against
    /// `price_threshold` (`<` for asks, `>` for bids). Assumes the side is
    /// stored most-aggressive-first; this is a prefix scan, not a filter.
    pub fn orders_up_until(&self, price_threshold: Decimal) -> Vec<Order> {
        let mut results = Vec::new();
        for order in self.iter() {
            let within = match self.side {
                Side::Ask => order.price < price_threshold,
                Side::Bid => order.price > price_threshold,
            };
            if within {
                results.push(order);
            } else {
                break;
            }
        }
        results
    }
}

#[derive(Debug, Default)]
struct BookState {
    asks: Vec<Level>,
    bids: Vec<Level>,
    updated_id: Option<u64>,
}

/// Both sides of one market's book plus the change-detection flag.
///
/// With change detection enabled (the default) an update whose content is
/// pairwise equal to the stored snapshot is a no-op, which suppresses
/// duplicate-event storms on an unchanged book.
#[derive(Debug)]
pub struct Orderbook {
    state: RwLock<BookState>,
    check: AtomicBool,
}

impl Orderbook {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BookState::default()),
            check: AtomicBool::new(true),
        }
    }

    /// Toggle change detection. When disabled, every update unconditionally
    /// replaces both sides and never reports a change.
    pub fn set_check(&self, check: bool) {
        self.check.store(check, Ordering::Relaxed);
    }

    pub fn check(&self) -> bool {
        self.check.load(Ordering::Relaxed)
    }

    /// Apply a fresh snapshot. Returns `Ok(true)` when the stored book was
    /// replaced with materially different content and the owner should
    /// publish a book-changed notification.
    pub fn update(&self, snapshot: &BookSnapshot) -> Result<bool> {
        let asks = snapshot
            .asks
            .as_ref()
            .ok_or(EngineError::InvalidBook("missing ask side"))?;
        let bids = snapshot
            .bids
            .as_ref()
            .ok_or(EngineError::InvalidBook("missing bid side"))?;

        let mut state = self.state.write().unwrap();
        if self.check() && state.asks == *asks && state.bids == *bids {
            return Ok(false);
        }

        state.asks = asks.clone();
        state.bids = bids.clone();
        if snapshot.updated_id.is_some() {
            state.updated_id = snapshot.updated_id;
        }
        Ok(self.check())
    }

    /// Owned snapshot of one side.
    pub fn side(&self, side: Side) -> OrderbookSide {
        let state = self.state.read().unwrap();
        let levels = match side {
            Side::Ask => state.asks.clone(),
            Side::Bid => state.bids.clone(),
        };
        OrderbookSide { side, levels }
    }

    pub fn best(&self, side: Side) -> Option<Order> {
        self.side(side).first()
    }

    pub fn updated_id(&self) -> Option<u64> {
        self.state.read().unwrap().updated_id
    }

    /// True once both sides hold at least one level.
    pub fn is_populated(&self) -> bool {
        let state = self.state.read().unwrap();
        !state.asks.is_empty() && !state.bids.is_empty()
    }

    pub fn depth(&self, side: Side) -> usize {
        let state = self.state.read().unwrap();
        match side {
            Side::Ask => state.asks.len(),
            Side::Bid => state.bids.len(),
        }
    }

    /// Drop both sides and the sequence id. Used when a pair is fully
    /// disabled and its subscription torn down.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        *state = BookState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot(asks: &[(Decimal, Decimal)], bids: &[(Decimal, Decimal)]) -> BookSnapshot {
        BookSnapshot::new(
            asks.iter().map(|&(p, a)| Level::new(p, a)).collect(),
            bids.iter().map(|&(p, a)| Level::new(p, a)).collect(),
        )
    }

    #[test]
    fn first_update_reports_a_change() {
        let book = Orderbook::new();
        let changed = book
            .update(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert!(changed);
        assert!(book.is_populated());
    }

    #[test]
    fn identical_content_is_a_no_op() {
        let book = Orderbook::new();
        let snap = snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))])
            .with_updated_id(7);
        assert!(book.update(&snap).unwrap());
        assert_eq!(book.updated_id(), Some(7));

        // Same content with a newer sequence id: nothing is stored.
        let replay = snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))])
            .with_updated_id(8);
        assert!(!book.update(&replay).unwrap());
        assert_eq!(book.updated_id(), Some(7));
    }

    #[test]
    fn changed_content_replaces_both_sides() {
        let book = Orderbook::new();
        book.update(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        let changed = book
            .update(&snapshot(&[(dec!(101), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert!(changed);
        assert_eq!(book.best(Side::Ask).unwrap().price, dec!(101));
    }

    #[test]
    fn missing_side_is_rejected_without_mutation() {
        let book = Orderbook::new();
        book.update(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();

        let partial = BookSnapshot {
            asks: Some(vec![Level::new(dec!(50), dec!(1))]),
            bids: None,
            updated_id: None,
        };
        let err = book.update(&partial).unwrap_err();
        assert!(matches!(err, EngineError::InvalidBook(_)));
        assert_eq!(book.best(Side::Ask).unwrap().price, dec!(100));
    }

    #[test]
    fn disabled_check_replaces_without_reporting() {
        let book = Orderbook::new();
        book.set_check(false);

        let changed = book
            .update(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert!(!changed);
        assert!(book.is_populated());

        // Identical content still replaces, still reports nothing.
        let changed = book
            .update(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn reset_empties_both_sides() {
        let book = Orderbook::new();
        book.update(&snapshot(&[(dec!(100), dec!(1))], &[(dec!(99), dec!(1))]))
            .unwrap();
        book.reset();
        assert!(!book.is_populated());
        assert_eq!(book.depth(Side::Ask), 0);
        assert_eq!(book.updated_id(), None);
    }

    #[test]
    fn order_above_skips_small_and_own_orders() {
        let book = Orderbook::new();
        book.update(&snapshot(
            &[
                (dec!(100), dec!(0.001)), // too small at 1 USD/base
                (dec!(101), dec!(50)),    // own top order price
                (dec!(102), dec!(40)),
            ],
            &[(dec!(99), dec!(1))],
        ))
        .unwrap();

        let side = book.side(Side::Ask);
        let order = side
            .order_above(dec!(10), Decimal::ONE, Some(dec!(101)))
            .unwrap();
        assert_eq!(order.price, dec!(102));
    }

    #[test]
    fn order_above_excludes_own_order_even_when_largest() {
        let book = Orderbook::new();
        book.update(&snapshot(
            &[(dec!(100), dec!(1000)), (dec!(101), dec!(20))],
            &[(dec!(99), dec!(1))],
        ))
        .unwrap();

        let side = book.side(Side::Ask);
        let order = side
            .order_above(dec!(10), Decimal::ONE, Some(dec!(100)))
            .unwrap();
        assert_eq!(order.price, dec!(101));
    }

    #[test]
    fn order_above_requires_a_known_base_price() {
        let book = Orderbook::new();
        book.update(&snapshot(&[(dec!(100), dec!(10))], &[(dec!(99), dec!(1))]))
            .unwrap();
        assert!(book
            .side(Side::Ask)
            .order_above(dec!(10), Decimal::ZERO, None)
            .is_none());
    }

    #[test]
    fn orders_up_until_is_a_contiguous_prefix() {
        let book = Orderbook::new();
        // Third ask fails the comparison; the fourth would pass again but
        // must not be returned.
        book.update(&snapshot(
            &[
                (dec!(100), dec!(1)),
                (dec!(101), dec!(1)),
                (dec!(110), dec!(1)),
                (dec!(102), dec!(1)),
            ],
            &[(dec!(99), dec!(1)), (dec!(95), dec!(1)), (dec!(80), dec!(1))],
        ))
        .unwrap();

        let asks = book.side(Side::Ask).orders_up_until(dec!(105));
        assert_eq!(asks.len(), 2);
        assert_eq!(asks[1].price, dec!(101));

        let bids = book.side(Side::Bid).orders_up_until(dec!(90));
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[1].price, dec!(95));
    }

    #[test]
    fn side_snapshot_materializes_orders_lazily() {
        let book = Orderbook::new();
        book.update(&snapshot(
            &[(dec!(100), dec!(1)), (dec!(101), dec!(2))],
            &[(dec!(99), dec!(3))],
        ))
        .unwrap();

        let asks = book.side(Side::Ask);
        assert_eq!(asks.len(), 2);
        assert_eq!(asks.get(1).unwrap().amount, dec!(2));
        assert!(asks.get(2).is_none());
        assert_eq!(asks.top(1).len(), 1);
        let collected: Vec<Order> = asks.iter().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].side, Side::Ask);
    }
}
