//! Order value type

use rust_decimal::Decimal;
use std::fmt;

use super::Side;

/// Fractional digits kept when deriving an order's total. Truncated, never
/// rounded, so a derived total can always be funded.
const TOTAL_SCALE: u32 = 4;

/// An immutable order value.
///
/// `order_id` is present only for orders placed on or known to the exchange;
/// book levels materialize as orders without one.
#[derive(Debug, Clone)]
pub struct Order {
    pub price: Decimal,
    pub amount: Decimal,
    pub side: Side,
    pub total: Decimal,
    pub order_id: Option<String>,
    pub ticker: Option<String>,
}

impl Order {
    pub fn new(price: Decimal, amount: Decimal, side: Side) -> Self {
        Self {
            price,
            amount,
            side,
            total: (price * amount).trunc_with_scale(TOTAL_SCALE),
            order_id: None,
            ticker: None,
        }
    }

    /// An order known to the exchange, tagged with its id and market.
    pub fn with_id(
        price: Decimal,
        amount: Decimal,
        side: Side,
        order_id: impl Into<String>,
        ticker: impl Into<String>,
    ) -> Self {
        let mut order = Self::new(price, amount, side);
        order.order_id = Some(order_id.into());
        order.ticker = Some(ticker.into());
        order
    }
}

/// Two orders at the same price and amount are interchangeable regardless of
/// id or market.
impl PartialEq for Order {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price && self.amount == other.amount
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} @ {} ({})",
            self.side,
            self.amount,
            self.price,
            self.ticker.as_deref().unwrap_or("untracked"),
        )
    }
}

/// Sort a pair's cached active orders.
///
/// The sort is side-aware by signature so every call site states which side
/// it is ordering; both sides currently use descending price, which is the
/// ordering the rest of the engine reads (top of own orders = highest price).
pub fn sort_active_orders(side: Side, orders: &mut [Order]) {
    let _ = side;
    orders.sort_by(|a, b| b.price.cmp(&a.price));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn total_is_truncated_not_rounded() {
        let order = Order::new(dec!(3.33333), dec!(3), Side::Ask);
        assert_eq!(order.total, dec!(9.9999));

        let order = Order::new(dec!(0.00019), dec!(1), Side::Bid);
        assert_eq!(order.total, dec!(0.0001));
    }

    #[test]
    fn equality_ignores_id_and_market() {
        let anonymous = Order::new(dec!(100), dec!(1.5), Side::Ask);
        let tracked = Order::with_id(dec!(100), dec!(1.5), Side::Bid, "abc123", "btc-clp");
        assert_eq!(anonymous, tracked);

        let other_price = Order::new(dec!(101), dec!(1.5), Side::Ask);
        assert_ne!(anonymous, other_price);

        let other_amount = Order::new(dec!(100), dec!(2), Side::Ask);
        assert_ne!(anonymous, other_amount);
    }

    #[test]
    fn active_sort_puts_highest_price_first_on_both_sides() {
        let mut asks = vec![
            Order::new(dec!(100), dec!(1), Side::Ask),
            Order::new(dec!(102), dec!(1), Side::Ask),
            Order::new(dec!(101), dec!(1), Side::Ask),
        ];
        sort_active_orders(Side::Ask, &mut asks);
        assert_eq!(asks[0].price, dec!(102));
        assert_eq!(asks[2].price, dec!(100));

        let mut bids = vec![
            Order::new(dec!(99), dec!(1), Side::Bid),
            Order::new(dec!(98), dec!(1), Side::Bid),
        ];
        sort_active_orders(Side::Bid, &mut bids);
        assert_eq!(bids[0].price, dec!(99));
    }
}
