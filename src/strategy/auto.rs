//! Built-in automated strategies

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use super::StrategyRegistry;
use crate::engine::wait_or_stop;
use crate::error::{EngineError, Result};
use crate::exchange::ExchangeClient;
use crate::orderbook::{Order, Side};
use crate::pair::Pair;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const BALANCE_BACKOFF: Duration = Duration::from_secs(30);

/// Watches one side of a book and fires once the best order crosses a target
/// price: under the trade lock, it sweeps both sides, places an opposite-side
/// limit order at the observed price and amount, and withdraws that order
/// again so nothing is left resting.
pub struct AutoExecute;

impl AutoExecute {
    pub fn spawn(
        client: Arc<ExchangeClient>,
        pair: Arc<Pair>,
        side: Side,
        price: Decimal,
        registry: &StrategyRegistry,
    ) -> String {
        let ticker = pair.ticker().to_string();
        registry.launch("auto-execute", &ticker, move |stop| {
            tokio::spawn(run_auto_execute(client, pair, side, price, stop))
        })
    }
}

async fn run_auto_execute(
    client: Arc<ExchangeClient>,
    pair: Arc<Pair>,
    side: Side,
    target: Decimal,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let mut backoff = None;

        if let Some(best) = pair.orderbook().best(side) {
            let crossed = match side {
                Side::Ask => best.price < target,
                Side::Bid => best.price > target,
            };
            if crossed {
                if !can_fund(&pair, side.opposite(), &best) {
                    backoff = Some(BALANCE_BACKOFF);
                } else {
                    let guard = client.engine().lock_trading().await;
                    let outcome = execute_cross(&client, &pair, side, &best).await;
                    drop(guard);
                    match outcome {
                        Ok(()) => {}
                        Err(EngineError::InsufficientBalance) => {
                            backoff = Some(BALANCE_BACKOFF);
                        }
                        Err(err) => {
                            warn!(ticker = %pair.ticker(), error = %err, "auto-execute cycle failed");
                        }
                    }
                }
            }
        }

        if wait_or_stop(&mut stop, backoff.unwrap_or(POLL_INTERVAL)).await {
            break;
        }
    }
    info!(ticker = %pair.ticker(), "auto-execute stopped");
}

/// The compound sequence guarded by the trade lock.
async fn execute_cross(
    client: &ExchangeClient,
    pair: &Pair,
    side: Side,
    best: &Order,
) -> Result<()> {
    client.cancel_all(pair, side).await?;
    client.cancel_all(pair, side.opposite()).await?;

    if let Some(order) = client
        .create_limit_order(pair, best.amount, side.opposite(), best.price)
        .await?
    {
        info!(
            ticker = %pair.ticker(),
            side = %order.side,
            amount = %order.amount,
            price = %order.price,
            "auto-executed against crossed order"
        );
        // The placed order is withdrawn straight away; the cycle must leave
        // nothing resting on either side.
        client.cancel_order(pair, &order).await?;
    }
    Ok(())
}

/// Whether the currency funding an `order_side` placement covers the trade.
fn can_fund(pair: &Pair, order_side: Side, best: &Order) -> bool {
    match order_side {
        // Buying spends the quote currency.
        Side::Bid => pair.quote().balance().available >= best.price * best.amount,
        // Selling spends the base currency.
        Side::Ask => pair.base().balance().available >= best.amount,
    }
}

/// Tops a pair back up with market orders: whenever the settlement leg of
/// `side` reads balance-empty and the cooldown has elapsed, it sweeps the
/// opposite side's resting orders and fires a market order of fixed amount on
/// the opposite side.
pub struct AutoMarket;

impl AutoMarket {
    pub fn spawn(
        client: Arc<ExchangeClient>,
        pair: Arc<Pair>,
        side: Side,
        cooldown: Duration,
        amount: Decimal,
        registry: &StrategyRegistry,
    ) -> String {
        let ticker = pair.ticker().to_string();
        registry.launch("auto-market", &ticker, move |stop| {
            tokio::spawn(run_auto_market(client, pair, side, cooldown, amount, stop))
        })
    }
}

async fn run_auto_market(
    client: Arc<ExchangeClient>,
    pair: Arc<Pair>,
    side: Side,
    cooldown: Duration,
    amount: Decimal,
    mut stop: watch::Receiver<bool>,
) {
    let mut last_action = Instant::now();
    loop {
        if wait_or_stop(&mut stop, POLL_INTERVAL).await {
            break;
        }

        let settlement = match side {
            Side::Bid => pair.quote(),
            Side::Ask => pair.base(),
        };
        if !settlement.balance_is_empty() || last_action.elapsed() <= cooldown {
            continue;
        }

        let _guard = client.engine().lock_trading().await;
        if let Err(err) = client.cancel_all(&pair, side.opposite()).await {
            warn!(ticker = %pair.ticker(), error = %err, "auto-market sweep failed");
            continue;
        }
        match client
            .create_market_order(&pair, amount, side.opposite())
            .await
        {
            Ok(()) => {
                info!(
                    ticker = %pair.ticker(),
                    side = %side.opposite(),
                    amount = %amount,
                    "auto-market order placed"
                );
                last_action = Instant::now();
            }
            Err(err) => {
                warn!(ticker = %pair.ticker(), error = %err, "auto-market order failed");
            }
        }
    }
    info!(ticker = %pair.ticker(), "auto-market stopped");
}

/// Amount specification for an interactive market order.
#[derive(Debug, Clone, Copy)]
pub enum OrderSize {
    /// Spend the quote currency's entire total balance
    All,
    Exact(Decimal),
}

/// Sweep a side and fire a market order under the trade lock. Dust totals
/// and insufficient balance are silently skipped.
pub async fn market_order(
    client: &ExchangeClient,
    pair: &Pair,
    size: OrderSize,
    side: Side,
) -> Result<()> {
    let amount = match size {
        OrderSize::All => {
            let total = pair.quote().balance().total;
            if total < Decimal::ONE {
                return Ok(());
            }
            total
        }
        OrderSize::Exact(amount) => amount,
    };

    let _guard = client.engine().lock_trading().await;
    client.cancel_all(pair, side).await?;
    match client.create_market_order(pair, amount, side).await {
        Err(EngineError::InsufficientBalance) => Ok(()),
        other => other,
    }
}
