//! Background refresh daemons
//!
//! One task per pair book and one per currency balance. All pacing is
//! sleep-based; every sleep doubles as a cooperative cancellation point.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::ExchangeClient;
use crate::currency::Currency;
use crate::engine::{start_jitter, wait_or_stop};
use crate::orderbook::Side;
use crate::pair::Pair;

/// Pace while a pair is disabled or its balances read empty.
const IDLE_INTERVAL: Duration = Duration::from_secs(5);

/// Poll a pair's book while it is enabled (or pinned via always-update).
///
/// Sleeps through cycles while push delivery covers this backend, and
/// optionally while the relevant balances read empty. Transient fetch
/// failures are logged and retried next cycle; local failures fail-stop this
/// one daemon.
pub(crate) fn spawn_book_daemon(
    client: Arc<ExchangeClient>,
    pair: Arc<Pair>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = client.engine().config().book_poll_interval();
        let poll_when_empty = client.engine().config().poll_when_balance_empty;

        // First start is jittered so freshly enabled pairs don't poll the
        // backend in one synchronized burst.
        if wait_or_stop(&mut stop, start_jitter(interval)).await {
            return;
        }

        loop {
            if client.push_book_delivery() {
                // The push channel owns book delivery; stay out of its way.
                if wait_or_stop(&mut stop, interval).await {
                    break;
                }
                continue;
            }

            if !poll_when_empty && balances_read_empty(&pair) {
                if wait_or_stop(&mut stop, IDLE_INTERVAL).await {
                    break;
                }
                continue;
            }

            if pair.is_enabled() || client.is_always_update(pair.ticker()) {
                match client.refresh_book(&pair).await {
                    Ok(()) => {}
                    Err(err) if err.is_local() => {
                        error!(ticker = %pair.ticker(), error = %err, "book daemon stopping");
                        return;
                    }
                    Err(err) => {
                        warn!(ticker = %pair.ticker(), error = %err, "book refresh failed");
                    }
                }
                if wait_or_stop(&mut stop, interval).await {
                    break;
                }
            } else if wait_or_stop(&mut stop, IDLE_INTERVAL).await {
                break;
            }
        }
        info!(ticker = %pair.ticker(), "book daemon stopped");
    })
}

/// The empty-balance conditions under which polling the book buys nothing:
/// a one-sided pair whose funding leg is empty, or both legs empty.
fn balances_read_empty(pair: &Pair) -> bool {
    let ask = pair.status(Side::Ask);
    let bid = pair.status(Side::Bid);
    if bid && !ask && pair.quote().balance_is_empty() {
        return true;
    }
    if ask && !bid && pair.base().balance_is_empty() {
        return true;
    }
    pair.base().balance_is_empty() && pair.quote().balance_is_empty()
}

/// Refresh a currency's balance while it has at least one active pair.
pub(crate) fn spawn_balance_daemon(
    client: Arc<ExchangeClient>,
    currency: Arc<Currency>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = client.engine().config().balance_poll_interval();
        if wait_or_stop(&mut stop, start_jitter(interval)).await {
            return;
        }

        loop {
            if currency.has_active_pair() {
                match client.refresh_balance(&currency).await {
                    Ok(()) => {}
                    Err(err) if err.is_local() => {
                        error!(symbol = %currency.symbol(), error = %err, "balance daemon stopping");
                        return;
                    }
                    Err(err) => {
                        warn!(symbol = %currency.symbol(), error = %err, "balance refresh failed");
                    }
                }
            }
            if wait_or_stop(&mut stop, interval).await {
                break;
            }
        }
        info!(symbol = %currency.symbol(), "balance daemon stopped");
    })
}
