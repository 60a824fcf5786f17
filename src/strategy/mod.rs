//! Automated strategy actors
//!
//! Each strategy runs as its own background task, mutates orders only under
//! the engine's trade lock, and is tracked in an injected registry so it can
//! be stopped administratively.

mod auto;

pub use auto::{market_order, AutoExecute, AutoMarket, OrderSize};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

struct StrategyHandle {
    name: String,
    ticker: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Registry of running strategies.
///
/// Stopping is cooperative: the actor observes the signal at its next loop
/// iteration or sleep, so an in-flight network call always completes first.
#[derive(Default)]
pub struct StrategyRegistry {
    running: Mutex<Vec<StrategyHandle>>,
    next_id: AtomicU64,
}

impl StrategyRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawn a strategy task and track it. Returns the unique name used to
    /// stop it later.
    pub(crate) fn launch<F>(&self, kind: &str, ticker: &str, spawn: F) -> String
    where
        F: FnOnce(watch::Receiver<bool>) -> JoinHandle<()>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let name = format!("{kind}:{ticker}:{id}");
        let (stop, stop_rx) = watch::channel(false);
        let task = spawn(stop_rx);
        info!(strategy = %name, "strategy started");
        self.running.lock().unwrap().push(StrategyHandle {
            name: name.clone(),
            ticker: ticker.to_string(),
            stop,
            task,
        });
        name
    }

    /// Signal one strategy to stop and drop it from the registry. Returns
    /// false when no such strategy is running.
    pub fn stop(&self, name: &str) -> bool {
        let mut running = self.running.lock().unwrap();
        let Some(position) = running.iter().position(|handle| handle.name == name) else {
            return false;
        };
        let handle = running.remove(position);
        let _ = handle.stop.send(true);
        info!(strategy = %handle.name, "strategy stop requested");
        true
    }

    /// Signal every running strategy to stop.
    pub fn stop_all(&self) {
        for handle in self.running.lock().unwrap().drain(..) {
            let _ = handle.stop.send(true);
        }
    }

    /// Names and tickers of strategies still running. Finished tasks are
    /// reaped on the way.
    pub fn running(&self) -> Vec<(String, String)> {
        let mut running = self.running.lock().unwrap();
        running.retain(|handle| !handle.task.is_finished());
        running
            .iter()
            .map(|handle| (handle.name.clone(), handle.ticker.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::wait_or_stop;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn stop_is_cooperative_and_removes_the_entry() {
        let registry = StrategyRegistry::new();
        let name = registry.launch("noop", "btc-clp", |mut stop| {
            tokio::spawn(async move {
                loop {
                    if wait_or_stop(&mut stop, Duration::from_secs(5)).await {
                        break;
                    }
                }
            })
        });

        assert_eq!(registry.running().len(), 1);
        assert!(registry.stop(&name));
        assert!(!registry.stop(&name));

        // Give the actor a cycle to observe the signal.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(registry.running().is_empty());
    }

    #[tokio::test]
    async fn names_are_unique_per_launch() {
        let registry = StrategyRegistry::new();
        let first = registry.launch("noop", "btc-clp", |_stop| tokio::spawn(async {}));
        let second = registry.launch("noop", "btc-clp", |_stop| tokio::spawn(async {}));
        assert_ne!(first, second);
        registry.stop_all();
    }
}
