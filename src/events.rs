//! Typed event bus
//!
//! Delivery is synchronous: `publish` invokes every subscriber in
//! subscription order, in the publishing task's own execution context. There
//! is no queueing, so a slow subscriber delays the publisher's next cycle.

use std::sync::RwLock;

/// Events published by the engine. Fire-and-forget, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A pair's order book snapshot was replaced with different content.
    BookChanged { ticker: String },
    /// A pair's per-side enablement changed.
    StatusChanged { ticker: String },
    /// A currency balance was refreshed from the backend.
    BalanceUpdated { symbol: String },
    /// A currency's USD-equivalent total dropped below the empty threshold.
    /// A hint to reduce polling frequency, not an error.
    BalanceEmpty { symbol: String },
}

type Subscriber = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// Process-wide publish/subscribe bus, injected at construction rather than
/// held as a global.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers are invoked in registration order
    /// and must not subscribe from within their own callback.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Box::new(callback));
    }

    /// Deliver an event to every current subscriber, synchronously.
    pub fn publish(&self, event: EngineEvent) {
        for subscriber in self.subscribers.read().unwrap().iter() {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn delivers_to_all_subscribers_in_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            bus.subscribe(move |_| log.lock().unwrap().push(tag));
        }

        bus.publish(EngineEvent::BookChanged {
            ticker: "btc-clp".into(),
        });

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn delivery_is_synchronous() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(EngineEvent::BalanceUpdated {
            symbol: "BTC".into(),
        });
        // The subscriber has already run by the time publish returns.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_carry_their_context() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        bus.subscribe(move |event| {
            *sink.lock().unwrap() = Some(event.clone());
        });

        bus.publish(EngineEvent::BalanceEmpty {
            symbol: "CLP".into(),
        });
        assert_eq!(
            *seen.lock().unwrap(),
            Some(EngineEvent::BalanceEmpty {
                symbol: "CLP".into()
            })
        );
    }
}
