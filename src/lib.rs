//! pairflow - Multi-Exchange Trading Connectivity Engine
//!
//! Maintains a live, synchronized view of market order books and account
//! balances across cryptocurrency exchange backends, and lets automated or
//! interactive callers submit and cancel orders against that view safely
//! under concurrency.

pub mod adapters;
pub mod config;
pub mod credentials;
pub mod currency;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod manager;
pub mod oracle;
pub mod orderbook;
pub mod pair;
pub mod strategy;

pub use config::Config;
pub use credentials::{Credential, CredentialStore};
pub use currency::{Balance, Currency};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus};
pub use exchange::{ExchangeAdapter, ExchangeClient, MarketInfo, RetryPolicy};
pub use manager::PairManager;
pub use orderbook::{BookSnapshot, Level, Order, Orderbook, OrderbookSide, PerSide, Side};
pub use pair::Pair;
pub use strategy::{AutoExecute, AutoMarket, StrategyRegistry};
