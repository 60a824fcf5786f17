//! Global price resolution
//!
//! Every currency carries a USD-denominated global price sourced from a
//! fallback chain of feeds. Which chain applies is decided by an explicit
//! asset classification over static symbol lists.

mod feeds;

pub use feeds::{AggregatorFeed, ChainlinkFeed, CriptoyaFeed, ExchangeTickerFeed, FiatConverterFeed};

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Symbols treated as 1 USD, including USD itself.
pub const STABLECOIN_SYMBOLS: &[&str] = &["USD", "USDT", "USDC", "BUSD", "DAI", "TUSD", "USDP"];

/// Fiat tickers this engine can encounter on its backends.
pub const FIAT_SYMBOLS: &[&str] = &[
    "ARS", "BRL", "CLP", "COP", "EUR", "GBP", "JPY", "MXN", "PEN",
];

/// Fiat currencies whose official rate is known to be distorted; these route
/// to a dedicated parallel-market feed instead of the conversion service.
pub const DISTORTED_FIAT_SYMBOLS: &[&str] = &["ARS"];

/// Asset classification driving the oracle chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetClass {
    /// USD or a recognized USD stablecoin; price is 1 by definition
    UsdPegged,
    /// Government currency, valued via a conversion service
    Fiat,
    /// Everything else, valued via the crypto feed chain
    Crypto,
}

/// Classify a ticker symbol. Case-insensitive.
pub fn classify(symbol: &str) -> AssetClass {
    let symbol = symbol.to_uppercase();
    if STABLECOIN_SYMBOLS.contains(&symbol.as_str()) {
        AssetClass::UsdPegged
    } else if FIAT_SYMBOLS.contains(&symbol.as_str()) {
        AssetClass::Fiat
    } else {
        AssetClass::Crypto
    }
}

/// One price source. `fetch_price` returns USD per unit of `symbol` and may
/// fail with an `Oracle` error when the symbol is not supported.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal>;
}

/// Routes each symbol to its feed chain and walks the chain in order,
/// falling through on per-feed failure.
pub struct PriceRouter {
    fiat: Vec<Box<dyn PriceOracle>>,
    crypto: Vec<Box<dyn PriceOracle>>,
    parallel: HashMap<String, Box<dyn PriceOracle>>,
}

impl PriceRouter {
    pub fn new(fiat: Vec<Box<dyn PriceOracle>>, crypto: Vec<Box<dyn PriceOracle>>) -> Self {
        Self {
            fiat,
            crypto,
            parallel: HashMap::new(),
        }
    }

    /// The production chains: fiat through the conversion service with the
    /// aggregator as backstop; crypto through on-chain feed, then exchange
    /// ticker, then aggregator (kept last for its tight rate limits).
    pub fn with_default_feeds() -> Self {
        let mut router = Self::new(
            vec![
                Box::new(FiatConverterFeed::new()),
                Box::new(AggregatorFeed::new()),
            ],
            vec![
                Box::new(ChainlinkFeed::new()),
                Box::new(ExchangeTickerFeed::new()),
                Box::new(AggregatorFeed::new()),
            ],
        );
        for symbol in DISTORTED_FIAT_SYMBOLS {
            router.set_parallel_feed(symbol, Box::new(CriptoyaFeed::new()));
        }
        router
    }

    /// Route a fiat symbol to a dedicated parallel-market feed.
    pub fn set_parallel_feed(&mut self, symbol: &str, feed: Box<dyn PriceOracle>) {
        self.parallel.insert(symbol.to_uppercase(), feed);
    }

    /// Resolve a symbol to USD per unit.
    pub async fn price(&self, symbol: &str) -> Result<Decimal> {
        let symbol = symbol.to_uppercase();
        match classify(&symbol) {
            AssetClass::UsdPegged => Ok(Decimal::ONE),
            AssetClass::Fiat => {
                if let Some(feed) = self.parallel.get(&symbol) {
                    return feed.fetch_price(&symbol).await;
                }
                self.walk_chain(&self.fiat, &symbol).await
            }
            AssetClass::Crypto => self.walk_chain(&self.crypto, &symbol).await,
        }
    }

    async fn walk_chain(&self, chain: &[Box<dyn PriceOracle>], symbol: &str) -> Result<Decimal> {
        let mut last_error = None;
        for feed in chain {
            match feed.fetch_price(symbol).await {
                Ok(price) => return Ok(price),
                Err(err) => {
                    debug!(feed = feed.name(), symbol, error = %err, "price feed failed, falling through");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| EngineError::Oracle {
            symbol: symbol.to_string(),
            reason: "no feeds configured".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StaticFeed {
        name: &'static str,
        price: Option<Decimal>,
        calls: Arc<AtomicUsize>,
    }

    impl StaticFeed {
        fn ok(name: &'static str, price: Decimal, calls: &Arc<AtomicUsize>) -> Box<Self> {
            Box::new(Self {
                name,
                price: Some(price),
                calls: calls.clone(),
            })
        }

        fn failing(name: &'static str, calls: &Arc<AtomicUsize>) -> Box<Self> {
            Box::new(Self {
                name,
                price: None,
                calls: calls.clone(),
            })
        }
    }

    #[async_trait]
    impl PriceOracle for StaticFeed {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price.ok_or_else(|| EngineError::Oracle {
                symbol: symbol.to_string(),
                reason: "unsupported".to_string(),
            })
        }
    }

    #[test]
    fn classification_uses_the_static_lists() {
        assert_eq!(classify("usd"), AssetClass::UsdPegged);
        assert_eq!(classify("USDT"), AssetClass::UsdPegged);
        assert_eq!(classify("CLP"), AssetClass::Fiat);
        assert_eq!(classify("ars"), AssetClass::Fiat);
        assert_eq!(classify("BTC"), AssetClass::Crypto);
        assert_eq!(classify("some-new-token"), AssetClass::Crypto);
    }

    #[tokio::test]
    async fn pegged_symbols_never_hit_a_feed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = PriceRouter::new(
            vec![StaticFeed::failing("fiat", &calls)],
            vec![StaticFeed::failing("crypto", &calls)],
        );

        assert_eq!(router.price("USDT").await.unwrap(), Decimal::ONE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn crypto_chain_falls_through_in_order() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let third = Arc::new(AtomicUsize::new(0));
        let router = PriceRouter::new(
            vec![],
            vec![
                StaticFeed::failing("onchain", &first),
                StaticFeed::ok("ticker", dec!(42000), &second),
                StaticFeed::ok("aggregator", dec!(41000), &third),
            ],
        );

        assert_eq!(router.price("BTC").await.unwrap(), dec!(42000));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        // The chain stops at the first success.
        assert_eq!(third.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_chain_surfaces_the_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = PriceRouter::new(vec![], vec![StaticFeed::failing("onchain", &calls)]);

        let err = router.price("BTC").await.unwrap_err();
        assert!(matches!(err, EngineError::Oracle { .. }));
    }

    #[tokio::test]
    async fn distorted_fiat_routes_to_the_parallel_feed() {
        let official = Arc::new(AtomicUsize::new(0));
        let parallel = Arc::new(AtomicUsize::new(0));
        let mut router = PriceRouter::new(
            vec![StaticFeed::ok("converter", dec!(0.0011), &official)],
            vec![],
        );
        router.set_parallel_feed("ARS", StaticFeed::ok("parallel", dec!(0.0008), &parallel));

        assert_eq!(router.price("ars").await.unwrap(), dec!(0.0008));
        assert_eq!(official.load(Ordering::SeqCst), 0);
        assert_eq!(parallel.load(Ordering::SeqCst), 1);

        // Regular fiat still goes through the conversion service.
        assert_eq!(router.price("CLP").await.unwrap(), dec!(0.0011));
        assert_eq!(official.load(Ordering::SeqCst), 1);
    }
}
