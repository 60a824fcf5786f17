//! Configuration module for the connectivity engine

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend to connect to (e.g. "buda")
    pub exchange: String,

    /// Pairs to enable at startup (backend tickers)
    pub enable_tickers: Vec<String>,

    /// Restrict market discovery to these tickers when set
    pub ticker_whitelist: Option<Vec<String>>,

    /// Optional websocket endpoint for push-based book delivery
    pub ws_endpoint: Option<String>,

    /// Poll intervals for the background daemons
    pub book_poll_interval_ms: u64,
    pub balance_poll_interval_ms: u64,
    pub price_refresh_interval_secs: u64,

    /// Retry policy for remote operations
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,

    /// USD-equivalent total below which a balance reads as empty
    pub empty_balance_usd: Decimal,

    /// Keep polling a pair's book even while its balances read empty
    pub poll_when_balance_empty: bool,

    /// Health check server port
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let enable_tickers = csv_list(&env::var("ENABLE_TICKERS").unwrap_or_default());
        let ticker_whitelist = env::var("TICKER_WHITELIST")
            .ok()
            .map(|raw| csv_list(&raw))
            .filter(|list| !list.is_empty());

        Ok(Self {
            exchange: env::var("EXCHANGE")
                .unwrap_or(defaults.exchange)
                .to_lowercase(),
            enable_tickers,
            ticker_whitelist,
            ws_endpoint: env::var("WS_ENDPOINT").ok(),
            book_poll_interval_ms: parse_env("BOOK_POLL_INTERVAL_MS", defaults.book_poll_interval_ms),
            balance_poll_interval_ms: parse_env(
                "BALANCE_POLL_INTERVAL_MS",
                defaults.balance_poll_interval_ms,
            ),
            price_refresh_interval_secs: parse_env(
                "PRICE_REFRESH_INTERVAL_SECS",
                defaults.price_refresh_interval_secs,
            ),
            retry_attempts: parse_env("RETRY_ATTEMPTS", defaults.retry_attempts),
            retry_backoff_ms: parse_env("RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            empty_balance_usd: parse_env("EMPTY_BALANCE_USD", defaults.empty_balance_usd),
            poll_when_balance_empty: parse_env(
                "POLL_WHEN_BALANCE_EMPTY",
                defaults.poll_when_balance_empty,
            ),
            health_port: parse_env("HEALTH_PORT", defaults.health_port),
        })
    }

    pub fn book_poll_interval(&self) -> Duration {
        Duration::from_millis(self.book_poll_interval_ms)
    }

    pub fn balance_poll_interval(&self) -> Duration {
        Duration::from_millis(self.balance_poll_interval_ms)
    }

    pub fn price_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.price_refresh_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: "buda".to_string(),
            enable_tickers: Vec::new(),
            ticker_whitelist: None,
            ws_endpoint: None,
            book_poll_interval_ms: 1_000,
            balance_poll_interval_ms: 7_000,
            price_refresh_interval_secs: 120,
            retry_attempts: 10,
            retry_backoff_ms: 200,
            empty_balance_usd: Decimal::from(20),
            poll_when_balance_empty: true,
            health_port: 9090,
        }
    }
}

fn parse_env<T: FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(fallback)
}

fn csv_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}
