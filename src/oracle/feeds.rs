//! Concrete price feeds
//!
//! Thin wire wrappers only; chain ordering and classification live in the
//! router. Every feed returns USD per unit of the requested symbol.

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::PriceOracle;
use crate::error::{EngineError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn oracle_error(symbol: &str, reason: impl Into<String>) -> EngineError {
    EngineError::Oracle {
        symbol: symbol.to_string(),
        reason: reason.into(),
    }
}

/// On-chain aggregator read over plain JSON-RPC.
///
/// Answers come back as `latestRoundData` words; the price is the second
/// word, scaled by 1e8.
pub struct ChainlinkFeed {
    http: reqwest::Client,
    rpc_endpoints: Vec<String>,
}

/// Mainnet aggregator contracts for the USD-quoted feeds we care about.
const CHAINLINK_AGGREGATORS: &[(&str, &str)] = &[
    ("BTC", "0xF4030086522a5bEEa4988F8cA5B36dbC97BeE88c"),
    ("ETH", "0x5f4eC3Df9cbd43714FE2740f5E3616155c5b8419"),
    ("LINK", "0x2c1d072e956AFFC0D435Cb7AC38EF18d24d9127c"),
    ("BCH", "0x9F0F69428F923D6c95B781F89E165C9b2df9789D"),
    ("LTC", "0x6AF09DF7563C363B5763b9102712EbeD3b9e859B"),
];

/// `latestRoundData()` function selector
const LATEST_ROUND_DATA: &str = "0xfeaf968c";

impl ChainlinkFeed {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_endpoints: vec![
                "https://eth.llamarpc.com".to_string(),
                "https://rpc.ankr.com/eth".to_string(),
                "https://cloudflare-eth.com".to_string(),
            ],
        }
    }

    async fn call_aggregator(&self, endpoint: &str, contract: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct RpcResponse {
            result: Option<String>,
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [{"to": contract, "data": LATEST_ROUND_DATA}, "latest"],
        });

        let response: RpcResponse = self
            .http
            .post(endpoint)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        let raw = response
            .result
            .ok_or_else(|| EngineError::MalformedResponse("rpc call returned no result".into()))?;
        decode_round_answer(&raw)
    }
}

impl Default for ChainlinkFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for ChainlinkFeed {
    fn name(&self) -> &str {
        "chainlink"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        let symbol = symbol.to_uppercase();
        let contract = CHAINLINK_AGGREGATORS
            .iter()
            .find(|(sym, _)| *sym == symbol)
            .map(|(_, contract)| *contract)
            .ok_or_else(|| oracle_error(&symbol, "no on-chain aggregator for symbol"))?;

        let mut last_error = None;
        for endpoint in &self.rpc_endpoints {
            match self.call_aggregator(endpoint, contract).await {
                Ok(price) => return Ok(price),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| oracle_error(&symbol, "no rpc endpoints configured")))
    }
}

/// Decode the `answer` word of a `latestRoundData` return blob.
fn decode_round_answer(raw: &str) -> Result<Decimal> {
    let hex_words = raw.trim_start_matches("0x");
    if hex_words.len() < 128 {
        return Err(EngineError::MalformedResponse(
            "round data shorter than two words".into(),
        ));
    }
    // Word 0 is the round id; word 1 is the answer. Feed answers fit well
    // within 64 bits, so everything above them must be zero.
    let answer_word = &hex_words[64..128];
    let (high, low) = answer_word.split_at(48);
    if high.chars().any(|c| c != '0') {
        return Err(EngineError::MalformedResponse(
            "round answer out of range".into(),
        ));
    }
    let answer = u64::from_str_radix(low, 16)
        .map_err(|err| EngineError::MalformedResponse(err.to_string()))?;
    Ok(Decimal::from(answer) / Decimal::from(100_000_000u64))
}

/// Centralized-exchange ticker, quoted against USDT.
pub struct ExchangeTickerFeed {
    http: reqwest::Client,
    endpoint: String,
}

impl ExchangeTickerFeed {
    pub fn new() -> Self {
        Self::with_endpoint("https://api.binance.com/api/v3")
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for ExchangeTickerFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for ExchangeTickerFeed {
    fn name(&self) -> &str {
        "exchange-ticker"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct BookTicker {
            #[serde(rename = "bidPrice")]
            bid_price: Decimal,
        }

        let url = format!(
            "{}/ticker/bookTicker?symbol={}USDT",
            self.endpoint,
            symbol.to_uppercase()
        );
        let response = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            // Unknown market on this venue; let the chain fall through.
            return Err(oracle_error(symbol, "symbol not listed against USDT"));
        }
        let ticker: BookTicker = response.json().await?;
        Ok(ticker.bid_price)
    }
}

/// Aggregator price API. Kept last in the chain because of its rate limits.
pub struct AggregatorFeed {
    http: reqwest::Client,
    endpoint: String,
}

impl AggregatorFeed {
    pub fn new() -> Self {
        Self::with_endpoint("https://min-api.cryptocompare.com/data")
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for AggregatorFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for AggregatorFeed {
    fn name(&self) -> &str {
        "aggregator"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct PriceResponse {
            #[serde(rename = "USD")]
            usd: Option<f64>,
        }

        let url = format!(
            "{}/price?fsym={}&tsyms=USD",
            self.endpoint,
            symbol.to_uppercase()
        );
        let response: PriceResponse = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        let usd = response
            .usd
            .ok_or_else(|| oracle_error(symbol, "aggregator does not quote symbol"))?;
        Decimal::from_f64(usd).ok_or_else(|| oracle_error(symbol, "unrepresentable quote"))
    }
}

/// Parallel-market dollar rate for currencies with distorted official rates.
pub struct CriptoyaFeed {
    http: reqwest::Client,
    endpoint: String,
}

impl CriptoyaFeed {
    pub fn new() -> Self {
        Self::with_endpoint("https://criptoya.com/api")
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for CriptoyaFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for CriptoyaFeed {
    fn name(&self) -> &str {
        "criptoya"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct DolarResponse {
            ccb: f64,
        }

        let url = format!("{}/dolar", self.endpoint);
        let response: DolarResponse = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        let rate = Decimal::from_f64(response.ccb)
            .ok_or_else(|| oracle_error(symbol, "unrepresentable parallel rate"))?;
        if rate.is_zero() {
            return Err(oracle_error(symbol, "parallel rate is zero"));
        }
        Ok(Decimal::ONE / rate)
    }
}

/// Currency-conversion service for ordinary fiat.
pub struct FiatConverterFeed {
    http: reqwest::Client,
    endpoint: String,
}

impl FiatConverterFeed {
    pub fn new() -> Self {
        Self::with_endpoint("https://open.er-api.com/v6")
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl Default for FiatConverterFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for FiatConverterFeed {
    fn name(&self) -> &str {
        "fiat-converter"
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct RatesResponse {
            rates: std::collections::HashMap<String, f64>,
        }

        let url = format!("{}/latest/USD", self.endpoint);
        let response: RatesResponse = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        let per_usd = response
            .rates
            .get(&symbol.to_uppercase())
            .copied()
            .ok_or_else(|| oracle_error(symbol, "conversion service does not quote symbol"))?;
        let per_usd = Decimal::from_f64(per_usd)
            .filter(|rate| !rate.is_zero())
            .ok_or_else(|| oracle_error(symbol, "unusable conversion rate"))?;
        Ok(Decimal::ONE / per_usd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_a_round_answer_blob() {
        // Five 32-byte words; answer = 4_200_000_000_000 (42000 USD at 1e8).
        let mut blob = String::from("0x");
        blob.push_str(&format!("{:064x}", 0x1234u64)); // round id
        blob.push_str(&format!("{:064x}", 4_200_000_000_000u64)); // answer
        blob.push_str(&format!("{:064x}", 0u64));
        blob.push_str(&format!("{:064x}", 0u64));
        blob.push_str(&format!("{:064x}", 0x1234u64));

        assert_eq!(decode_round_answer(&blob).unwrap(), dec!(42000));
    }

    #[test]
    fn rejects_short_round_data() {
        assert!(decode_round_answer("0xfeaf").is_err());
    }

    #[tokio::test]
    async fn chainlink_rejects_symbols_without_an_aggregator() {
        let feed = ChainlinkFeed::new();
        let err = feed.fetch_price("NOT-A-COIN").await.unwrap_err();
        assert!(matches!(err, EngineError::Oracle { .. }));
    }
}
