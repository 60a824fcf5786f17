//! Buda REST adapter
//!
//! Public market data plus HMAC-SHA384-signed private endpoints.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use sha2::Sha384;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::credentials::Credential;
use crate::error::{EngineError, Result};
use crate::exchange::{ExchangeAdapter, MarketInfo};
use crate::orderbook::{BookSnapshot, Order, Side};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Fractional digits the backend accepts on order amounts
const AMOUNT_SCALE: u32 = 5;

type HmacSha384 = Hmac<Sha384>;

pub struct BudaAdapter {
    http: reqwest::Client,
    base_url: String,
    credential: Option<Credential>,
    push_delivery: bool,
}

impl BudaAdapter {
    pub fn new(credential: Option<Credential>) -> Self {
        Self::with_base_url("https://www.buda.com", credential)
    }

    pub fn with_base_url(base_url: impl Into<String>, credential: Option<Credential>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            credential,
            push_delivery: false,
        }
    }

    /// Mark books as delivered over a push channel so the poll daemon idles.
    pub fn with_push_delivery(mut self, push: bool) -> Self {
        self.push_delivery = push;
        self
    }

    async fn public_get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).timeout(REQUEST_TIMEOUT).send().await?;
        check_status(response).await
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let credential = self.credential.as_ref().ok_or_else(|| {
            EngineError::NotSupported("authenticated endpoint requires credentials".to_string())
        })?;

        let nonce = nonce_micros();
        let body_bytes = match &body {
            Some(value) => Some(serde_json::to_vec(value)?),
            None => None,
        };
        let signature = sign_request(
            credential,
            method.as_str(),
            path,
            body_bytes.as_deref(),
            &nonce,
        )?;

        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method, &url)
            .timeout(REQUEST_TIMEOUT)
            .header("X-SBTC-APIKEY", &credential.public_key)
            .header("X-SBTC-NONCE", &nonce)
            .header("X-SBTC-SIGNATURE", signature);
        if let Some(bytes) = body_bytes {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(bytes);
        }
        let response = request.send().await?;
        check_status(response).await
    }
}

#[async_trait]
impl ExchangeAdapter for BudaAdapter {
    fn name(&self) -> &str {
        "buda"
    }

    fn is_read_only(&self) -> bool {
        self.credential.is_none()
    }

    fn push_book_delivery(&self) -> bool {
        self.push_delivery
    }

    async fn fetch_book(&self, ticker: &str) -> Result<BookSnapshot> {
        let response = self
            .public_get(&format!("/api/v2/markets/{ticker}/order_book"))
            .await?;
        let envelope: BookEnvelope = response.json().await?;
        Ok(envelope.order_book)
    }

    async fn fetch_balance(&self, symbol: &str) -> Result<(Decimal, Decimal)> {
        let response = self.signed(Method::GET, "/api/v2/balances", None).await?;
        let envelope: BalancesEnvelope = response.json().await?;

        let entry = envelope
            .balances
            .into_iter()
            .find(|balance| balance.id.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| EngineError::UnknownCurrency {
                symbol: symbol.to_string(),
            })?;
        Ok((entry.available_amount, entry.frozen_amount))
    }

    async fn fetch_active_orders(&self, ticker: &str) -> Result<Vec<Order>> {
        let response = self
            .signed(Method::GET, &format!("/api/v2/markets/{ticker}/orders"), None)
            .await?;
        let envelope: OrdersEnvelope = response.json().await?;

        let orders = envelope
            .orders
            .into_iter()
            .filter(|order| order.state != "canceled")
            .map(|order| {
                let side = if order.kind.eq_ignore_ascii_case("ask") {
                    Side::Ask
                } else {
                    Side::Bid
                };
                Order::with_id(order.limit, order.amount, side, order.id.to_string(), ticker)
            })
            .collect();
        Ok(orders)
    }

    async fn cancel_order(&self, order: &Order) -> Result<()> {
        let order_id = order.order_id.as_deref().ok_or_else(|| {
            EngineError::NotSupported("cancel requires an exchange order id".to_string())
        })?;
        self.signed(
            Method::PUT,
            &format!("/api/v2/orders/{order_id}"),
            Some(json!({"state": "canceling"})),
        )
        .await
        .map_err(|err| match err {
            // An order the backend no longer knows is settled, not retryable.
            EngineError::Transport(reason) if reason.contains("status 404") => {
                EngineError::StuckOrder {
                    order_id: order_id.to_string(),
                }
            }
            other => other,
        })?;
        Ok(())
    }

    async fn create_order(
        &self,
        ticker: &str,
        amount: Decimal,
        side: Side,
        limit_price: Option<Decimal>,
    ) -> Result<Option<Order>> {
        let mut body = json!({
            "price_type": if limit_price.is_some() { "LIMIT" } else { "MARKET" },
            "amount": amount.trunc_with_scale(AMOUNT_SCALE).to_string(),
            "type": match side { Side::Ask => "Ask", Side::Bid => "Bid" },
        });
        if let Some(price) = limit_price {
            body["limit"] = json!(price.to_string());
        }

        let response = self
            .signed(
                Method::POST,
                &format!("/api/v2/markets/{ticker}/orders"),
                Some(body),
            )
            .await?;

        match limit_price {
            Some(price) => {
                let envelope: OrderEnvelope = response.json().await?;
                Ok(Some(Order::with_id(
                    price,
                    amount,
                    side,
                    envelope.order.id.to_string(),
                    ticker,
                )))
            }
            None => Ok(None),
        }
    }

    async fn discover_markets(&self) -> Result<Vec<MarketInfo>> {
        let response = self.public_get("/api/v2/markets").await?;
        let envelope: MarketsEnvelope = response.json().await?;

        Ok(envelope
            .markets
            .into_iter()
            .map(|market| MarketInfo {
                ticker: market.id,
                base_symbol: market.base_currency,
                quote_symbol: market.quote_currency,
                minimum_step: market.minimum_order_amount,
                active: !market.disabled.unwrap_or(false),
            })
            .collect())
    }
}

/// Microsecond timestamp used as the signing nonce.
fn nonce_micros() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros()
        .to_string()
}

/// `"{method} {path} [base64(body)] {nonce}"` signed with HMAC-SHA384.
fn sign_request(
    credential: &Credential,
    method: &str,
    path: &str,
    body: Option<&[u8]>,
    nonce: &str,
) -> Result<String> {
    let mut components = vec![method.to_string(), path.to_string()];
    if let Some(body) = body {
        components.push(BASE64.encode(body));
    }
    components.push(nonce.to_string());
    let message = components.join(" ");

    let mut mac = HmacSha384::new_from_slice(credential.secret_key.as_bytes())
        .map_err(|_| EngineError::Config("unusable secret key".to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        return Err(EngineError::RateLimited);
    }
    if status.is_server_error() {
        return Err(EngineError::ServerError {
            status: status.as_u16(),
        });
    }

    // Client errors carry a code worth translating into the local taxonomy.
    let body: ApiError = response.json().await.unwrap_or_default();
    match body.code.as_deref() {
        Some("insufficient_funds") => Err(EngineError::InsufficientBalance),
        Some("invalid_amount") => Err(EngineError::AmountTooSmall {
            minimum: Decimal::ZERO,
        }),
        _ => Err(EngineError::Transport(format!(
            "status {}: {}",
            status.as_u16(),
            body.message.unwrap_or_default()
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookEnvelope {
    order_book: BookSnapshot,
}

#[derive(Debug, Deserialize)]
struct MarketsEnvelope {
    markets: Vec<RawMarket>,
}

#[derive(Debug, Deserialize)]
struct RawMarket {
    id: String,
    base_currency: String,
    quote_currency: String,
    #[serde(deserialize_with = "amount_pair")]
    minimum_order_amount: Decimal,
    #[serde(default)]
    disabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BalancesEnvelope {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    id: String,
    #[serde(deserialize_with = "amount_pair")]
    available_amount: Decimal,
    #[serde(deserialize_with = "amount_pair")]
    frozen_amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrdersEnvelope {
    orders: Vec<RawOrder>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    id: u64,
    #[serde(rename = "type")]
    kind: String,
    state: String,
    #[serde(deserialize_with = "amount_pair")]
    limit: Decimal,
    #[serde(deserialize_with = "amount_pair")]
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: RawOrder,
}

/// Amounts arrive as `["1.5", "BTC"]` pairs; only the figure matters here.
fn amount_pair<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let (value, _unit): (String, String) = Deserialize::deserialize(deserializer)?;
    value.parse().map_err(serde::de::Error::custom)
}
