//! Push-based book delivery
//!
//! Connects to a backend's websocket endpoint, translates book frames into
//! snapshots, and feeds them to the owning pairs. Reconnects with capped
//! exponential backoff.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{info, trace, warn};

use crate::error::{EngineError, Result};
use crate::exchange::ExchangeClient;
use crate::orderbook::BookSnapshot;

/// Maximum backoff delay between reconnect attempts
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BASE_BACKOFF: Duration = Duration::from_millis(1_000);

/// A book frame as pushed by the backend: the market ticker plus the same
/// snapshot shape the REST book endpoint uses.
#[derive(Debug, Deserialize)]
struct BookFrame {
    book: String,
    #[serde(flatten)]
    snapshot: BookSnapshot,
}

/// Websocket book feed for one client.
pub struct BookFeed {
    client: Arc<ExchangeClient>,
    endpoint: String,
}

impl BookFeed {
    pub fn new(client: Arc<ExchangeClient>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Run until the task is dropped, reconnecting after failures.
    pub async fn run(self) {
        let mut attempts: u32 = 0;
        loop {
            match self.connect_and_process().await {
                Ok(()) => {
                    attempts = 0;
                    sleep(Duration::from_secs(1)).await;
                }
                Err(err) => {
                    attempts += 1;
                    let backoff_ms =
                        (BASE_BACKOFF.as_millis() as u64) * 2u64.pow(attempts.min(6));
                    let delay = Duration::from_millis(backoff_ms).min(MAX_BACKOFF);
                    warn!(
                        attempt = attempts,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "book feed reconnecting"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn connect_and_process(&self) -> Result<()> {
        info!(endpoint = %self.endpoint, "connecting book feed");
        let (stream, response) = connect_async(&self.endpoint).await?;
        info!(status = ?response.status(), "book feed connected");
        let (mut write, mut read) = stream.split();

        // Ask for every currently enabled market.
        for pair in self.client.pairs() {
            if pair.is_enabled() {
                let subscribe = json!({"action": "subscribe", "book": pair.ticker()});
                write.send(Message::Text(subscribe.to_string())).await?;
            }
        }

        while let Some(message) = read.next().await {
            match message? {
                Message::Text(text) => {
                    if let Err(err) = self.handle_frame(&text) {
                        warn!(error = %err, "failed to apply book frame");
                    }
                }
                Message::Binary(data) => {
                    let text = String::from_utf8_lossy(&data).to_string();
                    if let Err(err) = self.handle_frame(&text) {
                        warn!(error = %err, "failed to apply book frame");
                    }
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(frame) => {
                    warn!(frame = ?frame, "book feed closed by backend");
                    return Err(EngineError::Transport("connection closed".to_string()));
                }
                _ => {}
            }
        }
        Err(EngineError::Transport("stream ended".to_string()))
    }

    /// Translate one frame and feed it to its pair. Frames for unknown
    /// markets and non-book messages are ignored.
    fn handle_frame(&self, raw: &str) -> Result<()> {
        let frame: BookFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(_) => {
                trace!(raw, "ignoring non-book frame");
                return Ok(());
            }
        };
        let Some(pair) = self.client.pair_by_ticker(&frame.book) else {
            trace!(book = %frame.book, "frame for unknown market");
            return Ok(());
        };
        pair.apply_book(&frame.snapshot)
    }
}
