//! pairflow - Multi-Exchange Trading Connectivity Engine
//!
//! Connects to the configured backend, discovers its markets, enables the
//! requested pairs and keeps books, balances and prices synchronized until
//! shut down.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pairflow::adapters::{BookFeed, BudaAdapter};
use pairflow::{Config, CredentialStore, Engine, ExchangeAdapter, ExchangeClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting pairflow connectivity engine");

    let config = Config::load()?;
    info!(exchange = %config.exchange, tickers = ?config.enable_tickers, "Configuration loaded");

    let credentials = CredentialStore::from_env(&[config.exchange.as_str()]);
    let credential = credentials.find_by_exchange(&config.exchange).cloned();

    let adapter: Arc<dyn ExchangeAdapter> = match config.exchange.as_str() {
        "buda" => Arc::new(
            BudaAdapter::new(credential).with_push_delivery(config.ws_endpoint.is_some()),
        ),
        other => anyhow::bail!("unknown exchange backend: {other}"),
    };

    let engine = Engine::new(config.clone());
    let client = ExchangeClient::connect(adapter, engine.clone()).await?;
    info!(
        exchange = %client.name(),
        pairs = client.pairs().len(),
        currencies = client.currencies().len(),
        read_only = client.read_only(),
        "Client connected"
    );

    for ticker in &config.enable_tickers {
        match client.pair_by_ticker(ticker) {
            Some(pair) => {
                client.enable(&pair).await?;
                info!(ticker = %pair.ticker(), "Pair enabled");
            }
            None => warn!(ticker = %ticker, "Configured pair not found on backend"),
        }
    }

    if let Some(endpoint) = &config.ws_endpoint {
        let feed = BookFeed::new(client.clone(), endpoint.clone());
        tokio::spawn(feed.run());
    }

    // Start health check server
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    client.shutdown();
    engine.shutdown();

    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(port: u16) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "pairflow",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
