//! Order book feed process
//!
//! Connects to a Binance stream for one symbol, keeps the reconstructed book
//! in sync, and serves health and metrics over HTTP.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lob_sync::{AppState, Config, FeedManager, RestSnapshotProvider, SyncController, SyncMetrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting order book feed");

    let config = Arc::new(Config::load()?);
    info!(symbol = %config.symbol, stream = ?config.stream, "Configuration loaded");

    let registry = prometheus::Registry::new();
    let metrics = SyncMetrics::new()?;
    metrics.register(&registry)?;

    let controller = SyncController::new(&config.symbol, config.sync_settings(), metrics);
    let provider = Arc::new(RestSnapshotProvider::new(&config.rest_endpoint)?);
    let mut feed = FeedManager::new(config.clone(), controller, provider);

    let state = Arc::new(AppState {
        reader: feed.reader(),
        registry,
        config: config.clone(),
    });

    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::spawn(log_status(state.clone()));

    feed.run().await?;

    Ok(())
}

/// Periodic book status logging
async fn log_status(state: Arc<AppState>) {
    let mut ticker = interval(Duration::from_secs(state.config.status_interval_secs.max(1)));
    loop {
        ticker.tick().await;
        let reader = &state.reader;
        info!(
            symbol = %reader.symbol(),
            status = %reader.sync_status(),
            last_update_id = ?reader.last_update_id(),
            best_bid = ?reader.best_bid(),
            best_ask = ?reader.best_ask(),
            spread = ?reader.spread(),
            "Order book status"
        );
    }
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let reader = &state.reader;
    Json(serde_json::json!({
        "status": reader.sync_status(),
        "component": "lob-sync",
        "symbol": reader.symbol(),
        "last_update_id": reader.last_update_id(),
        "best_bid": reader.best_bid(),
        "best_ask": reader.best_ask(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, StatusCode> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&state.registry.gather(), &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
