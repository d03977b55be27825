//! Configuration module for the order book feed

use serde::Deserialize;

use crate::error::{LobError, Result};
use crate::orderbook::{SequenceRule, SyncSettings, DEFAULT_MAX_BUFFERED_DIFFS};

/// Which Binance stream feeds the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// `<symbol>@depth@100ms` diffs plus REST snapshots
    Depth,
    /// `<symbol>@bookTicker`, top of book only
    BookTicker,
}

impl StreamKind {
    /// Stream name suffix as used in the WebSocket path
    pub fn stream_name(&self) -> &'static str {
        match self {
            StreamKind::Depth => "depth@100ms",
            StreamKind::BookTicker => "bookTicker",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Instrument to track (e.g., "BTCUSDT")
    pub symbol: String,

    pub stream: StreamKind,

    /// WebSocket endpoint for Binance market data
    pub ws_endpoint: String,

    /// REST API endpoint for snapshots
    pub rest_endpoint: String,

    /// Levels requested per REST snapshot
    pub snapshot_limit: usize,

    /// Diffs retained while a snapshot is outstanding before forcing a resync
    pub max_buffered_diffs: usize,

    pub sequence_rule: SequenceRule,

    /// Reconnection settings
    pub reconnect_delay_ms: u64,
    pub max_backoff_ms: u64,

    /// Delay before retrying a failed snapshot fetch
    pub snapshot_retry_delay_ms: u64,

    /// Status log interval in seconds
    pub status_interval_secs: u64,

    /// Port of the health/metrics HTTP server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from `LOB_*` environment variables (and `.env`)
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("symbol", defaults.symbol)?
            .set_default("stream", "depth")?
            .set_default("ws_endpoint", defaults.ws_endpoint)?
            .set_default("rest_endpoint", defaults.rest_endpoint)?
            .set_default("snapshot_limit", defaults.snapshot_limit as i64)?
            .set_default("max_buffered_diffs", defaults.max_buffered_diffs as i64)?
            .set_default("sequence_rule", "bridging")?
            .set_default("reconnect_delay_ms", defaults.reconnect_delay_ms as i64)?
            .set_default("max_backoff_ms", defaults.max_backoff_ms as i64)?
            .set_default("snapshot_retry_delay_ms", defaults.snapshot_retry_delay_ms as i64)?
            .set_default("status_interval_secs", defaults.status_interval_secs as i64)?
            .set_default("health_port", i64::from(defaults.health_port))?
            .add_source(config::Environment::with_prefix("LOB"))
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.symbol = config.symbol.trim().to_uppercase();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(LobError::ConfigError("symbol must not be empty".to_string()));
        }
        if self.max_buffered_diffs == 0 {
            return Err(LobError::ConfigError("max_buffered_diffs must be positive".to_string()));
        }
        if self.snapshot_limit == 0 {
            return Err(LobError::ConfigError("snapshot_limit must be positive".to_string()));
        }
        Ok(())
    }

    /// Settings for the sync controller
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            sequence_rule: self.sequence_rule,
            max_buffered_diffs: self.max_buffered_diffs,
        }
    }

    /// Full stream URL for the configured symbol
    pub fn stream_url(&self) -> String {
        format!(
            "{}/ws/{}@{}",
            self.ws_endpoint.trim_end_matches('/'),
            self.symbol.to_lowercase(),
            self.stream.stream_name()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            stream: StreamKind::Depth,
            ws_endpoint: "wss://data-stream.binance.vision".to_string(),
            rest_endpoint: "https://api.binance.com/api/v3".to_string(),
            snapshot_limit: 1000,
            max_buffered_diffs: DEFAULT_MAX_BUFFERED_DIFFS,
            sequence_rule: SequenceRule::Bridging,
            reconnect_delay_ms: 1000,
            max_backoff_ms: 60_000,
            snapshot_retry_delay_ms: 1000,
            status_interval_secs: 30,
            health_port: 9090,
        }
    }
}
