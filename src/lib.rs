//! Limit order book reconstruction library
//!
//! Rebuilds a single instrument's order book from Binance snapshots and
//! sequenced depth diffs, and serves consistent read queries over it while
//! the feed keeps writing.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod snapshot;
pub mod websocket;

pub use config::{Config, StreamKind};
pub use error::{LobError, Result};
pub use metrics::SyncMetrics;
pub use orderbook::{
    BookReader, BookState, BookView, PriceLevel, PriceLevelStore, Side, Snapshot, SyncController, SyncSettings,
    SyncSignal, SyncStatus, UpdateEvent,
};
pub use parser::{BookTicker, DepthUpdate, OrderBookSnapshot, ParsedMessage};
pub use snapshot::{RestSnapshotProvider, SnapshotProvider};
pub use websocket::{FeedManager, WebSocketClient};

/// Application state shared with the health server
pub struct AppState {
    pub reader: BookReader,
    pub registry: prometheus::Registry,
    pub config: Arc<Config>,
}
