//! Point-in-time snapshot providers

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use crate::error::{LobError, Result};
use crate::orderbook::Snapshot;
use crate::parser::OrderBookSnapshot;

/// Source of full book snapshots.
///
/// Failures surface as [`LobError::SnapshotUnavailable`]; retrying is up to
/// the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &str, limit: usize) -> Result<Snapshot>;
}

/// Binance REST `/depth` snapshots
pub struct RestSnapshotProvider {
    client: reqwest::Client,
    rest_endpoint: String,
}

impl RestSnapshotProvider {
    pub fn new(rest_endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            rest_endpoint: rest_endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn depth_url(&self, symbol: &str, limit: usize) -> String {
        format!("{}/depth?symbol={}&limit={}", self.rest_endpoint, symbol, limit)
    }
}

#[async_trait]
impl SnapshotProvider for RestSnapshotProvider {
    async fn fetch_snapshot(&self, symbol: &str, limit: usize) -> Result<Snapshot> {
        let url = self.depth_url(symbol, limit);
        info!(symbol = %symbol, url = %url, "Fetching order book snapshot");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LobError::SnapshotUnavailable(format!("{} returned {}", url, status)));
        }

        let snapshot = response.json::<OrderBookSnapshot>().await?;
        Ok(snapshot.into())
    }
}
