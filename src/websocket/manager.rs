//! Feed manager
//!
//! Owns the sync controller for one symbol, feeds it decoded WebSocket
//! messages, runs snapshot fetches in the background and reconnects with
//! exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

use super::WebSocketClient;
use crate::config::Config;
use crate::error::{LobError, Result};
use crate::orderbook::{BookReader, FetchTicket, Snapshot, SyncController, SyncSignal, UpdateEvent};
use crate::parser::ParsedMessage;
use crate::snapshot::SnapshotProvider;

/// Cap on the backoff exponent
const MAX_BACKOFF_EXPONENT: u32 = 6;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;
const KEEPALIVE_SECS: u64 = 30;
const RECV_TIMEOUT_SECS: u64 = 45;

type FetchResult = (FetchTicket, Result<Snapshot>);

/// Reconnect delay after `attempts` consecutive failures
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempts: u32) -> Duration {
    let delay = base_ms.saturating_mul(2u64.pow(attempts.min(MAX_BACKOFF_EXPONENT)));
    Duration::from_millis(delay.min(max_ms))
}

/// Drives one symbol's book from a Binance WebSocket stream
pub struct FeedManager {
    config: Arc<Config>,
    client: WebSocketClient,
    controller: SyncController,
    provider: Arc<dyn SnapshotProvider>,
    fetch_tx: mpsc::UnboundedSender<FetchResult>,
    fetch_rx: mpsc::UnboundedReceiver<FetchResult>,
    /// Outstanding snapshot fetch, aborted when replaced or dropped
    pending_fetch: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl FeedManager {
    pub fn new(config: Arc<Config>, controller: SyncController, provider: Arc<dyn SnapshotProvider>) -> Self {
        let client = WebSocketClient::new(&config.stream_url());
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        Self {
            config,
            client,
            controller,
            provider,
            fetch_tx,
            fetch_rx,
            pending_fetch: None,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    pub fn reader(&self) -> BookReader {
        self.controller.reader()
    }

    /// Run the feed - runs indefinitely with automatic reconnection
    pub async fn run(&mut self) -> Result<()> {
        info!(symbol = %self.controller.symbol(), "Starting feed manager with infinite retry");

        loop {
            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS) && self.reconnect_attempts > 0 {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("WebSocket processing completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    self.client.close().await;
                    self.cancel_fetch();
                    self.controller.reset();
                    self.reconnect_attempts += 1;

                    let delay = backoff_delay(
                        self.config.reconnect_delay_ms,
                        self.config.max_backoff_ms,
                        self.reconnect_attempts,
                    );
                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Connect and process messages until the connection fails
    async fn connect_and_process(&mut self) -> Result<()> {
        // Anything received on a previous connection may have gaps behind it,
        // and the book must not stay synced while we are disconnected.
        self.cancel_fetch();
        self.controller.reset();

        self.client.connect().await?;

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;

        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(KEEPALIVE_SECS);
        let recv_timeout = Duration::from_secs(RECV_TIMEOUT_SECS);

        loop {
            tokio::select! {
                received = timeout(recv_timeout, self.client.recv()) => match received {
                    Ok(Ok(Some(text))) => {
                        last_message = Instant::now();
                        if let Err(e) = self.process_message(&text) {
                            warn!(error = %e, "Failed to process message");
                        }
                    }
                    Ok(Ok(None)) => {
                        if last_message.elapsed() > keepalive_timeout {
                            if let Err(e) = self.client.ping().await {
                                warn!(error = %e, "Failed to send keepalive ping");
                            }
                        }
                    }
                    Ok(Err(e)) => return Err(e),
                    Err(_) => {
                        warn!(
                            last_message_secs = last_message.elapsed().as_secs(),
                            "No message received within timeout, sending keepalive"
                        );
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                            return Err(LobError::ConnectionTimeout);
                        }
                    }
                },
                Some((ticket, result)) = self.fetch_rx.recv() => {
                    self.handle_fetch_result(ticket, result);
                }
            }
        }
    }

    /// Process a single WebSocket message
    fn process_message(&mut self, raw: &str) -> Result<()> {
        let parsed = ParsedMessage::parse(raw)?;

        if let Some(symbol) = parsed.symbol() {
            if !symbol.eq_ignore_ascii_case(self.controller.symbol()) {
                debug!(symbol = %symbol, "Ignoring message for another symbol");
                return Ok(());
            }
        }

        match parsed.into_event() {
            Some(event) => self.handle_event(event),
            None => trace!(msg = %raw, "Unknown message type"),
        }
        Ok(())
    }

    fn handle_event(&mut self, event: UpdateEvent) {
        let signal = self.controller.on_event(event);
        self.handle_signal(signal);
    }

    fn handle_signal(&mut self, signal: SyncSignal) {
        match signal {
            SyncSignal::Continue => {}
            SyncSignal::FetchSnapshot(ticket) => self.spawn_fetch(ticket, Duration::ZERO),
            SyncSignal::RetrySnapshot(ticket) => {
                let delay = Duration::from_millis(self.config.snapshot_retry_delay_ms);
                self.spawn_fetch(ticket, delay);
            }
            SyncSignal::Desynced(reason) => {
                self.cancel_fetch();
                info!(reason = %reason, "Waiting for the next diff to restart sync");
            }
        }
    }

    fn handle_fetch_result(&mut self, ticket: FetchTicket, result: Result<Snapshot>) {
        if self.pending_fetch.as_ref().is_some_and(|handle| handle.is_finished()) {
            self.pending_fetch = None;
        }

        match result {
            Ok(snapshot) => {
                let signal = self.controller.on_snapshot(ticket, snapshot);
                self.handle_signal(signal);
            }
            Err(e) => {
                if self.controller.on_snapshot_failed(ticket, &e) {
                    let delay = Duration::from_millis(self.config.snapshot_retry_delay_ms);
                    self.spawn_fetch(ticket, delay);
                }
            }
        }
    }

    fn spawn_fetch(&mut self, ticket: FetchTicket, delay: Duration) {
        self.cancel_fetch();

        let provider = Arc::clone(&self.provider);
        let tx = self.fetch_tx.clone();
        let symbol = self.controller.symbol().to_string();
        let limit = self.config.snapshot_limit;

        debug!(symbol = %symbol, epoch = ticket.epoch(), delay_ms = delay.as_millis() as u64, "Scheduling snapshot fetch");
        self.pending_fetch = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            let result = provider.fetch_snapshot(&symbol, limit).await;
            // A closed channel means the manager is gone
            let _ = tx.send((ticket, result));
        }));
    }

    fn cancel_fetch(&mut self) {
        if let Some(handle) = self.pending_fetch.take() {
            handle.abort();
        }
    }
}

impl Drop for FeedManager {
    fn drop(&mut self) {
        self.cancel_fetch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SyncMetrics;
    use crate::orderbook::{Diff, PriceLevel, SequenceRule, SyncSettings, SyncStatus};
    use crate::snapshot::MockSnapshotProvider;
    use rust_decimal_macros::dec;

    fn manager_with(provider: MockSnapshotProvider) -> FeedManager {
        manager_with_config(provider, Config::default())
    }

    fn manager_with_config(provider: MockSnapshotProvider, config: Config) -> FeedManager {
        let config = Arc::new(Config {
            snapshot_retry_delay_ms: 1,
            ..config
        });
        let settings = SyncSettings {
            sequence_rule: SequenceRule::Strict,
            max_buffered_diffs: 100,
        };
        let controller = SyncController::new(&config.symbol, settings, SyncMetrics::new().unwrap());
        FeedManager::new(config, controller, Arc::new(provider))
    }

    fn diff(first: u64, last: u64) -> UpdateEvent {
        UpdateEvent::Diff(Diff {
            first_update_id: first,
            last_update_id: last,
            event_time: 0,
            bids: vec![PriceLevel::new(dec!(99.9), dec!(1))],
            asks: vec![],
        })
    }

    fn snapshot(id: u64) -> Snapshot {
        Snapshot {
            last_update_id: id,
            event_time: 0,
            bids: vec![PriceLevel::new(dec!(100.00), dec!(2))],
            asks: vec![PriceLevel::new(dec!(100.05), dec!(3))],
        }
    }

    async fn deliver_next_fetch(manager: &mut FeedManager) {
        let (ticket, result) = manager.fetch_rx.recv().await.unwrap();
        manager.handle_fetch_result(ticket, result);
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1000, 60_000, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 60_000, 3), Duration::from_millis(8000));
        assert_eq!(backoff_delay(1000, 60_000, 20), Duration::from_millis(60_000));
    }

    #[tokio::test]
    async fn test_fetch_resolves_buffering() {
        let mut provider = MockSnapshotProvider::new();
        provider
            .expect_fetch_snapshot()
            .times(1)
            .returning(|symbol, _| {
                assert_eq!(symbol, "BTCUSDT");
                Ok(snapshot(6))
            });
        let mut manager = manager_with(provider);
        let reader = manager.reader();

        manager.handle_event(diff(5, 6));
        manager.handle_event(diff(7, 8));
        assert_eq!(reader.sync_status(), SyncStatus::Buffering);

        deliver_next_fetch(&mut manager).await;

        assert_eq!(reader.sync_status(), SyncStatus::Synced);
        assert_eq!(reader.last_update_id(), Some(8));
        assert_eq!(reader.best_bid(), Some(dec!(100.00)));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried() {
        let mut provider = MockSnapshotProvider::new();
        let mut calls = 0;
        provider.expect_fetch_snapshot().times(2).returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(LobError::SnapshotUnavailable("503 Service Unavailable".to_string()))
            } else {
                Ok(snapshot(6))
            }
        });
        let mut manager = manager_with(provider);
        let reader = manager.reader();

        manager.handle_event(diff(7, 8));
        deliver_next_fetch(&mut manager).await;
        assert_eq!(reader.sync_status(), SyncStatus::Buffering);

        deliver_next_fetch(&mut manager).await;
        assert_eq!(reader.sync_status(), SyncStatus::Synced);
        assert_eq!(reader.last_update_id(), Some(8));
    }

    #[tokio::test]
    async fn test_snapshot_after_reset_is_discarded() {
        let mut provider = MockSnapshotProvider::new();
        provider.expect_fetch_snapshot().returning(|_, _| Ok(snapshot(6)));
        let mut manager = manager_with(provider);
        let reader = manager.reader();

        manager.handle_event(diff(7, 8));
        let (ticket, result) = manager.fetch_rx.recv().await.unwrap();
        manager.controller.reset();
        manager.handle_fetch_result(ticket, result);

        assert_eq!(reader.sync_status(), SyncStatus::Uninitialized);
        assert_eq!(reader.last_update_id(), None);
    }

    #[tokio::test]
    async fn test_failed_reconnect_drops_synced_book() {
        let mut manager = manager_with_config(
            MockSnapshotProvider::new(),
            Config {
                ws_endpoint: "ws://127.0.0.1:1".to_string(),
                ..Config::default()
            },
        );
        let raw = r#"{"u":42,"s":"BTCUSDT","b":"100.00","B":"10.0","a":"100.10","A":"5.0"}"#;
        manager.process_message(raw).unwrap();
        let reader = manager.reader();
        assert_eq!(reader.sync_status(), SyncStatus::Synced);

        assert!(manager.connect_and_process().await.is_err());

        assert_eq!(reader.sync_status(), SyncStatus::Uninitialized);
        assert_eq!(reader.best_bid(), None);
        assert!(!reader.view(5).is_authoritative());
    }

    #[tokio::test]
    async fn test_malformed_snapshot_is_refetched_after_delay() {
        let mut provider = MockSnapshotProvider::new();
        let mut calls = 0;
        provider.expect_fetch_snapshot().times(2).returning(move |_, _| {
            calls += 1;
            let mut snap = snapshot(6);
            if calls == 1 {
                snap.asks[0].quantity = dec!(-3);
            }
            Ok(snap)
        });
        let mut manager = manager_with(provider);
        let reader = manager.reader();

        manager.handle_event(diff(7, 8));
        deliver_next_fetch(&mut manager).await;
        assert_eq!(reader.sync_status(), SyncStatus::Buffering);
        assert!(manager.pending_fetch.is_some());

        deliver_next_fetch(&mut manager).await;
        assert_eq!(reader.sync_status(), SyncStatus::Synced);
        assert_eq!(reader.last_update_id(), Some(8));
    }

    #[test]
    fn test_messages_for_other_symbols_are_ignored() {
        let mut manager = manager_with(MockSnapshotProvider::new());
        let raw = r#"{"u":1,"s":"ETHUSDT","b":"10.0","B":"1.0","a":"10.1","A":"1.0"}"#;

        manager.process_message(raw).unwrap();

        assert_eq!(manager.reader().sync_status(), SyncStatus::Uninitialized);
    }

    #[test]
    fn test_book_ticker_message_syncs_without_fetch() {
        let mut manager = manager_with(MockSnapshotProvider::new());
        let raw = r#"{"u":42,"s":"BTCUSDT","b":"100.00","B":"10.0","a":"100.10","A":"5.0"}"#;

        manager.process_message(raw).unwrap();

        let reader = manager.reader();
        assert_eq!(reader.sync_status(), SyncStatus::Synced);
        assert_eq!(reader.spread(), Some(dec!(0.10)));
        assert!(manager.pending_fetch.is_none());
    }
}
