//! Snapshot/diff synchronization
//!
//! Drives the book through `Uninitialized -> Buffering -> Synced` and back
//! through `Desynced` whenever sequence continuity is lost. This is the only
//! writer of the shared [`BookState`]; every event is applied under a single
//! write lock so readers never observe a half-applied update.
//!
//! Snapshot fetching itself is left to the caller: the controller hands out a
//! [`FetchTicket`] when it needs one and accepts the result through
//! [`SyncController::on_snapshot`]. Tickets from an ended cycle are ignored.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::apply::{apply, apply_batch, validate_diff, validate_snapshot};
use super::{ApplyResult, BookReader, BookState, Diff, InvariantViolation, SequenceRule, Snapshot, SyncStatus, UpdateEvent};
use crate::metrics::SyncMetrics;

/// Default cap on diffs retained while a snapshot is outstanding
pub const DEFAULT_MAX_BUFFERED_DIFFS: usize = 10_000;

/// Tunables for the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub sequence_rule: SequenceRule,
    /// Exceeding this while buffering forces a resync
    pub max_buffered_diffs: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sequence_rule: SequenceRule::Strict,
            max_buffered_diffs: DEFAULT_MAX_BUFFERED_DIFFS,
        }
    }
}

/// Identifies the buffering cycle a snapshot fetch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    epoch: u64,
}

impl FetchTicket {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Why the book was discarded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DesyncReason {
    #[error("sequence gap: expected {expected}, got {got}")]
    Gap { expected: u64, got: u64 },

    #[error("crossed book: bid {bid} above ask {ask}")]
    CrossedBook { bid: Decimal, ask: Decimal },

    #[error("more than {limit} diffs buffered while waiting for a snapshot")]
    BufferOverflow { limit: usize },

    #[error("buffered diff rejected: {0}")]
    Invalid(InvariantViolation),
}

/// What the feed layer has to do after handing an event to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    Continue,
    /// Start a snapshot fetch for this cycle
    FetchSnapshot(FetchTicket),
    /// The fetched snapshot was unusable; fetch again after the retry delay
    RetrySnapshot(FetchTicket),
    /// State was discarded; the next diff restarts buffering
    Desynced(DesyncReason),
}

/// Single writer for one instrument's book
pub struct SyncController {
    symbol: String,
    book: Arc<RwLock<BookState>>,
    /// Diffs received while a snapshot is outstanding, in arrival order
    buffer: VecDeque<Diff>,
    settings: SyncSettings,
    epoch: u64,
    metrics: SyncMetrics,
}

impl SyncController {
    pub fn new(symbol: &str, settings: SyncSettings, metrics: SyncMetrics) -> Self {
        Self {
            symbol: symbol.to_string(),
            book: Arc::new(RwLock::new(BookState::new())),
            buffer: VecDeque::new(),
            settings,
            epoch: 0,
            metrics,
        }
    }

    /// Read handle over the book this controller writes
    pub fn reader(&self) -> BookReader {
        BookReader::new(&self.symbol, Arc::clone(&self.book))
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.book.read().sync_status()
    }

    /// Number of diffs waiting for a snapshot
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one decoded event through the state machine
    pub fn on_event(&mut self, event: UpdateEvent) -> SyncSignal {
        let status = self.sync_status();
        match event {
            UpdateEvent::Snapshot(snapshot) if status == SyncStatus::Buffering => self.resolve(snapshot),
            UpdateEvent::Snapshot(snapshot) => self.apply_live(UpdateEvent::Snapshot(snapshot)),
            UpdateEvent::Diff(diff) => match status {
                SyncStatus::Uninitialized | SyncStatus::Desynced => self.begin_buffering(diff),
                SyncStatus::Buffering => self.buffer_diff(diff),
                SyncStatus::Synced => self.apply_live(UpdateEvent::Diff(diff)),
            },
        }
    }

    /// Deliver a fetched snapshot
    pub fn on_snapshot(&mut self, ticket: FetchTicket, snapshot: Snapshot) -> SyncSignal {
        if ticket.epoch != self.epoch || self.sync_status() != SyncStatus::Buffering {
            debug!(
                symbol = %self.symbol,
                ticket_epoch = ticket.epoch,
                current_epoch = self.epoch,
                snapshot_id = snapshot.last_update_id,
                "Discarding snapshot from an ended fetch cycle"
            );
            self.metrics.late_snapshots.inc();
            return SyncSignal::Continue;
        }
        if let Err(violation) = validate_snapshot(&snapshot) {
            self.reject(&violation);
            self.metrics.snapshot_failures.inc();
            return SyncSignal::RetrySnapshot(ticket);
        }
        self.resolve(snapshot)
    }

    /// Report a failed fetch. Returns true if the ticket is still current
    /// and the caller should retry.
    pub fn on_snapshot_failed(&self, ticket: FetchTicket, error: &dyn fmt::Display) -> bool {
        let current = ticket.epoch == self.epoch && self.sync_status() == SyncStatus::Buffering;
        if current {
            self.metrics.snapshot_failures.inc();
            warn!(
                symbol = %self.symbol,
                error = %error,
                buffered = self.buffer.len(),
                "Snapshot unavailable, still buffering"
            );
        }
        current
    }

    /// Throw everything away and wait for the next diff.
    ///
    /// Used when the transport reconnects: diffs may have been lost.
    pub fn reset(&mut self) {
        {
            let mut state = self.book.write();
            state.clear();
            state.set_sync_status(SyncStatus::Uninitialized);
        }
        self.buffer.clear();
        self.metrics.buffered_diffs.set(0);
        self.epoch += 1;
        info!(symbol = %self.symbol, "Order book reset");
    }

    fn begin_buffering(&mut self, diff: Diff) -> SyncSignal {
        if let Err(violation) = validate_diff(&diff) {
            return self.reject(&violation);
        }

        {
            let mut state = self.book.write();
            if state.sync_status() == SyncStatus::Desynced {
                info!(symbol = %self.symbol, "Restarting sync after desync");
                state.set_sync_status(SyncStatus::Uninitialized);
            }
            state.clear();
            state.set_sync_status(SyncStatus::Buffering);
        }

        self.epoch += 1;
        self.buffer.clear();
        debug!(
            symbol = %self.symbol,
            first_update_id = diff.first_update_id,
            epoch = self.epoch,
            "Buffering diffs until snapshot arrives"
        );
        self.buffer.push_back(diff);
        self.metrics.buffered_diffs.set(1);

        SyncSignal::FetchSnapshot(FetchTicket { epoch: self.epoch })
    }

    fn buffer_diff(&mut self, diff: Diff) -> SyncSignal {
        if let Err(violation) = validate_diff(&diff) {
            return self.reject(&violation);
        }

        let limit = self.settings.max_buffered_diffs;
        if self.buffer.len() >= limit {
            let book = Arc::clone(&self.book);
            let mut state = book.write();
            return self.desync(&mut state, DesyncReason::BufferOverflow { limit });
        }

        trace!(
            symbol = %self.symbol,
            first_update_id = diff.first_update_id,
            last_update_id = diff.last_update_id,
            "Buffered diff"
        );
        self.buffer.push_back(diff);
        self.metrics.buffered_diffs.set(self.buffer.len() as i64);
        SyncSignal::Continue
    }

    /// Snapshot arrived while buffering: drop stale diffs, apply the
    /// snapshot, replay the rest as one batch.
    fn resolve(&mut self, snapshot: Snapshot) -> SyncSignal {
        if let Err(violation) = validate_snapshot(&snapshot) {
            return self.reject(&violation);
        }

        // The cycle ends here; any other outstanding fetch is now late.
        self.epoch += 1;

        let snapshot_id = snapshot.last_update_id;
        let buffered = self.buffer.len();
        let mut pending: Vec<Diff> = self
            .buffer
            .drain(..)
            .filter(|d| d.last_update_id > snapshot_id)
            .collect();
        pending.sort_by_key(|d| d.first_update_id);
        let dropped = buffered - pending.len();
        self.metrics.stale_dropped.inc_by(dropped as u64);
        self.metrics.buffered_diffs.set(0);

        let book = Arc::clone(&self.book);
        let mut state = book.write();

        let event = UpdateEvent::Snapshot(snapshot);
        if let Err(violation) = apply(&mut state, &event, self.settings.sequence_rule) {
            return self.desync(&mut state, DesyncReason::Invalid(violation));
        }

        match apply_batch(&mut state, &pending, self.settings.sequence_rule) {
            Ok(ApplyResult::Applied(_)) | Ok(ApplyResult::RejectedStale) => {
                if let Some((bid, ask)) = state.crossed() {
                    return self.desync(&mut state, DesyncReason::CrossedBook { bid, ask });
                }
                state.set_sync_status(SyncStatus::Synced);
                self.metrics.events_applied.inc_by(1 + pending.len() as u64);
                info!(
                    symbol = %self.symbol,
                    snapshot_id,
                    replayed = pending.len(),
                    dropped_stale = dropped,
                    last_update_id = ?state.last_update_id(),
                    "Order book synced"
                );
                SyncSignal::Continue
            }
            Ok(ApplyResult::GapDetected { expected, got }) => {
                self.desync(&mut state, DesyncReason::Gap { expected, got })
            }
            Err(violation) => self.desync(&mut state, DesyncReason::Invalid(violation)),
        }
    }

    fn apply_live(&mut self, event: UpdateEvent) -> SyncSignal {
        let book = Arc::clone(&self.book);
        let mut state = book.write();

        match apply(&mut state, &event, self.settings.sequence_rule) {
            Ok(ApplyResult::Applied(last_update_id)) => {
                if let Some((bid, ask)) = state.crossed() {
                    return self.desync(&mut state, DesyncReason::CrossedBook { bid, ask });
                }
                if !state.sync_status().is_synced() {
                    info!(symbol = %self.symbol, last_update_id, "Order book synced from snapshot event");
                    state.set_sync_status(SyncStatus::Synced);
                }
                self.metrics.events_applied.inc();
                SyncSignal::Continue
            }
            Ok(ApplyResult::RejectedStale) => {
                trace!(
                    symbol = %self.symbol,
                    update_id = event.last_update_id(),
                    last_applied = ?state.last_update_id(),
                    "Dropped stale update"
                );
                self.metrics.stale_dropped.inc();
                SyncSignal::Continue
            }
            Ok(ApplyResult::GapDetected { expected, got }) => {
                self.desync(&mut state, DesyncReason::Gap { expected, got })
            }
            Err(violation) => self.reject(&violation),
        }
    }

    fn reject(&self, violation: &InvariantViolation) -> SyncSignal {
        warn!(symbol = %self.symbol, error = %violation, "Rejected malformed update");
        self.metrics.invariant_violations.inc();
        SyncSignal::Continue
    }

    fn desync(&mut self, state: &mut BookState, reason: DesyncReason) -> SyncSignal {
        warn!(
            symbol = %self.symbol,
            reason = %reason,
            last_update_id = ?state.last_update_id(),
            "Order book desynced, discarding state"
        );
        state.clear();
        state.set_sync_status(SyncStatus::Desynced);

        self.buffer.clear();
        self.metrics.buffered_diffs.set(0);
        self.metrics.desyncs.inc();
        self.epoch += 1;

        SyncSignal::Desynced(reason)
    }
}
