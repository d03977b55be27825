//! Book state for a single instrument

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PriceLevelStore, Side};

/// Synchronization state of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No snapshot requested yet
    Uninitialized,
    /// Snapshot requested, diffs are being retained
    Buffering,
    /// Snapshot applied and every later diff applied without gaps
    Synced,
    /// Sequence continuity lost, state discarded
    Desynced,
}

impl SyncStatus {
    /// Only synced data is authoritative
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Uninitialized => "uninitialized",
            SyncStatus::Buffering => "buffering",
            SyncStatus::Synced => "synced",
            SyncStatus::Desynced => "desynced",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Both sides of the book plus sequence metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookState {
    /// Bids, best (highest) first
    pub(super) bids: PriceLevelStore,
    /// Asks, best (lowest) first
    pub(super) asks: PriceLevelStore,
    /// Last applied update id, `None` before any snapshot
    pub(super) last_update_id: Option<u64>,
    /// Event time of the last applied update (milliseconds)
    pub(super) last_update_time: u64,
    sync_status: SyncStatus,
}

impl BookState {
    pub fn new() -> Self {
        Self {
            bids: PriceLevelStore::new(Side::Bid),
            asks: PriceLevelStore::new(Side::Ask),
            last_update_id: None,
            last_update_time: 0,
            sync_status: SyncStatus::Uninitialized,
        }
    }

    pub fn bids(&self) -> &PriceLevelStore {
        &self.bids
    }

    pub fn asks(&self) -> &PriceLevelStore {
        &self.asks
    }

    pub fn side(&self, side: Side) -> &PriceLevelStore {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn last_update_time(&self) -> u64 {
        self.last_update_time
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    /// Best bid and ask when the bid is strictly above the ask
    pub fn crossed(&self) -> Option<(Decimal, Decimal)> {
        match (self.bids.best_price(), self.asks.best_price()) {
            (Some(bid), Some(ask)) if bid > ask => Some((bid, ask)),
            _ => None,
        }
    }

    /// Drop every level and the sequence baseline
    pub(super) fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = None;
        self.last_update_time = 0;
    }

    // Only the sync controller drives status transitions.
    pub(super) fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }
}

impl Default for BookState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_book_is_uninitialized() {
        let book = BookState::new();
        assert_eq!(book.sync_status(), SyncStatus::Uninitialized);
        assert_eq!(book.last_update_id(), None);
        assert!(book.bids().is_empty());
        assert!(book.asks().is_empty());
    }

    #[test]
    fn test_crossed_detection() {
        let mut book = BookState::new();
        book.bids.upsert(dec!(100), dec!(1));
        book.asks.upsert(dec!(100), dec!(1));
        // Locked, not crossed
        assert_eq!(book.crossed(), None);

        book.bids.upsert(dec!(100.5), dec!(1));
        assert_eq!(book.crossed(), Some((dec!(100.5), dec!(100))));
    }

    #[test]
    fn test_clear_resets_baseline() {
        let mut book = BookState::new();
        book.bids.upsert(dec!(1), dec!(1));
        book.last_update_id = Some(9);
        book.clear();
        assert!(book.bids().is_empty());
        assert_eq!(book.last_update_id(), None);
    }

    #[test]
    fn test_sync_status_ready() {
        assert!(!SyncStatus::Uninitialized.is_synced());
        assert!(!SyncStatus::Buffering.is_synced());
        assert!(SyncStatus::Synced.is_synced());
        assert!(!SyncStatus::Desynced.is_synced());
        assert_eq!(SyncStatus::Buffering.to_string(), "buffering");
    }
}
