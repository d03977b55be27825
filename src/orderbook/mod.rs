//! Order book module
//!
//! Reconstructs a single instrument's book from snapshots and sequenced diffs.

mod apply;
mod book;
mod event;
mod query;
mod store;
mod sync;

pub use apply::{apply, apply_batch, check_sequence, validate, ApplyResult, Continuity, InvariantViolation, SequenceRule};
pub use book::{BookState, SyncStatus};
pub use event::{Diff, PriceLevel, Snapshot, UpdateEvent};
pub use query::{BookReader, BookView, Depth};
pub use store::PriceLevelStore;
pub use sync::{DesyncReason, FetchTicket, SyncController, SyncSettings, SyncSignal, DEFAULT_MAX_BUFFERED_DIFFS};

use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Bid,
    Ask,
}
