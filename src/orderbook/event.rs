//! Decoded update events consumed by the sync pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price level (price, quantity pair)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Full replacement of the book, tagged with the last update it includes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub last_update_id: u64,
    /// Event time in milliseconds, 0 when the source carries none (REST)
    pub event_time: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl Snapshot {
    /// Top-of-book-only replacement (bookTicker feeds).
    ///
    /// Applying it discards every level except the two given ones.
    pub fn top_of_book(update_id: u64, bid: PriceLevel, ask: PriceLevel) -> Self {
        Self {
            last_update_id: update_id,
            event_time: 0,
            bids: vec![bid],
            asks: vec![ask],
        }
    }
}

/// Incremental update covering the contiguous range `[first_update_id, last_update_id]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub first_update_id: u64,
    pub last_update_id: u64,
    pub event_time: u64,
    /// New absolute quantity per bid price; zero removes the level
    pub bids: Vec<PriceLevel>,
    /// New absolute quantity per ask price; zero removes the level
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Snapshot(Snapshot),
    Diff(Diff),
}

impl UpdateEvent {
    /// Highest update id covered by this event
    pub fn last_update_id(&self) -> u64 {
        match self {
            UpdateEvent::Snapshot(s) => s.last_update_id,
            UpdateEvent::Diff(d) => d.last_update_id,
        }
    }

    pub fn levels(&self) -> impl Iterator<Item = &PriceLevel> {
        let (bids, asks) = match self {
            UpdateEvent::Snapshot(s) => (&s.bids, &s.asks),
            UpdateEvent::Diff(d) => (&d.bids, &d.asks),
        };
        bids.iter().chain(asks.iter())
    }
}

impl From<Snapshot> for UpdateEvent {
    fn from(snapshot: Snapshot) -> Self {
        UpdateEvent::Snapshot(snapshot)
    }
}

impl From<Diff> for UpdateEvent {
    fn from(diff: Diff) -> Self {
        UpdateEvent::Diff(diff)
    }
}
