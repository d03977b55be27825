//! Read-only queries over the shared book
//!
//! Every query takes one read lock, so it sees the book either before or
//! after an update, never in between. Point queries return `None` unless the
//! book is synced; [`BookReader::view`] always answers but carries the status.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{BookState, PriceLevel, Side, SyncStatus};

/// Top levels of both sides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Depth {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Book state for publishing, marked with its sync status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookView {
    pub symbol: String,
    pub status: SyncStatus,
    pub timestamp: u64,
    pub last_update_id: Option<u64>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl BookView {
    /// Only synced views may be acted on
    pub fn is_authoritative(&self) -> bool {
        self.status.is_synced()
    }
}

/// Cloneable read handle, safe to use from any thread
#[derive(Debug, Clone)]
pub struct BookReader {
    symbol: Arc<str>,
    book: Arc<RwLock<BookState>>,
}

impl BookReader {
    pub(super) fn new(symbol: &str, book: Arc<RwLock<BookState>>) -> Self {
        Self {
            symbol: Arc::from(symbol),
            book,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.book.read().sync_status()
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.book.read().last_update_id()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.synced(|book| book.bids().best_price())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.synced(|book| book.asks().best_price())
    }

    /// Best ask minus best bid
    pub fn spread(&self) -> Option<Decimal> {
        self.synced(|book| Some(book.asks().best_price()? - book.bids().best_price()?))
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        self.synced(|book| {
            let (bid, ask) = (book.bids().best_price()?, book.asks().best_price()?);
            Some((bid + ask) / Decimal::from(2))
        })
    }

    /// Resting quantity at `price`; zero when the level is absent
    pub fn depth(&self, price: Decimal, side: Side) -> Option<Decimal> {
        self.synced(|book| Some(book.side(side).quantity_at(price)))
    }

    /// The `n` best levels of each side
    pub fn top_of_book(&self, n: usize) -> Option<Depth> {
        self.synced(|book| {
            Some(Depth {
                bids: book.bids().top_n(n),
                asks: book.asks().top_n(n),
            })
        })
    }

    /// Status-marked view of the top `n` levels, available in every state
    pub fn view(&self, n: usize) -> BookView {
        let book = self.book.read();
        BookView {
            symbol: self.symbol.to_string(),
            status: book.sync_status(),
            timestamp: book.last_update_time(),
            last_update_id: book.last_update_id(),
            bids: book.bids().top_n(n),
            asks: book.asks().top_n(n),
        }
    }

    fn synced<T>(&self, query: impl FnOnce(&BookState) -> Option<T>) -> Option<T> {
        let book = self.book.read();
        if !book.sync_status().is_synced() {
            return None;
        }
        query(&*book)
    }
}
