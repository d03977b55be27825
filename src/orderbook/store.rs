//! Sorted price level storage for one side of the book
//!
//! Uses BTreeMap so best-price lookup, insert and delete are all O(log n).

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::{PriceLevel, Side};

/// Price -> resting quantity for a single side.
///
/// Never holds a zero quantity: upserting zero removes the level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevelStore {
    side: Side,
    levels: BTreeMap<Decimal, Decimal>,
}

impl PriceLevelStore {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// Insert, overwrite, or (for zero quantity) remove a level
    pub fn upsert(&mut self, price: Decimal, quantity: Decimal) {
        if quantity.is_zero() {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, quantity);
        }
    }

    /// Highest bid or lowest ask
    pub fn best_price(&self) -> Option<Decimal> {
        self.best_level().map(|level| level.price)
    }

    pub fn best_level(&self) -> Option<PriceLevel> {
        let entry = match self.side {
            Side::Bid => self.levels.last_key_value(),
            Side::Ask => self.levels.first_key_value(),
        };
        entry.map(|(p, q)| PriceLevel::new(*p, *q))
    }

    /// Resting quantity at `price`, zero when absent
    pub fn quantity_at(&self, price: Decimal) -> Decimal {
        self.levels.get(&price).copied().unwrap_or(Decimal::ZERO)
    }

    /// The `n` best levels in book order
    pub fn top_n(&self, n: usize) -> Vec<PriceLevel> {
        self.iter().take(n).collect()
    }

    /// All levels in book order (best first)
    pub fn iter(&self) -> Box<dyn Iterator<Item = PriceLevel> + '_> {
        let levels = self.levels.iter().map(|(p, q)| PriceLevel::new(*p, *q));
        match self.side {
            Side::Bid => Box::new(levels.rev()),
            Side::Ask => Box::new(levels),
        }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}
