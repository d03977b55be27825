//! Update application
//!
//! Turns decoded update events into book mutations. Sequence validation
//! always happens before any level is touched, so an event is either
//! applied completely or not at all.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BookState, Diff, PriceLevel, Snapshot, UpdateEvent};

/// How a diff's `first_update_id` must relate to the last applied id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceRule {
    /// `first == last_applied + 1`
    #[default]
    Strict,
    /// `first <= last_applied + 1 <= last` (Binance spot: the first diff
    /// after a snapshot may straddle the snapshot id)
    Bridging,
}

/// Relation between an incoming range and the last applied id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    Contiguous,
    Stale,
    Gap { expected: u64, got: u64 },
}

/// Outcome of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// Applied; carries the new last update id
    Applied(u64),
    /// Range entirely at or before the last applied id, dropped
    RejectedStale,
    /// Sequence discontinuity, nothing was mutated
    GapDetected { expected: u64, got: u64 },
}

/// Malformed event data. The event is rejected, the book is untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("negative quantity {quantity} at price {price}")]
    NegativeQuantity { price: Decimal, quantity: Decimal },

    #[error("non-positive price {price}")]
    NonPositivePrice { price: Decimal },

    #[error("inverted update range [{first}, {last}]")]
    InvertedRange { first: u64, last: u64 },

    #[error("diff [{first}, {last}] has no snapshot baseline")]
    NoBaseline { first: u64, last: u64 },
}

/// The single place where update id ranges are compared.
pub fn check_sequence(rule: SequenceRule, last_applied: u64, first: u64, last: u64) -> Continuity {
    if last <= last_applied {
        return Continuity::Stale;
    }

    let expected = last_applied.saturating_add(1);
    let contiguous = match rule {
        SequenceRule::Strict => first == expected,
        // last >= expected already holds here
        SequenceRule::Bridging => first <= expected,
    };

    if contiguous {
        Continuity::Contiguous
    } else {
        Continuity::Gap {
            expected,
            got: first,
        }
    }
}

/// Validate level data and, for diffs, the range shape
pub fn validate(event: &UpdateEvent) -> Result<(), InvariantViolation> {
    if let UpdateEvent::Diff(diff) = event {
        validate_range(diff)?;
    }
    event.levels().try_for_each(validate_level)
}

pub(crate) fn validate_diff(diff: &Diff) -> Result<(), InvariantViolation> {
    validate_range(diff)?;
    diff.bids.iter().chain(diff.asks.iter()).try_for_each(validate_level)
}

pub(crate) fn validate_snapshot(snapshot: &Snapshot) -> Result<(), InvariantViolation> {
    snapshot.bids.iter().chain(snapshot.asks.iter()).try_for_each(validate_level)
}

fn validate_range(diff: &Diff) -> Result<(), InvariantViolation> {
    if diff.first_update_id > diff.last_update_id {
        return Err(InvariantViolation::InvertedRange {
            first: diff.first_update_id,
            last: diff.last_update_id,
        });
    }
    Ok(())
}

fn validate_level(level: &PriceLevel) -> Result<(), InvariantViolation> {
    if level.price <= Decimal::ZERO {
        return Err(InvariantViolation::NonPositivePrice { price: level.price });
    }
    if level.quantity < Decimal::ZERO {
        return Err(InvariantViolation::NegativeQuantity {
            price: level.price,
            quantity: level.quantity,
        });
    }
    Ok(())
}

/// Apply one event to the book.
///
/// Snapshots replace everything unconditionally. Diffs are checked against
/// the last applied id first and only then written level by level.
/// Sync status is left alone; that belongs to the controller.
pub fn apply(
    state: &mut BookState,
    event: &UpdateEvent,
    rule: SequenceRule,
) -> Result<ApplyResult, InvariantViolation> {
    validate(event)?;

    match event {
        UpdateEvent::Snapshot(snapshot) => {
            replace(state, snapshot);
            Ok(ApplyResult::Applied(snapshot.last_update_id))
        }
        UpdateEvent::Diff(diff) => {
            let last_applied = state.last_update_id.ok_or(InvariantViolation::NoBaseline {
                first: diff.first_update_id,
                last: diff.last_update_id,
            })?;

            match check_sequence(rule, last_applied, diff.first_update_id, diff.last_update_id) {
                Continuity::Stale => Ok(ApplyResult::RejectedStale),
                Continuity::Gap { expected, got } => Ok(ApplyResult::GapDetected { expected, got }),
                Continuity::Contiguous => {
                    write_diff(state, diff);
                    Ok(ApplyResult::Applied(diff.last_update_id))
                }
            }
        }
    }
}

/// Apply a chain of diffs as one unit.
///
/// The whole chain is validated before the first level is written. Stale
/// diffs inside the chain are skipped. On a gap nothing is mutated.
/// Returns `RejectedStale` only when every diff in a non-empty chain was stale.
pub fn apply_batch<'a, I>(
    state: &mut BookState,
    diffs: I,
    rule: SequenceRule,
) -> Result<ApplyResult, InvariantViolation>
where
    I: IntoIterator<Item = &'a Diff>,
{
    let diffs: Vec<&Diff> = diffs.into_iter().collect();
    let Some(baseline) = state.last_update_id else {
        let (first, last) = diffs
            .first()
            .map_or((0, 0), |d| (d.first_update_id, d.last_update_id));
        return Err(InvariantViolation::NoBaseline { first, last });
    };

    let mut cursor = baseline;
    let mut accepted = Vec::with_capacity(diffs.len());
    for diff in &diffs {
        validate_diff(diff)?;
        match check_sequence(rule, cursor, diff.first_update_id, diff.last_update_id) {
            Continuity::Stale => continue,
            Continuity::Gap { expected, got } => {
                return Ok(ApplyResult::GapDetected { expected, got });
            }
            Continuity::Contiguous => {
                cursor = diff.last_update_id;
                accepted.push(*diff);
            }
        }
    }

    if accepted.is_empty() && !diffs.is_empty() {
        return Ok(ApplyResult::RejectedStale);
    }

    for diff in accepted {
        write_diff(state, diff);
    }
    Ok(ApplyResult::Applied(cursor))
}

fn replace(state: &mut BookState, snapshot: &Snapshot) {
    state.bids.clear();
    state.asks.clear();

    for level in &snapshot.bids {
        state.bids.upsert(level.price, level.quantity);
    }
    for level in &snapshot.asks {
        state.asks.upsert(level.price, level.quantity);
    }

    state.last_update_id = Some(snapshot.last_update_id);
    state.last_update_time = snapshot.event_time;
}

fn write_diff(state: &mut BookState, diff: &Diff) {
    for level in &diff.bids {
        state.bids.upsert(level.price, level.quantity);
    }
    for level in &diff.asks {
        state.asks.upsert(level.price, level.quantity);
    }

    state.last_update_id = Some(diff.last_update_id);
    state.last_update_time = diff.event_time;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, quantity: Decimal) -> PriceLevel {
        PriceLevel::new(price, quantity)
    }

    fn snapshot(id: u64) -> UpdateEvent {
        UpdateEvent::Snapshot(Snapshot {
            last_update_id: id,
            event_time: 0,
            bids: vec![level(dec!(50000), dec!(1.0)), level(dec!(49999), dec!(2.0))],
            asks: vec![level(dec!(50001), dec!(1.5)), level(dec!(50002), dec!(2.5))],
        })
    }

    fn diff(first: u64, last: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Diff {
        Diff {
            first_update_id: first,
            last_update_id: last,
            event_time: last * 10,
            bids,
            asks,
        }
    }

    fn synced_book(id: u64) -> BookState {
        let mut book = BookState::new();
        apply(&mut book, &snapshot(id), SequenceRule::Strict).unwrap();
        book
    }

    #[test]
    fn test_check_sequence_strict() {
        assert_eq!(check_sequence(SequenceRule::Strict, 100, 101, 105), Continuity::Contiguous);
        assert_eq!(
            check_sequence(SequenceRule::Strict, 100, 102, 105),
            Continuity::Gap { expected: 101, got: 102 }
        );
        assert_eq!(check_sequence(SequenceRule::Strict, 100, 90, 100), Continuity::Stale);
        // Straddling is a discontinuity under the strict rule
        assert_eq!(
            check_sequence(SequenceRule::Strict, 100, 99, 103),
            Continuity::Gap { expected: 101, got: 99 }
        );
    }

    #[test]
    fn test_check_sequence_bridging() {
        assert_eq!(check_sequence(SequenceRule::Bridging, 100, 95, 103), Continuity::Contiguous);
        assert_eq!(check_sequence(SequenceRule::Bridging, 100, 101, 101), Continuity::Contiguous);
        assert_eq!(check_sequence(SequenceRule::Bridging, 100, 95, 100), Continuity::Stale);
        assert_eq!(
            check_sequence(SequenceRule::Bridging, 100, 102, 110),
            Continuity::Gap { expected: 101, got: 102 }
        );
    }

    #[test]
    fn test_snapshot_replaces_everything() {
        let mut book = synced_book(100);
        let top = Snapshot::top_of_book(7, level(dec!(100.00), dec!(2)), level(dec!(100.05), dec!(3)));

        let result = apply(&mut book, &UpdateEvent::Snapshot(top), SequenceRule::Strict).unwrap();

        assert_eq!(result, ApplyResult::Applied(7));
        assert_eq!(book.bids().len(), 1);
        assert_eq!(book.asks().len(), 1);
        assert_eq!(book.bids().best_price(), Some(dec!(100.00)));
        assert_eq!(book.last_update_id(), Some(7));
    }

    #[test]
    fn test_apply_contiguous_diff() {
        let mut book = synced_book(100);
        let update = diff(
            101,
            102,
            vec![level(dec!(50000), dec!(2.0))],
            vec![level(dec!(50001), dec!(0))],
        );

        let result = apply(&mut book, &update.into(), SequenceRule::Strict).unwrap();

        assert_eq!(result, ApplyResult::Applied(102));
        assert_eq!(book.last_update_id(), Some(102));
        assert_eq!(book.last_update_time(), 1020);
        assert_eq!(book.bids().quantity_at(dec!(50000)), dec!(2.0));
        assert_eq!(book.asks().best_price(), Some(dec!(50002)));
    }

    #[test]
    fn test_gap_leaves_book_untouched() {
        let mut book = synced_book(100);
        let before = book.clone();
        let update = diff(102, 103, vec![level(dec!(1), dec!(1))], vec![]);

        let result = apply(&mut book, &update.into(), SequenceRule::Strict).unwrap();

        assert_eq!(result, ApplyResult::GapDetected { expected: 101, got: 102 });
        assert_eq!(book, before);
    }

    #[test]
    fn test_stale_diff_dropped() {
        let mut book = synced_book(100);
        let before = book.clone();
        let update = diff(95, 100, vec![level(dec!(1), dec!(1))], vec![]);

        let result = apply(&mut book, &update.into(), SequenceRule::Strict).unwrap();

        assert_eq!(result, ApplyResult::RejectedStale);
        assert_eq!(book, before);
    }

    #[test]
    fn test_invariant_violations_rejected_before_mutation() {
        let mut book = synced_book(100);
        let before = book.clone();

        let negative = diff(
            101,
            101,
            vec![level(dec!(49000), dec!(1))],
            vec![level(dec!(50010), dec!(-1))],
        );
        assert!(matches!(
            apply(&mut book, &negative.into(), SequenceRule::Strict),
            Err(InvariantViolation::NegativeQuantity { .. })
        ));

        let zero_price = diff(101, 101, vec![level(dec!(0), dec!(1))], vec![]);
        assert!(matches!(
            apply(&mut book, &zero_price.into(), SequenceRule::Strict),
            Err(InvariantViolation::NonPositivePrice { .. })
        ));

        let inverted = diff(105, 101, vec![], vec![]);
        assert_eq!(
            apply(&mut book, &inverted.into(), SequenceRule::Strict),
            Err(InvariantViolation::InvertedRange { first: 105, last: 101 })
        );

        assert_eq!(book, before);
    }

    #[test]
    fn test_diff_without_baseline() {
        let mut book = BookState::new();
        let update = diff(1, 2, vec![], vec![]);
        assert_eq!(
            apply(&mut book, &update.into(), SequenceRule::Strict),
            Err(InvariantViolation::NoBaseline { first: 1, last: 2 })
        );
    }

    #[test]
    fn test_batch_skips_stale_and_applies_rest() {
        let mut book = synced_book(6);
        let diffs = vec![
            diff(5, 6, vec![level(dec!(1), dec!(9))], vec![]),
            diff(7, 8, vec![level(dec!(49998), dec!(4))], vec![]),
        ];

        let result = apply_batch(&mut book, &diffs, SequenceRule::Strict).unwrap();

        assert_eq!(result, ApplyResult::Applied(8));
        assert_eq!(book.bids().quantity_at(dec!(1)), Decimal::ZERO);
        assert_eq!(book.bids().quantity_at(dec!(49998)), dec!(4));
    }

    #[test]
    fn test_batch_gap_mutates_nothing() {
        let mut book = synced_book(6);
        let before = book.clone();
        let diffs = vec![
            diff(7, 8, vec![level(dec!(49998), dec!(4))], vec![]),
            diff(10, 11, vec![level(dec!(49997), dec!(4))], vec![]),
        ];

        let result = apply_batch(&mut book, &diffs, SequenceRule::Strict).unwrap();

        assert_eq!(result, ApplyResult::GapDetected { expected: 9, got: 10 });
        assert_eq!(book, before);
    }
}
