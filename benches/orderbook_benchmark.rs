//! Benchmarks for order book operations

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use lob_sync::orderbook::{apply, apply_batch, Diff, SequenceRule};
use lob_sync::{BookState, PriceLevel, PriceLevelStore, Side, Snapshot, SyncController, SyncMetrics, SyncSettings, UpdateEvent};
use rust_decimal::Decimal;
use std::str::FromStr;

fn create_snapshot(levels: usize) -> Snapshot {
    let quantity = Decimal::from_str("1.5").unwrap();
    Snapshot {
        last_update_id: 1000,
        event_time: 1672531200000,
        bids: (0..levels)
            .map(|i| PriceLevel::new(Decimal::from(50000 - i as i64), quantity))
            .collect(),
        asks: (0..levels)
            .map(|i| PriceLevel::new(Decimal::from(50001 + i as i64), quantity))
            .collect(),
    }
}

fn create_diff(first: u64) -> Diff {
    Diff {
        first_update_id: first,
        last_update_id: first,
        event_time: 1672531200000,
        bids: vec![PriceLevel::new(Decimal::from(49999), Decimal::from_str("2.0").unwrap())],
        asks: vec![PriceLevel::new(Decimal::from(50002), Decimal::from_str("2.5").unwrap())],
    }
}

fn benchmark_store(c: &mut Criterion) {
    c.bench_function("store_upsert_1000_levels", |b| {
        b.iter(|| {
            let mut store = PriceLevelStore::new(Side::Bid);
            for i in 0..1000i64 {
                store.upsert(black_box(Decimal::from(50000 - i)), Decimal::ONE);
            }
            store
        })
    });

    let mut store = PriceLevelStore::new(Side::Ask);
    for i in 0..1000i64 {
        store.upsert(Decimal::from(50001 + i), Decimal::ONE);
    }
    c.bench_function("store_top_20", |b| b.iter(|| black_box(store.top_n(20))));
}

fn benchmark_apply(c: &mut Criterion) {
    let snapshot = UpdateEvent::Snapshot(create_snapshot(100));

    c.bench_function("apply_snapshot_100_levels", |b| {
        b.iter(|| {
            let mut book = BookState::default();
            apply(&mut book, black_box(&snapshot), SequenceRule::Strict).unwrap()
        })
    });

    let diffs: Vec<Diff> = (1001..1101).map(create_diff).collect();
    c.bench_function("apply_batch_100_diffs", |b| {
        b.iter_batched(
            || {
                let mut book = BookState::default();
                apply(&mut book, &snapshot, SequenceRule::Strict).unwrap();
                book
            },
            |mut book| apply_batch(&mut book, black_box(&diffs), SequenceRule::Strict).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

fn benchmark_queries(c: &mut Criterion) {
    let mut sync = SyncController::new("BTCUSDT", SyncSettings::default(), SyncMetrics::new().unwrap());
    sync.on_event(UpdateEvent::Snapshot(create_snapshot(100)));
    let reader = sync.reader();

    c.bench_function("reader_best_bid", |b| b.iter(|| black_box(reader.best_bid())));
    c.bench_function("reader_spread", |b| b.iter(|| black_box(reader.spread())));
    c.bench_function("reader_top_of_book_10", |b| b.iter(|| black_box(reader.top_of_book(10))));
    c.bench_function("reader_view_20", |b| b.iter(|| black_box(reader.view(20))));
}

criterion_group!(benches, benchmark_store, benchmark_apply, benchmark_queries);
criterion_main!(benches);
