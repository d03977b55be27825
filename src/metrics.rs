//! Prometheus counters for the sync pipeline

use prometheus::{IntCounter, IntGauge, Registry};

/// Counters for every outcome the sync controller can produce.
///
/// Cloning shares the underlying counters.
#[derive(Clone)]
pub struct SyncMetrics {
    pub events_applied: IntCounter,
    pub stale_dropped: IntCounter,
    pub desyncs: IntCounter,
    pub invariant_violations: IntCounter,
    pub snapshot_failures: IntCounter,
    pub late_snapshots: IntCounter,
    pub buffered_diffs: IntGauge,
}

impl SyncMetrics {
    pub fn new() -> prometheus::Result<Self> {
        Ok(Self {
            events_applied: IntCounter::new("lob_events_applied_total", "Update events applied to the book")?,
            stale_dropped: IntCounter::new("lob_stale_dropped_total", "Diffs dropped as stale")?,
            desyncs: IntCounter::new("lob_desyncs_total", "Desyncs (gaps, crossed books, buffer overflow)")?,
            invariant_violations: IntCounter::new(
                "lob_invariant_violations_total",
                "Events rejected for malformed data",
            )?,
            snapshot_failures: IntCounter::new("lob_snapshot_failures_total", "Failed snapshot fetches")?,
            late_snapshots: IntCounter::new(
                "lob_late_snapshots_total",
                "Snapshots discarded because their fetch cycle had ended",
            )?,
            buffered_diffs: IntGauge::new("lob_buffered_diffs", "Diffs retained while waiting for a snapshot")?,
        })
    }

    /// Register every collector with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.events_applied.clone()))?;
        registry.register(Box::new(self.stale_dropped.clone()))?;
        registry.register(Box::new(self.desyncs.clone()))?;
        registry.register(Box::new(self.invariant_violations.clone()))?;
        registry.register(Box::new(self.snapshot_failures.clone()))?;
        registry.register(Box::new(self.late_snapshots.clone()))?;
        registry.register(Box::new(self.buffered_diffs.clone()))?;
        Ok(())
    }
}
