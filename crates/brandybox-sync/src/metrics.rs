//! Prometheus metrics for the sync engine
//!
//! Counters and gauges for cycles, transfers, deletions and conflicts,
//! registered under the `brandybox` namespace.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Registry holding every engine metric
pub struct SyncMetrics {
    registry: Registry,
    /// Counter: cycles by outcome (synced, warning, error)
    pub cycles_total: IntCounterVec,
    /// Counter: file transfers by (direction, result)
    pub transfers_total: IntCounterVec,
    /// Counter: bytes moved by direction (upload, download)
    pub bytes_total: IntCounterVec,
    /// Counter: deletions by (side, result)
    pub deletions_total: IntCounterVec,
    /// Counter: paths skipped because of a conflict
    pub conflicts_total: IntCounter,
    /// Gauge: entries in the verified state
    pub tracked_entries: IntGauge,
    /// Histogram: cycle wall time in seconds, by outcome
    pub cycle_duration_seconds: HistogramVec,
}

impl SyncMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("brandybox".to_string()), None)?;

        let cycles_total = IntCounterVec::new(
            Opts::new("sync_cycles_total", "Sync cycles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let transfers_total = IntCounterVec::new(
            Opts::new("transfers_total", "File transfers by direction and result"),
            &["direction", "result"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let bytes_total = IntCounterVec::new(
            Opts::new("transfer_bytes_total", "Bytes transferred by direction"),
            &["direction"],
        )?;
        registry.register(Box::new(bytes_total.clone()))?;

        let deletions_total = IntCounterVec::new(
            Opts::new("deletions_total", "Deletions by side and result"),
            &["side", "result"],
        )?;
        registry.register(Box::new(deletions_total.clone()))?;

        let conflicts_total =
            IntCounter::with_opts(Opts::new("conflicts_total", "Paths skipped as conflicts"))?;
        registry.register(Box::new(conflicts_total.clone()))?;

        let tracked_entries = IntGauge::with_opts(Opts::new(
            "tracked_entries",
            "Entries in the verified sync state",
        ))?;
        registry.register(Box::new(tracked_entries.clone()))?;

        let cycle_duration_seconds = HistogramVec::new(
            HistogramOpts::new("sync_cycle_duration_seconds", "Sync cycle duration in seconds")
                .buckets(vec![0.5, 2.0, 10.0, 60.0, 300.0, f64::INFINITY]),
            &["outcome"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            transfers_total,
            bytes_total,
            deletions_total,
            conflicts_total,
            tracked_entries,
            cycle_duration_seconds,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    pub fn record_cycle(&self, outcome: &str, duration_secs: f64) {
        self.cycles_total.with_label_values(&[outcome]).inc();
        self.cycle_duration_seconds
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn record_transfer(&self, direction: &str, result: &str) {
        self.transfers_total
            .with_label_values(&[direction, result])
            .inc();
    }

    pub fn record_bytes(&self, direction: &str, bytes: u64) {
        self.bytes_total.with_label_values(&[direction]).inc_by(bytes);
    }

    pub fn record_deletion(&self, side: &str, result: &str) {
        self.deletions_total
            .with_label_values(&[side, result])
            .inc();
    }

    pub fn record_conflicts(&self, count: usize) {
        self.conflicts_total.inc_by(count as u64);
    }

    pub fn set_tracked_entries(&self, count: usize) {
        self.tracked_entries
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Encode all metrics in Prometheus text exposition format
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
