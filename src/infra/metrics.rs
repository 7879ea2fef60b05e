//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are
//! statistical counters only. Do NOT use them for coordination or
//! logic decisions - the dedup store owns correctness.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential latency bucket boundaries (microseconds)
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Percentile upper bound from histogram buckets
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the proximity engine
pub struct Metrics {
    /// Total location updates ever processed (monotonic)
    updates_total: AtomicU64,
    /// Updates since last report (reset on report)
    updates_since_report: AtomicU64,
    /// Sum of evaluation latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max evaluation latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Evaluation latency histogram (reset on report)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Notifications dispatched (monotonic)
    notifications_total: AtomicU64,
    /// Entry signals suppressed by the dedup store (monotonic)
    suppressed_total: AtomicU64,
    /// Episodes closed, including synthesized closes (monotonic)
    episodes_closed_total: AtomicU64,
    /// Updates rejected for invalid coordinates (monotonic)
    invalid_updates_total: AtomicU64,
    /// Dedup store failures, each one a skipped notification (monotonic)
    dedup_failures_total: AtomicU64,
    /// Persistence insert failures (monotonic)
    persistence_failures_total: AtomicU64,
    /// Delivery channel failures (monotonic)
    delivery_failures_total: AtomicU64,
    /// Updates dropped at ingress because the channel was full (monotonic)
    ingest_dropped_total: AtomicU64,
    /// Ingress requests rejected for auth or malformed payloads (monotonic)
    ingest_rejected_total: AtomicU64,
    /// Last report time, for rate computation
    last_report: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            updates_total: AtomicU64::new(0),
            updates_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
            notifications_total: AtomicU64::new(0),
            suppressed_total: AtomicU64::new(0),
            episodes_closed_total: AtomicU64::new(0),
            invalid_updates_total: AtomicU64::new(0),
            dedup_failures_total: AtomicU64::new(0),
            persistence_failures_total: AtomicU64::new(0),
            delivery_failures_total: AtomicU64::new(0),
            ingest_dropped_total: AtomicU64::new(0),
            ingest_rejected_total: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn record_update_processed(&self, latency_us: u64) {
        self.updates_total.fetch_add(1, Ordering::Relaxed);
        self.updates_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_sent(&self) {
        self.notifications_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suppressed(&self) {
        self.suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_episode_closed(&self) {
        self.episodes_closed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_update(&self) {
        self.invalid_updates_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dedup_failure(&self) {
        self.dedup_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest_dropped(&self) {
        self.ingest_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ingest_rejected(&self) {
        self.ingest_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot the counters, resetting the per-interval ones
    pub fn report(&self, active_regions: usize, tracked_pairs: usize) -> MetricsSummary {
        let mut last = self.last_report.lock();
        let elapsed = last.elapsed().as_secs_f64().max(0.001);
        *last = Instant::now();
        drop(last);

        let updates_interval = self.updates_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.latency_buckets);

        let latency_avg_us =
            if updates_interval > 0 { latency_sum / updates_interval } else { 0 };

        MetricsSummary {
            updates_total: self.updates_total.load(Ordering::Relaxed),
            updates_per_sec: updates_interval as f64 / elapsed,
            latency_avg_us,
            latency_max_us: latency_max,
            latency_p99_us: percentile_from_buckets(&buckets, 0.99),
            latency_buckets: buckets,
            notifications_total: self.notifications_total.load(Ordering::Relaxed),
            suppressed_total: self.suppressed_total.load(Ordering::Relaxed),
            episodes_closed_total: self.episodes_closed_total.load(Ordering::Relaxed),
            invalid_updates_total: self.invalid_updates_total.load(Ordering::Relaxed),
            dedup_failures_total: self.dedup_failures_total.load(Ordering::Relaxed),
            persistence_failures_total: self.persistence_failures_total.load(Ordering::Relaxed),
            delivery_failures_total: self.delivery_failures_total.load(Ordering::Relaxed),
            ingest_dropped_total: self.ingest_dropped_total.load(Ordering::Relaxed),
            ingest_rejected_total: self.ingest_rejected_total.load(Ordering::Relaxed),
            active_regions,
            tracked_pairs,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotonic counter values, read without resetting anything
///
/// The scrape path uses this so it cannot disturb the interval
/// counters the periodic log report swaps.
#[derive(Debug, Clone, Copy)]
pub struct MetricsTotals {
    pub updates: u64,
    pub notifications: u64,
    pub suppressed: u64,
    pub episodes_closed: u64,
    pub invalid_updates: u64,
    pub dedup_failures: u64,
    pub persistence_failures: u64,
    pub delivery_failures: u64,
    pub ingest_dropped: u64,
    pub ingest_rejected: u64,
}

impl Metrics {
    pub fn totals(&self) -> MetricsTotals {
        MetricsTotals {
            updates: self.updates_total.load(Ordering::Relaxed),
            notifications: self.notifications_total.load(Ordering::Relaxed),
            suppressed: self.suppressed_total.load(Ordering::Relaxed),
            episodes_closed: self.episodes_closed_total.load(Ordering::Relaxed),
            invalid_updates: self.invalid_updates_total.load(Ordering::Relaxed),
            dedup_failures: self.dedup_failures_total.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures_total.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures_total.load(Ordering::Relaxed),
            ingest_dropped: self.ingest_dropped_total.load(Ordering::Relaxed),
            ingest_rejected: self.ingest_rejected_total.load(Ordering::Relaxed),
        }
    }
}

/// Consistent snapshot produced by `Metrics::report`
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub updates_total: u64,
    pub updates_per_sec: f64,
    pub latency_avg_us: u64,
    pub latency_max_us: u64,
    pub latency_p99_us: u64,
    pub latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub notifications_total: u64,
    pub suppressed_total: u64,
    pub episodes_closed_total: u64,
    pub invalid_updates_total: u64,
    pub dedup_failures_total: u64,
    pub persistence_failures_total: u64,
    pub delivery_failures_total: u64,
    pub ingest_dropped_total: u64,
    pub ingest_rejected_total: u64,
    pub active_regions: usize,
    pub tracked_pairs: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            updates_total = %self.updates_total,
            updates_per_sec = %format!("{:.1}", self.updates_per_sec),
            latency_avg_us = %self.latency_avg_us,
            latency_p99_us = %self.latency_p99_us,
            latency_max_us = %self.latency_max_us,
            notifications = %self.notifications_total,
            suppressed = %self.suppressed_total,
            episodes_closed = %self.episodes_closed_total,
            invalid_updates = %self.invalid_updates_total,
            dedup_failures = %self.dedup_failures_total,
            delivery_failures = %self.delivery_failures_total,
            active_regions = %self.active_regions,
            tracked_pairs = %self.tracked_pairs,
            "metrics_report"
        );
    }
}
