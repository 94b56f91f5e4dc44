//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
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

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps the rate-window counters to
/// get a consistent snapshot; totals are monotonic.
pub struct Metrics {
    /// Total updates ever accepted (monotonic)
    updates_total: AtomicU64,
    /// Updates since last report (reset on report)
    updates_since_report: AtomicU64,
    /// Sum of update-handling latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max update-handling latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Update-handling latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Updates rejected as invalid (monotonic)
    invalid_payloads_total: AtomicU64,
    /// Broadcasts published to the office channel (monotonic)
    office_broadcasts_total: AtomicU64,
    /// Broadcasts published to a package channel (monotonic)
    package_broadcasts_total: AtomicU64,
    /// Status lookups attempted (monotonic)
    status_lookups_total: AtomicU64,
    /// Lookups that fell back to eligible on failure/timeout (monotonic)
    status_fallback_total: AtomicU64,
    /// Lookups with an explicit non-"in transit" status (monotonic)
    status_suppressed_total: AtomicU64,
    /// Positions enqueued for the store forwarder (monotonic)
    store_enqueued_total: AtomicU64,
    /// Positions dropped because the store queue was full (monotonic)
    store_dropped_total: AtomicU64,
    /// Store writes that failed or timed out (monotonic)
    store_failures_total: AtomicU64,
    /// Messages dropped because a client's writer queue was full (monotonic)
    client_messages_dropped_total: AtomicU64,
    /// Connections ever opened (monotonic)
    connections_opened_total: AtomicU64,
    /// Current live connections (gauge)
    connections_current: AtomicU64,
    /// Last report time (only accessed from reporters)
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
            invalid_payloads_total: AtomicU64::new(0),
            office_broadcasts_total: AtomicU64::new(0),
            package_broadcasts_total: AtomicU64::new(0),
            status_lookups_total: AtomicU64::new(0),
            status_fallback_total: AtomicU64::new(0),
            status_suppressed_total: AtomicU64::new(0),
            store_enqueued_total: AtomicU64::new(0),
            store_dropped_total: AtomicU64::new(0),
            store_failures_total: AtomicU64::new(0),
            client_messages_dropped_total: AtomicU64::new(0),
            connections_opened_total: AtomicU64::new(0),
            connections_current: AtomicU64::new(0),
            last_report: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a fully handled update with its processing latency
    pub fn record_update_handled(&self, latency_us: u64) {
        self.updates_total.fetch_add(1, Ordering::Relaxed);
        self.updates_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_payload(&self) {
        self.invalid_payloads_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_office_broadcast(&self) {
        self.office_broadcasts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_package_broadcast(&self) {
        self.package_broadcasts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_lookup(&self) {
        self.status_lookups_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_fallback(&self) {
        self.status_fallback_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_suppressed(&self) {
        self.status_suppressed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_enqueued(&self) {
        self.store_enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_dropped(&self) {
        self.store_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_client_messages_dropped(&self, count: u64) {
        if count > 0 {
            self.client_messages_dropped_total.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened_total.fetch_add(1, Ordering::Relaxed);
        self.connections_current.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_current.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connections_current(&self) -> u64 {
        self.connections_current.load(Ordering::Relaxed)
    }

    /// Produce a summary, resetting the rate-window stats.
    ///
    /// `package_channels` is sampled by the caller (room router) since
    /// channel membership is not tracked here.
    pub fn report(&self, package_channels: usize) -> MetricsSummary {
        let mut last_report = self.last_report.lock();
        let elapsed = last_report.elapsed().as_secs_f64().max(0.001);
        *last_report = Instant::now();
        drop(last_report);

        let window_updates = self.updates_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let avg_latency_us = if window_updates > 0 { latency_sum / window_updates } else { 0 };

        let store_enqueued = self.store_enqueued_total.load(Ordering::Relaxed);
        let store_dropped = self.store_dropped_total.load(Ordering::Relaxed);
        let store_drop_ratio =
            if store_enqueued > 0 { store_dropped as f64 / store_enqueued as f64 } else { 0.0 };

        MetricsSummary {
            updates_total: self.updates_total.load(Ordering::Relaxed),
            updates_per_sec: window_updates as f64 / elapsed,
            avg_latency_us,
            max_latency_us: latency_max,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            invalid_payloads_total: self.invalid_payloads_total.load(Ordering::Relaxed),
            office_broadcasts_total: self.office_broadcasts_total.load(Ordering::Relaxed),
            package_broadcasts_total: self.package_broadcasts_total.load(Ordering::Relaxed),
            status_lookups_total: self.status_lookups_total.load(Ordering::Relaxed),
            status_fallback_total: self.status_fallback_total.load(Ordering::Relaxed),
            status_suppressed_total: self.status_suppressed_total.load(Ordering::Relaxed),
            store_enqueued_total: store_enqueued,
            store_dropped_total: store_dropped,
            store_failures_total: self.store_failures_total.load(Ordering::Relaxed),
            store_drop_ratio,
            client_messages_dropped_total: self
                .client_messages_dropped_total
                .load(Ordering::Relaxed),
            connections_opened_total: self.connections_opened_total.load(Ordering::Relaxed),
            connections_current: self.connections_current.load(Ordering::Relaxed),
            package_channels,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of relay metrics for logging and exposition
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub updates_total: u64,
    pub updates_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub invalid_payloads_total: u64,
    pub office_broadcasts_total: u64,
    pub package_broadcasts_total: u64,
    pub status_lookups_total: u64,
    pub status_fallback_total: u64,
    pub status_suppressed_total: u64,
    pub store_enqueued_total: u64,
    pub store_dropped_total: u64,
    pub store_failures_total: u64,
    pub store_drop_ratio: f64,
    pub client_messages_dropped_total: u64,
    pub connections_opened_total: u64,
    pub connections_current: u64,
    pub package_channels: usize,
}

impl MetricsSummary {
    /// Log the summary as a single structured event
    pub fn log(&self) {
        info!(
            updates_total = self.updates_total,
            updates_per_sec = self.updates_per_sec,
            avg_latency_us = self.avg_latency_us,
            max_latency_us = self.max_latency_us,
            lat_p50_us = self.lat_p50_us,
            lat_p95_us = self.lat_p95_us,
            lat_p99_us = self.lat_p99_us,
            invalid_payloads = self.invalid_payloads_total,
            office_broadcasts = self.office_broadcasts_total,
            package_broadcasts = self.package_broadcasts_total,
            status_lookups = self.status_lookups_total,
            status_fallbacks = self.status_fallback_total,
            status_suppressed = self.status_suppressed_total,
            store_enqueued = self.store_enqueued_total,
            store_dropped = self.store_dropped_total,
            store_failures = self.store_failures_total,
            client_msgs_dropped = self.client_messages_dropped_total,
            connections = self.connections_current,
            package_channels = self.package_channels,
            "metrics_report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
        assert_eq!(bucket_index(u64::MAX), 10);
    }

    #[test]
    fn test_record_and_report() {
        let metrics = Metrics::new();
        metrics.record_update_handled(150);
        metrics.record_update_handled(250);
        metrics.record_update_handled(90);
        metrics.record_invalid_payload();
        metrics.record_office_broadcast();
        metrics.record_office_broadcast();
        metrics.record_package_broadcast();

        let summary = metrics.report(3);
        assert_eq!(summary.updates_total, 3);
        assert_eq!(summary.max_latency_us, 250);
        assert_eq!(summary.avg_latency_us, (150 + 250 + 90) / 3);
        assert_eq!(summary.invalid_payloads_total, 1);
        assert_eq!(summary.office_broadcasts_total, 2);
        assert_eq!(summary.package_broadcasts_total, 1);
        assert_eq!(summary.package_channels, 3);
        assert!(summary.updates_per_sec > 0.0);
    }

    #[test]
    fn test_report_resets_rate_window() {
        let metrics = Metrics::new();
        metrics.record_update_handled(500);
        let first = metrics.report(0);
        assert_eq!(first.max_latency_us, 500);

        let second = metrics.report(0);
        assert_eq!(second.max_latency_us, 0);
        assert_eq!(second.avg_latency_us, 0);
        // Totals are monotonic
        assert_eq!(second.updates_total, 1);
    }

    #[test]
    fn test_store_drop_ratio() {
        let metrics = Metrics::new();
        for _ in 0..4 {
            metrics.record_store_enqueued();
        }
        metrics.record_store_dropped();
        let summary = metrics.report(0);
        assert!((summary.store_drop_ratio - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_connection_gauge() {
        let metrics = Metrics::new();
        metrics.record_connection_opened();
        metrics.record_connection_opened();
        metrics.record_connection_closed();
        assert_eq!(metrics.connections_current(), 1);
        let summary = metrics.report(0);
        assert_eq!(summary.connections_opened_total, 2);
        assert_eq!(summary.connections_current, 1);
    }

    #[test]
    fn test_percentiles_from_buckets() {
        let metrics = Metrics::new();
        // 90 fast updates, 10 slow ones
        for _ in 0..90 {
            metrics.record_update_handled(50);
        }
        for _ in 0..10 {
            metrics.record_update_handled(5000);
        }
        let summary = metrics.report(0);
        assert_eq!(summary.lat_p50_us, 100);
        assert_eq!(summary.lat_p99_us, 6400);
    }
}
