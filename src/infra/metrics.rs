//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations so workers never contend on a mutex
//! just to count. `report()` swaps the periodic counters to get a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a wait time using binary search
#[inline]
fn bucket_index(wait_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < wait_us)
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
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Wait-time histogram (reset on report)
struct WaitHistogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    sum_us: AtomicU64,
    max_us: AtomicU64,
}

impl WaitHistogram {
    fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record(&self, wait_us: u64) {
        self.buckets[bucket_index(wait_us)].fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(wait_us, Ordering::Relaxed);
        update_atomic_max(&self.max_us, wait_us);
    }

    fn take(&self) -> WaitSummary {
        let buckets = swap_buckets(&self.buckets);
        let sum = self.sum_us.swap(0, Ordering::Relaxed);
        let max_us = self.max_us.swap(0, Ordering::Relaxed);
        let count: u64 = buckets.iter().sum();
        WaitSummary {
            count,
            avg_us: if count > 0 { sum / count } else { 0 },
            max_us,
            p50_us: percentile_from_buckets(&buckets, 0.50),
            p99_us: percentile_from_buckets(&buckets, 0.99),
            buckets,
        }
    }
}

/// Lock-free metrics collector shared by all pipeline workers
pub struct Metrics {
    /// Readings pulled from the source and enqueued (monotonic)
    events_produced: AtomicU64,
    /// Readings absorbed by the aggregator (monotonic)
    events_absorbed: AtomicU64,
    /// Readings absorbed since last report (reset on report)
    absorbed_since_report: AtomicU64,
    /// Enqueue attempts refused by a closed queue (monotonic)
    enqueue_rejected: AtomicU64,
    /// Source failures that stopped production (monotonic)
    source_errors: AtomicU64,
    /// Records the source dropped: skipped as malformed or past cutoff (monotonic)
    records_skipped: AtomicU64,
    /// Windows closed and reported (monotonic)
    windows_reported: AtomicU64,
    /// Current queue depth (sampled by workers)
    queue_depth: AtomicU64,
    /// Highest queue depth observed (monotonic)
    queue_depth_peak: AtomicU64,
    /// Time producers spent inside enqueue
    enqueue_wait: WaitHistogram,
    /// Time consumers spent inside dequeue
    dequeue_wait: WaitHistogram,
    /// Last report time (only accessed from reporter)
    last_report_time: Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_produced: AtomicU64::new(0),
            events_absorbed: AtomicU64::new(0),
            absorbed_since_report: AtomicU64::new(0),
            enqueue_rejected: AtomicU64::new(0),
            source_errors: AtomicU64::new(0),
            records_skipped: AtomicU64::new(0),
            windows_reported: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            queue_depth_peak: AtomicU64::new(0),
            enqueue_wait: WaitHistogram::new(),
            dequeue_wait: WaitHistogram::new(),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    /// Record a reading accepted by the queue and the time spent waiting for space
    #[inline]
    pub fn record_enqueued(&self, wait_us: u64, depth: usize) {
        self.events_produced.fetch_add(1, Ordering::Relaxed);
        self.enqueue_wait.record(wait_us);
        self.set_queue_depth(depth as u64);
    }

    /// Record a reading handed to a consumer and the time spent waiting for it
    #[inline]
    pub fn record_dequeued(&self, wait_us: u64, depth: usize) {
        self.dequeue_wait.record(wait_us);
        self.set_queue_depth(depth as u64);
    }

    #[inline]
    pub fn record_absorbed(&self) {
        self.events_absorbed.fetch_add(1, Ordering::Relaxed);
        self.absorbed_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_enqueue_rejected(&self) {
        self.enqueue_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Add records the source dropped; fed once the source is exhausted
    pub fn record_records_skipped(&self, count: u64) {
        self.records_skipped.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_window_reported(&self) {
        self.windows_reported.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
        update_atomic_max(&self.queue_depth_peak, depth);
    }

    pub fn events_produced(&self) -> u64 {
        self.events_produced.load(Ordering::Relaxed)
    }

    pub fn events_absorbed(&self) -> u64 {
        self.events_absorbed.load(Ordering::Relaxed)
    }

    pub fn enqueue_rejected(&self) -> u64 {
        self.enqueue_rejected.load(Ordering::Relaxed)
    }

    pub fn records_skipped(&self) -> u64 {
        self.records_skipped.load(Ordering::Relaxed)
    }

    pub fn windows_reported(&self) -> u64 {
        self.windows_reported.load(Ordering::Relaxed)
    }

    pub fn queue_depth_peak(&self) -> u64 {
        self.queue_depth_peak.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let absorbed_count = self.absorbed_since_report.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let absorbed_per_sec = if elapsed.as_secs_f64() > 0.0 {
            absorbed_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            events_produced: self.events_produced.load(Ordering::Relaxed),
            events_absorbed: self.events_absorbed.load(Ordering::Relaxed),
            absorbed_per_sec,
            enqueue_rejected: self.enqueue_rejected.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            windows_reported: self.windows_reported.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            queue_depth_peak: self.queue_depth_peak.load(Ordering::Relaxed),
            enqueue_wait: self.enqueue_wait.take(),
            dequeue_wait: self.dequeue_wait.take(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait-time statistics for one side of the queue
#[derive(Debug, Clone, Copy)]
pub struct WaitSummary {
    pub count: u64,
    pub avg_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub buckets: [u64; NUM_BUCKETS],
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_produced: u64,
    pub events_absorbed: u64,
    pub absorbed_per_sec: f64,
    pub enqueue_rejected: u64,
    pub source_errors: u64,
    pub records_skipped: u64,
    pub windows_reported: u64,
    /// Queue depth at last sample
    pub queue_depth: u64,
    pub queue_depth_peak: u64,
    pub enqueue_wait: WaitSummary,
    pub dequeue_wait: WaitSummary,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            produced = %self.events_produced,
            absorbed = %self.events_absorbed,
            absorbed_per_sec = format!("{:.1}", self.absorbed_per_sec),
            windows = %self.windows_reported,
            rejected = %self.enqueue_rejected,
            source_errors = %self.source_errors,
            skipped = %self.records_skipped,
            queue_depth = %self.queue_depth,
            queue_peak = %self.queue_depth_peak,
            enqueue_wait_p99_us = %self.enqueue_wait.p99_us,
            enqueue_wait_max_us = %self.enqueue_wait.max_us,
            dequeue_wait_p99_us = %self.dequeue_wait.p99_us,
            dequeue_wait_max_us = %self.dequeue_wait.max_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.events_produced(), 0);
        assert_eq!(metrics.events_absorbed(), 0);
        assert_eq!(metrics.windows_reported(), 0);
    }

    #[test]
    fn test_record_flow() {
        let metrics = Metrics::new();

        metrics.record_enqueued(50, 1);
        metrics.record_enqueued(150, 2);
        metrics.record_dequeued(10, 1);
        metrics.record_absorbed();
        metrics.record_window_reported();
        metrics.record_enqueue_rejected();
        metrics.record_records_skipped(3);

        assert_eq!(metrics.events_produced(), 2);
        assert_eq!(metrics.records_skipped(), 3);
        assert_eq!(metrics.report().records_skipped, 3);
        assert_eq!(metrics.events_absorbed(), 1);
        assert_eq!(metrics.windows_reported(), 1);
        assert_eq!(metrics.enqueue_rejected(), 1);
        assert_eq!(metrics.queue_depth_peak(), 2);
    }

    #[test]
    fn test_report_resets_wait_histograms() {
        let metrics = Metrics::new();
        metrics.record_enqueued(100, 1);
        metrics.record_enqueued(500, 1);
        metrics.record_enqueued(300, 1);

        let summary = metrics.report();
        assert_eq!(summary.events_produced, 3);
        assert_eq!(summary.enqueue_wait.count, 3);
        assert_eq!(summary.enqueue_wait.avg_us, 300);
        assert_eq!(summary.enqueue_wait.max_us, 500);
        assert_eq!(summary.enqueue_wait.buckets[0], 1);
        assert_eq!(summary.enqueue_wait.buckets[2], 1);
        assert_eq!(summary.enqueue_wait.buckets[3], 1);

        // Monotonic counters survive, histograms do not
        let summary = metrics.report();
        assert_eq!(summary.events_produced, 3);
        assert_eq!(summary.enqueue_wait.count, 0);
        assert_eq!(summary.enqueue_wait.max_us, 0);
    }

    #[test]
    fn test_report_empty() {
        let summary = Metrics::new().report();
        assert_eq!(summary.events_absorbed, 0);
        assert_eq!(summary.dequeue_wait.avg_us, 0);
        assert_eq!(summary.dequeue_wait.p99_us, 0);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let m = metrics.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        m.record_enqueued(i as u64, (i % 48) as usize);
                        m.record_absorbed();
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.events_produced(), 10_000);
        assert_eq!(metrics.events_absorbed(), 10_000);
        assert_eq!(metrics.queue_depth_peak(), 47);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_dequeued(150, 0);
        }
        let summary = metrics.report();
        assert_eq!(summary.dequeue_wait.p50_us, 200);
        assert_eq!(summary.dequeue_wait.p99_us, 200);
    }
}
