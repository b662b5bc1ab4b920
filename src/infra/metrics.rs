//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so the detector callback path never contends on a mutex.
//! Reporting swaps the periodic counters to get a consistent snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for submission latency (milliseconds)
/// Buckets: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600
const BUCKET_BOUNDS: [u64; 10] = [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600];
const NUM_BUCKETS: usize = 11;

#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = ((total as f64 * percentile).ceil() as u64).max(1);
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [50, 100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector shared between the controller and its handles
pub struct Metrics {
    sessions_started: AtomicU64,
    detection_events: AtomicU64,
    detection_events_since_report: AtomicU64,
    /// Detector callbacks dropped because the session channel was full
    detection_events_dropped: AtomicU64,
    detector_working: AtomicU64,
    detector_broken: AtomicU64,
    recordings_started: AtomicU64,
    recordings_completed: AtomicU64,
    recordings_failed: AtomicU64,
    stalls: AtomicU64,
    no_face_timeouts: AtomicU64,
    submissions_verified: AtomicU64,
    submissions_failed: AtomicU64,
    precondition_failures: AtomicU64,
    /// Staging copy failed and the original path was uploaded instead
    staging_fallbacks: AtomicU64,
    submission_latency_buckets: [AtomicU64; NUM_BUCKETS],
    submission_latency_sum_ms: AtomicU64,
    submission_latency_max_ms: AtomicU64,
    submissions_since_report: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_started: AtomicU64::new(0),
            detection_events: AtomicU64::new(0),
            detection_events_since_report: AtomicU64::new(0),
            detection_events_dropped: AtomicU64::new(0),
            detector_working: AtomicU64::new(0),
            detector_broken: AtomicU64::new(0),
            recordings_started: AtomicU64::new(0),
            recordings_completed: AtomicU64::new(0),
            recordings_failed: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
            no_face_timeouts: AtomicU64::new(0),
            submissions_verified: AtomicU64::new(0),
            submissions_failed: AtomicU64::new(0),
            precondition_failures: AtomicU64::new(0),
            staging_fallbacks: AtomicU64::new(0),
            submission_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            submission_latency_sum_ms: AtomicU64::new(0),
            submission_latency_max_ms: AtomicU64::new(0),
            submissions_since_report: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detection_event(&self) {
        self.detection_events.fetch_add(1, Ordering::Relaxed);
        self.detection_events_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detection_event_dropped(&self) {
        self.detection_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_working(&self) {
        self.detector_working.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detector_broken(&self) {
        self.detector_broken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recording_started(&self) {
        self.recordings_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recording_completed(&self) {
        self.recordings_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recording_failed(&self) {
        self.recordings_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stall(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_face_timeout(&self) {
        self.no_face_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_precondition_failure(&self) {
        self.precondition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_staging_fallback(&self) {
        self.staging_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished upload with its end-to-end latency
    pub fn record_submission(&self, verified: bool, latency_ms: u64) {
        if verified {
            self.submissions_verified.fetch_add(1, Ordering::Relaxed);
        } else {
            self.submissions_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.submission_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        self.submission_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.submissions_since_report.fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.submission_latency_max_ms, latency_ms);
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn detection_events(&self) -> u64 {
        self.detection_events.load(Ordering::Relaxed)
    }

    pub fn detection_events_dropped(&self) -> u64 {
        self.detection_events_dropped.load(Ordering::Relaxed)
    }

    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    pub fn submissions_verified(&self) -> u64 {
        self.submissions_verified.load(Ordering::Relaxed)
    }

    pub fn submissions_failed(&self) -> u64 {
        self.submissions_failed.load(Ordering::Relaxed)
    }

    pub fn precondition_failures(&self) -> u64 {
        self.precondition_failures.load(Ordering::Relaxed)
    }

    pub fn staging_fallbacks(&self) -> u64 {
        self.staging_fallbacks.load(Ordering::Relaxed)
    }

    /// Produce a summary, resetting the periodic counters
    pub fn report(&self) -> MetricsSummary {
        let detection_count = self.detection_events_since_report.swap(0, Ordering::Relaxed);
        let submission_count = self.submissions_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.submission_latency_sum_ms.swap(0, Ordering::Relaxed);
        let latency_max = self.submission_latency_max_ms.swap(0, Ordering::Relaxed);
        let latency_buckets = swap_buckets(&self.submission_latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let detection_events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            detection_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        MetricsSummary {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            detection_events_total: self.detection_events.load(Ordering::Relaxed),
            detection_events_per_sec,
            detection_events_dropped: self.detection_events_dropped.load(Ordering::Relaxed),
            detector_working: self.detector_working.load(Ordering::Relaxed),
            detector_broken: self.detector_broken.load(Ordering::Relaxed),
            recordings_started: self.recordings_started.load(Ordering::Relaxed),
            recordings_completed: self.recordings_completed.load(Ordering::Relaxed),
            recordings_failed: self.recordings_failed.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            no_face_timeouts: self.no_face_timeouts.load(Ordering::Relaxed),
            submissions_verified: self.submissions_verified.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            precondition_failures: self.precondition_failures.load(Ordering::Relaxed),
            staging_fallbacks: self.staging_fallbacks.load(Ordering::Relaxed),
            submission_lat_avg_ms: if submission_count > 0 {
                latency_sum / submission_count
            } else {
                0
            },
            submission_lat_max_ms: latency_max,
            submission_lat_p95_ms: percentile_from_buckets(&latency_buckets, 0.95),
            submission_lat_buckets: latency_buckets,
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub sessions_started: u64,
    pub detection_events_total: u64,
    pub detection_events_per_sec: f64,
    pub detection_events_dropped: u64,
    pub detector_working: u64,
    pub detector_broken: u64,
    pub recordings_started: u64,
    pub recordings_completed: u64,
    pub recordings_failed: u64,
    pub stalls: u64,
    pub no_face_timeouts: u64,
    pub submissions_verified: u64,
    pub submissions_failed: u64,
    pub precondition_failures: u64,
    pub staging_fallbacks: u64,
    pub submission_lat_avg_ms: u64,
    pub submission_lat_max_ms: u64,
    pub submission_lat_p95_ms: u64,
    /// Bounds: ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, >25600 ms
    pub submission_lat_buckets: [u64; NUM_BUCKETS],
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            sessions = %self.sessions_started,
            detection_events = %self.detection_events_total,
            detection_per_sec = format!("{:.1}", self.detection_events_per_sec),
            detection_dropped = %self.detection_events_dropped,
            detector_broken = %self.detector_broken,
            recordings_completed = %self.recordings_completed,
            recordings_failed = %self.recordings_failed,
            stalls = %self.stalls,
            verified = %self.submissions_verified,
            failed = %self.submissions_failed,
            submission_avg_ms = %self.submission_lat_avg_ms,
            submission_p95_ms = %self.submission_lat_p95_ms,
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
        assert_eq!(metrics.detection_events(), 0);
        assert_eq!(metrics.submissions_verified(), 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(10), 0);
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(51), 1);
        assert_eq!(bucket_index(30_000), 10);
    }

    #[test]
    fn test_record_submission() {
        let metrics = Metrics::new();
        metrics.record_submission(true, 120);
        metrics.record_submission(false, 900);

        assert_eq!(metrics.submissions_verified(), 1);
        assert_eq!(metrics.submissions_failed(), 1);

        let summary = metrics.report();
        assert_eq!(summary.submission_lat_avg_ms, 510);
        assert_eq!(summary.submission_lat_max_ms, 900);
        assert_eq!(summary.submission_lat_buckets.iter().sum::<u64>(), 2);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_detection_event();
        metrics.record_submission(true, 300);

        let first = metrics.report();
        assert_eq!(first.detection_events_total, 1);
        assert_eq!(first.submission_lat_max_ms, 300);

        let second = metrics.report();
        // Monotonic totals survive, periodic ones are swapped out
        assert_eq!(second.detection_events_total, 1);
        assert_eq!(second.submissions_verified, 1);
        assert_eq!(second.submission_lat_max_ms, 0);
        assert_eq!(second.submission_lat_avg_ms, 0);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.95), 0);

        buckets[2] = 19; // ≤200ms
        buckets[6] = 1; // ≤3200ms
        assert_eq!(percentile_from_buckets(&buckets, 0.50), 200);
        assert_eq!(percentile_from_buckets(&buckets, 0.95), 200);
        assert_eq!(percentile_from_buckets(&buckets, 1.0), 3200);
    }

    #[test]
    fn test_update_atomic_max() {
        let max = AtomicU64::new(5);
        update_atomic_max(&max, 3);
        assert_eq!(max.load(Ordering::Relaxed), 5);
        update_atomic_max(&max, 8);
        assert_eq!(max.load(Ordering::Relaxed), 8);
    }
}
