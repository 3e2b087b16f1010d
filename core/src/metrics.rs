//! Request records, client counters and latency summaries

use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Per-context transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferStat {
    /// Requests handed to the transport
    pub issued: u64,
    /// Requests that completed successfully
    pub completed: u64,
    /// Requests that failed
    pub failed: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Sum of request round-trip times in nanoseconds
    pub cumulative_request_time_ns: u64,
}

impl InferStat {
    /// Requests issued but not yet finished
    pub fn outstanding(&self) -> u64 {
        self.issued.saturating_sub(self.completed + self.failed)
    }

    /// Mean round-trip time of finished requests
    pub fn mean_request_time(&self) -> Option<Duration> {
        let finished = self.completed + self.failed;
        (finished > 0).then(|| Duration::from_nanos(self.cumulative_request_time_ns / finished))
    }
}

impl Add for InferStat {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl AddAssign for InferStat {
    fn add_assign(&mut self, other: Self) {
        self.issued += other.issued;
        self.completed += other.completed;
        self.failed += other.failed;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.cumulative_request_time_ns += other.cumulative_request_time_ns;
    }
}

/// Lock-free `InferStat` accumulator for backend implementations
#[derive(Debug, Default)]
pub struct InferStatCounters {
    issued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    request_time_ns: AtomicU64,
}

impl InferStatCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request handed to the transport
    pub fn record_issue(&self, bytes_sent: u64) {
        self.issued.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_sent, Ordering::Relaxed);
    }

    /// Count a successful completion
    pub fn record_success(&self, bytes_received: u64, elapsed: Duration) {
        self.bytes_received
            .fetch_add(bytes_received, Ordering::Relaxed);
        self.request_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Release);
    }

    /// Count a failed completion
    pub fn record_failure(&self, elapsed: Duration) {
        self.request_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Release);
    }

    /// Current values
    pub fn snapshot(&self) -> InferStat {
        InferStat {
            completed: self.completed.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            issued: self.issued.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            cumulative_request_time_ns: self.request_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// Timing record of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestRecord {
    /// When the request was issued
    pub start: Instant,
    /// When the (final) response arrived
    pub end: Instant,
    /// Sequence id for stateful requests
    pub sequence_id: Option<u64>,
    /// Whether this request ended its sequence
    pub sequence_end: bool,
    /// Whether the request went out later than its scheduled slot
    pub delayed: bool,
    /// Whether the request succeeded
    pub success: bool,
}

impl RequestRecord {
    /// Round-trip latency
    pub fn latency(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

/// Request records in issuance order per worker
pub type TimestampVector = Vec<RequestRecord>;

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

/// In-memory histogram for efficient percentile calculation
/// Uses HdrHistogram for memory-efficient storage of large datasets
pub struct LatencyHistogram {
    histogram: hdrhistogram::Histogram<u64>,
}

impl LatencyHistogram {
    /// Microsecond precision, max 1 hour
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000_000, 3)
            .expect("static histogram bounds are valid");
        Self { histogram }
    }

    /// Record a duration
    pub fn record(&mut self, duration: Duration) {
        let micros = (duration.as_micros() as u64).max(1);
        self.histogram.saturating_record(micros);
    }

    /// Get the number of recorded values
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    /// Check if the histogram is empty
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Calculate percentiles from the histogram
    pub fn percentiles(&self) -> LatencyPercentiles {
        if self.histogram.is_empty() {
            return LatencyPercentiles::default();
        }

        LatencyPercentiles {
            min: self.histogram.min() as f64 / 1000.0,
            p50: self.histogram.value_at_quantile(0.50) as f64 / 1000.0,
            p90: self.histogram.value_at_quantile(0.90) as f64 / 1000.0,
            p95: self.histogram.value_at_quantile(0.95) as f64 / 1000.0,
            p99: self.histogram.value_at_quantile(0.99) as f64 / 1000.0,
            max: self.histogram.max() as f64 / 1000.0,
            mean: self.histogram.mean() / 1000.0,
            stddev: self.histogram.stdev() / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one measurement window
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MeasurementSummary {
    /// Records in the window
    pub request_count: usize,
    /// Successful requests
    pub success_count: usize,
    /// Failed requests
    pub failed_count: usize,
    /// Requests issued later than scheduled
    pub delayed_count: usize,
    /// Requests that closed a sequence
    pub sequence_end_count: usize,
    /// Successful requests per second
    pub throughput: f64,
    /// Latency of successful requests
    pub latency: LatencyPercentiles,
    /// Window length in seconds
    pub window_secs: f64,
}

impl MeasurementSummary {
    /// Summarize the records swapped out of the load manager for one window
    pub fn from_records(records: &[RequestRecord], window: Duration) -> Self {
        let mut histogram = LatencyHistogram::new();
        let mut summary = Self {
            request_count: records.len(),
            window_secs: window.as_secs_f64(),
            ..Default::default()
        };

        for record in records {
            if record.success {
                summary.success_count += 1;
                histogram.record(record.latency());
            } else {
                summary.failed_count += 1;
            }
            if record.delayed {
                summary.delayed_count += 1;
            }
            if record.sequence_end {
                summary.sequence_end_count += 1;
            }
        }

        if summary.window_secs > 0.0 {
            summary.throughput = summary.success_count as f64 / summary.window_secs;
        }
        summary.latency = histogram.percentiles();
        summary
    }

    /// Fraction of requests issued late (0.0 - 1.0)
    pub fn delayed_ratio(&self) -> f64 {
        if self.request_count == 0 {
            0.0
        } else {
            self.delayed_count as f64 / self.request_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start: Instant, latency_ms: u64, success: bool, delayed: bool) -> RequestRecord {
        RequestRecord {
            start,
            end: start + Duration::from_millis(latency_ms),
            sequence_id: None,
            sequence_end: false,
            delayed,
            success,
        }
    }

    #[test]
    fn test_infer_stat_arithmetic() {
        let a = InferStat {
            issued: 3,
            completed: 2,
            failed: 1,
            bytes_sent: 30,
            bytes_received: 20,
            cumulative_request_time_ns: 300,
        };
        let sum = a + a;
        assert_eq!(sum.issued, 6);
        assert_eq!(sum.completed, 4);
        assert_eq!(sum.failed, 2);
        assert_eq!(sum.bytes_sent, 60);
        assert_eq!(sum.outstanding(), 0);
        assert_eq!(sum.mean_request_time(), Some(Duration::from_nanos(100)));
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = InferStatCounters::new();
        counters.record_issue(10);
        counters.record_issue(10);
        counters.record_success(5, Duration::from_millis(2));

        let stat = counters.snapshot();
        assert_eq!(stat.issued, 2);
        assert_eq!(stat.completed, 1);
        assert_eq!(stat.failed, 0);
        assert_eq!(stat.bytes_sent, 20);
        assert_eq!(stat.bytes_received, 5);
        assert_eq!(stat.outstanding(), 1);
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut histogram = LatencyHistogram::new();

        for i in 1..=100 {
            histogram.record(Duration::from_millis(i));
        }

        let percentiles = histogram.percentiles();
        assert!((percentiles.min - 1.0).abs() < 0.1);
        assert!((percentiles.max - 100.0).abs() < 0.1);
        assert!((percentiles.p50 - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = LatencyHistogram::new();
        let percentiles = histogram.percentiles();

        assert!(histogram.is_empty());
        assert_eq!(percentiles.min, 0.0);
        assert_eq!(percentiles.max, 0.0);
        assert_eq!(percentiles.mean, 0.0);
    }

    #[test]
    fn test_summary_from_records() {
        let now = Instant::now();
        let records = vec![
            record(now, 10, true, false),
            record(now, 20, true, true),
            record(now, 30, false, false),
        ];

        let summary = MeasurementSummary::from_records(&records, Duration::from_secs(2));

        assert_eq!(summary.request_count, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failed_count, 1);
        assert_eq!(summary.delayed_count, 1);
        assert!((summary.throughput - 1.0).abs() < f64::EPSILON);
        assert!((summary.latency.max - 20.0).abs() < 0.1);
        assert!((summary.delayed_ratio() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_empty_window() {
        let summary = MeasurementSummary::from_records(&[], Duration::ZERO);
        assert_eq!(summary.request_count, 0);
        assert_eq!(summary.throughput, 0.0);
        assert_eq!(summary.delayed_ratio(), 0.0);
    }
}
