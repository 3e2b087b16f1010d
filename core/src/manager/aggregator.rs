//! Statistics aggregation across the worker pool

use std::time::Duration;

use crate::metrics::{InferStat, TimestampVector};
use crate::worker::ThreadStat;

/// Aggregated statistics from all workers
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of workers in the pool
    pub total_workers: usize,

    /// Total successful requests
    pub total_completed: usize,

    /// Total failed requests
    pub total_failed: usize,

    /// Sum of every client context's counters
    pub client: InferStat,

    /// Longest time any worker has spent in its loop
    pub total_duration: Duration,

    /// Overall successful requests per second
    pub requests_per_second: f64,
}

impl PoolStats {
    /// Get the total number of requests (completed + failed)
    pub fn total_requests(&self) -> usize {
        self.total_completed + self.total_failed
    }

    /// Get the success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total > 0 {
            self.total_completed as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Sum of completed counters; each stat is locked on its own
pub fn count_completed<'a>(stats: impl IntoIterator<Item = &'a ThreadStat>) -> u64 {
    stats
        .into_iter()
        .map(|s| s.counts().completed as u64)
        .sum()
}

/// Sum of every worker's client context counters
pub fn sum_client_stats<'a>(stats: impl IntoIterator<Item = &'a ThreadStat>) -> InferStat {
    stats
        .into_iter()
        .fold(InferStat::default(), |acc, s| acc + s.contexts_sum())
}

/// Drain the records of every worker into one vector, worker by worker
pub fn drain_records<'a>(stats: impl IntoIterator<Item = &'a ThreadStat>) -> TimestampVector {
    let mut all = TimestampVector::new();
    for stat in stats {
        all.append(&mut stat.take_records());
    }
    all
}

/// Aggregate statistics from every worker
pub fn aggregate_thread_stats<'a>(stats: impl IntoIterator<Item = &'a ThreadStat>) -> PoolStats {
    let stats: Vec<&ThreadStat> = stats.into_iter().collect();
    if stats.is_empty() {
        return PoolStats::default();
    }

    let mut total_completed = 0;
    let mut total_failed = 0;
    for counts in stats.iter().map(|s| s.counts()) {
        total_completed += counts.completed;
        total_failed += counts.failed;
    }

    // Use the maximum elapsed time across all workers
    let total_duration = stats
        .iter()
        .filter_map(|s| s.elapsed())
        .max()
        .unwrap_or(Duration::ZERO);

    let secs = total_duration.as_secs_f64();
    let requests_per_second = if secs > 0.0 {
        total_completed as f64 / secs
    } else {
        0.0
    };

    PoolStats {
        total_workers: stats.len(),
        total_completed,
        total_failed,
        client: sum_client_stats(stats.iter().copied()),
        total_duration,
        requests_per_second,
    }
}
