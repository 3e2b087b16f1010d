//! Request schedule generation for the schedule-based worker pools

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Exp};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::worker::ScheduleSlice;

/// Number of Poisson gaps generated per worker thread before the schedule
/// repeats
pub const POISSON_EVENTS_PER_THREAD: usize = 256;

/// Longest gap between two requests of a schedule
pub const MAX_REQUEST_GAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Spacing of requests for a target rate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleDistribution {
    /// Every gap is exactly `1 / rate`
    #[default]
    Constant,
    /// Exponentially distributed gaps with mean `1 / rate`
    Poisson,
}

impl std::fmt::Display for ScheduleDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleDistribution::Constant => write!(f, "constant"),
            ScheduleDistribution::Poisson => write!(f, "poisson"),
        }
    }
}

/// Gaps between consecutive requests of the whole pool at `rate` requests
/// per second
pub fn rate_intervals<R: Rng + ?Sized>(
    rate: f64,
    threads: usize,
    distribution: ScheduleDistribution,
    rng: &mut R,
) -> Result<Vec<Duration>, ConfigError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ConfigError::InvalidSchedule(format!(
            "request rate must be a positive number, got {}",
            rate
        )));
    }
    if 1.0 / rate > MAX_REQUEST_GAP.as_secs_f64() {
        return Err(ConfigError::InvalidSchedule(format!(
            "request rate {} is below one request per {}s",
            rate,
            MAX_REQUEST_GAP.as_secs()
        )));
    }
    let threads = threads.max(1);
    let gap = |secs: f64| {
        Duration::try_from_secs_f64(secs.min(MAX_REQUEST_GAP.as_secs_f64())).map_err(|e| {
            ConfigError::InvalidSchedule(format!("request rate {} is out of range: {}", rate, e))
        })
    };

    match distribution {
        ScheduleDistribution::Constant => Ok(vec![gap(1.0 / rate)?; threads]),
        ScheduleDistribution::Poisson => {
            let exp = Exp::new(rate)
                .map_err(|e| ConfigError::InvalidSchedule(format!("invalid rate {}: {}", rate, e)))?;
            (0..threads * POISSON_EVENTS_PER_THREAD)
                .map(|_| gap(exp.sample(rng)))
                .collect()
        }
    }
}

/// Read a custom intervals file: one gap in microseconds per line
pub fn read_intervals(path: &Path) -> Result<Vec<Duration>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::InvalidSchedule(format!("failed to read {}: {}", path.display(), e))
    })?;
    parse_intervals(&content)
        .map_err(|e| ConfigError::InvalidSchedule(format!("{}: {}", path.display(), e)))
}

/// Parse custom intervals, one gap in microseconds per non-empty line
pub fn parse_intervals(content: &str) -> Result<Vec<Duration>, String> {
    let intervals = content
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| {
            line.parse::<u64>()
                .map(Duration::from_micros)
                .map_err(|e| format!("line {}: invalid interval '{}': {}", n, line, e))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if intervals.is_empty() {
        return Err("no intervals found".into());
    }
    if let Some(gap) = intervals.iter().find(|&&gap| gap > MAX_REQUEST_GAP) {
        return Err(format!(
            "interval of {}us exceeds {}s",
            gap.as_micros(),
            MAX_REQUEST_GAP.as_secs()
        ));
    }
    if intervals.iter().all(Duration::is_zero) {
        return Err("intervals sum to zero".into());
    }
    Ok(intervals)
}

/// Mean rate in requests per second implied by `intervals`
pub fn mean_rate(intervals: &[Duration]) -> f64 {
    let total: f64 = intervals.iter().map(Duration::as_secs_f64).sum();
    if total > 0.0 {
        intervals.len() as f64 / total
    } else {
        0.0
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Split the pool-wide gap sequence into one unstarted slice per thread
///
/// The gap list is repeated until its length is a multiple of `threads`, so
/// every thread gets the same number of requests per cycle. Request `j` of
/// the cycle goes to thread `j % threads` at the sum of the gaps before it.
pub fn distribute(intervals: &[Duration], threads: usize) -> Vec<ScheduleSlice> {
    if threads == 0 {
        return Vec::new();
    }
    if intervals.is_empty() {
        return vec![ScheduleSlice::default(); threads];
    }

    let reps = threads / gcd(intervals.len(), threads);
    let events = intervals.len() * reps;

    let mut offsets = vec![Vec::with_capacity(events / threads); threads];
    let mut at = Duration::ZERO;
    for j in 0..events {
        offsets[j % threads].push(at);
        at += intervals[j % intervals.len()];
    }

    offsets
        .into_iter()
        .map(|offsets| ScheduleSlice::new(offsets, at))
        .collect()
}
