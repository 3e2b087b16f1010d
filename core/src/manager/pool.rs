//! Worker pool scheduling policies

use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::worker::ScheduleSlice;

use super::schedule::{self, ScheduleDistribution};

/// How the pool decides when requests are issued
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Keep a fixed number of requests in flight
    #[default]
    Concurrency,

    /// Issue requests at a target rate
    RequestRate {
        /// Gap distribution
        #[serde(default)]
        distribution: ScheduleDistribution,
    },

    /// Replay the gaps listed in a file
    CustomInterval {
        /// Intervals file, one gap in microseconds per line
        path: PathBuf,
    },
}

impl LoadPolicy {
    /// Short policy name used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            LoadPolicy::Concurrency => "concurrency",
            LoadPolicy::RequestRate { .. } => "request-rate",
            LoadPolicy::CustomInterval { .. } => "custom-interval",
        }
    }
}

/// Runtime state of the active policy
pub(crate) enum WorkerPool {
    Concurrency,
    RequestRate {
        distribution: ScheduleDistribution,
        rng: StdRng,
    },
    CustomInterval {
        path: PathBuf,
        intervals: Vec<Duration>,
    },
}

impl WorkerPool {
    pub(crate) fn new(policy: LoadPolicy, seed: Option<u64>) -> Self {
        match policy {
            LoadPolicy::Concurrency => WorkerPool::Concurrency,
            LoadPolicy::RequestRate { distribution } => WorkerPool::RequestRate {
                distribution,
                rng: match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                },
            },
            LoadPolicy::CustomInterval { path } => WorkerPool::CustomInterval {
                path,
                intervals: Vec::new(),
            },
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            WorkerPool::Concurrency => "concurrency",
            WorkerPool::RequestRate { .. } => "request-rate",
            WorkerPool::CustomInterval { .. } => "custom-interval",
        }
    }

    /// Whether workers follow a schedule rather than a slot count
    pub(crate) fn is_schedule_based(&self) -> bool {
        !matches!(self, WorkerPool::Concurrency)
    }

    /// Policy-specific initialization, run after inputs and sequences are ready
    pub(crate) fn finalize(&mut self) -> Result<(), ConfigError> {
        if let WorkerPool::CustomInterval { path, intervals } = self {
            *intervals = schedule::read_intervals(path)?;
            tracing::info!(
                path = %path.display(),
                count = intervals.len(),
                rate = schedule::mean_rate(intervals),
                "Loaded custom request intervals"
            );
        }
        Ok(())
    }

    /// Schedule slices for `threads` workers
    ///
    /// `rate` is only used by the request-rate policy.
    pub(crate) fn slices(
        &mut self,
        rate: f64,
        threads: usize,
    ) -> Result<Vec<ScheduleSlice>, ConfigError> {
        let intervals = match self {
            WorkerPool::Concurrency => {
                return Err(ConfigError::InvalidSchedule(
                    "the concurrency pool has no schedule".into(),
                ))
            }
            WorkerPool::RequestRate { distribution, rng } => {
                schedule::rate_intervals(rate, threads, *distribution, rng)?
            }
            WorkerPool::CustomInterval { intervals, .. } => {
                if intervals.is_empty() {
                    return Err(ConfigError::InvalidSchedule(
                        "custom intervals have not been loaded".into(),
                    ));
                }
                intervals.clone()
            }
        };
        Ok(schedule::distribute(&intervals, threads))
    }

    /// Mean rate of the custom intervals
    pub(crate) fn custom_rate(&self) -> Option<f64> {
        match self {
            WorkerPool::CustomInterval { intervals, .. } if !intervals.is_empty() => {
                Some(schedule::mean_rate(intervals))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerPool::Concurrency => f.write_str("Concurrency"),
            WorkerPool::RequestRate { distribution, .. } => f
                .debug_struct("RequestRate")
                .field("distribution", distribution)
                .finish(),
            WorkerPool::CustomInterval { path, intervals } => f
                .debug_struct("CustomInterval")
                .field("path", path)
                .field("intervals", &intervals.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_policy_serialization() {
        let policy: LoadPolicy = serde_json::from_str(r#"{"kind":"request_rate"}"#).unwrap();
        assert_eq!(
            policy,
            LoadPolicy::RequestRate {
                distribution: ScheduleDistribution::Constant
            }
        );

        let policy: LoadPolicy =
            serde_json::from_str(r#"{"kind":"request_rate","distribution":"poisson"}"#).unwrap();
        assert_eq!(policy.name(), "request-rate");

        let json = serde_json::to_string(&LoadPolicy::Concurrency).unwrap();
        assert_eq!(json, r#"{"kind":"concurrency"}"#);
    }

    #[test]
    fn test_concurrency_has_no_schedule() {
        let mut pool = WorkerPool::new(LoadPolicy::Concurrency, None);
        assert!(!pool.is_schedule_based());
        assert!(pool.finalize().is_ok());
        assert!(pool.slices(10.0, 2).is_err());
        assert!(pool.custom_rate().is_none());
    }

    #[test]
    fn test_custom_interval_finalize() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1000\n3000").unwrap();

        let mut pool = WorkerPool::new(
            LoadPolicy::CustomInterval {
                path: file.path().to_path_buf(),
            },
            None,
        );
        assert!(pool.slices(0.0, 2).is_err());

        pool.finalize().unwrap();
        assert!((pool.custom_rate().unwrap() - 500.0).abs() < 1e-6);

        let slices = pool.slices(0.0, 2).unwrap();
        assert_eq!(slices[0].offsets, vec![Duration::ZERO]);
        assert_eq!(slices[1].offsets, vec![Duration::from_millis(1)]);
    }

    #[test]
    fn test_custom_interval_missing_file() {
        let mut pool = WorkerPool::new(
            LoadPolicy::CustomInterval {
                path: PathBuf::from("/nonexistent/intervals"),
            },
            None,
        );
        assert!(matches!(
            pool.finalize(),
            Err(ConfigError::InvalidSchedule(_))
        ));
    }
}
