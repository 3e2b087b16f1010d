//! Load manager: worker pool lifecycle and statistics
//!
//! The [`LoadManager`] coordinates a pool of worker threads:
//! - Spawning workers and handing each its slot count or schedule slice
//! - Pausing, resuming and stopping them through a shared signal
//! - Aggregating per-worker records and client counters on request
//!
//! Three pool policies are supported. The concurrency pool keeps a number of
//! requests in flight; the request-rate and custom-interval pools issue
//! requests on a precomputed schedule.
//!
//! # Example
//!
//! ```ignore
//! use loadgen_core::{LoadManagerBuilder, LoadPolicy};
//!
//! let mut manager = LoadManagerBuilder::new()
//!     .policy(LoadPolicy::Concurrency)
//!     .model(model)
//!     .backend_factory(factory)
//!     .data_loader(loader)
//!     .build()?;
//!
//! manager.init_manager(&InputOptions::default(), &SequenceOptions::default())?;
//! manager.change_concurrency_level(4)?;
//!
//! let mut window = TimestampVector::new();
//! manager.swap_timestamps(&mut window)?;
//! manager.stop_worker_threads();
//! ```

mod aggregator;
mod builder;
mod executor;
mod pool;
mod schedule;

pub use aggregator::{
    aggregate_thread_stats, count_completed, drain_records, sum_client_stats, PoolStats,
};
pub use builder::LoadManagerBuilder;
pub use executor::{LoadManager, ManagerPhase};
pub use pool::LoadPolicy;
pub use schedule::{
    distribute, mean_rate, parse_intervals, rate_intervals, read_intervals, ScheduleDistribution,
    MAX_REQUEST_GAP, POISSON_EVENTS_PER_THREAD,
};
