//! Worker module for issuing inference requests
//!
//! A worker is one OS thread running one loop: **claim -> issue -> record ->
//! repeat**, until the pool tells it to stop. Each worker owns:
//!
//! 1. A [`ThreadStat`] the manager reads (records, counters, faults)
//! 2. A [`ThreadConfig`] the manager writes (slot count, schedule slice)
//! 3. One client context per request slot, created on first use
//! 4. A private current-thread tokio runtime for overlapping requests
//!
//! Workers only suspend between requests: at a [`PoolSignal`] checkpoint
//! every in-flight request of the worker has completed and no sequence id is
//! held.
//!
//! Two kinds exist. [`ConcurrencyWorker`] keeps a fixed number of requests
//! in flight. [`ScheduleWorker`] issues requests at the instants of its
//! schedule slice.
//!
//! # Example
//!
//! ```ignore
//! use loadgen_core::worker::{ThreadConfig, ThreadStat, WorkerBuilder};
//!
//! let config = Arc::new(ThreadConfig::new(0));
//! config.set_concurrency(4);
//! let worker = WorkerBuilder::new(0)
//!     .stat(Arc::new(ThreadStat::new()))
//!     .signal(signal)
//!     .thread_config(config)
//!     .issuer(issuer)
//!     .factory(factory)
//!     .build_concurrency()?;
//! ```

mod budget;
mod builder;
mod concurrency;
mod executor;
mod issuer;
mod schedule;
mod signal;
mod stats;
mod thread_config;

pub use budget::RequestBudget;
pub use builder::WorkerBuilder;
pub use concurrency::ConcurrencyWorker;
pub use issuer::{Completion, RequestIssuer};
pub use schedule::ScheduleWorker;
pub use signal::{Checkpoint, PoolPhase, PoolSignal};
pub use stats::{StatCounts, ThreadStat, WorkerExit};
pub use thread_config::{ScheduleSlice, ThreadConfig};

pub(crate) use executor::spawn_worker;

/// A load-generating loop bound to one OS thread
pub trait Worker: Send {
    /// Worker identifier, unique within the pool
    fn id(&self) -> usize;

    /// Run until the pool stops, the request budget runs out or a fatal
    /// error is recorded. The exit reason is left in the worker's `ThreadStat`.
    fn run(&mut self);
}

#[cfg(test)]
mod tests;
