//! loadgen-core: worker pool orchestration for inference load generation
//!
//! This crate provides the load manager used by every infer-loadgen run:
//!
//! - The [`LoadManager`] and its worker pool policies
//! - Worker threads, their statistics and the pause/resume signal
//! - Sequence id management for stateful models
//! - Collaborator traits (client backends, data loaders, model metadata)
//! - Request records and latency summaries
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod request;
pub mod sequence;
pub mod traits;
pub mod worker;

pub use config::{ConfigError, InputOptions, LoadConfig, SequenceOptions, MAX_SEQUENCE_ID_RANGE};
pub use error::*;
pub use manager::{
    LoadManager, LoadManagerBuilder, LoadPolicy, ManagerPhase, PoolStats, ScheduleDistribution,
};
pub use metrics::*;
pub use model::{ModelDescriptor, TensorSpec};
pub use request::*;
pub use sequence::{SequenceLease, SequenceLengthPolicy, SequenceManager};
pub use traits::*;
pub use worker::{PoolSignal, ThreadStat, WorkerExit};
