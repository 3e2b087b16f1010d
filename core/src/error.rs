//! Error types for loadgen-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::traits::{BackendError, DataError};

/// Core error type returned by the load manager
#[derive(Error, Debug)]
pub enum LoadError {
    /// Invalid configuration (bad sequence range, batch size, rate, ...)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A required collaborator was not supplied to the builder
    #[error("missing required component: {0}")]
    MissingComponent(&'static str),

    /// The data loader could not prepare inputs
    #[error("input data error: {0}")]
    Input(#[from] DataError),

    /// The client backend could not be created or used
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Operation not offered by the active worker pool
    #[error("{operation} is not supported by the {policy} worker pool")]
    Unsupported {
        /// Name of the rejected operation
        operation: &'static str,
        /// Worker pool kind that rejected it
        policy: &'static str,
    },

    /// Operation is not valid in the manager's current lifecycle phase
    #[error("invalid manager state: {0}")]
    InvalidState(String),

    /// A worker recorded an unrecoverable error
    #[error("worker {worker_id} failed: {reason}")]
    WorkerFault {
        /// Worker identifier
        worker_id: usize,
        /// Recorded failure
        reason: String,
    },

    /// A worker thread terminated without having been told to stop
    #[error("worker {worker_id} exited without being stopped")]
    WorkerExited {
        /// Worker identifier
        worker_id: usize,
    },

    /// Workers did not reach a suspension point in time
    #[error("timed out waiting for workers to pause ({parked} of {active} parked)")]
    PauseTimeout {
        /// Workers parked when the wait gave up
        parked: usize,
        /// Workers that were expected to park
        active: usize,
    },

    /// The OS refused to start a worker thread
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl LoadError {
    /// Create an unsupported-operation error
    pub fn unsupported(operation: &'static str, policy: &'static str) -> Self {
        Self::Unsupported { operation, policy }
    }

    /// Create an invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Whether this is the "not supported" condition
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Whether this error reports a runtime health failure of the pool
    pub fn is_health_failure(&self) -> bool {
        matches!(self, Self::WorkerFault { .. } | Self::WorkerExited { .. })
    }
}

/// Result type alias
pub type LoadResult<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message() {
        let err = LoadError::unsupported("reset_workers", "concurrency");
        assert!(err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "reset_workers is not supported by the concurrency worker pool"
        );
    }

    #[test]
    fn test_health_failure_classification() {
        assert!(LoadError::WorkerExited { worker_id: 3 }.is_health_failure());
        assert!(LoadError::WorkerFault {
            worker_id: 0,
            reason: "boom".into()
        }
        .is_health_failure());
        assert!(!LoadError::invalid_state("stopped").is_health_failure());
    }

    #[test]
    fn test_config_error_converts() {
        let err: LoadError = ConfigError::InvalidBatchSize("zero".into()).into();
        assert!(err.to_string().starts_with("configuration error"));
    }
}
