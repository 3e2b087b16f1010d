//! Collaborator traits consumed by the load manager
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (backends/, inputs/).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::InputOptions;
use crate::metrics::InferStat;
use crate::model::TensorSpec;
use crate::request::{InferRequest, InferResponse, InputTensor};

// ============================================================================
// Client Backend Trait
// ============================================================================

/// One client context able to send inference requests
///
/// A worker owns one context per request slot. Contexts are never shared
/// between workers, so the counters returned by `stat` describe the traffic
/// of exactly one slot.
#[async_trait]
pub trait ClientBackend: Send + Sync {
    /// Backend identifier (e.g., "synthetic", "http")
    fn kind(&self) -> &str;

    /// Send one request and wait for its (final) response
    async fn send(&self, request: &InferRequest) -> Result<InferResponse, BackendError>;

    /// Counters accumulated by this context
    fn stat(&self) -> InferStat;
}

/// Creates client contexts for workers
pub trait ClientBackendFactory: Send + Sync {
    /// Backend identifier
    fn kind(&self) -> &str;

    /// Create the context used by `slot` of worker `worker_id`
    fn create_client(
        &self,
        worker_id: usize,
        slot: usize,
    ) -> Result<Arc<dyn ClientBackend>, BackendError>;
}

/// Backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-success status
    #[error("server returned {status}: {message}")]
    Status {
        /// Status code
        status: u16,
        /// Error body or reason
        message: String,
    },

    /// Request could not be encoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Backend misconfiguration
    #[error("configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Whether the error means further requests cannot succeed
    ///
    /// Fatal errors end the worker and fail the pool's health check. Everything
    /// else is counted as a failed request.
    pub fn is_fatal(&self) -> bool {
        match self {
            BackendError::Config(_) | BackendError::Encode(_) => true,
            BackendError::Status { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            BackendError::Transport(_) | BackendError::Timeout(_) => false,
        }
    }
}

// ============================================================================
// Data Loader Trait
// ============================================================================

/// Prepares and serves request inputs
///
/// Inputs are organised as streams of steps. Synthetic data is a single
/// stream with a single step; user data may hold many streams, and a stateful
/// sequence walks one stream step by step.
pub trait DataLoader: Send + Sync {
    /// Materialize inputs; called once before any worker starts
    fn prepare_inputs(&mut self, options: &InputOptions) -> Result<(), DataError>;

    /// Number of data streams
    fn stream_count(&self) -> usize;

    /// Number of steps in `stream`
    fn step_count(&self, stream: usize) -> usize;

    /// Inputs of one step
    fn inputs(&self, stream: usize, step: usize) -> Result<Arc<Vec<InputTensor>>, DataError>;

    /// Whether the inputs come from user-provided data
    fn uses_user_data(&self) -> bool;
}

/// Data loader errors
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// A user data path could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// User data is malformed
    #[error("malformed data in {path}: {message}")]
    Malformed {
        /// Offending path
        path: PathBuf,
        /// What is wrong
        message: String,
    },

    /// A required input is absent from a step
    #[error("input '{input}' missing from stream {stream} step {step}")]
    MissingInput {
        /// Input name
        input: String,
        /// Stream index
        stream: usize,
        /// Step index
        step: usize,
    },

    /// Requested stream or step does not exist
    #[error("no data for stream {stream} step {step}")]
    OutOfRange {
        /// Stream index
        stream: usize,
        /// Step index
        step: usize,
    },

    /// Inputs were requested before `prepare_inputs` succeeded
    #[error("inputs have not been prepared")]
    NotPrepared,
}

// ============================================================================
// Model Parser Trait
// ============================================================================

/// Read-only view of the model being profiled
pub trait ModelParser: Send + Sync {
    /// Model name
    fn model_name(&self) -> &str;

    /// Model version, if pinned
    fn model_version(&self) -> Option<&str> {
        None
    }

    /// Whether the model is stateful and needs sequence ids
    fn is_sequence(&self) -> bool;

    /// Maximum batch size; `0` means the model does not batch
    fn max_batch_size(&self) -> usize;

    /// Declared inputs
    fn inputs(&self) -> &[TensorSpec];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_fatal() {
        assert!(BackendError::Config("bad url".into()).is_fatal());
        assert!(BackendError::Status {
            status: 404,
            message: "unknown model".into()
        }
        .is_fatal());

        assert!(!BackendError::Status {
            status: 429,
            message: "slow down".into()
        }
        .is_fatal());
        assert!(!BackendError::Status {
            status: 503,
            message: "unavailable".into()
        }
        .is_fatal());
        assert!(!BackendError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!BackendError::Transport("reset".into()).is_fatal());
    }

    #[test]
    fn test_data_error_display() {
        let err = DataError::MissingInput {
            input: "INPUT0".into(),
            stream: 1,
            step: 2,
        };
        assert_eq!(err.to_string(), "input 'INPUT0' missing from stream 1 step 2");
    }
}
