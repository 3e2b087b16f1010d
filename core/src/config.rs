//! Load generation configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sequence::SequenceLengthPolicy;

/// Largest id range the sequence manager will build an arena for
pub const MAX_SEQUENCE_ID_RANGE: u64 = 1 << 20;

/// Load manager configuration
///
/// Scheduling-independent knobs shared by every worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Batch size of every inference request
    pub batch_size: usize,

    /// Upper bound on worker threads
    pub max_threads: usize,

    /// Whether workers may keep several requests in flight
    pub async_mode: bool,

    /// Whether requests use a streaming transport
    pub streaming: bool,

    /// How long a pause waits for workers to reach a suspension point
    pub pause_timeout_ms: u64,

    /// Stop issuing after this many requests across the whole pool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_budget: Option<usize>,

    /// Seed for schedule and sequence-length randomness
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            max_threads: 4,
            async_mode: true,
            streaming: false,
            pause_timeout_ms: 30_000,
            request_budget: None,
            seed: None,
        }
    }
}

impl LoadConfig {
    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the maximum number of worker threads
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Enable or disable async mode
    pub fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    /// Enable or disable streaming
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Set the pool-wide request budget
    pub fn with_request_budget(mut self, budget: usize) -> Self {
        self.request_budget = Some(budget);
        self
    }

    /// Set the randomness seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the pause timeout
    pub fn with_pause_timeout(mut self, timeout: Duration) -> Self {
        self.pause_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Pause timeout as a duration
    pub fn pause_timeout(&self) -> Duration {
        Duration::from_millis(self.pause_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(
                "batch size must be at least 1".into(),
            ));
        }

        if self.max_threads == 0 {
            return Err(ConfigError::InvalidThreads(
                "max threads must be at least 1".into(),
            ));
        }

        if self.streaming && !self.async_mode {
            return Err(ConfigError::InvalidMode(
                "streaming requires async mode".into(),
            ));
        }

        if self.pause_timeout_ms == 0 {
            return Err(ConfigError::InvalidMode(
                "pause timeout must be positive".into(),
            ));
        }

        if let Some(0) = self.request_budget {
            return Err(ConfigError::InvalidBudget(
                "request budget must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Options handed to the data loader by `init_manager`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputOptions {
    /// Length of generated strings for `BYTES` inputs
    pub string_length: usize,

    /// Fixed string used for every `BYTES` input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string_data: Option<String>,

    /// Fill numeric inputs with zeros instead of random values
    pub zero_input: bool,

    /// User data files or directories
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub user_data: Vec<PathBuf>,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            string_length: 128,
            string_data: None,
            zero_input: false,
            user_data: Vec::new(),
        }
    }
}

/// Sequence id pool configuration handed to `init_manager`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceOptions {
    /// First valid sequence id
    pub start_sequence_id: u64,

    /// Number of valid ids starting at `start_sequence_id`
    pub sequence_id_range: u64,

    /// Base length of new sequences
    pub sequence_length: usize,

    /// How a sequence picks its length when (re)started
    pub length_policy: SequenceLengthPolicy,
}

impl Default for SequenceOptions {
    fn default() -> Self {
        Self {
            start_sequence_id: 1,
            sequence_id_range: 1024,
            sequence_length: 20,
            length_policy: SequenceLengthPolicy::default(),
        }
    }
}

impl SequenceOptions {
    /// Create options for the range `[start, start + range)`
    pub fn new(start_sequence_id: u64, sequence_id_range: u64, sequence_length: usize) -> Self {
        Self {
            start_sequence_id,
            sequence_id_range,
            sequence_length,
            ..Default::default()
        }
    }

    /// Set the length policy
    pub fn with_length_policy(mut self, policy: SequenceLengthPolicy) -> Self {
        self.length_policy = policy;
        self
    }

    /// Validate the id range and length settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sequence_id_range == 0 {
            return Err(ConfigError::InvalidSequence(
                "sequence id range must be at least 1".into(),
            ));
        }

        if self.sequence_id_range > MAX_SEQUENCE_ID_RANGE {
            return Err(ConfigError::InvalidSequence(format!(
                "sequence id range {} exceeds the maximum of {}",
                self.sequence_id_range, MAX_SEQUENCE_ID_RANGE
            )));
        }

        if self
            .start_sequence_id
            .checked_add(self.sequence_id_range)
            .is_none()
        {
            return Err(ConfigError::InvalidSequence(
                "start sequence id plus range overflows u64".into(),
            ));
        }

        if self.sequence_length == 0 {
            return Err(ConfigError::InvalidSequence(
                "sequence length must be at least 1".into(),
            ));
        }

        self.length_policy.validate()
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid batch size
    #[error("Invalid batch size: {0}")]
    InvalidBatchSize(String),

    /// Invalid thread count
    #[error("Invalid thread count: {0}")]
    InvalidThreads(String),

    /// Incompatible mode flags
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Invalid request budget
    #[error("Invalid request budget: {0}")]
    InvalidBudget(String),

    /// Invalid sequence range or length
    #[error("Invalid sequence settings: {0}")]
    InvalidSequence(String),

    /// Invalid request rate or schedule
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Invalid concurrency level
    #[error("Invalid concurrency: {0}")]
    InvalidConcurrency(String),

    /// Model descriptor could not be loaded or is inconsistent
    #[error("Invalid model descriptor: {0}")]
    InvalidModel(String),
}
