//! In-process backend that simulates an inference server
//!
//! Useful for dry runs of a configuration and for exercising the load
//! manager without a server. Latency is drawn uniformly from a configured
//! range; every Nth request across the factory's contexts can be failed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use loadgen_core::{
    BackendError, ClientBackend, ClientBackendFactory, InferRequest, InferResponse, InferStat,
    InferStatCounters,
};

/// Synthetic backend behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Lower bound of the simulated latency
    pub min_latency: Duration,

    /// Upper bound of the simulated latency
    pub max_latency: Duration,

    /// Fail every Nth request (transient error)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_every: Option<u64>,

    /// Bytes reported per response
    pub response_bytes: u64,

    /// Responses per request in streaming mode
    pub stream_responses: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            min_latency: Duration::from_millis(1),
            max_latency: Duration::from_millis(5),
            fail_every: None,
            response_bytes: 64,
            stream_responses: 4,
        }
    }
}

impl SyntheticConfig {
    /// Set the latency range
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency = min;
        self.max_latency = max;
        self
    }

    /// Fail every Nth request
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    fn validate(&self) -> Result<(), BackendError> {
        if self.min_latency > self.max_latency {
            return Err(BackendError::Config(format!(
                "min latency {:?} exceeds max latency {:?}",
                self.min_latency, self.max_latency
            )));
        }
        if self.fail_every == Some(0) {
            return Err(BackendError::Config("fail_every must be at least 1".into()));
        }
        Ok(())
    }
}

/// Factory for synthetic contexts sharing one request counter
#[derive(Debug)]
pub struct SyntheticBackendFactory {
    config: SyntheticConfig,
    sent: Arc<AtomicU64>,
}

impl SyntheticBackendFactory {
    /// Create a factory
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Config` for an inverted latency range or a
    /// zero failure period.
    pub fn new(config: SyntheticConfig) -> Result<Self, BackendError> {
        config.validate()?;
        Ok(Self {
            config,
            sent: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Requests sent through every context so far
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

impl ClientBackendFactory for SyntheticBackendFactory {
    fn kind(&self) -> &str {
        "synthetic"
    }

    fn create_client(
        &self,
        worker_id: usize,
        slot: usize,
    ) -> Result<Arc<dyn ClientBackend>, BackendError> {
        tracing::debug!(worker_id, slot, "Creating synthetic client context");
        Ok(Arc::new(SyntheticBackend {
            config: self.config.clone(),
            sent: Arc::clone(&self.sent),
            counters: InferStatCounters::new(),
        }))
    }
}

/// One synthetic client context
#[derive(Debug)]
pub struct SyntheticBackend {
    config: SyntheticConfig,
    sent: Arc<AtomicU64>,
    counters: InferStatCounters,
}

impl SyntheticBackend {
    fn sample_latency(&self) -> Duration {
        let (min, max) = (self.config.min_latency, self.config.max_latency);
        if min == max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

#[async_trait]
impl ClientBackend for SyntheticBackend {
    fn kind(&self) -> &str {
        "synthetic"
    }

    async fn send(&self, request: &InferRequest) -> Result<InferResponse, BackendError> {
        let start = Instant::now();
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.record_issue(request.payload_bytes() as u64);

        let latency = self.sample_latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if matches!(self.config.fail_every, Some(every) if n % every == 0) {
            self.counters.record_failure(start.elapsed());
            return Err(BackendError::Status {
                status: 503,
                message: format!("synthetic failure on request {}", n),
            });
        }

        let response_count = if request.streaming {
            self.config.stream_responses.max(1)
        } else {
            1
        };
        let bytes_received = self.config.response_bytes * response_count as u64;
        self.counters.record_success(bytes_received, start.elapsed());

        Ok(InferResponse {
            bytes_received,
            response_count,
        })
    }

    fn stat(&self) -> InferStat {
        self.counters.snapshot()
    }
}
