//! KServe v2 inference protocol over HTTP
//!
//! Each client context owns its own `reqwest::Client`. A context lives on one
//! worker's runtime for its whole life, so its connection pool is never
//! shared across runtimes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::Serialize;

use loadgen_core::{
    BackendError, ClientBackend, ClientBackendFactory, InferRequest, InferResponse, InferStat,
    InferStatCounters, InputTensor,
};

use crate::sse::{SseEvent, SseParser};

/// Longest error body kept in a `BackendError::Status`
const MAX_ERROR_BODY: usize = 512;

/// HTTP transport settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout
    pub request_timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Idle connection timeout
    pub pool_idle_timeout: Duration,

    /// TCP keepalive interval
    pub tcp_keepalive: Option<Duration>,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
            user_agent: format!("infer-loadgen/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Factory for KServe v2 HTTP contexts
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    base_url: Url,
    model_version: Option<String>,
    config: HttpConfig,
}

impl HttpBackendFactory {
    /// Create a factory for the server at `base_url`
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Config` if the URL does not parse or is not
    /// http(s).
    pub fn new(base_url: &str, config: HttpConfig) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Config(format!("invalid url '{}': {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BackendError::Config(format!(
                "unsupported scheme '{}'",
                base_url.scheme()
            )));
        }

        Ok(Self {
            base_url,
            model_version: None,
            config,
        })
    }

    /// Pin requests to one model version
    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    /// Server base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn build_client(&self) -> Result<Client, BackendError> {
        let mut builder = Client::builder()
            .timeout(self.config.request_timeout)
            .connect_timeout(self.config.connect_timeout)
            .pool_idle_timeout(self.config.pool_idle_timeout)
            .pool_max_idle_per_host(1)
            .user_agent(&self.config.user_agent);

        if let Some(keepalive) = self.config.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
            .build()
            .map_err(|e| BackendError::Config(format!("failed to build http client: {}", e)))
    }
}

impl ClientBackendFactory for HttpBackendFactory {
    fn kind(&self) -> &str {
        "http"
    }

    fn create_client(
        &self,
        worker_id: usize,
        slot: usize,
    ) -> Result<Arc<dyn ClientBackend>, BackendError> {
        tracing::debug!(worker_id, slot, url = %self.base_url, "Creating http client context");
        Ok(Arc::new(HttpBackend {
            client: self.build_client()?,
            base_url: self.base_url.clone(),
            model_version: self.model_version.clone(),
            request_timeout: self.config.request_timeout,
            counters: InferStatCounters::new(),
        }))
    }
}

/// Sequence control parameters of a stateful request
#[derive(Debug, Serialize)]
struct SequenceParameters {
    sequence_id: u64,
    sequence_start: bool,
    sequence_end: bool,
}

/// KServe v2 inference request body
#[derive(Debug, Serialize)]
struct InferBody<'a> {
    id: String,
    inputs: &'a [InputTensor],
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<SequenceParameters>,
}

/// Encode `request` as a KServe v2 JSON body
pub fn encode_request(request: &InferRequest) -> Result<Vec<u8>, BackendError> {
    let body = InferBody {
        id: request.id.to_string(),
        inputs: &request.inputs,
        parameters: request.sequence.map(|flags| SequenceParameters {
            sequence_id: flags.id,
            sequence_start: flags.start,
            sequence_end: flags.end,
        }),
    };
    serde_json::to_vec(&body).map_err(|e| BackendError::Encode(e.to_string()))
}

/// One KServe v2 client context
#[derive(Debug)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    model_version: Option<String>,
    request_timeout: Duration,
    counters: InferStatCounters,
}

impl HttpBackend {
    /// Endpoint for `model`; streaming requests go to `generate_stream`
    pub fn endpoint(&self, model: &str, streaming: bool) -> Result<Url, BackendError> {
        let mut path = format!("v2/models/{}", model);
        if let Some(version) = &self.model_version {
            path.push_str("/versions/");
            path.push_str(version);
        }
        path.push_str(if streaming { "/generate_stream" } else { "/infer" });

        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let dir = format!("{}/", base.path());
            base.set_path(&dir);
        }
        base.join(&path)
            .map_err(|e| BackendError::Config(format!("invalid endpoint for '{}': {}", model, e)))
    }

    fn transport_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.request_timeout)
        } else {
            BackendError::Transport(e.to_string())
        }
    }

    async fn execute(
        &self,
        url: Url,
        body: Vec<u8>,
        streaming: bool,
    ) -> Result<InferResponse, BackendError> {
        let mut response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut end = MAX_ERROR_BODY;
                while !message.is_char_boundary(end) {
                    end -= 1;
                }
                message.truncate(end);
            }
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        if !streaming {
            let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
            return Ok(InferResponse {
                bytes_received: bytes.len() as u64,
                response_count: 1,
            });
        }

        let mut parser = SseParser::new();
        let mut bytes_received = 0u64;
        let mut response_count = 0usize;
        let mut handle = |event: SseEvent| -> Result<bool, BackendError> {
            if event.is_error() {
                return Err(BackendError::Transport(format!(
                    "stream error: {}",
                    event.data().unwrap_or_default()
                )));
            }
            if event == SseEvent::Done {
                return Ok(false);
            }
            response_count += 1;
            Ok(true)
        };

        'stream: while let Some(chunk) = response.chunk().await.map_err(|e| self.transport_error(e))? {
            bytes_received += chunk.len() as u64;
            for event in parser.feed(&chunk) {
                if !handle(event)? {
                    break 'stream;
                }
            }
        }
        if let Some(event) = parser.finish() {
            handle(event)?;
        }

        Ok(InferResponse {
            bytes_received,
            response_count,
        })
    }
}

#[async_trait]
impl ClientBackend for HttpBackend {
    fn kind(&self) -> &str {
        "http"
    }

    async fn send(&self, request: &InferRequest) -> Result<InferResponse, BackendError> {
        let start = Instant::now();
        let url = self.endpoint(&request.model, request.streaming)?;
        let body = encode_request(request)?;
        self.counters.record_issue(body.len() as u64);

        let result = self.execute(url, body, request.streaming).await;
        match &result {
            Ok(response) => self
                .counters
                .record_success(response.bytes_received, start.elapsed()),
            Err(_) => self.counters.record_failure(start.elapsed()),
        }
        result
    }

    fn stat(&self) -> InferStat {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_core::{RequestId, SequenceFlags, TensorData};

    fn request(sequence: Option<SequenceFlags>) -> InferRequest {
        InferRequest {
            id: RequestId(7),
            model: Arc::from("resnet"),
            batch_size: 1,
            inputs: Arc::new(vec![InputTensor::new(
                "INPUT0",
                vec![1, 2],
                TensorData::Fp32(vec![0.5, 1.0]),
            )]),
            sequence,
            streaming: false,
        }
    }

    fn backend(factory: &HttpBackendFactory) -> HttpBackend {
        HttpBackend {
            client: factory.build_client().unwrap(),
            base_url: factory.base_url.clone(),
            model_version: factory.model_version.clone(),
            request_timeout: factory.config.request_timeout,
            counters: InferStatCounters::new(),
        }
    }

    #[test]
    fn test_factory_rejects_bad_urls() {
        assert!(matches!(
            HttpBackendFactory::new("not a url", HttpConfig::default()),
            Err(BackendError::Config(_))
        ));
        assert!(HttpBackendFactory::new("ftp://host", HttpConfig::default()).is_err());
    }

    #[test]
    fn test_endpoint_paths() {
        let factory = HttpBackendFactory::new("http://localhost:8000", HttpConfig::default())
            .unwrap();
        let client = backend(&factory);
        assert_eq!(
            client.endpoint("resnet", false).unwrap().as_str(),
            "http://localhost:8000/v2/models/resnet/infer"
        );

        let factory = HttpBackendFactory::new("http://gw/prefix", HttpConfig::default())
            .unwrap()
            .with_model_version("3");
        let client = backend(&factory);
        assert_eq!(
            client.endpoint("llm", true).unwrap().as_str(),
            "http://gw/prefix/v2/models/llm/versions/3/generate_stream"
        );
    }

    #[test]
    fn test_encode_request_body() {
        let body = encode_request(&request(None)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["id"], "7");
        assert_eq!(value["inputs"][0]["name"], "INPUT0");
        assert_eq!(value["inputs"][0]["datatype"], "FP32");
        assert_eq!(value["inputs"][0]["shape"], serde_json::json!([1, 2]));
        assert_eq!(value["inputs"][0]["data"], serde_json::json!([0.5, 1.0]));
        assert!(value.get("parameters").is_none());
    }

    #[test]
    fn test_encode_sequence_parameters() {
        let flags = SequenceFlags {
            id: 42,
            start: true,
            end: false,
        };
        let body = encode_request(&request(Some(flags))).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["parameters"]["sequence_id"], 42);
        assert_eq!(value["parameters"]["sequence_start"], true);
        assert_eq!(value["parameters"]["sequence_end"], false);
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let config = HttpConfig::default().with_connect_timeout(Duration::from_secs(2));
        let factory = HttpBackendFactory::new("http://127.0.0.1:1", config).unwrap();
        let client = factory.create_client(0, 0).unwrap();

        let err = client.send(&request(None)).await.unwrap_err();
        assert!(!err.is_fatal());

        let stat = client.stat();
        assert_eq!(stat.issued, 1);
        assert_eq!(stat.failed, 1);
    }
}
