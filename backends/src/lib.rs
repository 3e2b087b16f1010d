//! Client backend implementations for infer-loadgen
//!
//! This crate provides implementations of the `ClientBackendFactory` and
//! `ClientBackend` traits:
//!
//! - Synthetic: in-process backend with configurable latency and failures
//! - HTTP: KServe v2 inference protocol over reqwest

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod http;
pub mod sse;
pub mod synthetic;

pub use http::{HttpBackend, HttpBackendFactory, HttpConfig};
pub use sse::{SseEvent, SseParser};
pub use synthetic::{SyntheticBackend, SyntheticBackendFactory, SyntheticConfig};
