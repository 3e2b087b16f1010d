//! Inference request and response data structures
//!
//! These types travel from the worker to a `ClientBackend`. They are
//! transport-neutral; the HTTP backend serializes them as KServe v2 JSON.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unique identifier for a request within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Tensor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Datatype {
    /// Boolean
    Bool,
    /// Unsigned 8-bit integer
    Uint8,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit float
    Fp32,
    /// 64-bit float
    Fp64,
    /// Variable-length byte strings
    Bytes,
}

impl Datatype {
    /// Size of one element in bytes, `None` for variable-length types
    pub fn element_size(&self) -> Option<usize> {
        match self {
            Datatype::Bool | Datatype::Uint8 => Some(1),
            Datatype::Int32 | Datatype::Fp32 => Some(4),
            Datatype::Int64 | Datatype::Fp64 => Some(8),
            Datatype::Bytes => None,
        }
    }
}

/// Flattened tensor contents
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TensorData {
    /// `BOOL` values
    Bool(Vec<bool>),
    /// `UINT8` values
    Uint8(Vec<u8>),
    /// `INT32` values
    Int32(Vec<i32>),
    /// `INT64` values
    Int64(Vec<i64>),
    /// `FP32` values
    Fp32(Vec<f32>),
    /// `FP64` values
    Fp64(Vec<f64>),
    /// `BYTES` values
    Bytes(Vec<String>),
}

impl TensorData {
    /// Element type of this data
    pub fn datatype(&self) -> Datatype {
        match self {
            TensorData::Bool(_) => Datatype::Bool,
            TensorData::Uint8(_) => Datatype::Uint8,
            TensorData::Int32(_) => Datatype::Int32,
            TensorData::Int64(_) => Datatype::Int64,
            TensorData::Fp32(_) => Datatype::Fp32,
            TensorData::Fp64(_) => Datatype::Fp64,
            TensorData::Bytes(_) => Datatype::Bytes,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            TensorData::Bool(v) => v.len(),
            TensorData::Uint8(v) => v.len(),
            TensorData::Int32(v) => v.len(),
            TensorData::Int64(v) => v.len(),
            TensorData::Fp32(v) => v.len(),
            TensorData::Fp64(v) => v.len(),
            TensorData::Bytes(v) => v.len(),
        }
    }

    /// Whether the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialized size in bytes (`BYTES` elements carry a 4-byte length prefix)
    pub fn byte_size(&self) -> usize {
        match self {
            TensorData::Bytes(v) => v.iter().map(|s| 4 + s.len()).sum(),
            other => other.len() * other.datatype().element_size().unwrap_or(0),
        }
    }

    /// Repeat the contents `times` times (used to fill a batch)
    pub fn repeated(&self, times: usize) -> Self {
        fn rep<T: Clone>(v: &[T], times: usize) -> Vec<T> {
            let mut out = Vec::with_capacity(v.len() * times);
            for _ in 0..times {
                out.extend_from_slice(v);
            }
            out
        }

        match self {
            TensorData::Bool(v) => TensorData::Bool(rep(v, times)),
            TensorData::Uint8(v) => TensorData::Uint8(rep(v, times)),
            TensorData::Int32(v) => TensorData::Int32(rep(v, times)),
            TensorData::Int64(v) => TensorData::Int64(rep(v, times)),
            TensorData::Fp32(v) => TensorData::Fp32(rep(v, times)),
            TensorData::Fp64(v) => TensorData::Fp64(rep(v, times)),
            TensorData::Bytes(v) => TensorData::Bytes(rep(v, times)),
        }
    }
}

/// One named input tensor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputTensor {
    /// Input name as declared by the model
    pub name: String,
    /// Full shape, including the batch dimension when the model batches
    pub shape: Vec<i64>,
    /// Element type
    pub datatype: Datatype,
    /// Flattened contents
    pub data: TensorData,
}

impl InputTensor {
    /// Create a tensor; the datatype is taken from the data
    pub fn new(name: impl Into<String>, shape: Vec<i64>, data: TensorData) -> Self {
        Self {
            name: name.into(),
            shape,
            datatype: data.datatype(),
            data,
        }
    }

    /// Serialized payload size in bytes
    pub fn byte_size(&self) -> usize {
        self.data.byte_size()
    }
}

/// Sequence control flags attached to a stateful request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFlags {
    /// Sequence (correlation) id
    pub id: u64,
    /// First request of the sequence
    pub start: bool,
    /// Last request of the sequence
    pub end: bool,
}

/// An inference request ready to be sent by a backend
#[derive(Debug, Clone)]
pub struct InferRequest {
    /// Request identifier
    pub id: RequestId,
    /// Target model name
    pub model: Arc<str>,
    /// Batch size of the request
    pub batch_size: usize,
    /// Input tensors, shared with the data loader
    pub inputs: Arc<Vec<InputTensor>>,
    /// Sequence flags for stateful models
    pub sequence: Option<SequenceFlags>,
    /// Whether the response is streamed
    pub streaming: bool,
}

impl InferRequest {
    /// Total input payload size in bytes
    pub fn payload_bytes(&self) -> usize {
        self.inputs.iter().map(InputTensor::byte_size).sum()
    }
}

/// Outcome of a successful request as seen by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InferResponse {
    /// Bytes read from the server
    pub bytes_received: u64,
    /// Number of responses received (more than one when streaming)
    pub response_count: usize,
}
