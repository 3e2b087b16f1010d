//! Request construction and dispatch

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::metrics::RequestRecord;
use crate::request::{InferRequest, RequestId};
use crate::sequence::{SequenceLease, SequenceManager};
use crate::traits::{BackendError, ClientBackend, DataError, DataLoader};

/// Finished request handed back to the worker that issued it
#[derive(Debug)]
pub struct Completion {
    /// Client context slot that carried the request
    pub slot: usize,
    /// Timing record
    pub record: RequestRecord,
    /// Failure, if the request did not succeed
    pub error: Option<BackendError>,
}

/// Builds requests from the shared data loader and sends them
///
/// Cloned into every worker. Everything it holds is shared read-only, apart
/// from the pool-wide request id counter.
#[derive(Clone)]
pub struct RequestIssuer {
    model: Arc<str>,
    batch_size: usize,
    streaming: bool,
    loader: Arc<dyn DataLoader>,
    sequences: Option<Arc<SequenceManager>>,
    request_ids: Arc<AtomicU64>,
}

impl RequestIssuer {
    /// Create an issuer for `model`
    pub fn new(
        model: impl Into<Arc<str>>,
        batch_size: usize,
        streaming: bool,
        loader: Arc<dyn DataLoader>,
        request_ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            model: model.into(),
            batch_size,
            streaming,
            loader,
            sequences: None,
            request_ids,
        }
    }

    /// Attach the sequence id pool of a stateful model
    pub fn with_sequences(mut self, sequences: Arc<SequenceManager>) -> Self {
        self.sequences = Some(sequences);
        self
    }

    /// Sequence id pool, for stateful models
    pub fn sequences(&self) -> Option<&Arc<SequenceManager>> {
        self.sequences.as_ref()
    }

    /// Build the next request
    ///
    /// A sequence request walks the stream chosen for its sequence. Other
    /// requests read stream `worker_id` and advance one step per request the
    /// worker has issued.
    pub fn prepare(
        &self,
        worker_id: usize,
        issued: u64,
        lease: Option<&SequenceLease>,
    ) -> Result<InferRequest, DataError> {
        let streams = self.loader.stream_count();
        if streams == 0 {
            return Err(DataError::NotPrepared);
        }

        let (stream, position) = match lease {
            Some(lease) => (lease.stream() % streams, lease.step()),
            None => (worker_id % streams, issued as usize),
        };
        let step = position % self.loader.step_count(stream).max(1);

        Ok(InferRequest {
            id: RequestId(self.request_ids.fetch_add(1, Ordering::Relaxed)),
            model: Arc::clone(&self.model),
            batch_size: self.batch_size,
            inputs: self.loader.inputs(stream, step)?,
            sequence: lease.map(SequenceLease::flags),
            streaming: self.streaming,
        })
    }

    /// Send `request` through `client`
    ///
    /// The lease moves into the future and is released once the response
    /// (or error) arrives, so the next request of the sequence cannot overtake
    /// this one.
    pub fn issue(
        &self,
        client: Arc<dyn ClientBackend>,
        slot: usize,
        request: InferRequest,
        lease: Option<SequenceLease>,
        delayed: bool,
    ) -> BoxFuture<'static, Completion> {
        let start = Instant::now();
        async move {
            let result = client.send(&request).await;
            let end = Instant::now();

            let record = RequestRecord {
                start,
                end,
                sequence_id: lease.as_ref().map(SequenceLease::id),
                sequence_end: lease.as_ref().is_some_and(SequenceLease::is_end),
                delayed,
                success: result.is_ok(),
            };
            drop(lease);

            Completion {
                slot,
                record,
                error: result.err(),
            }
        }
        .boxed()
    }
}

impl std::fmt::Debug for RequestIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestIssuer")
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("streaming", &self.streaming)
            .field("sequences", &self.sequences)
            .finish()
    }
}
