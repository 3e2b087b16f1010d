//! Shared worker state and the worker thread entry point

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures::future::{BoxFuture, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};

use crate::request::InferRequest;
use crate::sequence::SequenceLease;
use crate::traits::{ClientBackend, ClientBackendFactory};

use super::budget::RequestBudget;
use super::issuer::{Completion, RequestIssuer};
use super::signal::PoolSignal;
use super::stats::{ThreadStat, WorkerExit};
use super::thread_config::ThreadConfig;
use super::Worker;

/// How long a worker with nothing in flight waits for a sequence id
pub(crate) const LEASE_WAIT: Duration = Duration::from_millis(20);

/// Poll interval of a worker with nothing to do
pub(crate) const IDLE_POLL: Duration = Duration::from_millis(50);

/// Requests currently owned by one worker
pub(crate) type InFlight = FuturesUnordered<BoxFuture<'static, Completion>>;

/// A request ready to be sent
pub(crate) struct Pending {
    slot: usize,
    client: Arc<dyn ClientBackend>,
    request: InferRequest,
    lease: Option<SequenceLease>,
}

/// Outcome of trying to line up the next request
pub(crate) enum Claim {
    /// Request built, budget claimed, sequence id held
    Ready(Pending),
    /// The request budget is used up
    Exhausted,
    /// No sequence id was free; nothing was claimed
    Busy,
    /// Unrecoverable error
    Fault(String),
}

/// State every worker kind shares
pub(crate) struct WorkerCore {
    pub(crate) id: usize,
    pub(crate) stat: Arc<ThreadStat>,
    pub(crate) signal: Arc<PoolSignal>,
    pub(crate) config: Arc<ThreadConfig>,
    pub(crate) async_mode: bool,
    issuer: RequestIssuer,
    factory: Arc<dyn ClientBackendFactory>,
    budget: Arc<RequestBudget>,
    clients: Vec<Arc<dyn ClientBackend>>,
    idle_slots: Vec<usize>,
    issued: u64,
}

impl WorkerCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        stat: Arc<ThreadStat>,
        signal: Arc<PoolSignal>,
        config: Arc<ThreadConfig>,
        issuer: RequestIssuer,
        factory: Arc<dyn ClientBackendFactory>,
        budget: Arc<RequestBudget>,
        async_mode: bool,
    ) -> Self {
        Self {
            id,
            stat,
            signal,
            config,
            async_mode,
            issuer,
            factory,
            budget,
            clients: Vec::new(),
            idle_slots: Vec::new(),
            issued: 0,
        }
    }

    /// Drive `body` on a private current-thread runtime and record the exit
    pub(crate) fn run_loop<F>(&mut self, body: F)
    where
        F: for<'a> FnOnce(&'a mut WorkerCore) -> LocalBoxFuture<'a, WorkerExit>,
    {
        self.stat.start();
        tracing::debug!(worker_id = self.id, "Worker started");

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.fault(format!("failed to build worker runtime: {}", e));
                self.stat.mark_exit(WorkerExit::Faulted);
                return;
            }
        };

        let exit = runtime.block_on(body(self));
        self.stat.mark_exit(exit);

        let counts = self.stat.counts();
        tracing::debug!(
            worker_id = self.id,
            completed = counts.completed,
            failed = counts.failed,
            exit = ?exit,
            elapsed_ms = ?self.stat.elapsed().map(|d| d.as_millis()),
            "Worker finished"
        );
    }

    /// Line up the next request
    ///
    /// With `may_block` the worker waits briefly for a sequence id; it must
    /// only do so with nothing in flight, since its own in-flight requests
    /// cannot complete while the thread is blocked.
    pub(crate) fn claim(&mut self, may_block: bool) -> Claim {
        if !self.budget.try_claim() {
            return Claim::Exhausted;
        }

        let lease = match self.issuer.sequences() {
            Some(sequences) => {
                let lease = if may_block {
                    sequences.acquire_timeout(LEASE_WAIT)
                } else {
                    sequences.acquire()
                };
                match lease {
                    Some(lease) => Some(lease),
                    None => {
                        self.budget.unclaim();
                        return Claim::Busy;
                    }
                }
            }
            None => None,
        };

        let request = match self.issuer.prepare(self.id, self.issued, lease.as_ref()) {
            Ok(request) => request,
            Err(e) => return Claim::Fault(format!("failed to prepare request: {}", e)),
        };

        let (slot, client) = match self.take_slot() {
            Ok(taken) => taken,
            Err(reason) => return Claim::Fault(reason),
        };

        self.issued += 1;
        Claim::Ready(Pending {
            slot,
            client,
            request,
            lease,
        })
    }

    /// Start sending a lined-up request
    pub(crate) fn launch(&self, pending: Pending, delayed: bool) -> BoxFuture<'static, Completion> {
        let Pending {
            slot,
            client,
            request,
            lease,
        } = pending;
        self.issuer.issue(client, slot, request, lease, delayed)
    }

    /// Record a finished request; `Err` carries a fatal failure
    pub(crate) fn complete(&mut self, completion: Completion) -> Result<(), String> {
        let Completion {
            slot,
            record,
            error,
        } = completion;

        // Context counters first, so a visible record is always reflected in them
        if let Some(client) = self.clients.get(slot) {
            self.stat.update_context(slot, client.stat());
        }
        self.stat.record(record);
        self.idle_slots.push(slot);

        match error {
            None => Ok(()),
            Some(e) if e.is_fatal() => Err(e.to_string()),
            Some(e) => {
                tracing::warn!(worker_id = self.id, error = %e, "Request failed");
                Ok(())
            }
        }
    }

    /// Wait for one in-flight request and record it
    pub(crate) async fn complete_next(&mut self, inflight: &mut InFlight) -> Result<(), String> {
        match inflight.next().await {
            Some(completion) => self.complete(completion),
            None => Ok(()),
        }
    }

    /// Wait for every in-flight request and record it
    pub(crate) async fn drain(&mut self, inflight: &mut InFlight) -> Result<(), String> {
        while let Some(completion) = inflight.next().await {
            self.complete(completion)?;
        }
        Ok(())
    }

    /// Record a fault and return the matching exit
    pub(crate) fn fault(&self, reason: String) -> WorkerExit {
        tracing::error!(worker_id = self.id, reason = %reason, "Worker fault");
        self.stat.record_fault(reason);
        WorkerExit::Faulted
    }

    fn take_slot(&mut self) -> Result<(usize, Arc<dyn ClientBackend>), String> {
        if let Some(slot) = self.idle_slots.pop() {
            return Ok((slot, Arc::clone(&self.clients[slot])));
        }

        let slot = self.clients.len();
        let client = self
            .factory
            .create_client(self.id, slot)
            .map_err(|e| format!("failed to create client context {}: {}", slot, e))?;
        self.clients.push(Arc::clone(&client));
        Ok((slot, client))
    }
}

/// Decrements the live-worker count when the thread leaves, even on panic
struct ExitGuard(Arc<PoolSignal>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.deregister_worker();
    }
}

/// Start `worker` on its own named OS thread
pub(crate) fn spawn_worker(
    mut worker: Box<dyn Worker>,
    signal: Arc<PoolSignal>,
) -> io::Result<JoinHandle<()>> {
    let id = worker.id();
    signal.register_worker();

    let guard_signal = Arc::clone(&signal);
    let spawned = thread::Builder::new()
        .name(format!("loadgen-worker-{}", id))
        .spawn(move || {
            let _guard = ExitGuard(guard_signal);
            worker.run();
        });

    if spawned.is_err() {
        signal.deregister_worker();
    }
    spawned
}
