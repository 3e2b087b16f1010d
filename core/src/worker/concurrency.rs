//! Worker that keeps a fixed number of requests in flight

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use super::executor::{Claim, InFlight, WorkerCore, IDLE_POLL};
use super::signal::Checkpoint;
use super::stats::WorkerExit;
use super::Worker;

/// Issues a new request as soon as one of its slots frees up
///
/// The slot count comes from the worker's `ThreadConfig` and is re-read
/// between requests, so the manager can change it while the pool is paused.
/// A worker with zero slots idles at its suspension point.
pub struct ConcurrencyWorker {
    core: WorkerCore,
}

impl ConcurrencyWorker {
    pub(crate) fn new(core: WorkerCore) -> Self {
        Self { core }
    }
}

impl Worker for ConcurrencyWorker {
    fn id(&self) -> usize {
        self.core.id
    }

    fn run(&mut self) {
        self.core.run_loop(drive);
    }
}

fn drive(core: &mut WorkerCore) -> LocalBoxFuture<'_, WorkerExit> {
    async move {
        let mut inflight = InFlight::new();
        let mut budget_done = false;

        loop {
            if !core.signal.is_running() {
                if let Err(reason) = core.drain(&mut inflight).await {
                    return core.fault(reason);
                }
                match core.signal.checkpoint() {
                    Checkpoint::Exit => return WorkerExit::Stopped,
                    Checkpoint::Continue => continue,
                }
            }

            if budget_done && inflight.is_empty() {
                return WorkerExit::BudgetExhausted;
            }

            let slots = core.config.concurrency();
            if slots == 0 && inflight.is_empty() {
                if core.signal.idle_for(IDLE_POLL) == Checkpoint::Exit {
                    return WorkerExit::Stopped;
                }
                continue;
            }

            if !budget_done && inflight.len() < slots {
                match core.claim(inflight.is_empty()) {
                    Claim::Ready(pending) => {
                        inflight.push(core.launch(pending, false));
                        continue;
                    }
                    Claim::Exhausted => {
                        tracing::debug!(worker_id = core.id, "Request budget exhausted");
                        budget_done = true;
                    }
                    Claim::Busy if inflight.is_empty() => continue,
                    Claim::Busy => {}
                    Claim::Fault(reason) => return core.fault(reason),
                }
            }

            if let Err(reason) = core.complete_next(&mut inflight).await {
                return core.fault(reason);
            }
        }
    }
    .boxed_local()
}
