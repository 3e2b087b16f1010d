//! Worker that issues requests at scheduled instants

use std::time::{Duration, Instant};

use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt};

use super::executor::{Claim, InFlight, WorkerCore, IDLE_POLL};
use super::signal::Checkpoint;
use super::stats::WorkerExit;
use super::Worker;

/// Lateness below this is scheduling jitter, not a delayed request
pub(crate) const DELAY_TOLERANCE: Duration = Duration::from_millis(1);

/// Follows its slice of the pool schedule
///
/// In async mode the worker never waits for a response before issuing the
/// next scheduled request. In sync mode each request completes before the
/// next one is considered. A request that goes out after its slot is
/// flagged as delayed.
pub struct ScheduleWorker {
    core: WorkerCore,
}

impl ScheduleWorker {
    pub(crate) fn new(core: WorkerCore) -> Self {
        Self { core }
    }
}

impl Worker for ScheduleWorker {
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
        let mut generation = core.config.generation();
        let mut slice = core.config.schedule();
        let mut index = 0usize;

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

            let current = core.config.generation();
            if current != generation {
                generation = current;
                slice = core.config.schedule();
                index = 0;
                tracing::debug!(worker_id = core.id, generation, "Schedule reloaded");
            }

            if budget_done {
                if inflight.is_empty() {
                    return WorkerExit::BudgetExhausted;
                }
                if let Err(reason) = core.complete_next(&mut inflight).await {
                    return core.fault(reason);
                }
                continue;
            }

            let now = Instant::now();
            let wake_at = match slice.deadline(index) {
                Some(deadline) if deadline <= now => None,
                Some(deadline) => Some(deadline.min(now + IDLE_POLL)),
                None => Some(now + IDLE_POLL),
            };

            if let Some(wake_at) = wake_at {
                if inflight.is_empty() {
                    if core.signal.sleep_until(wake_at) == Checkpoint::Exit {
                        return WorkerExit::Stopped;
                    }
                } else if let Ok(Some(completion)) = tokio::time::timeout_at(
                    tokio::time::Instant::from_std(wake_at),
                    inflight.next(),
                )
                .await
                {
                    if let Err(reason) = core.complete(completion) {
                        return core.fault(reason);
                    }
                }
                continue;
            }

            let due = slice.deadline(index).unwrap_or(now);
            match core.claim(inflight.is_empty()) {
                Claim::Ready(pending) => {
                    let delayed = Instant::now().saturating_duration_since(due) > DELAY_TOLERANCE;
                    let request = core.launch(pending, delayed);
                    index += 1;

                    if core.async_mode {
                        inflight.push(request);
                    } else {
                        let completion = request.await;
                        if let Err(reason) = core.complete(completion) {
                            return core.fault(reason);
                        }
                    }
                }
                Claim::Exhausted => {
                    tracing::debug!(worker_id = core.id, "Request budget exhausted");
                    budget_done = true;
                }
                Claim::Busy if inflight.is_empty() => {}
                Claim::Busy => {
                    if let Err(reason) = core.complete_next(&mut inflight).await {
                        return core.fault(reason);
                    }
                }
                Claim::Fault(reason) => return core.fault(reason),
            }
        }
    }
    .boxed_local()
}
