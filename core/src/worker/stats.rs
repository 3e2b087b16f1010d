//! Per-worker statistics tracking

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::metrics::{InferStat, RequestRecord, TimestampVector};

/// Why a worker left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The pool told it to stop
    Stopped,
    /// The shared request budget ran out
    BudgetExhausted,
    /// An unrecoverable error was recorded
    Faulted,
}

impl WorkerExit {
    /// Whether the worker left because it was told to
    pub fn is_normal(&self) -> bool {
        !matches!(self, WorkerExit::Faulted)
    }
}

/// Request counters of one worker
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatCounts {
    /// Successfully completed requests
    pub completed: usize,
    /// Failed requests
    pub failed: usize,
}

impl StatCounts {
    /// Total number of finished requests
    pub fn total_requests(&self) -> usize {
        self.completed + self.failed
    }

    /// Success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total_requests() == 0 {
            0.0
        } else {
            self.completed as f64 / self.total_requests() as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatInner {
    records: TimestampVector,
    counts: StatCounts,
    contexts: Vec<InferStat>,
    fault: Option<String>,
    exit: Option<WorkerExit>,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

/// Statistics owned by one worker and read by the manager
///
/// Every access goes through one short lock; the worker never holds it across
/// a request and the manager never holds two `ThreadStat` locks at once.
#[derive(Debug, Default)]
pub struct ThreadStat {
    inner: Mutex<StatInner>,
}

impl ThreadStat {
    /// Create empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of the worker loop
    pub fn start(&self) {
        self.inner.lock().started_at = Some(Instant::now());
    }

    /// Record why the worker loop ended
    pub fn mark_exit(&self, exit: WorkerExit) {
        let mut inner = self.inner.lock();
        inner.exit = Some(exit);
        inner.ended_at = Some(Instant::now());
    }

    /// Exit marker, if the worker has left its loop
    pub fn exit(&self) -> Option<WorkerExit> {
        self.inner.lock().exit
    }

    /// Append one request record and count its outcome
    pub fn record(&self, record: RequestRecord) {
        let mut inner = self.inner.lock();
        if record.success {
            inner.counts.completed += 1;
        } else {
            inner.counts.failed += 1;
        }
        inner.records.push(record);
    }

    /// Store the latest counters of client context `slot`
    pub fn update_context(&self, slot: usize, stat: InferStat) {
        let mut inner = self.inner.lock();
        if inner.contexts.len() <= slot {
            inner.contexts.resize(slot + 1, InferStat::default());
        }
        inner.contexts[slot] = stat;
    }

    /// Record an unrecoverable error
    pub fn record_fault(&self, reason: impl Into<String>) {
        self.inner.lock().fault = Some(reason.into());
    }

    /// Recorded fault, if any
    pub fn fault(&self) -> Option<String> {
        self.inner.lock().fault.clone()
    }

    /// Take every record appended so far, leaving an empty vector behind
    pub fn take_records(&self) -> TimestampVector {
        std::mem::take(&mut self.inner.lock().records)
    }

    /// Completed and failed counters
    pub fn counts(&self) -> StatCounts {
        self.inner.lock().counts
    }

    /// Sum of the counters of every client context of this worker
    pub fn contexts_sum(&self) -> InferStat {
        self.inner
            .lock()
            .contexts
            .iter()
            .fold(InferStat::default(), |acc, stat| acc + *stat)
    }

    /// Time spent in the worker loop
    pub fn elapsed(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        inner.started_at.map(|start| {
            inner
                .ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }
}
