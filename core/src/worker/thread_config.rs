//! Per-worker configuration written by the manager and read by the worker

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// One worker's share of the pool schedule
///
/// Request `k` is due at `start + cycle * (k / offsets.len()) +
/// offsets[k % offsets.len()]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSlice {
    /// Instant the schedule (re)started; `None` until the pool starts it
    pub start: Option<Instant>,
    /// Offsets of this worker's requests within one cycle
    pub offsets: Vec<Duration>,
    /// Length of one full cycle of the pool schedule
    pub cycle: Duration,
}

impl ScheduleSlice {
    /// Create an unstarted slice
    pub fn new(offsets: Vec<Duration>, cycle: Duration) -> Self {
        Self {
            start: None,
            offsets,
            cycle,
        }
    }

    /// Due instant of this worker's `index`-th request
    pub fn deadline(&self, index: usize) -> Option<Instant> {
        let start = self.start?;
        if self.offsets.is_empty() {
            return None;
        }
        let laps = u32::try_from(index / self.offsets.len()).unwrap_or(u32::MAX);
        Some(start + self.cycle.saturating_mul(laps) + self.offsets[index % self.offsets.len()])
    }
}

/// Settings a worker re-reads between requests
///
/// The manager only changes these while the pool is paused. `generation`
/// is bumped on every schedule change so a worker knows to reload its slice
/// and restart its request index.
#[derive(Debug)]
pub struct ThreadConfig {
    id: usize,
    concurrency: AtomicUsize,
    generation: AtomicU64,
    schedule: Mutex<ScheduleSlice>,
}

impl ThreadConfig {
    /// Create the config of worker `id` with no slots and no schedule
    pub fn new(id: usize) -> Self {
        Self {
            id,
            concurrency: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            schedule: Mutex::new(ScheduleSlice::default()),
        }
    }

    /// Worker id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of requests the worker may keep in flight
    pub fn concurrency(&self) -> usize {
        self.concurrency.load(Ordering::Acquire)
    }

    /// Set the number of in-flight slots
    pub fn set_concurrency(&self, concurrency: usize) {
        self.concurrency.store(concurrency, Ordering::Release);
    }

    /// Schedule generation
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Copy of the current schedule slice
    pub fn schedule(&self) -> ScheduleSlice {
        self.schedule.lock().clone()
    }

    /// Replace the schedule slice
    pub fn set_schedule(&self, slice: ScheduleSlice) {
        *self.schedule.lock() = slice;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Restart the current slice from `start`
    pub fn rewind(&self, start: Instant) {
        self.schedule.lock().start = Some(start);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
