//! Sequence id arena with claim/release leases

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ConfigError, SequenceOptions};
use crate::request::SequenceFlags;

use super::policy::SequenceLengthPolicy;

/// Length bookkeeping of one sequence id; only touched by the lease holder
#[derive(Debug, Default, Clone, Copy)]
struct SequenceState {
    remaining: usize,
    target: usize,
    stream: usize,
}

#[derive(Debug)]
struct SequenceSlot {
    id: u64,
    in_flight: AtomicBool,
    state: Mutex<SequenceState>,
}

/// Point-in-time view of one sequence id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSnapshot {
    /// Sequence id
    pub id: u64,
    /// Requests left before the sequence ends (0 = will restart on next claim)
    pub remaining: usize,
    /// Length chosen when the sequence last started
    pub target: usize,
    /// Whether a worker currently holds the id
    pub in_flight: bool,
}

/// Owns the pool of valid sequence ids
///
/// One slot per id in `[start, start + range)`. A worker claims an id for
/// exactly one request through a [`SequenceLease`]; the id is unavailable to
/// every other worker until the lease is dropped, which keeps the requests of
/// a sequence strictly ordered.
pub struct SequenceManager {
    slots: Box<[SequenceSlot]>,
    cursor: AtomicUsize,
    base_length: usize,
    policy: SequenceLengthPolicy,
    /// Step count of each user-data stream; empty for synthetic data
    stream_lengths: Vec<usize>,
    rng: Mutex<StdRng>,
    waiters: AtomicUsize,
    release_lock: Mutex<()>,
    released: Condvar,
}

impl SequenceManager {
    /// Build the id arena
    ///
    /// `stream_lengths` lists the step count of each user-data stream. When it
    /// is non-empty a new sequence walks a randomly chosen stream and takes
    /// that stream's length instead of sampling the length policy.
    pub fn new(
        options: &SequenceOptions,
        stream_lengths: Vec<usize>,
        seed: Option<u64>,
    ) -> Result<Self, ConfigError> {
        options.validate()?;

        if stream_lengths.contains(&0) {
            return Err(ConfigError::InvalidSequence(
                "user data stream without steps".into(),
            ));
        }

        let slots = (0..options.sequence_id_range)
            .map(|offset| SequenceSlot {
                id: options.start_sequence_id + offset,
                in_flight: AtomicBool::new(false),
                state: Mutex::new(SequenceState::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            slots,
            cursor: AtomicUsize::new(0),
            base_length: options.sequence_length,
            policy: options.length_policy,
            stream_lengths,
            rng: Mutex::new(rng),
            waiters: AtomicUsize::new(0),
            release_lock: Mutex::new(()),
            released: Condvar::new(),
        })
    }

    /// Valid ids
    pub fn id_range(&self) -> Range<u64> {
        let start = self.slots.first().map(|s| s.id).unwrap_or(0);
        start..start + self.slots.len() as u64
    }

    /// Number of ids in the pool
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Configured length policy
    pub fn policy(&self) -> SequenceLengthPolicy {
        self.policy
    }

    /// Claim a free id without blocking
    ///
    /// Ids are scanned round-robin from a shared cursor so load spreads over
    /// the whole range. Returns `None` when every id is in flight.
    pub fn acquire(self: &Arc<Self>) -> Option<SequenceLease> {
        let n = self.slots.len();
        let begin = self.cursor.fetch_add(1, Ordering::Relaxed) % n;

        (0..n).map(|k| (begin + k) % n).find_map(|index| {
            self.slots[index]
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
                .ok()
                .map(|_| self.claim(index))
        })
    }

    /// Claim a free id, waiting up to `timeout` for one to be released
    pub fn acquire_timeout(self: &Arc<Self>, timeout: Duration) -> Option<SequenceLease> {
        if let Some(lease) = self.acquire() {
            return Some(lease);
        }

        let deadline = Instant::now() + timeout;
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.release_lock.lock();
        let lease = loop {
            if let Some(lease) = self.acquire() {
                break Some(lease);
            }
            if self.released.wait_until(&mut guard, deadline).timed_out() {
                break self.acquire();
            }
        };
        drop(guard);
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        lease
    }

    /// Number of ids currently held
    pub fn in_flight_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.in_flight.load(Ordering::Acquire))
            .count()
    }

    /// Whether `id` is currently held
    pub fn is_in_flight(&self, id: u64) -> bool {
        self.slot_index(id)
            .map(|i| self.slots[i].in_flight.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Snapshot of one id
    pub fn snapshot(&self, id: u64) -> Option<SequenceSnapshot> {
        let slot = &self.slots[self.slot_index(id)?];
        let state = *slot.state.lock();
        Some(SequenceSnapshot {
            id,
            remaining: state.remaining,
            target: state.target,
            in_flight: slot.in_flight.load(Ordering::Acquire),
        })
    }

    fn slot_index(&self, id: u64) -> Option<usize> {
        let range = self.id_range();
        range.contains(&id).then(|| (id - range.start) as usize)
    }

    /// Advance the sequence held in `index`; the caller owns its in-flight flag
    fn claim(self: &Arc<Self>, index: usize) -> SequenceLease {
        let slot = &self.slots[index];
        let mut state = slot.state.lock();

        if state.remaining == 0 {
            self.reseed(&mut state);
        }

        let step = state.target - state.remaining;
        state.remaining -= 1;

        SequenceLease {
            manager: Arc::clone(self),
            index,
            id: slot.id,
            start: step == 0,
            end: state.remaining == 0,
            stream: state.stream,
            step,
        }
    }

    fn reseed(&self, state: &mut SequenceState) {
        let mut rng = self.rng.lock();
        if self.stream_lengths.is_empty() {
            state.stream = 0;
            state.target = self.policy.sample(self.base_length, &mut *rng);
        } else {
            state.stream = rng.gen_range(0..self.stream_lengths.len());
            state.target = self.stream_lengths[state.stream];
        }
        state.remaining = state.target;
    }

    fn release(&self, index: usize) {
        self.slots[index].in_flight.store(false, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            let _guard = self.release_lock.lock();
            self.released.notify_all();
        }
    }
}

impl std::fmt::Debug for SequenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceManager")
            .field("id_range", &self.id_range())
            .field("base_length", &self.base_length)
            .field("policy", &self.policy)
            .field("streams", &self.stream_lengths.len())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

/// Exclusive hold on one sequence id for one request
///
/// Dropping the lease releases the id, whether the request succeeded,
/// failed, or never got sent.
pub struct SequenceLease {
    manager: Arc<SequenceManager>,
    index: usize,
    id: u64,
    start: bool,
    end: bool,
    stream: usize,
    step: usize,
}

impl SequenceLease {
    /// Sequence id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// First request of the sequence
    pub fn is_start(&self) -> bool {
        self.start
    }

    /// Last request of the sequence
    pub fn is_end(&self) -> bool {
        self.end
    }

    /// User-data stream walked by this sequence
    pub fn stream(&self) -> usize {
        self.stream
    }

    /// Position of this request within the sequence
    pub fn step(&self) -> usize {
        self.step
    }

    /// Flags to attach to the request
    pub fn flags(&self) -> SequenceFlags {
        SequenceFlags {
            id: self.id,
            start: self.start,
            end: self.end,
        }
    }
}

impl Drop for SequenceLease {
    fn drop(&mut self) {
        self.manager.release(self.index);
    }
}

impl std::fmt::Debug for SequenceLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceLease")
            .field("id", &self.id)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("stream", &self.stream)
            .field("step", &self.step)
            .finish()
    }
}
