//! Pause/resume/stop signal shared by the manager and its workers

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{LoadError, LoadResult};

/// Pool-wide run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolPhase {
    /// Workers issue requests
    Running = 0,
    /// Workers park at their next suspension point
    Paused = 1,
    /// Workers leave their loop at their next suspension point
    Stopping = 2,
}

impl PoolPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolPhase::Running,
            1 => PoolPhase::Paused,
            _ => PoolPhase::Stopping,
        }
    }
}

/// What a worker does after a suspension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Keep issuing requests
    Continue,
    /// Leave the worker loop
    Exit,
}

#[derive(Debug)]
struct SignalState {
    phase: PoolPhase,
    active: usize,
    parked: usize,
}

/// Shared run/pause/stop condition
///
/// Workers read the phase lock-free on their hot path and only take the mutex
/// at suspension points. The manager uses [`PoolSignal::pause`] to wait until
/// every registered worker is parked, so it can reconfigure the pool without
/// racing a request in progress.
#[derive(Debug)]
pub struct PoolSignal {
    phase: AtomicU8,
    state: Mutex<SignalState>,
    wake: Condvar,
    quiescent: Condvar,
}

impl Default for PoolSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolSignal {
    /// Create a signal in the running phase with no workers
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(PoolPhase::Running as u8),
            state: Mutex::new(SignalState {
                phase: PoolPhase::Running,
                active: 0,
                parked: 0,
            }),
            wake: Condvar::new(),
            quiescent: Condvar::new(),
        }
    }

    /// Current phase
    pub fn phase(&self) -> PoolPhase {
        PoolPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Whether workers should keep issuing requests
    pub fn is_running(&self) -> bool {
        self.phase() == PoolPhase::Running
    }

    /// Whether the pool has been told to stop
    pub fn is_stopping(&self) -> bool {
        self.phase() == PoolPhase::Stopping
    }

    /// Number of live workers and how many of them are parked
    pub fn worker_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.active, state.parked)
    }

    /// Count a worker about to be spawned
    pub fn register_worker(&self) {
        self.state.lock().active += 1;
    }

    /// Remove a worker that left its loop
    pub fn deregister_worker(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
        self.quiescent.notify_all();
    }

    /// Suspension point
    ///
    /// Returns immediately while running. While paused, parks the caller until
    /// the pool is resumed or stopped.
    pub fn checkpoint(&self) -> Checkpoint {
        match self.phase() {
            PoolPhase::Running => return Checkpoint::Continue,
            PoolPhase::Stopping => return Checkpoint::Exit,
            PoolPhase::Paused => {}
        }

        let mut state = self.state.lock();
        loop {
            match state.phase {
                PoolPhase::Running => return Checkpoint::Continue,
                PoolPhase::Stopping => return Checkpoint::Exit,
                PoolPhase::Paused => {
                    state.parked += 1;
                    if state.parked >= state.active {
                        self.quiescent.notify_all();
                    }
                    self.wake.wait(&mut state);
                    state.parked -= 1;
                }
            }
        }
    }

    /// Sleep until `deadline` unless the phase changes first, then pass a
    /// suspension point
    pub fn sleep_until(&self, deadline: Instant) -> Checkpoint {
        {
            let mut state = self.state.lock();
            while state.phase == PoolPhase::Running && Instant::now() < deadline {
                if self.wake.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
        }
        self.checkpoint()
    }

    /// Sleep for `duration` unless the phase changes first
    pub fn idle_for(&self, duration: Duration) -> Checkpoint {
        self.sleep_until(Instant::now() + duration)
    }

    /// Move to the paused phase and wait until every live worker is parked
    ///
    /// On timeout the pool stays paused and the caller decides whether to
    /// resume or stop it.
    pub fn pause(&self, timeout: Duration) -> LoadResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        if state.phase == PoolPhase::Stopping {
            return Err(LoadError::invalid_state("cannot pause a stopping pool"));
        }

        self.set_phase(&mut state, PoolPhase::Paused);

        while state.parked < state.active {
            if self
                .quiescent
                .wait_until(&mut state, deadline)
                .timed_out()
                && state.parked < state.active
            {
                return Err(LoadError::PauseTimeout {
                    parked: state.parked,
                    active: state.active,
                });
            }
        }

        Ok(())
    }

    /// Release parked workers
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if state.phase == PoolPhase::Paused {
            self.set_phase(&mut state, PoolPhase::Running);
        }
    }

    /// Tell every worker to leave its loop; irreversible
    pub fn stop(&self) {
        let mut state = self.state.lock();
        self.set_phase(&mut state, PoolPhase::Stopping);
        self.quiescent.notify_all();
    }

    fn set_phase(&self, state: &mut SignalState, phase: PoolPhase) {
        state.phase = phase;
        self.phase.store(phase as u8, Ordering::Release);
        self.wake.notify_all();
    }
}
