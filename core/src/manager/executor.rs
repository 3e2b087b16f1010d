//! Load manager lifecycle and worker pool control

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crate::config::{ConfigError, InputOptions, LoadConfig, SequenceOptions};
use crate::error::{LoadError, LoadResult};
use crate::metrics::{InferStat, TimestampVector};
use crate::sequence::SequenceManager;
use crate::traits::{ClientBackendFactory, DataLoader, ModelParser};
use crate::worker::{
    spawn_worker, PoolSignal, RequestBudget, RequestIssuer, ThreadConfig, ThreadStat, Worker,
    WorkerBuilder,
};

use super::aggregator::{
    aggregate_thread_stats, count_completed, drain_records, sum_client_stats, PoolStats,
};
use super::pool::{LoadPolicy, WorkerPool};

/// Lifecycle phase of the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    /// Built, inputs not prepared yet
    Uninitialized,
    /// Inputs and sequence ids ready, no load applied yet
    Initialized,
    /// Workers issue requests
    Running,
    /// Workers are parked
    Paused,
    /// Workers have been joined; terminal
    Stopped,
}

/// One worker with its thread and stats, created and torn down together
struct PoolMember {
    stat: Arc<ThreadStat>,
    config: Arc<ThreadConfig>,
    thread: Option<JoinHandle<()>>,
}

/// Drives a pool of worker threads against an inference server
///
/// The manager performs no request I/O. It spawns and configures workers,
/// pauses and resumes them, and aggregates what they record. Every
/// statistic is read under the owning worker's lock, one worker at a time.
pub struct LoadManager {
    config: LoadConfig,
    model: Arc<dyn ModelParser>,
    factory: Arc<dyn ClientBackendFactory>,
    loader: Option<Box<dyn DataLoader>>,
    issuer: Option<RequestIssuer>,
    pool: WorkerPool,
    signal: Arc<PoolSignal>,
    members: Vec<PoolMember>,
    sequences: Option<Arc<SequenceManager>>,
    budget: Arc<RequestBudget>,
    phase: ManagerPhase,
}

impl LoadManager {
    /// Create a manager
    ///
    /// Use `LoadManagerBuilder` for validated construction.
    pub fn new(
        config: LoadConfig,
        policy: LoadPolicy,
        model: Arc<dyn ModelParser>,
        factory: Arc<dyn ClientBackendFactory>,
        loader: Box<dyn DataLoader>,
    ) -> Self {
        let budget = Arc::new(RequestBudget::new(config.request_budget));
        let pool = WorkerPool::new(policy, config.seed);

        Self {
            config,
            model,
            factory,
            loader: Some(loader),
            issuer: None,
            pool,
            signal: Arc::new(PoolSignal::new()),
            members: Vec::new(),
            sequences: None,
            budget,
            phase: ManagerPhase::Uninitialized,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> ManagerPhase {
        self.phase
    }

    /// Name of the active worker pool policy
    pub fn policy_name(&self) -> &'static str {
        self.pool.name()
    }

    /// Number of workers spawned so far
    pub fn worker_count(&self) -> usize {
        self.members.len()
    }

    /// Batch size of every request
    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Sequence id pool, for stateful models after `init_manager`
    pub fn sequence_manager(&self) -> Option<&Arc<SequenceManager>> {
        self.sequences.as_ref()
    }

    /// Prepare inputs and the sequence id pool
    ///
    /// Must be called exactly once before any load is applied. On error no
    /// worker exists and the call may be retried.
    pub fn init_manager(
        &mut self,
        inputs: &InputOptions,
        sequence: &SequenceOptions,
    ) -> LoadResult<()> {
        if self.phase != ManagerPhase::Uninitialized {
            return Err(LoadError::invalid_state("init_manager called twice"));
        }

        let on_sequence_model = self.model.is_sequence();
        if on_sequence_model {
            sequence.validate()?;
        }

        self.pool.finalize()?;

        let mut loader = self
            .loader
            .take()
            .ok_or_else(|| LoadError::invalid_state("data loader is missing"))?;
        let prepared = loader
            .prepare_inputs(inputs)
            .map_err(LoadError::from)
            .and_then(|()| {
                if !on_sequence_model {
                    return Ok(None);
                }
                let stream_lengths = if loader.uses_user_data() {
                    (0..loader.stream_count())
                        .map(|stream| loader.step_count(stream))
                        .collect()
                } else {
                    Vec::new()
                };
                let sequences = SequenceManager::new(sequence, stream_lengths, self.config.seed)?;
                Ok(Some(Arc::new(sequences)))
            });
        let sequences = match prepared {
            Ok(sequences) => sequences,
            Err(e) => {
                self.loader = Some(loader);
                return Err(e);
            }
        };
        let loader: Arc<dyn DataLoader> = Arc::from(loader);

        let mut issuer = RequestIssuer::new(
            self.model.model_name(),
            self.config.batch_size,
            self.config.streaming,
            Arc::clone(&loader),
            Arc::new(AtomicU64::new(0)),
        );
        if let Some(sequences) = &sequences {
            issuer = issuer.with_sequences(Arc::clone(sequences));
        }

        self.sequences = sequences;
        self.issuer = Some(issuer);
        self.phase = ManagerPhase::Initialized;

        tracing::info!(
            model = self.model.model_name(),
            policy = self.pool.name(),
            batch_size = self.config.batch_size,
            max_threads = self.config.max_threads,
            async_mode = self.config.async_mode,
            sequence_ids = ?self.sequences.as_ref().map(|s| s.id_range()),
            user_data = loader.uses_user_data(),
            "Load manager initialized"
        );
        Ok(())
    }

    /// Apply a concurrency level
    ///
    /// In async mode up to `max_threads` workers share the level; in sync mode
    /// each worker carries one request, so the level must not exceed
    /// `max_threads`.
    pub fn change_concurrency_level(&mut self, level: usize) -> LoadResult<()> {
        if self.pool.is_schedule_based() {
            return Err(LoadError::unsupported(
                "change_concurrency_level",
                self.pool.name(),
            ));
        }
        self.ensure_active()?;

        let threads = if self.config.async_mode {
            level.min(self.config.max_threads)
        } else if level > self.config.max_threads {
            return Err(ConfigError::InvalidConcurrency(format!(
                "sync mode needs one thread per request: level {} exceeds max threads {}",
                level, self.config.max_threads
            ))
            .into());
        } else {
            level
        };

        self.reconfigure(|manager| {
            manager.spawn_workers(threads)?;
            for (i, member) in manager.members.iter().enumerate() {
                member.config.set_concurrency(share(level, threads, i));
            }
            Ok(())
        })?;

        tracing::info!(level, threads, "Concurrency level applied");
        Ok(())
    }

    /// Apply a request rate
    ///
    /// The custom-interval pool ignores `rate` and starts its intervals file.
    pub fn change_request_rate(&mut self, rate: f64) -> LoadResult<()> {
        match self.pool {
            WorkerPool::Concurrency => {
                return Err(LoadError::unsupported(
                    "change_request_rate",
                    self.pool.name(),
                ))
            }
            WorkerPool::CustomInterval { .. } => {
                tracing::warn!(rate, "Request rate ignored by the custom-interval pool");
            }
            WorkerPool::RequestRate { .. } => {}
        }
        self.start_schedule(rate)
    }

    /// Start replaying the custom intervals
    pub fn start_custom_intervals(&mut self) -> LoadResult<()> {
        if !matches!(self.pool, WorkerPool::CustomInterval { .. }) {
            return Err(LoadError::unsupported(
                "start_custom_intervals",
                self.pool.name(),
            ));
        }
        self.start_schedule(0.0)
    }

    /// Mean rate implied by the custom intervals
    pub fn custom_request_rate(&self) -> LoadResult<f64> {
        if !matches!(self.pool, WorkerPool::CustomInterval { .. }) {
            return Err(LoadError::unsupported(
                "custom_request_rate",
                self.pool.name(),
            ));
        }
        self.pool
            .custom_rate()
            .ok_or_else(|| LoadError::invalid_state("custom intervals are not loaded"))
    }

    /// Rewind every worker to the start of its schedule
    ///
    /// Only schedule-based pools support this; the concurrency pool has no
    /// schedule to rewind and reports `Unsupported` without touching anything.
    pub fn reset_workers(&mut self) -> LoadResult<()> {
        if !self.pool.is_schedule_based() {
            return Err(LoadError::unsupported("reset_workers", self.pool.name()));
        }
        self.ensure_active()?;
        if self.members.is_empty() {
            return Ok(());
        }

        self.reconfigure(|manager| {
            let start = Instant::now();
            for member in &manager.members {
                member.config.rewind(start);
            }
            Ok(())
        })?;

        tracing::debug!(workers = self.members.len(), "Workers rewound");
        Ok(())
    }

    /// Park every worker between requests
    pub fn pause_workers(&mut self) -> LoadResult<()> {
        self.ensure_active()?;
        match self.phase {
            ManagerPhase::Paused => Ok(()),
            _ => {
                if let Err(e) = self.signal.pause(self.config.pause_timeout()) {
                    self.signal.resume();
                    return Err(e);
                }
                self.phase = ManagerPhase::Paused;
                tracing::debug!("Workers paused");
                Ok(())
            }
        }
    }

    /// Release parked workers
    pub fn resume_workers(&mut self) -> LoadResult<()> {
        self.ensure_active()?;
        if self.phase == ManagerPhase::Paused {
            self.signal.resume();
            self.phase = if self.members.is_empty() {
                ManagerPhase::Initialized
            } else {
                ManagerPhase::Running
            };
            tracing::debug!("Workers resumed");
        }
        Ok(())
    }

    /// Check that every worker is healthy
    ///
    /// Fails on the first worker that recorded a fault, or whose thread ended
    /// without being told to.
    pub fn check_health(&self) -> LoadResult<()> {
        for (worker_id, member) in self.members.iter().enumerate() {
            if let Some(reason) = member.stat.fault() {
                return Err(LoadError::WorkerFault { worker_id, reason });
            }

            let finished = member
                .thread
                .as_ref()
                .map_or(false, JoinHandle::is_finished);
            let exited_normally = member.stat.exit().is_some_and(|exit| exit.is_normal());
            if finished && !exited_normally && !self.signal.is_stopping() {
                return Err(LoadError::WorkerExited { worker_id });
            }
        }
        Ok(())
    }

    /// Exchange the records collected so far with `new_timestamps`
    ///
    /// Every worker is drained under its own lock. The caller receives every
    /// record appended before the swap; the previous contents of
    /// `new_timestamps` are discarded.
    pub fn swap_timestamps(&self, new_timestamps: &mut TimestampVector) -> LoadResult<()> {
        let mut drained = drain_records(self.stats());
        std::mem::swap(new_timestamps, &mut drained);
        Ok(())
    }

    /// Sum of every client context's counters
    pub fn accumulated_client_stat(&self) -> InferStat {
        sum_client_stats(self.stats())
    }

    /// Number of successfully completed requests so far
    pub fn count_collected_requests(&self) -> u64 {
        count_completed(self.stats())
    }

    /// Aggregated per-worker statistics
    pub fn pool_stats(&self) -> PoolStats {
        aggregate_thread_stats(self.stats())
    }

    /// Stop and join every worker thread
    ///
    /// Idempotent; also run when the manager is dropped.
    pub fn stop_worker_threads(&mut self) {
        if self.phase == ManagerPhase::Stopped {
            return;
        }
        self.signal.stop();

        let mut panicked = 0;
        for (worker_id, member) in self.members.iter_mut().enumerate() {
            if let Some(thread) = member.thread.take() {
                if thread.join().is_err() {
                    panicked += 1;
                    tracing::error!(worker_id, "Worker thread panicked");
                }
            }
        }

        self.phase = ManagerPhase::Stopped;
        tracing::info!(
            workers = self.members.len(),
            panicked,
            completed = self.count_collected_requests(),
            "Worker threads stopped"
        );
    }

    fn stats(&self) -> impl Iterator<Item = &ThreadStat> + '_ {
        self.members.iter().map(|m| m.stat.as_ref())
    }

    fn ensure_active(&self) -> LoadResult<()> {
        match self.phase {
            ManagerPhase::Uninitialized => {
                Err(LoadError::invalid_state("init_manager has not been called"))
            }
            ManagerPhase::Stopped => Err(LoadError::invalid_state("load manager is stopped")),
            _ => Ok(()),
        }
    }

    fn start_schedule(&mut self, rate: f64) -> LoadResult<()> {
        self.ensure_active()?;

        let threads = self.config.max_threads;
        let slices = self.pool.slices(rate, threads)?;

        self.reconfigure(|manager| {
            manager.spawn_workers(threads)?;
            let start = Instant::now();
            for (member, mut slice) in manager.members.iter().zip(slices) {
                slice.start = Some(start);
                member.config.set_schedule(slice);
            }
            Ok(())
        })?;

        tracing::info!(
            policy = self.pool.name(),
            rate,
            threads,
            "Request schedule applied"
        );
        Ok(())
    }

    /// Run `change` with every worker parked
    ///
    /// A manager that was explicitly paused stays paused afterwards.
    fn reconfigure<F>(&mut self, change: F) -> LoadResult<()>
    where
        F: FnOnce(&mut Self) -> LoadResult<()>,
    {
        let was_paused = self.phase == ManagerPhase::Paused;
        if !was_paused {
            if let Err(e) = self.signal.pause(self.config.pause_timeout()) {
                self.signal.resume();
                return Err(e);
            }
        }

        let result = change(self);

        if !was_paused {
            self.signal.resume();
            if !self.members.is_empty() {
                self.phase = ManagerPhase::Running;
            }
        }
        result
    }

    /// Spawn workers until the pool has `count` of them
    fn spawn_workers(&mut self, count: usize) -> LoadResult<()> {
        let issuer = self
            .issuer
            .clone()
            .ok_or_else(|| LoadError::invalid_state("init_manager has not been called"))?;

        while self.members.len() < count {
            let id = self.members.len();
            let stat = Arc::new(ThreadStat::new());
            let config = Arc::new(ThreadConfig::new(id));

            let builder = WorkerBuilder::new(id)
                .stat(Arc::clone(&stat))
                .signal(Arc::clone(&self.signal))
                .thread_config(Arc::clone(&config))
                .issuer(issuer.clone())
                .factory(Arc::clone(&self.factory))
                .budget(Arc::clone(&self.budget))
                .async_mode(self.config.async_mode);

            let worker: Box<dyn Worker> = if self.pool.is_schedule_based() {
                Box::new(builder.build_schedule()?)
            } else {
                Box::new(builder.build_concurrency()?)
            };

            let thread = spawn_worker(worker, Arc::clone(&self.signal)).map_err(LoadError::Spawn)?;
            tracing::debug!(worker_id = id, "Worker spawned");

            self.members.push(PoolMember {
                stat,
                config,
                thread: Some(thread),
            });
        }
        Ok(())
    }
}

/// Slots of worker `index` when `level` requests are spread over `threads`
fn share(level: usize, threads: usize, index: usize) -> usize {
    if index >= threads {
        return 0;
    }
    level / threads + usize::from(index < level % threads)
}

impl Drop for LoadManager {
    fn drop(&mut self) {
        self.stop_worker_threads();
    }
}

impl std::fmt::Debug for LoadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadManager")
            .field("model", &self.model.model_name())
            .field("backend", &self.factory.kind())
            .field("pool", &self.pool)
            .field("phase", &self.phase)
            .field("workers", &self.members.len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod share_tests {
    use super::share;

    #[test]
    fn test_share_spreads_remainder_first() {
        let shares: Vec<usize> = (0..4).map(|i| share(10, 4, i)).collect();
        assert_eq!(shares, vec![3, 3, 2, 2]);
        assert_eq!(shares.iter().sum::<usize>(), 10);
    }

    #[test]
    fn test_share_idle_threads() {
        assert_eq!(share(2, 2, 3), 0);
        assert_eq!(share(0, 0, 0), 0);
    }
}
