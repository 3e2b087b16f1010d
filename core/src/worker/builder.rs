//! Builder pattern for Worker construction

use std::sync::Arc;

use crate::error::{LoadError, LoadResult};
use crate::traits::ClientBackendFactory;

use super::budget::RequestBudget;
use super::concurrency::ConcurrencyWorker;
use super::executor::WorkerCore;
use super::issuer::RequestIssuer;
use super::schedule::ScheduleWorker;
use super::signal::PoolSignal;
use super::stats::ThreadStat;
use super::thread_config::ThreadConfig;

/// Builder for creating worker instances
///
/// # Example
/// ```ignore
/// let worker = WorkerBuilder::new(0)
///     .stat(stat)
///     .signal(signal)
///     .thread_config(config)
///     .issuer(issuer)
///     .factory(factory)
///     .build_concurrency()?;
/// ```
pub struct WorkerBuilder {
    id: usize,
    stat: Option<Arc<ThreadStat>>,
    signal: Option<Arc<PoolSignal>>,
    config: Option<Arc<ThreadConfig>>,
    issuer: Option<RequestIssuer>,
    factory: Option<Arc<dyn ClientBackendFactory>>,
    budget: Option<Arc<RequestBudget>>,
    async_mode: bool,
}

impl WorkerBuilder {
    /// Create a new builder with the given worker ID
    pub fn new(id: usize) -> Self {
        Self {
            id,
            stat: None,
            signal: None,
            config: None,
            issuer: None,
            factory: None,
            budget: None,
            async_mode: true,
        }
    }

    /// Set the stats the worker records into
    pub fn stat(mut self, stat: Arc<ThreadStat>) -> Self {
        self.stat = Some(stat);
        self
    }

    /// Set the pool signal
    pub fn signal(mut self, signal: Arc<PoolSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Set the per-thread configuration
    pub fn thread_config(mut self, config: Arc<ThreadConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the request issuer
    pub fn issuer(mut self, issuer: RequestIssuer) -> Self {
        self.issuer = Some(issuer);
        self
    }

    /// Set the client backend factory
    pub fn factory(mut self, factory: Arc<dyn ClientBackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the shared request budget (unbounded if not set)
    pub fn budget(mut self, budget: Arc<RequestBudget>) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Enable or disable async mode
    pub fn async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    /// Build a worker that keeps its configured number of requests in flight
    pub fn build_concurrency(self) -> LoadResult<ConcurrencyWorker> {
        Ok(ConcurrencyWorker::new(self.build_core()?))
    }

    /// Build a worker that follows its schedule slice
    pub fn build_schedule(self) -> LoadResult<ScheduleWorker> {
        Ok(ScheduleWorker::new(self.build_core()?))
    }

    fn build_core(self) -> LoadResult<WorkerCore> {
        let stat = self.stat.ok_or(LoadError::MissingComponent("stat"))?;
        let signal = self.signal.ok_or(LoadError::MissingComponent("signal"))?;
        let config = self
            .config
            .ok_or(LoadError::MissingComponent("thread_config"))?;
        let issuer = self.issuer.ok_or(LoadError::MissingComponent("issuer"))?;
        let factory = self.factory.ok_or(LoadError::MissingComponent("factory"))?;
        let budget = self
            .budget
            .unwrap_or_else(|| Arc::new(RequestBudget::unlimited()));

        if config.id() != self.id {
            return Err(LoadError::invalid_state(format!(
                "thread config {} handed to worker {}",
                config.id(),
                self.id
            )));
        }

        Ok(WorkerCore::new(
            self.id,
            stat,
            signal,
            config,
            issuer,
            factory,
            budget,
            self.async_mode,
        ))
    }
}
