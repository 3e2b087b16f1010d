//! Builder pattern for LoadManager construction

use std::sync::Arc;

use crate::config::{ConfigError, LoadConfig};
use crate::error::{LoadError, LoadResult};
use crate::traits::{ClientBackendFactory, DataLoader, ModelParser};

use super::executor::LoadManager;
use super::pool::LoadPolicy;

/// Builder for creating a LoadManager with validated configuration
///
/// # Example
///
/// ```ignore
/// let mut manager = LoadManagerBuilder::new()
///     .config(LoadConfig::default().with_max_threads(8))
///     .policy(LoadPolicy::Concurrency)
///     .model(model)
///     .backend_factory(factory)
///     .data_loader(Box::new(loader))
///     .build()?;
/// manager.init_manager(&inputs, &sequences)?;
/// manager.change_concurrency_level(16)?;
/// ```
pub struct LoadManagerBuilder {
    config: LoadConfig,
    policy: LoadPolicy,
    model: Option<Arc<dyn ModelParser>>,
    factory: Option<Arc<dyn ClientBackendFactory>>,
    loader: Option<Box<dyn DataLoader>>,
}

impl LoadManagerBuilder {
    /// Create a builder with the default configuration and concurrency policy
    pub fn new() -> Self {
        Self {
            config: LoadConfig::default(),
            policy: LoadPolicy::default(),
            model: None,
            factory: None,
            loader: None,
        }
    }

    /// Set the full load configuration
    pub fn config(mut self, config: LoadConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the worker pool policy
    pub fn policy(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the model metadata
    pub fn model(mut self, model: Arc<dyn ModelParser>) -> Self {
        self.model = Some(model);
        self
    }

    /// Set the client backend factory
    pub fn backend_factory(mut self, factory: Arc<dyn ClientBackendFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the data loader
    pub fn data_loader(mut self, loader: Box<dyn DataLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Build the manager
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator is missing, the configuration is
    /// invalid, or the batch size does not fit the model.
    pub fn build(self) -> LoadResult<LoadManager> {
        let model = self
            .model
            .ok_or(LoadError::MissingComponent("model"))?;
        let factory = self
            .factory
            .ok_or(LoadError::MissingComponent("backend_factory"))?;
        let loader = self
            .loader
            .ok_or(LoadError::MissingComponent("data_loader"))?;

        self.config.validate()?;
        check_batch_size(self.config.batch_size, model.max_batch_size())?;

        Ok(LoadManager::new(
            self.config,
            self.policy,
            model,
            factory,
            loader,
        ))
    }
}

impl Default for LoadManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A model without batching dimension (max 0) only accepts batch size 1
fn check_batch_size(batch_size: usize, max_batch_size: usize) -> Result<(), ConfigError> {
    if max_batch_size == 0 && batch_size > 1 {
        return Err(ConfigError::InvalidBatchSize(format!(
            "model does not support batching, got batch size {}",
            batch_size
        )));
    }
    if max_batch_size > 0 && batch_size > max_batch_size {
        return Err(ConfigError::InvalidBatchSize(format!(
            "batch size {} exceeds the model maximum of {}",
            batch_size, max_batch_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod batch_tests {
    use super::check_batch_size;

    #[test]
    fn test_batch_size_limits() {
        assert!(check_batch_size(1, 0).is_ok());
        assert!(check_batch_size(2, 0).is_err());
        assert!(check_batch_size(8, 8).is_ok());
        assert!(check_batch_size(9, 8).is_err());
    }
}
