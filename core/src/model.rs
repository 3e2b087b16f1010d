//! Model descriptor

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::request::Datatype;
use crate::traits::ModelParser;

/// Declared model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    /// Input name
    pub name: String,
    /// Element type
    pub datatype: Datatype,
    /// Shape without the batch dimension; `-1` marks a dynamic dimension
    pub shape: Vec<i64>,
    /// Whether the input may be omitted
    #[serde(default)]
    pub optional: bool,
}

impl TensorSpec {
    /// Shape with every dynamic dimension resolved to `1`
    pub fn resolved_shape(&self) -> Vec<i64> {
        self.shape
            .iter()
            .map(|&d| if d < 0 { 1 } else { d })
            .collect()
    }

    /// Whether any dimension is dynamic
    pub fn is_dynamic(&self) -> bool {
        self.shape.iter().any(|&d| d < 0)
    }
}

/// Serde-loadable model descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Model name
    pub name: String,
    /// Model version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Maximum batch size; `0` means the model does not batch
    #[serde(default)]
    pub max_batch_size: usize,
    /// Whether the model is stateful
    #[serde(default)]
    pub sequence: bool,
    /// Declared inputs
    pub inputs: Vec<TensorSpec>,
}

impl ModelDescriptor {
    /// Load a descriptor from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidModel(format!("failed to read {}: {}", path.display(), e))
        })?;
        let descriptor: Self = serde_json::from_str(&content).map_err(|e| {
            ConfigError::InvalidModel(format!("failed to parse {}: {}", path.display(), e))
        })?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Validate the descriptor
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::InvalidModel("model name is empty".into()));
        }
        if self.inputs.is_empty() {
            return Err(ConfigError::InvalidModel(format!(
                "model '{}' declares no inputs",
                self.name
            )));
        }
        for (i, input) in self.inputs.iter().enumerate() {
            if self.inputs[..i].iter().any(|other| other.name == input.name) {
                return Err(ConfigError::InvalidModel(format!(
                    "duplicate input '{}'",
                    input.name
                )));
            }
        }
        Ok(())
    }
}

impl ModelParser for ModelDescriptor {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn model_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn is_sequence(&self) -> bool {
        self.sequence
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn inputs(&self) -> &[TensorSpec] {
        &self.inputs
    }
}
