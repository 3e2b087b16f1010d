//! Input data manager: the `DataLoader` used by infer-loadgen

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use loadgen_core::{
    DataError, DataLoader, InputOptions, InputTensor, ModelParser, TensorData, TensorSpec,
};

use crate::synthetic;
use crate::user_data::{self, UserStep, UserTensor};

type Step = Arc<Vec<InputTensor>>;

/// Prepares request inputs for one model
///
/// Inputs are materialized once by `prepare_inputs` and shared by every
/// request afterwards. Each tensor already carries the batch dimension when
/// the model batches.
pub struct InputDataManager {
    model: Arc<dyn ModelParser>,
    batch_size: usize,
    seed: Option<u64>,
    streams: Vec<Vec<Step>>,
    user_data: bool,
}

impl InputDataManager {
    /// Create a manager for `model` with `batch_size` requests
    pub fn new(model: Arc<dyn ModelParser>, batch_size: usize) -> Self {
        Self {
            model,
            batch_size: batch_size.max(1),
            seed: None,
            streams: Vec::new(),
            user_data: false,
        }
    }

    /// Seed synthetic data generation
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn prepare_synthetic(&self, options: &InputOptions) -> Vec<Vec<Step>> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let tensors = self
            .model
            .inputs()
            .iter()
            .map(|spec| {
                let data = synthetic::generate(spec, options, &mut rng);
                self.batched(spec, spec.resolved_shape(), data)
            })
            .collect();
        vec![vec![Arc::new(tensors)]]
    }

    fn prepare_user_data(&self, options: &InputOptions) -> Result<Vec<Vec<Step>>, DataError> {
        let specs = self.model.inputs();
        let mut streams = Vec::new();
        for path in &options.user_data {
            for raw in user_data::load(path, specs)? {
                let stream = streams.len();
                let steps = raw
                    .iter()
                    .enumerate()
                    .map(|(step, inputs)| self.build_step(inputs, stream, step))
                    .collect::<Result<Vec<_>, _>>()?;
                streams.push(steps);
            }
        }
        Ok(streams)
    }

    fn build_step(&self, inputs: &UserStep, stream: usize, step: usize) -> Result<Step, DataError> {
        let mut tensors = Vec::with_capacity(inputs.len());
        for spec in self.model.inputs() {
            let Some(input) = inputs.get(&spec.name) else {
                if spec.optional {
                    continue;
                }
                return Err(DataError::MissingInput {
                    input: spec.name.clone(),
                    stream,
                    step,
                });
            };
            let shape = resolve_shape(spec, input).map_err(|message| DataError::Malformed {
                path: format!("stream {} step {}", stream, step).into(),
                message,
            })?;
            tensors.push(self.batched(spec, shape, input.data.clone()));
        }
        Ok(Arc::new(tensors))
    }

    /// Prepend the batch dimension when the model batches
    fn batched(&self, spec: &TensorSpec, shape: Vec<i64>, data: TensorData) -> InputTensor {
        if self.model.max_batch_size() == 0 {
            return InputTensor::new(spec.name.clone(), shape, data);
        }

        let mut full = Vec::with_capacity(shape.len() + 1);
        full.push(self.batch_size as i64);
        full.extend(shape);
        let data = if self.batch_size > 1 {
            data.repeated(self.batch_size)
        } else {
            data
        };
        InputTensor::new(spec.name.clone(), full, data)
    }
}

/// Shape of a user tensor
///
/// An explicit shape must match the element count. Otherwise a static model
/// shape is used, and a single dynamic dimension is inferred from the count.
fn resolve_shape(spec: &TensorSpec, input: &UserTensor) -> Result<Vec<i64>, String> {
    let len = input.data.len() as i64;

    if let Some(shape) = &input.shape {
        let count: i64 = shape.iter().product();
        if count != len {
            return Err(format!(
                "input '{}' has {} elements but shape {:?}",
                spec.name, len, shape
            ));
        }
        return Ok(shape.clone());
    }

    let dynamic = spec.shape.iter().filter(|&&d| d < 0).count();
    let fixed: i64 = spec.shape.iter().filter(|&&d| d >= 0).product();
    match dynamic {
        0 if fixed == len => Ok(spec.shape.clone()),
        1 if fixed > 0 && len % fixed == 0 => Ok(spec
            .shape
            .iter()
            .map(|&d| if d < 0 { len / fixed } else { d })
            .collect()),
        0 | 1 => Err(format!(
            "input '{}' has {} elements, which does not fit shape {:?}",
            spec.name, len, spec.shape
        )),
        _ => Err(format!(
            "input '{}' has several dynamic dimensions; give an explicit shape",
            spec.name
        )),
    }
}

impl DataLoader for InputDataManager {
    fn prepare_inputs(&mut self, options: &InputOptions) -> Result<(), DataError> {
        let user_data = !options.user_data.is_empty();
        self.streams = if user_data {
            self.prepare_user_data(options)?
        } else {
            self.prepare_synthetic(options)
        };
        self.user_data = user_data;

        tracing::info!(
            model = self.model.model_name(),
            user_data = self.user_data,
            streams = self.streams.len(),
            steps = self.streams.iter().map(Vec::len).sum::<usize>(),
            batch_size = self.batch_size,
            "Inputs prepared"
        );
        Ok(())
    }

    fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn step_count(&self, stream: usize) -> usize {
        self.streams.get(stream).map_or(0, Vec::len)
    }

    fn inputs(&self, stream: usize, step: usize) -> Result<Arc<Vec<InputTensor>>, DataError> {
        if self.streams.is_empty() {
            return Err(DataError::NotPrepared);
        }
        self.streams
            .get(stream)
            .and_then(|steps| steps.get(step))
            .cloned()
            .ok_or(DataError::OutOfRange { stream, step })
    }

    fn uses_user_data(&self) -> bool {
        self.user_data
    }
}

impl std::fmt::Debug for InputDataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputDataManager")
            .field("model", &self.model.model_name())
            .field("batch_size", &self.batch_size)
            .field("streams", &self.streams.len())
            .field("user_data", &self.user_data)
            .finish()
    }
}
