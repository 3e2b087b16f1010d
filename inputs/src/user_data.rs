//! User-provided input data
//!
//! Two layouts are accepted:
//!
//! - A JSON file holding `{"data": [step, ...]}` for a single stream or
//!   `{"data": [[step, ...], ...]}` for several. A step maps each input name
//!   to either a (possibly nested) array or `{"content": [...], "shape": [...]}`.
//! - A directory holding one file per input, named after the input, with
//!   whitespace-separated values (one string per line for `BYTES`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use loadgen_core::{DataError, Datatype, TensorData, TensorSpec};

/// One input of one step as written by the user
#[derive(Debug, Clone, PartialEq)]
pub struct UserTensor {
    /// Flattened values
    pub data: TensorData,
    /// Explicit shape, without the batch dimension
    pub shape: Option<Vec<i64>>,
}

/// Inputs of one step, keyed by input name
pub type UserStep = HashMap<String, UserTensor>;

/// Steps of one stream
pub type UserStream = Vec<UserStep>;

fn malformed(path: &Path, message: impl Into<String>) -> DataError {
    DataError::Malformed {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn read(path: &Path) -> Result<String, DataError> {
    std::fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load user data from a JSON file or an input directory
pub fn load(path: &Path, specs: &[TensorSpec]) -> Result<Vec<UserStream>, DataError> {
    if path.is_dir() {
        Ok(vec![vec![read_directory(path, specs)?]])
    } else {
        let content = read(path)?;
        parse_json(&content, specs).map_err(|message| malformed(path, message))
    }
}

/// Parse the JSON layout
pub fn parse_json(content: &str, specs: &[TensorSpec]) -> Result<Vec<UserStream>, String> {
    let root: Value = serde_json::from_str(content).map_err(|e| format!("invalid json: {}", e))?;
    let data = root
        .get("data")
        .and_then(Value::as_array)
        .ok_or("expected a top-level \"data\" array")?;

    if data.is_empty() {
        return Err("\"data\" holds no steps".into());
    }

    // Arrays of arrays are several streams; an array of objects is one
    let streams: Vec<&[Value]> = if data.iter().all(Value::is_array) {
        data.iter()
            .filter_map(Value::as_array)
            .map(Vec::as_slice)
            .collect()
    } else {
        vec![data.as_slice()]
    };

    streams
        .into_iter()
        .enumerate()
        .map(|(stream, steps)| {
            if steps.is_empty() {
                return Err(format!("stream {} holds no steps", stream));
            }
            steps
                .iter()
                .enumerate()
                .map(|(step, value)| {
                    parse_step(value, specs)
                        .map_err(|e| format!("stream {} step {}: {}", stream, step, e))
                })
                .collect()
        })
        .collect()
}

fn parse_step(value: &Value, specs: &[TensorSpec]) -> Result<UserStep, String> {
    let object = value.as_object().ok_or("step must be an object")?;

    let mut step = UserStep::new();
    for (name, entry) in object {
        let spec = specs
            .iter()
            .find(|spec| &spec.name == name)
            .ok_or_else(|| format!("unknown input '{}'", name))?;

        let (content, shape) = match entry {
            Value::Object(fields) => {
                let content = fields
                    .get("content")
                    .ok_or_else(|| format!("input '{}' has no \"content\"", name))?;
                let shape = match fields.get("shape") {
                    Some(shape) => Some(parse_shape(shape).map_err(|e| format!("{}: {}", name, e))?),
                    None => None,
                };
                (content, shape)
            }
            other => (other, None),
        };

        let mut flat = Vec::new();
        flatten(content, &mut flat);
        let data = parse_values(spec.datatype, &flat).map_err(|e| format!("{}: {}", name, e))?;
        step.insert(name.clone(), UserTensor { data, shape });
    }
    Ok(step)
}

fn parse_shape(value: &Value) -> Result<Vec<i64>, String> {
    value
        .as_array()
        .ok_or("shape must be an array")?
        .iter()
        .map(|dim| match dim.as_i64() {
            Some(d) if d >= 0 => Ok(d),
            _ => Err(format!("invalid dimension {}", dim)),
        })
        .collect()
}

fn flatten<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        other => out.push(other),
    }
}

/// Convert JSON scalars to tensor data of `datatype`
pub fn parse_values(datatype: Datatype, values: &[&Value]) -> Result<TensorData, String> {
    fn each<T>(
        values: &[&Value],
        convert: impl Fn(&Value) -> Option<T>,
        expected: &str,
    ) -> Result<Vec<T>, String> {
        values
            .iter()
            .map(|v| convert(v).ok_or_else(|| format!("expected {}, got {}", expected, v)))
            .collect()
    }

    Ok(match datatype {
        Datatype::Bool => TensorData::Bool(each(values, Value::as_bool, "a boolean")?),
        Datatype::Uint8 => TensorData::Uint8(each(
            values,
            |v| v.as_u64().and_then(|n| u8::try_from(n).ok()),
            "a UINT8",
        )?),
        Datatype::Int32 => TensorData::Int32(each(
            values,
            |v| v.as_i64().and_then(|n| i32::try_from(n).ok()),
            "an INT32",
        )?),
        Datatype::Int64 => TensorData::Int64(each(values, Value::as_i64, "an INT64")?),
        Datatype::Fp32 => TensorData::Fp32(each(values, |v| v.as_f64().map(|f| f as f32), "a number")?),
        Datatype::Fp64 => TensorData::Fp64(each(values, Value::as_f64, "a number")?),
        Datatype::Bytes => TensorData::Bytes(
            values
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        ),
    })
}

/// Read the directory layout: one file per declared input
pub fn read_directory(dir: &Path, specs: &[TensorSpec]) -> Result<UserStep, DataError> {
    let mut step = UserStep::new();
    for spec in specs {
        let path: PathBuf = dir.join(&spec.name);
        if !path.exists() {
            if spec.optional {
                continue;
            }
            return Err(DataError::MissingInput {
                input: spec.name.clone(),
                stream: 0,
                step: 0,
            });
        }

        let content = read(&path)?;
        let data = parse_text(spec.datatype, &content).map_err(|e| malformed(&path, e))?;
        step.insert(spec.name.clone(), UserTensor { data, shape: None });
    }
    Ok(step)
}

/// Parse one input file of the directory layout
pub fn parse_text(datatype: Datatype, content: &str) -> Result<TensorData, String> {
    fn each<T: std::str::FromStr>(content: &str) -> Result<Vec<T>, String>
    where
        T::Err: std::fmt::Display,
    {
        content
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<T>()
                    .map_err(|e| format!("invalid value '{}': {}", token, e))
            })
            .collect()
    }

    Ok(match datatype {
        Datatype::Bool => TensorData::Bool(
            content
                .split_whitespace()
                .map(|token| match token {
                    "1" | "true" => Ok(true),
                    "0" | "false" => Ok(false),
                    other => Err(format!("invalid boolean '{}'", other)),
                })
                .collect::<Result<_, _>>()?,
        ),
        Datatype::Uint8 => TensorData::Uint8(each(content)?),
        Datatype::Int32 => TensorData::Int32(each(content)?),
        Datatype::Int64 => TensorData::Int64(each(content)?),
        Datatype::Fp32 => TensorData::Fp32(each(content)?),
        Datatype::Fp64 => TensorData::Fp64(each(content)?),
        Datatype::Bytes => TensorData::Bytes(content.lines().map(str::to_string).collect()),
    })
}
