//! Synthetic input generation

use rand::distributions::Alphanumeric;
use rand::Rng;

use loadgen_core::{Datatype, InputOptions, TensorData, TensorSpec};

/// Number of elements of one (unbatched) input
pub fn element_count(spec: &TensorSpec) -> usize {
    spec.resolved_shape()
        .iter()
        .map(|&d| d.max(0) as usize)
        .product()
}

/// Random alphanumeric string of `len` characters
pub fn random_string<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate the data of one input
///
/// Numeric inputs are random unless `zero_input` is set. `BYTES` inputs use
/// `string_data` when given, random strings of `string_length` otherwise.
pub fn generate<R: Rng + ?Sized>(
    spec: &TensorSpec,
    options: &InputOptions,
    rng: &mut R,
) -> TensorData {
    let n = element_count(spec);
    let zero = options.zero_input;

    match spec.datatype {
        Datatype::Bool => TensorData::Bool((0..n).map(|_| !zero && rng.gen()).collect()),
        Datatype::Uint8 => TensorData::Uint8(if zero {
            vec![0; n]
        } else {
            (0..n).map(|_| rng.gen()).collect()
        }),
        Datatype::Int32 => TensorData::Int32(if zero {
            vec![0; n]
        } else {
            (0..n).map(|_| rng.gen_range(0..i32::from(u8::MAX))).collect()
        }),
        Datatype::Int64 => TensorData::Int64(if zero {
            vec![0; n]
        } else {
            (0..n).map(|_| rng.gen_range(0..i64::from(u8::MAX))).collect()
        }),
        Datatype::Fp32 => TensorData::Fp32(if zero {
            vec![0.0; n]
        } else {
            (0..n).map(|_| rng.gen()).collect()
        }),
        Datatype::Fp64 => TensorData::Fp64(if zero {
            vec![0.0; n]
        } else {
            (0..n).map(|_| rng.gen()).collect()
        }),
        Datatype::Bytes => TensorData::Bytes(
            (0..n)
                .map(|_| match &options.string_data {
                    Some(data) => data.clone(),
                    None => random_string(options.string_length, rng),
                })
                .collect(),
        ),
    }
}
