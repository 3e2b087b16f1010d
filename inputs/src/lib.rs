//! Request input preparation for infer-loadgen
//!
//! This crate provides the `DataLoader` implementation used by the binary:
//!
//! - Synthetic inputs generated from the model's declared tensors
//! - User data from JSON files or per-input directories

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod synthetic;
pub mod user_data;

pub use manager::InputDataManager;
