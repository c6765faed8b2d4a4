//! Model module: the hyperparameter object and the CNN builder
//!
//! Two variants share one builder:
//! - `Baseline`: plain conv/pool stack with a flattened dense head
//! - `Deep`: batch-normalized double-conv blocks with global average pooling

pub mod cnn;
pub mod config;

pub use cnn::{build_model, PatchClassifier, PatchClassifierConfig};
pub use config::{CnnVariant, HyperParams};
