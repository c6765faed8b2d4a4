//! # Histopathologic Cancer Detection
//!
//! A Rust library for classifying 96x96 tissue patches as benign or
//! malignant with convolutional networks built on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: Label CSV, patch decoding, stratified splits, augmentation and batching
//! - `eda`: Class balance, per-channel statistics, intensity histograms and sample montages
//! - `model`: Hyperparameter object and the two CNN variants
//! - `training`: Training loop, LR decay, early stopping and random hyperparameter search
//! - `evaluation`: ROC curve, AUC and confusion matrix on the holdout slice
//! - `inference`: Batched test-set prediction and the submission CSV
//! - `checkpoint`: Saving and restoring trained models
//! - `pipeline`: The steps above chained end to end
//! - `utils`: Logging, metrics, charts and errors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use histo_cnn::backend::{default_device, TrainingBackend};
//! use histo_cnn::config::PipelineConfig;
//! use histo_cnn::pipeline::run_pipeline;
//!
//! let config = PipelineConfig::load("histo.toml".as_ref())?;
//! let summary = run_pipeline::<TrainingBackend>(&config, &default_device())?;
//! summary.print();
//! ```

pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod eda;
pub mod evaluation;
pub mod inference;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use checkpoint::ModelArtifacts;
pub use config::PipelineConfig;
pub use dataset::{DatasetSplits, Diagnosis, PatchBurnDataset, PatchDataset, SplitConfig};
pub use eda::ExploratoryReport;
pub use evaluation::EvaluationReport;
pub use inference::{Prediction, Predictor};
pub use model::{build_model, CnnVariant, HyperParams, PatchClassifier, PatchClassifierConfig};
pub use pipeline::{run_pipeline, PipelineSummary};
pub use training::{RandomSearch, SearchResults, TrainOptions, TrainingHistory};
pub use utils::error::{HistoError, Result};
pub use utils::metrics::{ConfusionMatrix, RocCurve};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
