//! Dataset module for histopathology patch data
//!
//! This module provides functionality for:
//! - Reading the `id,label` CSV and joining it against the image directory
//! - Decoding patches into CHW float buffers
//! - Stratified train / validation / holdout splitting
//! - On-the-fly augmentation and Burn batching
//!
//! ## Split Strategy
//!
//! 1. **Holdout**: never trained on, scored once for the ROC curve and AUC
//! 2. **Validation**: drives the hyperparameter search and training callbacks
//! 3. **Train**: everything else

pub mod augmentation;
pub mod burn_dataset;
pub mod labels;
pub mod loader;
pub mod split;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{
    AugmentingBatcher, InferenceBatch, InferenceBatcher, InferenceDataset, InferenceItem,
    PatchBatch, PatchBatcher, PatchBurnDataset, PatchItem,
};
pub use labels::{read_labels, Diagnosis, LabelRecord};
pub use loader::{DatasetStats, PatchDataset, PatchSample, TestPatch};
pub use split::{subsample, DatasetSplits, SplitConfig, SplitRecord, SplitStats};

/// Binary task: benign vs. malignant
pub const NUM_CLASSES: usize = 2;

/// Native patch size of the histopathology images
pub const DEFAULT_IMAGE_SIZE: usize = 96;
