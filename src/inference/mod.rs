//! Inference module for test-set prediction
//!
//! This module provides:
//! - Batched prediction of malignant probabilities with a trained model
//! - Writing and reading the `id,label` submission CSV

pub mod predictor;
pub mod submission;

pub use predictor::{Prediction, Predictor};
pub use submission::{read_submission, write_submission};

/// Default file name of the submission CSV
pub const SUBMISSION_FILE: &str = "submission.csv";
