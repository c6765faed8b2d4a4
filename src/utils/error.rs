//! Error Handling Module
//!
//! Defines the error type shared by the dataset, model, training and
//! inference layers. Binaries wrap it in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the histopathology pipeline
#[derive(Error, Debug)]
pub enum HistoError {
    /// Error loading or decoding a patch image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Malformed label or submission CSV
    #[error("CSV error: {0}")]
    Csv(String),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or weights
    #[error("Model error: {0}")]
    Model(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, HistoError>;

impl From<csv::Error> for HistoError {
    fn from(err: csv::Error) -> Self {
        HistoError::Csv(err.to_string())
    }
}

impl From<serde_json::Error> for HistoError {
    fn from(err: serde_json::Error) -> Self {
        HistoError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for HistoError {
    fn from(err: toml::de::Error) -> Self {
        HistoError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for HistoError {
    fn from(err: toml::ser::Error) -> Self {
        HistoError::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for HistoError {
    fn from(err: image::ImageError) -> Self {
        HistoError::ImageLoad(PathBuf::new(), err.to_string())
    }
}
