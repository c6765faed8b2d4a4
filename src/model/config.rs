//! Model Configuration Module
//!
//! Hyperparameter object consumed by the model builder, plus the two
//! architecture variants explored by the search.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{HistoError, Result};

/// CNN architecture family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CnnVariant {
    /// Conv -> ReLU -> MaxPool blocks, flattened into a dense head
    Baseline,
    /// Double Conv -> BN -> ReLU blocks with dropout, global average pooling
    Deep,
}

impl CnnVariant {
    pub const ALL: [CnnVariant; 2] = [CnnVariant::Baseline, CnnVariant::Deep];

    pub fn name(&self) -> &'static str {
        match self {
            CnnVariant::Baseline => "baseline",
            CnnVariant::Deep => "deep",
        }
    }
}

impl fmt::Display for CnnVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CnnVariant {
    type Err = HistoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "baseline" | "simple" => Ok(CnnVariant::Baseline),
            "deep" | "bn" => Ok(CnnVariant::Deep),
            other => Err(HistoError::InvalidInput(format!(
                "unknown CNN variant '{}', expected 'baseline' or 'deep'",
                other
            ))),
        }
    }
}

/// Hyperparameters for one model build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    /// Filters in the first block, doubled in every following block
    pub base_filters: usize,
    pub kernel_size: usize,
    /// Each block halves the spatial resolution
    pub conv_blocks: usize,
    pub dense_units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            base_filters: 32,
            kernel_size: 3,
            conv_blocks: 3,
            dense_units: 256,
            dropout: 0.3,
            learning_rate: 1e-3,
        }
    }
}

impl HyperParams {
    /// Filters produced by block `index`
    pub fn filters_at(&self, index: usize) -> usize {
        self.base_filters << index
    }

    pub fn final_filters(&self) -> usize {
        self.filters_at(self.conv_blocks.saturating_sub(1))
    }

    /// Spatial side length after all pooling stages
    pub fn feature_map_size(&self, image_size: usize) -> usize {
        (0..self.conv_blocks).fold(image_size, |size, _| size / 2)
    }

    /// Check the hyperparameters against an input resolution
    pub fn validate(&self, image_size: usize) -> Result<()> {
        if self.base_filters == 0 {
            return Err(HistoError::Config("base_filters must be greater than 0".into()));
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(HistoError::Config(
                "kernel_size must be a positive odd number".into(),
            ));
        }
        if self.conv_blocks == 0 {
            return Err(HistoError::Config("conv_blocks must be at least 1".into()));
        }
        if self.feature_map_size(image_size) == 0 {
            return Err(HistoError::Config(format!(
                "{} pooling blocks collapse a {}px patch to nothing",
                self.conv_blocks, image_size
            )));
        }
        if self.dense_units == 0 {
            return Err(HistoError::Config("dense_units must be greater than 0".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(HistoError::Config("dropout must be in range [0.0, 1.0)".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(HistoError::Config("learning_rate must be positive".into()));
        }
        Ok(())
    }

    /// Compact one-line summary for logs and tables
    pub fn summary(&self) -> String {
        format!(
            "filters={} kernel={} blocks={} dense={} dropout={:.2} lr={:.0e}",
            self.base_filters,
            self.kernel_size,
            self.conv_blocks,
            self.dense_units,
            self.dropout,
            self.learning_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_hyperparams_valid() {
        assert!(HyperParams::default().validate(96).is_ok());
    }

    #[test]
    fn test_filters_double_per_block() {
        let hp = HyperParams {
            base_filters: 16,
            conv_blocks: 4,
            ..Default::default()
        };
        assert_eq!(hp.filters_at(0), 16);
        assert_eq!(hp.filters_at(2), 64);
        assert_eq!(hp.final_filters(), 128);
    }

    #[test]
    fn test_feature_map_size() {
        let hp = HyperParams::default();
        assert_eq!(hp.feature_map_size(96), 12);
        assert_eq!(hp.feature_map_size(50), 6);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let even_kernel = HyperParams {
            kernel_size: 4,
            ..Default::default()
        };
        assert!(even_kernel.validate(96).is_err());

        let too_deep = HyperParams {
            conv_blocks: 8,
            ..Default::default()
        };
        assert!(too_deep.validate(96).is_err());

        let full_dropout = HyperParams {
            dropout: 1.0,
            ..Default::default()
        };
        assert!(full_dropout.validate(96).is_err());
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("Deep".parse::<CnnVariant>().unwrap(), CnnVariant::Deep);
        assert_eq!("baseline".parse::<CnnVariant>().unwrap(), CnnVariant::Baseline);
        assert!("resnet".parse::<CnnVariant>().is_err());
    }

    #[test]
    fn test_variant_serde_lowercase() {
        let json = serde_json::to_string(&CnnVariant::Deep).unwrap();
        assert_eq!(json, "\"deep\"");
    }
}
