//! Model artifacts on disk
//!
//! A trained model is stored as a directory:
//!
//! ```text
//! artifacts/
//! ├── model.mpk              weights (CompactRecorder)
//! ├── model_config.json      PatchClassifierConfig
//! ├── history.json           per-epoch metrics of the final run
//! └── best_hyperparams.json  winning search configuration
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::SplitRecord;
use crate::model::{CnnVariant, HyperParams, PatchClassifier, PatchClassifierConfig};
use crate::training::TrainingHistory;
use crate::utils::error::{HistoError, Result};

const MODEL_FILE: &str = "model";
const WEIGHTS_EXTENSION: &str = "mpk";
const CONFIG_FILE: &str = "model_config.json";
const HISTORY_FILE: &str = "history.json";
const BEST_FILE: &str = "best_hyperparams.json";

/// Winning configuration with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestConfig {
    pub variant: CnnVariant,
    pub hyperparams: HyperParams,
    /// Validation accuracy reached during the search, if one was run
    pub search_val_accuracy: Option<f64>,
    pub num_params: usize,
    /// Split the model was trained under; the holdout is only unseen under the same split
    #[serde(default)]
    pub split: Option<SplitRecord>,
    pub saved_at: String,
}

#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    dir: PathBuf,
}

impl ModelArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Weights path without extension; the recorder appends `.mpk`
    pub fn model_path(&self) -> PathBuf {
        self.dir.join(MODEL_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    pub fn best_config_path(&self) -> PathBuf {
        self.dir.join(BEST_FILE)
    }

    /// True when weights and config are both present
    pub fn exists(&self) -> bool {
        self.model_path().with_extension(WEIGHTS_EXTENSION).exists() && self.config_path().exists()
    }

    pub fn save<B: Backend>(
        &self,
        model: &PatchClassifier<B>,
        config: &PatchClassifierConfig,
        history: &TrainingHistory,
        search_val_accuracy: Option<f64>,
        split: &SplitRecord,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        model
            .clone()
            .save_file(self.model_path(), &CompactRecorder::new())
            .map_err(|e| HistoError::Model(format!("Failed to save model: {:?}", e)))?;

        config.save(self.config_path())?;
        history.save(&self.history_path())?;

        let best = BestConfig {
            variant: config.variant,
            hyperparams: config.hyperparams.clone(),
            search_val_accuracy,
            num_params: model.num_params(),
            split: Some(split.clone()),
            saved_at: Utc::now().to_rfc3339(),
        };
        fs::write(self.best_config_path(), serde_json::to_string_pretty(&best)?)?;

        info!("Model artifacts saved to {:?}", self.dir);
        Ok(())
    }

    pub fn load_config(&self) -> Result<PatchClassifierConfig> {
        let path = self.config_path();
        if !path.exists() {
            return Err(HistoError::PathNotFound(path));
        }
        PatchClassifierConfig::load(&path)
            .map_err(|e| HistoError::Config(format!("Failed to read {:?}: {}", path, e)))
    }

    /// Rebuild the model from its config and load the saved weights
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<(PatchClassifier<B>, PatchClassifierConfig)> {
        let config = self.load_config()?;
        let model = config
            .init::<B>(device)
            .load_file(self.model_path(), &CompactRecorder::new(), device)
            .map_err(|e| HistoError::Model(format!("Failed to load model: {:?}", e)))?;

        info!("Loaded {} model from {:?}", config.variant, self.dir);
        Ok((model, config))
    }

    pub fn load_history(&self) -> Result<TrainingHistory> {
        TrainingHistory::load(&self.history_path())
    }

    pub fn load_best_config(&self) -> Result<BestConfig> {
        let json = fs::read_to_string(self.best_config_path())?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Fail when `split` differs from the split the model was trained under
    pub fn check_split(&self, split: &SplitRecord) -> Result<()> {
        match self.load_best_config()?.split {
            Some(trained) if &trained != split => Err(HistoError::Config(format!(
                "model in {} was trained with split ({}) but the current split is ({}); \
                 holdout patches may have been trained on",
                self.dir.display(),
                trained,
                split
            ))),
            Some(_) => Ok(()),
            None => {
                warn!("{:?} records no split, holdout overlap cannot be checked", self.best_config_path());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_model;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn split(seed: u64) -> SplitRecord {
        SplitRecord {
            seed,
            max_samples: Some(500),
            balance_classes: false,
            holdout_fraction: 0.1,
            validation_fraction: 0.15,
        }
    }

    fn hyperparams() -> HyperParams {
        HyperParams {
            base_filters: 2,
            kernel_size: 3,
            conv_blocks: 2,
            dense_units: 4,
            dropout: 0.1,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let (model, config) =
            build_model::<TestBackend>(CnnVariant::Deep, &hyperparams(), 8, &device).unwrap();

        let artifacts = ModelArtifacts::new(dir.path().join("artifacts"));
        assert!(!artifacts.exists());
        artifacts
            .save(&model, &config, &TrainingHistory::default(), Some(0.75), &split(42))
            .unwrap();
        assert!(artifacts.exists());

        let (loaded, loaded_config) = artifacts.load::<TestBackend>(&device).unwrap();
        assert_eq!(loaded_config.variant, CnnVariant::Deep);
        assert_eq!(loaded_config.hyperparams, hyperparams());

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.forward(input).into_data().to_vec().unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            // weights are stored at half precision
            assert!((x - y).abs() < 1e-2);
        }

        let best = artifacts.load_best_config().unwrap();
        assert_eq!(best.search_val_accuracy, Some(0.75));
        assert_eq!(best.num_params, model.num_params());
        assert_eq!(best.split, Some(split(42)));
        assert!(artifacts.load_history().unwrap().is_empty());
    }

    #[test]
    fn test_check_split_detects_changed_seed_or_cap() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let (model, config) =
            build_model::<TestBackend>(CnnVariant::Baseline, &hyperparams(), 8, &device).unwrap();
        let artifacts = ModelArtifacts::new(dir.path());
        artifacts
            .save(&model, &config, &TrainingHistory::default(), None, &split(42))
            .unwrap();

        artifacts.check_split(&split(42)).unwrap();
        assert!(matches!(artifacts.check_split(&split(7)), Err(HistoError::Config(_))));

        let uncapped = SplitRecord {
            max_samples: None,
            ..split(42)
        };
        assert!(artifacts.check_split(&uncapped).is_err());
    }

    #[test]
    fn test_best_config_without_split_still_loads() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(dir.path());
        let json = r#"{
            "variant": "baseline",
            "hyperparams": {"base_filters": 2, "kernel_size": 3, "conv_blocks": 1,
                            "dense_units": 4, "dropout": 0.0, "learning_rate": 0.001},
            "search_val_accuracy": null,
            "num_params": 10,
            "saved_at": "2026-01-01T00:00:00Z"
        }"#;
        fs::write(artifacts.best_config_path(), json).unwrap();

        assert!(artifacts.load_best_config().unwrap().split.is_none());
        artifacts.check_split(&split(1)).unwrap();
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ModelArtifacts::new(dir.path());
        assert!(matches!(artifacts.load_config(), Err(HistoError::PathNotFound(_))));
        assert!(artifacts.load::<TestBackend>(&Default::default()).is_err());
    }
}
