//! Pipeline configuration
//!
//! One TOML file drives every step. All sections are optional; missing
//! fields fall back to the defaults below, and CLI flags override file
//! values after loading.
//!
//! ```toml
//! seed = 42
//!
//! [data]
//! data_dir = "data/histopathologic-cancer-detection"
//! max_samples = 20000
//!
//! [search]
//! max_trials = 10
//! epochs = 3
//!
//! [training]
//! epochs = 20
//!
//! [training.lr_decay]
//! kind = "reduce_on_plateau"
//! factor = 0.5
//! patience = 2
//! min_lr = 1e-6
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{AugmentationConfig, SplitConfig, SplitRecord, DEFAULT_IMAGE_SIZE};
use crate::model::{CnnVariant, HyperParams};
use crate::training::{
    EarlyStoppingConfig, LrDecay, RandomSearch, SearchSpace, TrainOptions, DEFAULT_BATCH_SIZE,
    DEFAULT_EPOCHS,
};
use crate::utils::error::{HistoError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub labels_file: String,
    pub train_dir: String,
    pub test_dir: String,
    pub image_size: usize,
    /// Cap on labeled patches used, drawn before splitting
    pub max_samples: Option<usize>,
    pub holdout_fraction: f64,
    pub validation_fraction: f64,
    /// Draw equal class counts when subsampling
    pub balance_classes: bool,
    /// Augment training batches of the final run
    pub augmentation: bool,
    /// Patches per class decoded for the EDA statistics
    pub eda_samples: usize,
    /// Decode all patches into memory before training
    pub preload: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            labels_file: "train_labels.csv".to_string(),
            train_dir: "train".to_string(),
            test_dir: "test".to_string(),
            image_size: DEFAULT_IMAGE_SIZE,
            max_samples: None,
            holdout_fraction: 0.10,
            validation_fraction: 0.15,
            balance_classes: false,
            augmentation: true,
            eda_samples: 500,
            preload: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_trials: usize,
    pub executions_per_trial: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    /// Share of the training split each trial trains on
    pub train_fraction: f64,
    pub variants: Vec<CnnVariant>,
    pub baseline: SearchSpace,
    pub deep: SearchSpace,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_trials: 10,
            executions_per_trial: 1,
            epochs: 3,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: 42,
            train_fraction: 0.25,
            variants: CnnVariant::ALL.to_vec(),
            baseline: SearchSpace::baseline(),
            deep: SearchSpace::deep(),
        }
    }
}

impl SearchConfig {
    pub fn space(&self, variant: CnnVariant) -> &SearchSpace {
        match variant {
            CnnVariant::Baseline => &self.baseline,
            CnnVariant::Deep => &self.deep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub weight_decay: f64,
    /// Used when no search results are available
    pub variant: CnnVariant,
    pub lr_decay: LrDecay,
    pub early_stopping: EarlyStoppingConfig,
    /// Used when no search results are available
    pub hyperparams: HyperParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            weight_decay: 1e-4,
            variant: CnnVariant::Deep,
            lr_decay: LrDecay::default(),
            early_stopping: EarlyStoppingConfig::default(),
            hyperparams: HyperParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub output_dir: PathBuf,
    pub submission_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            submission_file: crate::inference::SUBMISSION_FILE.to_string(),
        }
    }
}

impl OutputConfig {
    pub fn eda_dir(&self) -> PathBuf {
        self.output_dir.join("eda")
    }

    pub fn search_results_path(&self) -> PathBuf {
        self.output_dir.join("search_results.json")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.output_dir.join("model")
    }

    pub fn curves_dir(&self) -> PathBuf {
        self.output_dir.join("training")
    }

    pub fn evaluation_dir(&self) -> PathBuf {
        self.output_dir.join("evaluation")
    }

    pub fn submission_path(&self) -> PathBuf {
        self.output_dir.join(&self.submission_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub data: DataConfig,
    pub search: SearchConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            data: DataConfig::default(),
            search: SearchConfig::default(),
            training: TrainingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HistoError::PathNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            HistoError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })?;

        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let data = &self.data;
        SplitConfig::new(data.holdout_fraction, data.validation_fraction, self.seed)?;
        if data.validation_fraction <= 0.0 {
            return Err(HistoError::Config(
                "validation_fraction must be greater than 0".into(),
            ));
        }

        if data.image_size == 0 {
            return Err(HistoError::Config("image_size must be greater than 0".into()));
        }
        if data.max_samples == Some(0) {
            return Err(HistoError::Config("max_samples must be greater than 0".into()));
        }

        let search = &self.search;
        if search.max_trials == 0 {
            return Err(HistoError::Config("search.max_trials must be at least 1".into()));
        }
        if search.executions_per_trial == 0 {
            return Err(HistoError::Config(
                "search.executions_per_trial must be at least 1".into(),
            ));
        }
        if search.epochs == 0 || self.training.epochs == 0 {
            return Err(HistoError::Config("epochs must be at least 1".into()));
        }
        if search.batch_size == 0 || self.training.batch_size == 0 {
            return Err(HistoError::Config("batch_size must be at least 1".into()));
        }
        if !(search.train_fraction > 0.0 && search.train_fraction <= 1.0) {
            return Err(HistoError::Config(
                "search.train_fraction must be in (0.0, 1.0]".into(),
            ));
        }
        if search.variants.is_empty() {
            return Err(HistoError::Config("search.variants must not be empty".into()));
        }

        for &variant in &search.variants {
            let space = search.space(variant);
            space.validate()?;
            let deepest = space.conv_blocks.iter().copied().max().unwrap_or(0);
            let probe = HyperParams {
                conv_blocks: deepest,
                ..HyperParams::default()
            };
            if probe.feature_map_size(data.image_size) == 0 {
                return Err(HistoError::Config(format!(
                    "{} search space allows {} pooling blocks, too many for {}px patches",
                    variant, deepest, data.image_size
                )));
            }
        }

        self.training.hyperparams.validate(data.image_size)?;
        self.training
            .lr_decay
            .validate()
            .map_err(HistoError::Config)?;
        if self.training.early_stopping.patience == 0 {
            return Err(HistoError::Config(
                "early_stopping.patience must be at least 1".into(),
            ));
        }
        if self.training.weight_decay < 0.0 {
            return Err(HistoError::Config("weight_decay must be non-negative".into()));
        }

        Ok(())
    }

    pub fn split_record(&self) -> SplitRecord {
        SplitRecord {
            seed: self.seed,
            max_samples: self.data.max_samples,
            balance_classes: self.data.balance_classes,
            holdout_fraction: self.data.holdout_fraction,
            validation_fraction: self.data.validation_fraction,
        }
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            holdout_fraction: self.data.holdout_fraction,
            validation_fraction: self.data.validation_fraction,
            seed: self.seed,
            stratified: true,
        }
    }

    pub fn augmentation(&self) -> Option<AugmentationConfig> {
        self.data.augmentation.then(AugmentationConfig::default)
    }

    pub fn random_search(&self) -> RandomSearch {
        let s = &self.search;
        RandomSearch::new(s.max_trials, s.executions_per_trial, s.epochs, s.batch_size, s.seed)
            .with_spaces(s.variants.iter().map(|&v| (v, s.space(v).clone())).collect())
    }

    /// Options for the final run with the winning hyperparameters
    pub fn final_train_options(&self, hyperparams: &HyperParams) -> TrainOptions {
        TrainOptions {
            epochs: self.training.epochs,
            batch_size: self.training.batch_size,
            learning_rate: hyperparams.learning_rate,
            weight_decay: self.training.weight_decay,
            seed: self.seed,
            lr_decay: self.training.lr_decay.clone(),
            early_stopping: Some(self.training.early_stopping.clone()),
            augmentation: self.augmentation(),
        }
    }

    pub fn labels_path(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.labels_file)
    }

    pub fn test_dir(&self) -> PathBuf {
        self.data.data_dir.join(&self.data.test_dir)
    }

    /// Directory to predict: `input` as given (relative to the working directory), else [`Self::test_dir`]
    pub fn prediction_dir(&self, input: Option<&Path>) -> PathBuf {
        input.map(Path::to_path_buf).unwrap_or_else(|| self.test_dir())
    }
}
