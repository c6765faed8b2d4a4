//! End-to-end pipeline
//!
//! Every step can run on its own from the CLI, reading what earlier steps
//! left in `output_dir`, or chained by [`run_pipeline`]:
//!
//! 1. EDA over the labeled patches
//! 2. Random hyperparameter search over both CNN variants
//! 3. Final training of the best configuration with the callbacks enabled
//! 4. ROC / AUC on the holdout slice
//! 5. Test-set inference and the submission CSV

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::tensor::backend::{AutodiffBackend, Backend};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::inner_device;
use crate::checkpoint::ModelArtifacts;
use crate::config::PipelineConfig;
use crate::dataset::{subsample, DatasetSplits, PatchBurnDataset, PatchDataset, PatchSample};
use crate::eda::ExploratoryReport;
use crate::evaluation::{evaluate_holdout, EvaluationReport, DEFAULT_THRESHOLD};
use crate::inference::{write_submission, Predictor};
use crate::model::{build_model, CnnVariant, HyperParams, PatchClassifier, PatchClassifierConfig};
use crate::training::{train_model, SearchResults, TrainingHistory};
use crate::utils::format_duration;

/// Labeled patches after the optional cap, split three ways
pub struct PreparedData {
    pub dataset: PatchDataset,
    pub splits: DatasetSplits,
}

/// Configuration chosen for the final run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedModel {
    pub variant: CnnVariant,
    pub hyperparams: HyperParams,
    /// Search objective of the winning trial, if a search ran
    pub search_val_accuracy: Option<f64>,
}

impl SelectedModel {
    pub fn from_search(results: &SearchResults) -> Option<Self> {
        results.best().map(|trial| Self {
            variant: trial.variant,
            hyperparams: trial.hyperparams.clone(),
            search_val_accuracy: Some(trial.val_accuracy),
        })
    }

    /// Fixed configuration from the `[training]` section
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            variant: config.training.variant,
            hyperparams: config.training.hyperparams.clone(),
            search_val_accuracy: None,
        }
    }
}

/// Model produced by the final training run
pub struct FinalModel<B: AutodiffBackend> {
    pub model: PatchClassifier<B>,
    pub config: PatchClassifierConfig,
    pub history: TrainingHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub variant: CnnVariant,
    pub hyperparams: HyperParams,
    pub search_val_accuracy: Option<f64>,
    pub epochs_trained: usize,
    pub best_val_accuracy: Option<f64>,
    pub holdout_auc: Option<f64>,
    pub submission: Option<PathBuf>,
    pub duration_secs: f64,
}

impl PipelineSummary {
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn print(&self) {
        println!();
        println!("{}", "Pipeline Summary:".green().bold());
        println!("  🧠 Model:            {} ({})", self.variant, self.hyperparams.summary());
        if let Some(acc) = self.search_val_accuracy {
            println!("  🔎 Search val acc:   {:.2}%", acc * 100.0);
        }
        println!("  📅 Epochs trained:   {}", self.epochs_trained);
        if let Some(acc) = self.best_val_accuracy {
            println!("  ✅ Best val acc:     {:.2}%", acc * 100.0);
        }
        match self.holdout_auc {
            Some(auc) => println!("  📈 Holdout AUC:      {:.4}", auc),
            None => println!("  📈 Holdout AUC:      {}", "skipped".yellow()),
        }
        match &self.submission {
            Some(path) => println!("  💾 Submission:       {}", path.display()),
            None => println!("  💾 Submission:       {}", "skipped".yellow()),
        }
        println!("  ⏱️  Duration:         {}", format_duration(self.duration_secs));
    }
}

pub fn load_dataset(config: &PipelineConfig) -> Result<PatchDataset> {
    let data = &config.data;
    let dataset = PatchDataset::new(&data.data_dir, &data.labels_file, &data.train_dir, data.image_size)
        .with_context(|| format!("Failed to load labeled patches from {}", data.data_dir.display()))?;
    if dataset.is_empty() {
        bail!(
            "no labeled patches found under {} ({} ids without a file)",
            data.data_dir.display(),
            dataset.missing_ids.len()
        );
    }
    Ok(dataset)
}

/// Load the labeled patches, apply `max_samples` and split them
pub fn prepare_data(config: &PipelineConfig) -> Result<PreparedData> {
    let dataset = load_dataset(config)?;
    dataset.stats().print();

    let samples = match config.data.max_samples {
        Some(max) if max < dataset.len() => {
            info!(
                "Capping {} labeled patches at {} (balanced: {})",
                dataset.len(),
                max,
                config.data.balance_classes
            );
            subsample(dataset.samples.clone(), max, config.seed, config.data.balance_classes)
        }
        _ => dataset.samples.clone(),
    };

    let total = samples.len();
    let splits = DatasetSplits::from_samples(samples, config.split_config())?;
    splits.stats().print();
    if splits.validation.is_empty() {
        bail!(
            "validation split is empty: {} labeled patches leave none for validation_fraction = {}",
            total,
            config.data.validation_fraction
        );
    }

    Ok(PreparedData { dataset, splits })
}

fn to_burn_dataset(samples: Vec<PatchSample>, config: &PipelineConfig) -> PatchBurnDataset {
    if config.data.preload {
        PatchBurnDataset::new_cached(samples, config.data.image_size)
    } else {
        PatchBurnDataset::new(samples, config.data.image_size)
    }
}

pub fn run_eda(config: &PipelineConfig) -> Result<ExploratoryReport> {
    println!("{}", "Exploratory Data Analysis...".cyan().bold());
    let dataset = load_dataset(config)?;

    let report = ExploratoryReport::compute(&dataset, config.data.eda_samples, config.data.image_size)?;
    let dir = config.output.eda_dir();
    let files = report.write_report(&dir)?;
    report.print();

    info!("Wrote {} EDA artifacts to {:?}", files.len(), dir);
    Ok(report)
}

pub fn run_search<B: AutodiffBackend>(
    config: &PipelineConfig,
    data: &PreparedData,
    device: &B::Device,
) -> Result<SearchResults> {
    println!("{}", "Hyperparameter Search...".cyan().bold());

    let mut train = data.splits.train.clone();
    if config.search.train_fraction < 1.0 {
        let keep = ((train.len() as f64 * config.search.train_fraction).ceil() as usize).max(1);
        info!("Search trains on {} of {} training patches", keep, train.len());
        train = subsample(train, keep, config.search.seed, false);
    }

    let train = to_burn_dataset(train, config);
    let validation = to_burn_dataset(data.splits.validation.clone(), config);

    let results = config.random_search().run::<B>(&train, &validation, device)?;
    let path = config.output.search_results_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    results.save(&path)?;

    println!("{}", results.summary_table());
    info!("Search results saved to {:?}", path);
    Ok(results)
}

/// Best trial of a previous search if its results exist, else the `[training]` fallback
pub fn select_model(config: &PipelineConfig) -> Result<SelectedModel> {
    let path = config.output.search_results_path();
    if !path.exists() {
        info!("No search results at {:?}, using configured hyperparameters", path);
        return Ok(SelectedModel::from_config(config));
    }

    let results = SearchResults::load(&path)?;
    SelectedModel::from_search(&results)
        .with_context(|| format!("no completed trial in {}", path.display()))
}

pub fn run_final_training<B: AutodiffBackend>(
    config: &PipelineConfig,
    data: &PreparedData,
    selected: &SelectedModel,
    device: &B::Device,
) -> Result<FinalModel<B>> {
    println!("{}", "Final Training...".cyan().bold());
    println!("  🧠 {} {}", selected.variant, selected.hyperparams.summary());

    let train = to_burn_dataset(data.splits.train.clone(), config);
    let validation = to_burn_dataset(data.splits.validation.clone(), config);
    let [benign, malignant] = train.class_distribution();
    info!(
        "Final training on {} patches ({} benign / {} malignant), validating on {}",
        train.len(),
        benign,
        malignant,
        validation.len()
    );

    let (model, model_config) = build_model::<B>(
        selected.variant,
        &selected.hyperparams,
        config.data.image_size,
        device,
    )?;
    let options = config.final_train_options(&selected.hyperparams);
    let outcome = train_model(model, &train, &validation, &options, device)?;

    let curves = outcome.history.write_curves(&config.output.curves_dir())?;
    info!("Wrote {} training curves", curves.len());

    let artifacts = ModelArtifacts::new(config.output.artifacts_dir());
    artifacts.save(
        &outcome.model,
        &model_config,
        &outcome.history,
        selected.search_val_accuracy,
        &config.split_record(),
    )?;

    Ok(FinalModel {
        model: outcome.model,
        config: model_config,
        history: outcome.history,
    })
}

pub fn run_evaluation<B: Backend>(
    config: &PipelineConfig,
    model: &PatchClassifier<B>,
    data: &PreparedData,
    device: &B::Device,
) -> Result<EvaluationReport> {
    println!("{}", "Holdout Evaluation...".cyan().bold());

    let holdout = to_burn_dataset(data.splits.holdout.clone(), config);
    let report = evaluate_holdout(model, &holdout, config.training.batch_size, device)?;
    report.write(&config.output.evaluation_dir())?;
    report.print();

    Ok(report)
}

/// Predict every patch in `test_dir` and write the submission CSV
pub fn run_prediction<B: Backend>(
    config: &PipelineConfig,
    predictor: &Predictor<B>,
    test_dir: &Path,
) -> Result<PathBuf> {
    println!("{}", "Test-Set Inference...".cyan().bold());

    let predictions = predictor.predict_directory(test_dir)?;
    let path = config.output.submission_path();
    write_submission(&path, &predictions)?;

    let malignant = predictions
        .iter()
        .filter(|p| p.probability >= DEFAULT_THRESHOLD)
        .count();
    println!(
        "  📄 {} predictions ({} above {}) written to {}",
        predictions.len(),
        malignant,
        DEFAULT_THRESHOLD,
        path.display()
    );
    Ok(path)
}

/// EDA, search, final training, holdout evaluation and submission in one run
pub fn run_pipeline<B: AutodiffBackend>(config: &PipelineConfig, device: &B::Device) -> Result<PipelineSummary> {
    config.validate()?;
    let start = Instant::now();
    fs::create_dir_all(&config.output.output_dir)?;
    config.save(&config.output.output_dir.join("pipeline.toml"))?;

    run_eda(config)?;
    let data = prepare_data(config)?;

    let results = run_search::<B>(config, &data, device)?;
    let selected = SelectedModel::from_search(&results).context("search produced no completed trial")?;

    let trained = run_final_training::<B>(config, &data, &selected, device)?;
    let model = trained.model.valid();
    let inner_device = inner_device::<B>(device);

    let stats = data.splits.stats();
    let holdout_auc = if stats.holdout_malignant == 0 || stats.holdout_malignant == stats.holdout_size {
        warn!(
            "Holdout has {} patches ({} malignant), ROC needs both classes; skipping ROC / AUC",
            stats.holdout_size, stats.holdout_malignant
        );
        None
    } else {
        Some(run_evaluation(config, &model, &data, &inner_device)?.auc)
    };

    let test_dir = config.test_dir();
    let submission = if test_dir.is_dir() {
        let predictor = Predictor::new(model, trained.config.clone(), inner_device)
            .with_batch_size(config.training.batch_size);
        Some(run_prediction(config, &predictor, &test_dir)?)
    } else {
        warn!("Test directory {:?} not found, skipping submission", test_dir);
        None
    };

    let summary = PipelineSummary {
        variant: selected.variant,
        hyperparams: selected.hyperparams,
        search_val_accuracy: selected.search_val_accuracy,
        epochs_trained: trained.history.len(),
        best_val_accuracy: trained.history.best_val_accuracy(),
        holdout_auc,
        submission,
        duration_secs: start.elapsed().as_secs_f64(),
    };
    summary.save(&config.output.output_dir.join("summary.json"))?;
    Ok(summary)
}
