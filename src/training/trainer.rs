//! Training loop
//!
//! A hand-written Burn loop: seeded shuffling, on-demand batching,
//! Adam + cross-entropy, validation on the inner backend after each
//! epoch, then the epoch-end callbacks (learning-rate decay and early
//! stopping).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::callbacks::{EarlyStopDecision, EarlyStopping, EarlyStoppingConfig, Monitor};
use super::scheduler::{LrDecay, LrSchedule};
use crate::backend::inner_device;
use crate::dataset::{AugmentationConfig, AugmentingBatcher, PatchBatch, PatchBatcher, PatchBurnDataset, PatchItem};
use crate::model::PatchClassifier;
use crate::utils::charts::{AxisRange, DataPoint, DataSeries, LineChart, COLOR_PRIMARY, COLOR_TERTIARY};
use crate::utils::logging::TrainingLogger;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// L2 penalty passed to Adam, 0 disables it
    pub weight_decay: f64,
    pub seed: u64,
    pub lr_decay: LrDecay,
    pub early_stopping: Option<EarlyStoppingConfig>,
    /// Augment training batches when set
    pub augmentation: Option<AugmentationConfig>,
}

impl TrainOptions {
    /// Plain run: constant learning rate, no callbacks, no augmentation
    pub fn new(epochs: usize, batch_size: usize, learning_rate: f64, seed: u64) -> Self {
        Self {
            epochs,
            batch_size,
            learning_rate,
            weight_decay: 0.0,
            seed,
            lr_decay: LrDecay::Constant,
            early_stopping: None,
            augmentation: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            bail!("epochs must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            bail!("learning rate must be positive, got {}", self.learning_rate);
        }
        if self.weight_decay < 0.0 {
            bail!("weight_decay must be non-negative");
        }
        self.lr_decay.validate().map_err(anyhow::Error::msg)?;
        if let Some(es) = &self.early_stopping {
            if es.patience == 0 {
                bail!("early stopping patience must be at least 1");
            }
        }
        Ok(())
    }
}

/// Metrics for one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    /// 1-based epoch whose weights were kept
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
}

impl TrainingHistory {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs.iter().map(|e| e.val_accuracy).reduce(f64::max)
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.epochs.iter().map(|e| e.val_loss).reduce(f64::min)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write `loss_curve.svg` and `accuracy_curve.svg` into `dir`
    pub fn write_curves(&self, dir: &Path) -> crate::Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;

        let series = |name: &str, color: &str, value: fn(&EpochRecord) -> f64| {
            let points = self
                .epochs
                .iter()
                .map(|e| DataPoint::new(e.epoch as f64, value(e)))
                .collect();
            DataSeries::new(name, points, color)
        };

        let loss_path = dir.join("loss_curve.svg");
        LineChart::new("Loss", "Epoch", "Cross-entropy")
            .write(
                &[
                    series("train", COLOR_PRIMARY, |e| e.train_loss),
                    series("validation", COLOR_TERTIARY, |e| e.val_loss).dashed(),
                ],
                &loss_path,
            )?;

        let accuracy_path = dir.join("accuracy_curve.svg");
        LineChart::new("Accuracy", "Epoch", "Accuracy (%)")
            .with_y_range(AxisRange::Fixed(0.0, 100.0))
            .write(
                &[
                    series("train", COLOR_PRIMARY, |e| e.train_accuracy * 100.0),
                    series("validation", COLOR_TERTIARY, |e| e.val_accuracy * 100.0).dashed(),
                ],
                &accuracy_path,
            )?;

        Ok(vec![loss_path, accuracy_path])
    }
}

/// Model and history returned by `train_model`
#[derive(Debug)]
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: PatchClassifier<B>,
    pub history: TrainingHistory,
}

/// Mean loss and accuracy over a dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f64,
    /// Fraction in [0, 1]
    pub accuracy: f64,
    pub samples: usize,
}

/// Train `model` on `train`, validating on `validation` after every epoch
pub fn train_model<B: AutodiffBackend>(
    model: PatchClassifier<B>,
    train: &PatchBurnDataset,
    validation: &PatchBurnDataset,
    options: &TrainOptions,
    device: &B::Device,
) -> Result<TrainingOutcome<B>> {
    options.validate()?;
    if train.is_empty() {
        bail!("training set is empty");
    }
    if validation.is_empty() {
        bail!("validation set is empty");
    }

    let image_size = train.image_size();
    let batcher: Box<dyn Batcher<B, PatchItem, PatchBatch<B>>> = match &options.augmentation {
        Some(config) => Box::new(AugmentingBatcher::new(config.clone(), image_size, options.seed)),
        None => Box::new(PatchBatcher::new(image_size)),
    };

    let adam = if options.weight_decay > 0.0 {
        AdamConfig::new().with_weight_decay(Some(WeightDecayConfig::new(options.weight_decay as f32)))
    } else {
        AdamConfig::new()
    };
    let mut optimizer = adam.init();

    let mut schedule = LrSchedule::new(&options.lr_decay, options.learning_rate);
    let mut early_stopping = options.early_stopping.clone().map(EarlyStopping::new);
    let restore_best = options
        .early_stopping
        .as_ref()
        .map(|es| es.restore_best)
        .unwrap_or(false);

    let mut model = model;
    let mut best_model: Option<PatchClassifier<B>> = None;
    let mut history = TrainingHistory::default();
    let mut logger = TrainingLogger::new(options.epochs);
    let mut epoch_rng = ChaCha8Rng::seed_from_u64(options.seed);
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    for epoch in 0..options.epochs {
        logger.start_epoch(epoch);
        let lr = schedule.lr_for_epoch(epoch);

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut epoch_rng);
        let num_batches = indices.len().div_ceil(options.batch_size);

        let mut epoch_loss = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        for (batch_idx, chunk) in indices.chunks(options.batch_size).enumerate() {
            let items: Vec<PatchItem> = chunk.iter().filter_map(|&i| train.get(i)).collect();
            if items.is_empty() {
                continue;
            }

            let batch = batcher.batch(items, device);
            let batch_size = batch.targets.dims()[0];

            let output = model.forward(batch.images);
            let loss = loss_fn.forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss += loss_value * batch_size as f64;
            correct += count_correct(output, batch.targets);
            seen += batch_size;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);

            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                debug!(
                    "  Batch {:>4}/{}: loss = {:.4}, acc = {:.2}%",
                    batch_idx + 1,
                    num_batches,
                    loss_value,
                    100.0 * correct as f64 / seen.max(1) as f64
                );
            }
        }

        let train_loss = epoch_loss / seen.max(1) as f64;
        if !train_loss.is_finite() {
            bail!("training diverged at epoch {} (loss = {})", epoch + 1, train_loss);
        }
        let train_accuracy = correct as f64 / seen.max(1) as f64;

        let inner_device = inner_device::<B>(device);
        let val = evaluate_model(&model.valid(), validation, options.batch_size, &inner_device)
            .context("validation failed")?;

        logger.end_epoch(train_loss, train_accuracy, val.loss, val.accuracy, lr);
        history.epochs.push(EpochRecord {
            epoch: epoch + 1,
            train_loss,
            train_accuracy,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
            learning_rate: lr,
        });

        schedule.observe(val.loss);
        let next_lr = schedule.lr_for_epoch(epoch + 1);
        if next_lr < lr && epoch + 1 < options.epochs {
            logger.log_lr_reduced(lr, next_lr);
        }

        if let Some(stopper) = early_stopping.as_mut() {
            let metric = match stopper.config().monitor {
                Monitor::ValLoss => val.loss,
                Monitor::ValAccuracy => val.accuracy,
            };
            match stopper.update(metric) {
                EarlyStopDecision::Improved => {
                    history.best_epoch = Some(epoch + 1);
                    if restore_best {
                        best_model = Some(model.clone());
                    }
                }
                EarlyStopDecision::Waiting(n) => {
                    debug!("No {} improvement for {} epoch(s)", stopper.config().monitor.name(), n);
                }
                EarlyStopDecision::Stop => {
                    logger.log_early_stop(stopper.config().patience);
                    history.stopped_early = true;
                    break;
                }
            }
        }
    }

    if early_stopping.is_none() {
        history.best_epoch = history
            .epochs
            .iter()
            .max_by(|a, b| a.val_accuracy.total_cmp(&b.val_accuracy))
            .map(|e| e.epoch);
    }

    logger.log_complete(history.len(), history.best_val_accuracy().unwrap_or(0.0));

    let model = match best_model {
        Some(best) if restore_best => {
            debug!("Restoring weights from epoch {:?}", history.best_epoch);
            best
        }
        _ => model,
    };

    Ok(TrainingOutcome { model, history })
}

/// Loss and accuracy of `model` on `dataset`, without gradients
pub fn evaluate_model<B: Backend>(
    model: &PatchClassifier<B>,
    dataset: &PatchBurnDataset,
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<EvalMetrics> {
    if dataset.is_empty() {
        return Err(crate::HistoError::Dataset("cannot evaluate on an empty dataset".into()));
    }

    let batcher = PatchBatcher::new(dataset.image_size());
    let loss_fn = CrossEntropyLossConfig::new().init(device);

    let mut total_loss = 0.0f64;
    let mut correct = 0usize;
    let mut seen = 0usize;

    let len = dataset.len();
    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(len);
        let items: Vec<PatchItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }

        let batch: PatchBatch<B> = batcher.batch(items, device);
        let n = batch.targets.dims()[0];
        let output = model.forward(batch.images);

        let loss: f64 = loss_fn
            .forward(output.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        total_loss += loss * n as f64;
        correct += count_correct(output, batch.targets);
        seen += n;
    }

    if seen == 0 {
        return Err(crate::HistoError::Dataset("no readable samples to evaluate".into()));
    }

    Ok(EvalMetrics {
        loss: total_loss / seen as f64,
        accuracy: correct as f64 / seen as f64,
        samples: seen,
    })
}

fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size, _] = logits.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions.equal(targets).int().sum().into_scalar().elem();
    correct as usize
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{build_model, CnnVariant, HyperParams};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    pub(crate) const SIZE: usize = 8;

    pub(crate) fn tiny_hyperparams() -> HyperParams {
        HyperParams {
            base_filters: 2,
            kernel_size: 3,
            conv_blocks: 2,
            dense_units: 4,
            dropout: 0.0,
            learning_rate: 1e-2,
        }
    }

    /// Dark patches are benign, bright ones malignant
    pub(crate) fn toy_dataset(count: usize) -> PatchBurnDataset {
        let items = (0..count)
            .map(|i| {
                let label = (i % 2) as u8;
                let base = if label == 1 { 0.8 } else { 0.2 };
                let jitter = (i % 5) as f32 * 0.01;
                PatchItem {
                    image: vec![base + jitter; 3 * SIZE * SIZE],
                    label,
                    id: format!("t{}", i),
                }
            })
            .collect();
        PatchBurnDataset::from_items(items, SIZE)
    }

    fn model() -> PatchClassifier<TestBackend> {
        let device = Default::default();
        build_model::<TestBackend>(CnnVariant::Baseline, &tiny_hyperparams(), SIZE, &device)
            .unwrap()
            .0
    }

    #[test]
    fn test_train_records_every_epoch() {
        let device = Default::default();
        let options = TrainOptions::new(3, 4, 1e-2, 1);

        let outcome = train_model(model(), &toy_dataset(12), &toy_dataset(6), &options, &device).unwrap();
        let history = outcome.history;

        assert_eq!(history.len(), 3);
        assert!(!history.stopped_early);
        assert_eq!(history.epochs[2].epoch, 3);
        for e in &history.epochs {
            assert!(e.train_loss.is_finite());
            assert!((0.0..=1.0).contains(&e.val_accuracy));
            assert_eq!(e.learning_rate, 1e-2);
        }
        assert!(history.best_epoch.is_some());
    }

    #[test]
    fn test_early_stopping_halts() {
        let device = Default::default();
        let mut options = TrainOptions::new(6, 4, 1e-30, 1);
        options.early_stopping = Some(EarlyStoppingConfig {
            patience: 1,
            min_delta: 1e-3,
            monitor: Monitor::ValLoss,
            restore_best: true,
        });

        let outcome = train_model(model(), &toy_dataset(8), &toy_dataset(4), &options, &device).unwrap();
        assert!(outcome.history.stopped_early);
        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history.best_epoch, Some(1));
    }

    #[test]
    fn test_step_decay_changes_lr() {
        let device = Default::default();
        let mut options = TrainOptions::new(3, 4, 1e-2, 1);
        options.lr_decay = LrDecay::Step { factor: 0.5, every: 1 };
        options.augmentation = Some(AugmentationConfig::light());

        let outcome = train_model(model(), &toy_dataset(8), &toy_dataset(4), &options, &device).unwrap();
        let lrs: Vec<f64> = outcome.history.epochs.iter().map(|e| e.learning_rate).collect();
        assert_eq!(lrs, vec![1e-2, 5e-3, 2.5e-3]);
    }

    #[test]
    fn test_empty_sets_rejected() {
        let device = Default::default();
        let options = TrainOptions::new(1, 4, 1e-2, 1);
        let empty = PatchBurnDataset::from_items(Vec::new(), SIZE);
        assert!(train_model(model(), &empty, &toy_dataset(4), &options, &device).is_err());
        assert!(train_model(model(), &toy_dataset(4), &empty, &options, &device).is_err());
    }

    #[test]
    fn test_options_validation() {
        assert!(TrainOptions::new(0, 4, 1e-3, 0).validate().is_err());
        assert!(TrainOptions::new(1, 0, 1e-3, 0).validate().is_err());
        assert!(TrainOptions::new(1, 4, 0.0, 0).validate().is_err());
        assert!(TrainOptions::new(1, 4, 1e-3, 0).validate().is_ok());
    }

    #[test]
    fn test_evaluate_model() {
        let device = Default::default();
        let (model, _) =
            build_model::<NdArray>(CnnVariant::Deep, &tiny_hyperparams(), SIZE, &device).unwrap();

        let metrics = evaluate_model(&model, &toy_dataset(10), 3, &device).unwrap();
        assert_eq!(metrics.samples, 10);
        assert!(metrics.loss.is_finite());
        assert!((0.0..=1.0).contains(&metrics.accuracy));
    }

    fn sample_history() -> TrainingHistory {
        TrainingHistory {
            epochs: (1..=3)
                .map(|epoch| EpochRecord {
                    epoch,
                    train_loss: 1.0 / epoch as f64,
                    train_accuracy: 0.5 + 0.1 * epoch as f64,
                    val_loss: [0.7, 0.5, 0.6][epoch - 1],
                    val_accuracy: [0.6, 0.8, 0.7][epoch - 1],
                    learning_rate: 1e-3,
                })
                .collect(),
            best_epoch: Some(2),
            stopped_early: false,
        }
    }

    #[test]
    fn test_history_best_values() {
        let history = sample_history();
        assert_eq!(history.best_val_accuracy(), Some(0.8));
        assert_eq!(history.best_val_loss(), Some(0.5));
        assert_eq!(TrainingHistory::default().best_val_accuracy(), None);
    }

    #[test]
    fn test_history_save_load_and_curves() {
        let dir = tempfile::tempdir().unwrap();
        let history = sample_history();

        let path = dir.path().join("history.json");
        history.save(&path).unwrap();
        assert_eq!(TrainingHistory::load(&path).unwrap(), history);

        let charts = history.write_curves(dir.path()).unwrap();
        assert_eq!(charts.len(), 2);
        let svg = fs::read_to_string(&charts[0]).unwrap();
        assert!(svg.starts_with("<svg"));
    }
}
