//! Random hyperparameter search
//!
//! Samples distinct (variant, hyperparameters) pairs from a declared
//! search space, trains each one for a few epochs and keeps the
//! configuration with the highest validation accuracy. Each configuration
//! can be trained several times; its score is the mean over executions of
//! the best validation accuracy reached.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Result};
use burn::tensor::backend::AutodiffBackend;
use chrono::{DateTime, Local};
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::trainer::{train_model, TrainOptions};
use crate::dataset::PatchBurnDataset;
use crate::model::{build_model, CnnVariant, HyperParams};

/// Discrete choices for every hyperparameter of one CNN variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub base_filters: Vec<usize>,
    pub kernel_sizes: Vec<usize>,
    pub conv_blocks: Vec<usize>,
    pub dense_units: Vec<usize>,
    pub learning_rates: Vec<f64>,
    pub dropout_min: f64,
    pub dropout_max: f64,
    pub dropout_step: f64,
}

impl SearchSpace {
    pub fn baseline() -> Self {
        Self {
            base_filters: vec![16, 32],
            kernel_sizes: vec![3, 5],
            conv_blocks: vec![2, 3],
            dense_units: vec![64, 128, 256],
            learning_rates: vec![1e-3, 5e-4, 1e-4],
            dropout_min: 0.0,
            dropout_max: 0.5,
            dropout_step: 0.1,
        }
    }

    pub fn deep() -> Self {
        Self {
            base_filters: vec![16, 32, 64],
            kernel_sizes: vec![3],
            conv_blocks: vec![3, 4],
            dense_units: vec![128, 256],
            learning_rates: vec![1e-3, 5e-4, 1e-4],
            dropout_min: 0.2,
            dropout_max: 0.5,
            dropout_step: 0.1,
        }
    }

    pub fn for_variant(variant: CnnVariant) -> Self {
        match variant {
            CnnVariant::Baseline => Self::baseline(),
            CnnVariant::Deep => Self::deep(),
        }
    }

    /// Dropout values from min to max (inclusive) in `dropout_step` increments
    pub fn dropout_choices(&self) -> Vec<f64> {
        if self.dropout_step <= 0.0 || self.dropout_max <= self.dropout_min {
            return vec![self.dropout_min];
        }
        let steps = ((self.dropout_max - self.dropout_min) / self.dropout_step + 1e-9).floor() as usize;
        (0..=steps)
            .map(|i| {
                let value = self.dropout_min + i as f64 * self.dropout_step;
                (value * 1e6).round() / 1e6
            })
            .collect()
    }

    /// Number of distinct configurations
    pub fn size(&self) -> usize {
        self.base_filters.len()
            * self.kernel_sizes.len()
            * self.conv_blocks.len()
            * self.dense_units.len()
            * self.learning_rates.len()
            * self.dropout_choices().len()
    }

    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Option<HyperParams> {
        Some(HyperParams {
            base_filters: *self.base_filters.choose(rng)?,
            kernel_size: *self.kernel_sizes.choose(rng)?,
            conv_blocks: *self.conv_blocks.choose(rng)?,
            dense_units: *self.dense_units.choose(rng)?,
            dropout: *self.dropout_choices().choose(rng)?,
            learning_rate: *self.learning_rates.choose(rng)?,
        })
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.size() == 0 {
            return Err(crate::HistoError::Config(
                "search space has an empty choice list".into(),
            ));
        }
        if self.dropout_min < 0.0 || self.dropout_max >= 1.0 {
            return Err(crate::HistoError::Config(
                "dropout range must lie within [0.0, 1.0)".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TrialStatus {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: usize,
    pub variant: CnnVariant,
    pub hyperparams: HyperParams,
    /// Mean of the best validation accuracy per execution
    pub val_accuracy: f64,
    /// Mean of the lowest validation loss per execution
    pub val_loss: f64,
    /// Epochs of the last execution
    pub epochs_run: usize,
    pub executions: usize,
    pub duration_secs: f64,
    pub status: TrialStatus,
}

impl Trial {
    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub trials: Vec<Trial>,
    pub started_at: DateTime<Local>,
    pub space_size: usize,
}

impl SearchResults {
    /// Completed trial with the highest validation accuracy
    pub fn best(&self) -> Option<&Trial> {
        self.trials
            .iter()
            .filter(|t| t.is_completed())
            .max_by(|a, b| a.val_accuracy.total_cmp(&b.val_accuracy))
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

    /// Trials ranked by validation accuracy, failed ones last
    pub fn summary_table(&self) -> String {
        let mut ranked: Vec<&Trial> = self.trials.iter().collect();
        ranked.sort_by(|a, b| {
            b.is_completed()
                .cmp(&a.is_completed())
                .then(b.val_accuracy.total_cmp(&a.val_accuracy))
        });

        let mut table = format!(
            "{:>5}  {:<9} {:>8} {:>8} {:>6}  {}\n",
            "trial", "variant", "val_acc", "val_loss", "epochs", "hyperparameters"
        );
        for t in ranked {
            match &t.status {
                TrialStatus::Completed => table.push_str(&format!(
                    "{:>5}  {:<9} {:>7.2}% {:>8.4} {:>6}  {}\n",
                    t.id,
                    t.variant.name(),
                    t.val_accuracy * 100.0,
                    t.val_loss,
                    t.epochs_run,
                    t.hyperparams.summary()
                )),
                TrialStatus::Failed(reason) => table.push_str(&format!(
                    "{:>5}  {:<9} {:>8} {:>8} {:>6}  {} ({})\n",
                    t.id,
                    t.variant.name(),
                    "failed",
                    "-",
                    "-",
                    t.hyperparams.summary(),
                    reason
                )),
            }
        }
        table
    }
}

/// Random sampler over the search spaces of one or more variants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomSearch {
    pub max_trials: usize,
    pub executions_per_trial: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub seed: u64,
    pub spaces: Vec<(CnnVariant, SearchSpace)>,
}

impl RandomSearch {
    pub fn new(max_trials: usize, executions_per_trial: usize, epochs: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            max_trials,
            executions_per_trial,
            epochs,
            batch_size,
            seed,
            spaces: CnnVariant::ALL
                .iter()
                .map(|&v| (v, SearchSpace::for_variant(v)))
                .collect(),
        }
    }

    pub fn with_spaces(mut self, spaces: Vec<(CnnVariant, SearchSpace)>) -> Self {
        self.spaces = spaces;
        self
    }

    pub fn space_size(&self) -> usize {
        self.spaces.iter().map(|(_, s)| s.size()).sum()
    }

    /// Distinct candidate configurations, at most `max_trials` and at most the space size
    pub fn sample_candidates(&self) -> Vec<(CnnVariant, HyperParams)> {
        let target = self.max_trials.min(self.space_size());
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(target);

        // bounded retries: rejection sampling slows down as the space fills up
        let max_attempts = target.saturating_mul(100).max(1000);
        let mut attempts = 0;
        while candidates.len() < target && attempts < max_attempts {
            attempts += 1;
            let index = rng.gen_range(0..self.spaces.len());
            let (variant, space) = &self.spaces[index];
            let Some(hp) = space.sample(&mut rng) else {
                continue;
            };
            if seen.insert(format!("{}|{:?}", variant, hp)) {
                candidates.push((*variant, hp));
            }
        }

        candidates
    }

    /// Run every candidate and collect the trials
    pub fn run<B: AutodiffBackend>(
        &self,
        train: &PatchBurnDataset,
        validation: &PatchBurnDataset,
        device: &B::Device,
    ) -> Result<SearchResults> {
        if self.spaces.is_empty() {
            bail!("no search spaces configured");
        }
        if self.executions_per_trial == 0 {
            bail!("executions_per_trial must be at least 1");
        }
        for (variant, space) in &self.spaces {
            space
                .validate()
                .map_err(|e| anyhow::anyhow!("{} search space: {}", variant, e))?;
        }

        let started_at = Local::now();
        let candidates = self.sample_candidates();
        info!(
            "Random search: {} trials x {} executions over a space of {} configurations",
            candidates.len(),
            self.executions_per_trial,
            self.space_size()
        );

        let image_size = train.image_size();
        let total = candidates.len();
        let mut trials = Vec::with_capacity(total);

        for (id, (variant, hyperparams)) in candidates.into_iter().enumerate() {
            let start = Instant::now();
            info!("Trial {}/{}: {} {}", id + 1, total, variant, hyperparams.summary());

            let mut accuracies = Vec::with_capacity(self.executions_per_trial);
            let mut losses = Vec::with_capacity(self.executions_per_trial);
            let mut epochs_run = 0;
            let mut failure = None;

            for execution in 0..self.executions_per_trial {
                let seed = self.seed.wrapping_add((id * 1000 + execution) as u64);
                let result = build_model::<B>(variant, &hyperparams, image_size, device)
                    .map_err(anyhow::Error::from)
                    .and_then(|(model, _)| {
                        let options = TrainOptions::new(self.epochs, self.batch_size, hyperparams.learning_rate, seed);
                        train_model(model, train, validation, &options, device)
                    });

                match result {
                    Ok(outcome) => {
                        accuracies.push(outcome.history.best_val_accuracy().unwrap_or(0.0));
                        losses.push(outcome.history.best_val_loss().unwrap_or(f64::INFINITY));
                        epochs_run = outcome.history.len();
                    }
                    Err(e) => {
                        warn!("Trial {} failed: {:#}", id + 1, e);
                        failure = Some(format!("{:#}", e));
                        break;
                    }
                }
            }

            let status = match failure {
                Some(reason) => TrialStatus::Failed(reason),
                None => TrialStatus::Completed,
            };
            let trial = Trial {
                id: id + 1,
                variant,
                hyperparams,
                val_accuracy: mean(&accuracies),
                val_loss: mean(&losses),
                epochs_run,
                executions: accuracies.len(),
                duration_secs: start.elapsed().as_secs_f64(),
                status,
            };
            if trial.is_completed() {
                info!(
                    "Trial {} done: val_acc {:.2}% in {:.1}s",
                    trial.id,
                    trial.val_accuracy * 100.0,
                    trial.duration_secs
                );
            }
            trials.push(trial);
        }

        let results = SearchResults {
            trials,
            started_at,
            space_size: self.space_size(),
        };
        if results.best().is_none() {
            bail!("every search trial failed");
        }
        Ok(results)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::trainer::tests::{tiny_hyperparams, toy_dataset};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_space() -> SearchSpace {
        let hp = tiny_hyperparams();
        SearchSpace {
            base_filters: vec![2, 4],
            kernel_sizes: vec![3],
            conv_blocks: vec![1, 2],
            dense_units: vec![hp.dense_units],
            learning_rates: vec![1e-2],
            dropout_min: 0.0,
            dropout_max: 0.0,
            dropout_step: 0.1,
        }
    }

    #[test]
    fn test_dropout_choices() {
        let space = SearchSpace::baseline();
        assert_eq!(space.dropout_choices(), vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(tiny_space().dropout_choices(), vec![0.0]);
    }

    #[test]
    fn test_space_size() {
        assert_eq!(tiny_space().size(), 4);
        assert_eq!(SearchSpace::baseline().size(), 2 * 2 * 2 * 3 * 3 * 6);
    }

    #[test]
    fn test_samples_stay_in_space() {
        let space = SearchSpace::deep();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        for _ in 0..50 {
            let hp = space.sample(&mut rng).unwrap();
            assert!(space.base_filters.contains(&hp.base_filters));
            assert!(space.conv_blocks.contains(&hp.conv_blocks));
            assert!((0.2..=0.5 + 1e-9).contains(&hp.dropout));
            assert!(hp.validate(96).is_ok());
        }
    }

    #[test]
    fn test_candidates_are_distinct_and_capped() {
        let search = RandomSearch::new(50, 1, 1, 4, 3)
            .with_spaces(vec![(CnnVariant::Baseline, tiny_space()), (CnnVariant::Deep, tiny_space())]);
        let candidates = search.sample_candidates();

        assert_eq!(candidates.len(), 8);
        let keys: HashSet<String> = candidates.iter().map(|(v, hp)| format!("{}|{:?}", v, hp)).collect();
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn test_candidates_deterministic() {
        let search = RandomSearch::new(5, 1, 1, 4, 11);
        assert_eq!(search.sample_candidates(), search.sample_candidates());
    }

    #[test]
    fn test_search_runs_trials() {
        let device = Default::default();
        let search = RandomSearch::new(2, 2, 1, 4, 7)
            .with_spaces(vec![(CnnVariant::Baseline, tiny_space())]);

        let results = search
            .run::<TestBackend>(&toy_dataset(8), &toy_dataset(4), &device)
            .unwrap();

        assert_eq!(results.trials.len(), 2);
        assert!(results.trials.iter().all(|t| t.is_completed() && t.executions == 2));
        let best = results.best().unwrap();
        assert!(results.trials.iter().all(|t| t.val_accuracy <= best.val_accuracy));
        assert!(results.summary_table().lines().count() == 3);
    }

    #[test]
    fn test_failed_trials_are_recorded() {
        let device = Default::default();
        // 8px input cannot take four pooling stages
        let mut space = tiny_space();
        space.conv_blocks = vec![1, 4];
        let search = RandomSearch::new(4, 1, 1, 4, 2)
            .with_spaces(vec![(CnnVariant::Baseline, space)]);

        let results = search
            .run::<TestBackend>(&toy_dataset(8), &toy_dataset(4), &device)
            .unwrap();
        let failed = results.trials.iter().filter(|t| !t.is_completed()).count();
        assert_eq!(failed, 2);
        assert_eq!(results.best().unwrap().hyperparams.conv_blocks, 1);
    }

    #[test]
    fn test_results_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let results = SearchResults {
            trials: vec![Trial {
                id: 1,
                variant: CnnVariant::Deep,
                hyperparams: HyperParams::default(),
                val_accuracy: 0.9,
                val_loss: 0.3,
                epochs_run: 2,
                executions: 1,
                duration_secs: 1.0,
                status: TrialStatus::Completed,
            }],
            started_at: Local::now(),
            space_size: 10,
        };
        let path = dir.path().join("search.json");
        results.save(&path).unwrap();

        let loaded = SearchResults::load(&path).unwrap();
        assert_eq!(loaded.best().unwrap().variant, CnnVariant::Deep);
    }
}
