//! Train / validation / holdout splitting
//!
//! 1. **Holdout** - never trained on, used for the ROC curve and AUC
//! 2. **Validation** - drives the hyperparameter search, LR decay and early stopping
//! 3. **Train** - everything else
//!
//! Splits are deterministic for a given seed. In stratified mode every
//! class is split separately so all three sets keep the class ratio, and
//! each non-empty class keeps at least one training sample.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::loader::PatchSample;
use crate::utils::error::{HistoError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    pub holdout_fraction: f64,
    pub validation_fraction: f64,
    pub seed: u64,
    /// Preserve the class ratio in every split
    pub stratified: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            holdout_fraction: 0.10,
            validation_fraction: 0.15,
            seed: 42,
            stratified: true,
        }
    }
}

impl SplitConfig {
    pub fn new(holdout_fraction: f64, validation_fraction: f64, seed: u64) -> Result<Self> {
        for (name, value) in [
            ("Holdout", holdout_fraction),
            ("Validation", validation_fraction),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(HistoError::Config(format!(
                    "{} fraction must be in [0.0, 1.0), got {}",
                    name, value
                )));
            }
        }

        if holdout_fraction + validation_fraction >= 1.0 {
            return Err(HistoError::Config(
                "Holdout + validation fractions must be less than 1.0".to_string(),
            ));
        }

        Ok(Self {
            holdout_fraction,
            validation_fraction,
            seed,
            stratified: true,
        })
    }
}

/// Settings that decide which labeled patches end up in each split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub seed: u64,
    pub max_samples: Option<usize>,
    pub balance_classes: bool,
    pub holdout_fraction: f64,
    pub validation_fraction: f64,
}

impl std::fmt::Display for SplitRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cap = self
            .max_samples
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "seed {}, max_samples {}, balanced {}, holdout {}, validation {}",
            self.seed, cap, self.balance_classes, self.holdout_fraction, self.validation_fraction
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSplits {
    pub train: Vec<PatchSample>,
    pub validation: Vec<PatchSample>,
    pub holdout: Vec<PatchSample>,
    pub config: SplitConfig,
}

impl DatasetSplits {
    pub fn from_samples(samples: Vec<PatchSample>, config: SplitConfig) -> Result<Self> {
        if samples.is_empty() {
            return Err(HistoError::Dataset(
                "No samples provided for splitting".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let groups: Vec<Vec<PatchSample>> = if config.stratified {
            let mut by_class: BTreeMap<u8, Vec<PatchSample>> = BTreeMap::new();
            for sample in samples {
                by_class.entry(sample.label).or_default().push(sample);
            }
            by_class.into_values().collect()
        } else {
            vec![samples]
        };

        let mut train = Vec::new();
        let mut validation = Vec::new();
        let mut holdout = Vec::new();

        for mut group in groups {
            group.shuffle(&mut rng);
            let (n_holdout, n_val) = split_counts(group.len(), &config);

            let mut rest = group.split_off(n_holdout);
            let remainder = rest.split_off(n_val);
            holdout.extend(group);
            validation.extend(rest);
            train.extend(remainder);
        }

        // Interleave classes so batches are not class-sorted
        train.shuffle(&mut rng);
        validation.shuffle(&mut rng);
        holdout.shuffle(&mut rng);

        Ok(Self {
            train,
            validation,
            holdout,
            config,
        })
    }

    pub fn stats(&self) -> SplitStats {
        let malignant = |set: &[PatchSample]| set.iter().filter(|s| s.label == 1).count();
        SplitStats {
            train_size: self.train.len(),
            validation_size: self.validation.len(),
            holdout_size: self.holdout.len(),
            train_malignant: malignant(&self.train),
            validation_malignant: malignant(&self.validation),
            holdout_malignant: malignant(&self.holdout),
        }
    }
}

/// Holdout and validation counts for a group of `n`, leaving at least one for training.
/// Groups of three or more put at least one sample in a non-empty holdout.
fn split_counts(n: usize, config: &SplitConfig) -> (usize, usize) {
    if n <= 1 {
        return (0, 0);
    }
    let budget = n - 1;
    let mut n_holdout = (n as f64 * config.holdout_fraction).round() as usize;
    if config.holdout_fraction > 0.0 && n >= 3 {
        n_holdout = n_holdout.max(1);
    }
    let n_holdout = n_holdout.min(budget);
    let n_val = ((n as f64 * config.validation_fraction).round() as usize).min(budget - n_holdout);
    (n_holdout, n_val)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitStats {
    pub train_size: usize,
    pub validation_size: usize,
    pub holdout_size: usize,
    pub train_malignant: usize,
    pub validation_malignant: usize,
    pub holdout_malignant: usize,
}

impl SplitStats {
    pub fn print(&self) {
        let pct = |m: usize, n: usize| 100.0 * m as f64 / n.max(1) as f64;
        println!("  📊 Stratified split:");
        println!(
            "    Train:      {:>7} ({:.1}% malignant)",
            self.train_size,
            pct(self.train_malignant, self.train_size)
        );
        println!(
            "    Validation: {:>7} ({:.1}% malignant)",
            self.validation_size,
            pct(self.validation_malignant, self.validation_size)
        );
        println!(
            "    Holdout:    {:>7} ({:.1}% malignant)",
            self.holdout_size,
            pct(self.holdout_malignant, self.holdout_size)
        );
    }
}

/// Cap `samples` at `max`, optionally drawing equal counts per class
pub fn subsample(samples: Vec<PatchSample>, max: usize, seed: u64, balanced: bool) -> Vec<PatchSample> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    if !balanced {
        let mut samples = samples;
        samples.shuffle(&mut rng);
        samples.truncate(max);
        return samples;
    }

    let (mut malignant, mut benign): (Vec<_>, Vec<_>) =
        samples.into_iter().partition(|s| s.label == 1);
    malignant.shuffle(&mut rng);
    benign.shuffle(&mut rng);

    let per_class = (max / 2).min(malignant.len()).min(benign.len());
    malignant.truncate(per_class);
    benign.truncate(per_class);

    let mut out = malignant;
    out.extend(benign);
    out.shuffle(&mut rng);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;

    fn samples(benign: usize, malignant: usize) -> Vec<PatchSample> {
        (0..benign + malignant)
            .map(|i| PatchSample {
                id: format!("p{}", i),
                path: PathBuf::from(format!("/data/train/p{}.tif", i)),
                label: u8::from(i >= benign),
            })
            .collect()
    }

    #[test]
    fn test_split_config_validation() {
        assert!(SplitConfig::new(0.1, 0.2, 1).is_ok());
        assert!(SplitConfig::new(0.6, 0.4, 1).is_err());
        assert!(SplitConfig::new(-0.1, 0.2, 1).is_err());
        assert!(SplitConfig::new(0.1, 1.0, 1).is_err());
    }

    #[test]
    fn test_every_sample_lands_once() {
        let splits = DatasetSplits::from_samples(samples(60, 40), SplitConfig::default()).unwrap();

        let ids: HashSet<String> = splits
            .train
            .iter()
            .chain(&splits.validation)
            .chain(&splits.holdout)
            .map(|s| s.id.clone())
            .collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(
            splits.train.len() + splits.validation.len() + splits.holdout.len(),
            100
        );
    }

    #[test]
    fn test_stratified_keeps_ratio() {
        let splits = DatasetSplits::from_samples(samples(60, 40), SplitConfig::default()).unwrap();
        let stats = splits.stats();

        // 10% holdout and 15% validation of each class
        assert_eq!(stats.holdout_size, 10);
        assert_eq!(stats.holdout_malignant, 4);
        assert_eq!(stats.validation_size, 15);
        assert_eq!(stats.validation_malignant, 6);
        assert_eq!(stats.train_size, 75);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = DatasetSplits::from_samples(samples(30, 30), SplitConfig::default()).unwrap();
        let b = DatasetSplits::from_samples(samples(30, 30), SplitConfig::default()).unwrap();
        let ids = |s: &DatasetSplits| s.holdout.iter().map(|p| p.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_tiny_class_keeps_training_sample() {
        let splits = DatasetSplits::from_samples(samples(20, 1), SplitConfig::default()).unwrap();
        assert_eq!(splits.stats().train_malignant, 1);
    }

    #[test]
    fn test_small_minority_class_reaches_holdout() {
        let splits = DatasetSplits::from_samples(samples(18, 3), SplitConfig::default()).unwrap();
        let stats = splits.stats();
        assert_eq!(stats.holdout_malignant, 1);
        assert_eq!(stats.holdout_size, 3);
        assert_eq!(stats.train_malignant, 2);
    }

    #[test]
    fn test_zero_holdout_fraction_stays_empty() {
        let config = SplitConfig::new(0.0, 0.2, 42).unwrap();
        let splits = DatasetSplits::from_samples(samples(18, 3), config).unwrap();
        assert!(splits.holdout.is_empty());
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(DatasetSplits::from_samples(Vec::new(), SplitConfig::default()).is_err());
    }

    #[test]
    fn test_subsample_balanced() {
        let out = subsample(samples(80, 20), 30, 7, true);
        assert_eq!(out.len(), 30);
        assert_eq!(out.iter().filter(|s| s.label == 1).count(), 15);
    }

    #[test]
    fn test_subsample_balanced_limited_by_minority() {
        let out = subsample(samples(80, 5), 30, 7, true);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_subsample_unbalanced() {
        assert_eq!(subsample(samples(10, 10), 5, 7, false).len(), 5);
        assert_eq!(subsample(samples(2, 1), 50, 7, false).len(), 3);
    }
}
