//! Inference Predictor Module
//!
//! Runs a trained classifier over unlabeled patches in batches and
//! returns the malignant probability for every id.

use std::path::Path;

use burn::{data::dataloader::batcher::Batcher, tensor::backend::Backend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::ModelArtifacts;
use crate::dataset::loader::load_patch;
use crate::dataset::{Diagnosis, InferenceBatch, InferenceBatcher, InferenceDataset, InferenceItem, TestPatch};
use crate::model::{PatchClassifier, PatchClassifierConfig};
use crate::utils::error::{HistoError, Result};
use crate::training::DEFAULT_BATCH_SIZE;
use crate::utils::logging::ProgressLogger;

/// Malignant probability for one patch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub probability: f32,
}

impl Prediction {
    pub fn diagnosis(&self, threshold: f32) -> Diagnosis {
        if self.probability >= threshold {
            Diagnosis::Malignant
        } else {
            Diagnosis::Benign
        }
    }
}

/// Predictor for running inference with a trained model
pub struct Predictor<B: Backend> {
    model: PatchClassifier<B>,
    config: PatchClassifierConfig,
    device: B::Device,
    batch_size: usize,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: PatchClassifier<B>, config: PatchClassifierConfig, device: B::Device) -> Self {
        Self {
            model,
            config,
            device,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Load config and weights from an artifact directory
    pub fn from_artifacts(artifacts: &ModelArtifacts, device: B::Device) -> Result<Self> {
        let (model, config) = artifacts.load::<B>(&device)?;
        Ok(Self::new(model, config, device))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn image_size(&self) -> usize {
        self.config.image_size
    }

    pub fn config(&self) -> &PatchClassifierConfig {
        &self.config
    }

    /// Probabilities for already decoded items, in input order
    pub fn predict_items(&self, items: Vec<InferenceItem>) -> Result<Vec<Prediction>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let batcher = InferenceBatcher::new(self.image_size());
        let batch: InferenceBatch<B> = batcher.batch(items, &self.device);
        let probabilities: Vec<f32> = self
            .model
            .forward_probabilities(batch.images)
            .into_data()
            .to_vec()
            .map_err(|e| HistoError::Inference(format!("{:?}", e)))?;

        Ok(batch
            .ids
            .into_iter()
            .zip(probabilities)
            .map(|(id, probability)| Prediction { id, probability })
            .collect())
    }

    pub fn predict_file(&self, path: &Path) -> Result<Prediction> {
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HistoError::InvalidInput(format!("no file stem in {:?}", path)))?
            .to_string();
        let image = load_patch(path, self.image_size())?;

        self.predict_items(vec![InferenceItem { id, image }])?
            .pop()
            .ok_or_else(|| HistoError::Inference("empty prediction batch".into()))
    }

    /// Predict every patch of `dataset`; unreadable files are skipped with a warning
    pub fn predict_dataset(&self, dataset: &InferenceDataset) -> Result<Vec<Prediction>> {
        let total = dataset.patches().len();
        let mut progress = ProgressLogger::new("Predicting", total);
        let mut predictions = Vec::with_capacity(total);
        let mut skipped = 0;

        for start in (0..total).step_by(self.batch_size) {
            let (items, failed) = dataset.load_range(start, start + self.batch_size);
            skipped += failed.len();
            predictions.extend(self.predict_items(items)?);
            progress.update((start + self.batch_size).min(total));
        }
        progress.finish();

        if skipped > 0 {
            warn!("Skipped {} unreadable test patches", skipped);
        }
        Ok(predictions)
    }

    pub fn predict_patches(&self, patches: Vec<TestPatch>) -> Result<Vec<Prediction>> {
        self.predict_dataset(&InferenceDataset::new(patches, self.image_size()))
    }

    /// Predict every supported image directly inside `dir`, sorted by id
    pub fn predict_directory(&self, dir: &Path) -> Result<Vec<Prediction>> {
        let dataset = InferenceDataset::from_dir(dir, self.image_size())?;
        if dataset.patches().is_empty() {
            return Err(HistoError::Dataset(format!("no test patches found in {:?}", dir)));
        }

        let predictions = self.predict_dataset(&dataset)?;
        info!("Predicted {} patches from {:?}", predictions.len(), dir);
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::write_fixture;
    use crate::model::{build_model, CnnVariant, HyperParams};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn predictor() -> Predictor<TestBackend> {
        let device = Default::default();
        let hp = HyperParams {
            base_filters: 2,
            kernel_size: 3,
            conv_blocks: 1,
            dense_units: 4,
            dropout: 0.0,
            learning_rate: 1e-3,
        };
        let (model, config) = build_model::<TestBackend>(CnnVariant::Baseline, &hp, 6, &device).unwrap();
        Predictor::new(model, config, device).with_batch_size(2)
    }

    #[test]
    fn test_predict_patches_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), 3, 6);
        let patches = vec![
            TestPatch { id: "p2".into(), path: dir.path().join("train/p2.png") },
            TestPatch { id: "p0".into(), path: dir.path().join("train/p0.png") },
        ];

        let predictions = predictor().predict_patches(patches).unwrap();
        let ids: Vec<&str> = predictions.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["p2", "p0"]);
    }

    #[test]
    fn test_predict_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), 5, 6);
        std::fs::write(dir.path().join("train/p3.png"), b"broken").unwrap();

        let predictions = predictor().predict_directory(&dir.path().join("train")).unwrap();
        let ids: Vec<&str> = predictions.iter().map(|p| p.id.as_str()).collect();

        assert_eq!(ids, vec!["p0", "p1", "p2", "p4"]);
        assert!(predictions.iter().all(|p| (0.0..=1.0).contains(&p.probability)));
    }

    #[test]
    fn test_predict_file_matches_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), 2, 6);
        let predictor = predictor();

        let single = predictor.predict_file(&dir.path().join("train/p1.png")).unwrap();
        let batch = predictor.predict_directory(&dir.path().join("train")).unwrap();

        assert_eq!(single.id, "p1");
        assert!((single.probability - batch[1].probability).abs() < 1e-5);
    }

    #[test]
    fn test_empty_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(predictor().predict_directory(dir.path()).is_err());
    }

    #[test]
    fn test_prediction_threshold() {
        let p = Prediction { id: "a".into(), probability: 0.7 };
        assert_eq!(p.diagnosis(0.5), Diagnosis::Malignant);
        assert_eq!(p.diagnosis(0.8), Diagnosis::Benign);
    }
}
