//! Holdout evaluation
//!
//! Scores the holdout slice once with the final model and reports the ROC
//! curve, its AUC and the confusion matrix at a fixed threshold.

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::backend::Backend,
};
use serde::Serialize;
use tracing::info;

use crate::dataset::{PatchBatch, PatchBatcher, PatchBurnDataset, PatchItem};
use crate::model::PatchClassifier;
use crate::utils::charts::{AxisRange, DataPoint, DataSeries, LineChart, COLOR_MUTED, COLOR_TERTIARY};
use crate::utils::error::{HistoError, Result};

pub use crate::utils::metrics::{BinaryMetrics, ConfusionMatrix, RocCurve, RocPoint};

/// Default decision threshold on the malignant probability
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Malignant probabilities and labels for every item of `dataset`
pub fn predict_scores<B: Backend>(
    model: &PatchClassifier<B>,
    dataset: &PatchBurnDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<(Vec<f32>, Vec<u8>)> {
    let batcher = PatchBatcher::new(dataset.image_size());
    let mut scores = Vec::with_capacity(dataset.len());
    let mut labels = Vec::with_capacity(dataset.len());

    let len = dataset.len();
    for start in (0..len).step_by(batch_size.max(1)) {
        let end = (start + batch_size).min(len);
        let items: Vec<PatchItem> = (start..end).filter_map(|i| dataset.get(i)).collect();
        if items.is_empty() {
            continue;
        }
        labels.extend(items.iter().map(|item| item.label));

        let batch: PatchBatch<B> = batcher.batch(items, device);
        let probabilities = model.forward_probabilities(batch.images);
        let values: Vec<f32> = probabilities
            .into_data()
            .to_vec()
            .map_err(|e| HistoError::Inference(format!("{:?}", e)))?;
        scores.extend(values);
    }

    Ok((scores, labels))
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub samples: usize,
    pub auc: f64,
    pub threshold: f32,
    pub confusion: ConfusionMatrix,
    pub metrics: BinaryMetrics,
    /// Threshold maximizing tpr - fpr
    pub youden_threshold: f64,
    pub roc: RocCurve,
}

impl EvaluationReport {
    pub fn from_scores(scores: &[f32], labels: &[u8], threshold: f32) -> Result<Self> {
        let roc = RocCurve::compute(scores, labels)?;
        let confusion = ConfusionMatrix::from_scores(scores, labels, threshold)?;

        Ok(Self {
            samples: scores.len(),
            auc: roc.auc(),
            threshold,
            metrics: confusion.metrics(),
            confusion,
            youden_threshold: roc.youden_threshold(),
            roc,
        })
    }

    /// Write `evaluation.json`, `roc.csv` and `roc_curve.svg` into `dir`
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;

        let json_path = dir.join("evaluation.json");
        fs::write(&json_path, serde_json::to_string_pretty(self)?)?;

        let csv_path = dir.join("roc.csv");
        self.roc.export_csv(&csv_path)?;

        let curve = self
            .roc
            .points
            .iter()
            .map(|p| DataPoint::new(p.false_positive_rate, p.true_positive_rate))
            .collect();
        let chance = vec![DataPoint::new(0.0, 0.0), DataPoint::new(1.0, 1.0)];
        let title = format!("ROC Curve (AUC = {:.4})", self.auc);

        let svg_path = dir.join("roc_curve.svg");
        LineChart::new(&title, "False positive rate", "True positive rate")
            .with_x_range(AxisRange::Fixed(0.0, 1.0))
            .with_y_range(AxisRange::Fixed(0.0, 1.0))
            .with_tick_precision(1)
            .write(
                &[
                    DataSeries::new("model", curve, COLOR_TERTIARY).without_markers(),
                    DataSeries::new("chance", chance, COLOR_MUTED).without_markers().dashed(),
                ],
                &svg_path,
            )?;

        Ok(vec![json_path, csv_path, svg_path])
    }

    pub fn print(&self) {
        println!("\n📈 Holdout Evaluation ({} patches):", self.samples);
        println!("  AUC:         {:.4}", self.auc);
        println!("  Accuracy:    {:.2}%", self.metrics.accuracy * 100.0);
        println!("  Precision:   {:.2}%", self.metrics.precision * 100.0);
        println!("  Recall:      {:.2}%", self.metrics.recall * 100.0);
        println!("  Specificity: {:.2}%", self.metrics.specificity * 100.0);
        println!("  F1:          {:.4}", self.metrics.f1);
        println!("  Youden threshold: {:.4}", self.youden_threshold);
        println!("{}", self.confusion.display());
    }
}

/// Score the holdout slice and build the report
pub fn evaluate_holdout<B: Backend>(
    model: &PatchClassifier<B>,
    dataset: &PatchBurnDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    if dataset.is_empty() {
        return Err(HistoError::Dataset("holdout set is empty".into()));
    }

    let (scores, labels) = predict_scores(model, dataset, batch_size, device)?;
    let report = EvaluationReport::from_scores(&scores, &labels, DEFAULT_THRESHOLD)?;

    info!(
        "Holdout AUC {:.4} over {} patches (accuracy {:.2}%)",
        report.auc,
        report.samples,
        report.metrics.accuracy * 100.0
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{build_model, CnnVariant, HyperParams};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn dataset() -> PatchBurnDataset {
        let items = (0..6)
            .map(|i| PatchItem {
                image: vec![i as f32 / 6.0; 3 * 8 * 8],
                label: (i % 2) as u8,
                id: format!("h{}", i),
            })
            .collect();
        PatchBurnDataset::from_items(items, 8)
    }

    #[test]
    fn test_report_from_scores() {
        let scores = [0.9, 0.8, 0.3, 0.2];
        let labels = [1, 0, 1, 0];
        let report = EvaluationReport::from_scores(&scores, &labels, 0.5).unwrap();

        assert!((report.auc - 0.75).abs() < 1e-9);
        assert_eq!(report.confusion.true_positives, 1);
        assert_eq!(report.confusion.false_positives, 1);
        assert_eq!(report.samples, 4);
    }

    #[test]
    fn test_single_class_rejected() {
        let err = EvaluationReport::from_scores(&[0.2, 0.9], &[1, 1], 0.5).unwrap_err();
        assert!(matches!(err, HistoError::InvalidInput(_)));
    }

    #[test]
    fn test_evaluate_holdout_with_model() {
        let device = Default::default();
        let hp = HyperParams {
            base_filters: 2,
            kernel_size: 3,
            conv_blocks: 2,
            dense_units: 4,
            dropout: 0.0,
            learning_rate: 1e-3,
        };
        let (model, _) = build_model::<TestBackend>(CnnVariant::Baseline, &hp, 8, &device).unwrap();

        let ds = dataset();
        let (scores, labels) = predict_scores(&model, &ds, 4, &device).unwrap();
        assert_eq!(scores.len(), 6);
        assert_eq!(labels, vec![0, 1, 0, 1, 0, 1]);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));

        let report = evaluate_holdout(&model, &ds, 4, &device).unwrap();
        assert!((0.0..=1.0).contains(&report.auc));
    }

    #[test]
    fn test_write_report_files() {
        let dir = tempfile::tempdir().unwrap();
        let report = EvaluationReport::from_scores(&[0.9, 0.1, 0.6], &[1, 0, 0], 0.5).unwrap();
        let files = report.write(dir.path()).unwrap();

        assert_eq!(files.len(), 3);
        let csv = fs::read_to_string(dir.path().join("roc.csv")).unwrap();
        assert!(csv.starts_with("fpr,tpr,threshold"));
        let json = fs::read_to_string(dir.path().join("evaluation.json")).unwrap();
        assert!(json.contains("\"auc\""));
    }
}
