//! Metrics Module for Binary Patch Classification
//!
//! - Confusion matrix at a decision threshold
//! - Accuracy, precision, recall, specificity, F1
//! - ROC curve and trapezoidal AUC

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::utils::error::{HistoError, Result};

/// Binary confusion matrix, malignant (label 1) is the positive class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
}

impl ConfusionMatrix {
    /// Build from hard predictions and ground truth labels (both 0/1)
    pub fn from_predictions(predictions: &[u8], ground_truth: &[u8]) -> Result<Self> {
        if predictions.len() != ground_truth.len() {
            return Err(HistoError::InvalidInput(format!(
                "{} predictions for {} labels",
                predictions.len(),
                ground_truth.len()
            )));
        }

        let mut matrix = Self::default();
        for (&pred, &truth) in predictions.iter().zip(ground_truth) {
            matrix.add(pred == 1, truth == 1);
        }
        Ok(matrix)
    }

    /// Build from malignant probabilities, predicting positive at `score >= threshold`
    pub fn from_scores(scores: &[f32], ground_truth: &[u8], threshold: f32) -> Result<Self> {
        let predictions: Vec<u8> = scores.iter().map(|&s| u8::from(s >= threshold)).collect();
        Self::from_predictions(&predictions, ground_truth)
    }

    fn add(&mut self, predicted_positive: bool, actually_positive: bool) {
        match (predicted_positive, actually_positive) {
            (true, true) => self.true_positives += 1,
            (true, false) => self.false_positives += 1,
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_negatives += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_positives + self.false_positives + self.true_negatives + self.false_negatives
    }

    pub fn metrics(&self) -> BinaryMetrics {
        let tp = self.true_positives as f64;
        let fp = self.false_positives as f64;
        let tn = self.true_negatives as f64;
        let fn_ = self.false_negatives as f64;

        let ratio = |num: f64, den: f64| if den > 0.0 { num / den } else { 0.0 };

        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = ratio(2.0 * precision * recall, precision + recall);

        BinaryMetrics {
            accuracy: ratio(tp + tn, self.total() as f64),
            precision,
            recall,
            specificity: ratio(tn, tn + fp),
            f1,
        }
    }

    /// Render as a small table
    pub fn display(&self) -> String {
        let mut out = String::new();
        out.push_str("                 predicted\n");
        out.push_str("               benign  malignant\n");
        out.push_str(&format!(
            "  benign     {:>9} {:>10}\n",
            self.true_negatives, self.false_positives
        ));
        out.push_str(&format!(
            "  malignant  {:>9} {:>10}\n",
            self.false_negatives, self.true_positives
        ));
        out
    }
}

/// Threshold-dependent summary metrics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BinaryMetrics {
    pub accuracy: f64,
    pub precision: f64,
    /// Sensitivity, true positive rate
    pub recall: f64,
    pub specificity: f64,
    pub f1: f64,
}

/// One operating point on the ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RocPoint {
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
    /// Scores at or above this value are called malignant
    pub threshold: f64,
}

/// Receiver operating characteristic curve
#[derive(Debug, Clone, Serialize)]
pub struct RocCurve {
    pub points: Vec<RocPoint>,
    pub positives: usize,
    pub negatives: usize,
}

impl RocCurve {
    /// Compute the curve from malignant probabilities.
    ///
    /// Points are ordered by descending threshold and start at (0, 0).
    /// Tied scores are emitted as a single point. Both classes must be present.
    pub fn compute(scores: &[f32], labels: &[u8]) -> Result<Self> {
        if scores.len() != labels.len() {
            return Err(HistoError::InvalidInput(format!(
                "{} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }
        if let Some(score) = scores.iter().find(|s| !s.is_finite()) {
            return Err(HistoError::InvalidInput(format!(
                "non-finite score {} in ROC input",
                score
            )));
        }

        let positives = labels.iter().filter(|&&l| l == 1).count();
        let negatives = labels.len() - positives;
        if positives == 0 || negatives == 0 {
            return Err(HistoError::InvalidInput(format!(
                "ROC needs both classes, got {} malignant and {} benign",
                positives, negatives
            )));
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut points = vec![RocPoint {
            false_positive_rate: 0.0,
            true_positive_rate: 0.0,
            threshold: f64::INFINITY,
        }];

        let (mut tp, mut fp) = (0usize, 0usize);
        let mut i = 0;
        while i < order.len() {
            let threshold = scores[order[i]];
            while i < order.len() && scores[order[i]] == threshold {
                if labels[order[i]] == 1 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            points.push(RocPoint {
                false_positive_rate: fp as f64 / negatives as f64,
                true_positive_rate: tp as f64 / positives as f64,
                threshold: threshold as f64,
            });
        }

        Ok(Self {
            points,
            positives,
            negatives,
        })
    }

    /// Area under the curve by the trapezoidal rule
    pub fn auc(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| {
                let width = w[1].false_positive_rate - w[0].false_positive_rate;
                width * (w[0].true_positive_rate + w[1].true_positive_rate) / 2.0
            })
            .sum()
    }

    /// Threshold maximizing Youden's J (tpr - fpr)
    pub fn youden_threshold(&self) -> f64 {
        self.points
            .iter()
            .skip(1)
            .max_by(|a, b| {
                let ja = a.true_positive_rate - a.false_positive_rate;
                let jb = b.true_positive_rate - b.false_positive_rate;
                ja.total_cmp(&jb)
            })
            .map(|p| p.threshold)
            .unwrap_or(0.5)
    }

    /// Write `fpr,tpr,threshold` rows
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["fpr", "tpr", "threshold"])?;
        for p in &self.points {
            writer.write_record([
                format!("{:.6}", p.false_positive_rate),
                format!("{:.6}", p.true_positive_rate),
                format!("{}", p.threshold),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_counts() {
        let preds = [1, 0, 1, 1, 0, 0];
        let truth = [1, 0, 0, 1, 1, 0];
        let cm = ConfusionMatrix::from_predictions(&preds, &truth).unwrap();

        assert_eq!(cm.true_positives, 2);
        assert_eq!(cm.false_positives, 1);
        assert_eq!(cm.true_negatives, 2);
        assert_eq!(cm.false_negatives, 1);
        assert_eq!(cm.total(), 6);
    }

    #[test]
    fn test_binary_metrics() {
        let cm = ConfusionMatrix {
            true_positives: 8,
            false_positives: 2,
            true_negatives: 6,
            false_negatives: 4,
        };
        let m = cm.metrics();

        assert!((m.accuracy - 0.7).abs() < 1e-9);
        assert!((m.precision - 0.8).abs() < 1e-9);
        assert!((m.recall - 8.0 / 12.0).abs() < 1e-9);
        assert!((m.specificity - 0.75).abs() < 1e-9);
        let expected_f1 = 2.0 * 0.8 * (8.0 / 12.0) / (0.8 + 8.0 / 12.0);
        assert!((m.f1 - expected_f1).abs() < 1e-9);
    }

    #[test]
    fn test_from_scores_threshold_inclusive() {
        let cm = ConfusionMatrix::from_scores(&[0.5, 0.49], &[1, 0], 0.5).unwrap();
        assert_eq!(cm.true_positives, 1);
        assert_eq!(cm.true_negatives, 1);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(ConfusionMatrix::from_predictions(&[1], &[1, 0]).is_err());
        assert!(RocCurve::compute(&[0.1, 0.2], &[1]).is_err());
    }

    #[test]
    fn test_perfect_separation_auc_is_one() {
        let roc = RocCurve::compute(&[0.9, 0.8, 0.3, 0.1], &[1, 1, 0, 0]).unwrap();
        assert!((roc.auc() - 1.0).abs() < 1e-12);
        assert_eq!(roc.points.first().unwrap().true_positive_rate, 0.0);
        let last = roc.points.last().unwrap();
        assert_eq!((last.false_positive_rate, last.true_positive_rate), (1.0, 1.0));
    }

    #[test]
    fn test_inverted_scores_auc_is_zero() {
        let roc = RocCurve::compute(&[0.1, 0.2, 0.8, 0.9], &[1, 1, 0, 0]).unwrap();
        assert!(roc.auc().abs() < 1e-12);
    }

    #[test]
    fn test_ties_are_grouped() {
        // All scores equal: a single diagonal step, AUC 0.5
        let roc = RocCurve::compute(&[0.5, 0.5, 0.5, 0.5], &[1, 0, 1, 0]).unwrap();
        assert_eq!(roc.points.len(), 2);
        assert!((roc.auc() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_auc_matches_pair_ranking() {
        let scores = [0.7, 0.6, 0.6, 0.4, 0.2];
        let labels = [1, 0, 1, 0, 0];
        let roc = RocCurve::compute(&scores, &labels).unwrap();
        // 0.7 outranks all three negatives, 0.6 ties one and outranks two
        let expected = (3.0 + 2.5) / 6.0;
        assert!((roc.auc() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_single_class_is_rejected() {
        let err = RocCurve::compute(&[0.2, 0.9], &[1, 1]).unwrap_err();
        assert!(matches!(err, HistoError::InvalidInput(_)));
    }

    #[test]
    fn test_youden_threshold() {
        let roc = RocCurve::compute(&[0.9, 0.8, 0.3, 0.1], &[1, 1, 0, 0]).unwrap();
        assert!((roc.youden_threshold() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roc.csv");
        let roc = RocCurve::compute(&[0.9, 0.1], &[1, 0]).unwrap();
        roc.export_csv(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("fpr,tpr,threshold"));
        assert_eq!(content.lines().count(), 1 + roc.points.len());
    }
}
