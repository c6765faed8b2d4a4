//! Submission CSV
//!
//! One row per test patch with header `id,label`, where `label` holds the
//! predicted probability that the patch is malignant.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::predictor::Prediction;
use crate::utils::error::{HistoError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct SubmissionRow {
    id: String,
    label: f32,
}

pub fn write_submission(path: &Path, predictions: &[Prediction]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    for p in predictions {
        writer.serialize(SubmissionRow {
            id: p.id.clone(),
            label: p.probability,
        })?;
    }
    // serialize() only emits the header with the first row
    if predictions.is_empty() {
        writer.write_record(["id", "label"])?;
    }
    writer.flush()?;

    info!("Wrote {} predictions to {:?}", predictions.len(), path);
    Ok(())
}

/// Read a submission back, checking ids are unique and probabilities lie in [0, 1]
pub fn read_submission(path: &Path) -> Result<Vec<Prediction>> {
    if !path.exists() {
        return Err(HistoError::PathNotFound(path.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut seen = HashSet::new();
    let mut predictions = Vec::new();

    for (row, result) in reader.deserialize::<SubmissionRow>().enumerate() {
        let record = result?;
        let line = row + 2;
        if !(0.0..=1.0).contains(&record.label) {
            return Err(HistoError::Csv(format!(
                "probability {} out of range on line {}",
                record.label, line
            )));
        }
        if !seen.insert(record.id.clone()) {
            return Err(HistoError::Csv(format!(
                "duplicate id '{}' on line {}",
                record.id, line
            )));
        }
        predictions.push(Prediction {
            id: record.id,
            probability: record.label,
        });
    }

    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(id: &str, probability: f32) -> Prediction {
        Prediction {
            id: id.to_string(),
            probability,
        }
    }

    #[test]
    fn test_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/submission.csv");
        let predictions = vec![prediction("abc", 0.25), prediction("def", 0.875)];

        write_submission(&path, &predictions).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("id,label\n"));
        assert!(text.contains("abc,0.25"));

        assert_eq!(read_submission(&path).unwrap(), predictions);
    }

    #[test]
    fn test_empty_submission_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("submission.csv");
        write_submission(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap().trim(), "id,label");
        assert!(read_submission(&path).unwrap().is_empty());
    }

    #[test]
    fn test_read_rejects_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");

        fs::write(&path, "id,label\na,1.5\n").unwrap();
        assert!(read_submission(&path).is_err());

        fs::write(&path, "id,label\na,0.1\na,0.2\n").unwrap();
        assert!(read_submission(&path).is_err());
    }
}
