//! Label CSV reader
//!
//! The training labels come as a two-column CSV with header `id,label`,
//! where `id` is the patch file stem and `label` is 0 (benign) or 1
//! (malignant).

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::utils::error::{HistoError, Result};

/// Diagnostic class of a tissue patch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diagnosis {
    Benign = 0,
    Malignant = 1,
}

impl Diagnosis {
    pub const ALL: [Diagnosis; 2] = [Diagnosis::Benign, Diagnosis::Malignant];

    pub fn from_label(label: u8) -> Result<Self> {
        match label {
            0 => Ok(Diagnosis::Benign),
            1 => Ok(Diagnosis::Malignant),
            other => Err(HistoError::Csv(format!(
                "label must be 0 or 1, got {}",
                other
            ))),
        }
    }

    pub fn label(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Diagnosis::Benign => "benign",
            Diagnosis::Malignant => "malignant",
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the label CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub id: String,
    pub label: u8,
}

impl LabelRecord {
    pub fn diagnosis(&self) -> Diagnosis {
        if self.label == 1 {
            Diagnosis::Malignant
        } else {
            Diagnosis::Benign
        }
    }
}

/// Read and validate the label CSV
pub fn read_labels(path: &Path) -> Result<Vec<LabelRecord>> {
    if !path.exists() {
        return Err(HistoError::PathNotFound(path.to_path_buf()));
    }

    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let records = parse_records(reader)?;

    info!("Read {} labels from {:?}", records.len(), path);
    Ok(records)
}

/// Parse label rows from any reader
pub fn parse_labels<R: std::io::Read>(input: R) -> Result<Vec<LabelRecord>> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);
    parse_records(reader)
}

fn parse_records<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<LabelRecord>> {
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for (row, result) in reader.deserialize::<LabelRecord>().enumerate() {
        let record = result?;
        // row 0 is the first data line, line 2 of the file
        let line = row + 2;

        if record.id.is_empty() {
            return Err(HistoError::Csv(format!("empty id on line {}", line)));
        }
        Diagnosis::from_label(record.label)
            .map_err(|e| HistoError::Csv(format!("line {}: {}", line, e)))?;
        if !seen.insert(record.id.clone()) {
            return Err(HistoError::Csv(format!(
                "duplicate id '{}' on line {}",
                record.id, line
            )));
        }

        records.push(record);
    }

    debug!("Parsed {} label rows", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let csv = "id,label\nf38a6374c348f90b,0\nc18f2d887b7ae4f6,1\n";
        let records = parse_labels(csv.as_bytes()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "f38a6374c348f90b");
        assert_eq!(records[1].diagnosis(), Diagnosis::Malignant);
    }

    #[test]
    fn test_whitespace_is_trimmed() {
        let csv = "id , label\n  abc ,  1 \n";
        let records = parse_labels(csv.as_bytes()).unwrap();
        assert_eq!(records[0], LabelRecord { id: "abc".into(), label: 1 });
    }

    #[test]
    fn test_rejects_non_binary_label() {
        let csv = "id,label\na,0\nb,2\n";
        let err = parse_labels(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_rejects_duplicates() {
        let csv = "id,label\na,0\na,1\n";
        assert!(parse_labels(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_non_numeric_label() {
        let csv = "id,label\na,yes\n";
        assert!(matches!(parse_labels(csv.as_bytes()), Err(HistoError::Csv(_))));
    }

    #[test]
    fn test_read_labels_missing_file() {
        let err = read_labels(Path::new("/nonexistent/train_labels.csv")).unwrap_err();
        assert!(matches!(err, HistoError::PathNotFound(_)));
    }

    #[test]
    fn test_diagnosis_roundtrip() {
        for d in Diagnosis::ALL {
            assert_eq!(Diagnosis::from_label(d.label()).unwrap(), d);
        }
        assert_eq!(Diagnosis::Malignant.to_string(), "malignant");
    }
}
