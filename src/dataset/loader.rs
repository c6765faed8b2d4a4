//! Patch Dataset Loader
//!
//! Joins the label CSV against the image directory and converts patches
//! into normalized CHW float buffers.
//!
//! Expected layout:
//! ```text
//! data_dir/
//! ├── train_labels.csv
//! ├── train/
//! │   ├── f38a6374c348f90b587e046aac6079959adf3835.tif
//! │   └── ...
//! └── test/
//!     └── ...
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::labels::{read_labels, Diagnosis};
use crate::utils::error::{HistoError, Result};
use crate::utils::{format_number, format_progress_bar};

/// Image extensions accepted for patches
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["tif", "tiff", "png", "jpg", "jpeg"];

/// A labeled patch on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSample {
    pub id: String,
    pub path: PathBuf,
    /// 0 = benign, 1 = malignant
    pub label: u8,
}

impl PatchSample {
    pub fn diagnosis(&self) -> Diagnosis {
        if self.label == 1 {
            Diagnosis::Malignant
        } else {
            Diagnosis::Benign
        }
    }
}

/// An unlabeled patch from the test directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPatch {
    pub id: String,
    pub path: PathBuf,
}

/// Labeled patches joined from the label CSV and the training directory
#[derive(Debug)]
pub struct PatchDataset {
    pub root_dir: PathBuf,
    pub samples: Vec<PatchSample>,
    /// Ids listed in the CSV with no matching image file
    pub missing_ids: Vec<String>,
    pub image_size: usize,
}

impl PatchDataset {
    pub fn new(root_dir: &Path, labels_file: &str, train_dir: &str, image_size: usize) -> Result<Self> {
        info!("Loading patch dataset from: {:?}", root_dir);

        if !root_dir.exists() {
            return Err(HistoError::PathNotFound(root_dir.to_path_buf()));
        }

        let labels = read_labels(&root_dir.join(labels_file))?;
        let files = index_images(&root_dir.join(train_dir))?;

        let mut samples = Vec::with_capacity(labels.len());
        let mut missing_ids = Vec::new();

        for record in labels {
            match files.get(&record.id) {
                Some(path) => samples.push(PatchSample {
                    id: record.id,
                    path: path.clone(),
                    label: record.label,
                }),
                None => missing_ids.push(record.id),
            }
        }

        if !missing_ids.is_empty() {
            warn!(
                "{} labeled ids have no image file (first: {})",
                missing_ids.len(),
                missing_ids[0]
            );
        }
        info!("Matched {} labeled patches", samples.len());

        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            samples,
            missing_ids,
            image_size,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples_by_class(&self, diagnosis: Diagnosis) -> Vec<&PatchSample> {
        self.samples
            .iter()
            .filter(|s| s.diagnosis() == diagnosis)
            .collect()
    }

    pub fn stats(&self) -> DatasetStats {
        let malignant = self.samples.iter().filter(|s| s.label == 1).count();
        DatasetStats {
            total_samples: self.samples.len(),
            benign: self.samples.len() - malignant,
            malignant,
            missing_files: self.missing_ids.len(),
        }
    }
}

/// Class counts for a labeled dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total_samples: usize,
    pub benign: usize,
    pub malignant: usize,
    pub missing_files: usize,
}

impl DatasetStats {
    pub fn malignant_fraction(&self) -> f64 {
        if self.total_samples == 0 {
            0.0
        } else {
            self.malignant as f64 / self.total_samples as f64
        }
    }

    pub fn print(&self) {
        let total = self.total_samples.max(1) as f64;
        println!("\n📊 Dataset Statistics:");
        println!("  Total patches: {}", format_number(self.total_samples));
        println!(
            "    benign     {:>9} {}",
            format_number(self.benign),
            format_progress_bar(self.benign as f64 / total, 30)
        );
        println!(
            "    malignant  {:>9} {}",
            format_number(self.malignant),
            format_progress_bar(self.malignant as f64 / total, 30)
        );
        if self.missing_files > 0 {
            println!("  Missing image files: {}", self.missing_files);
        }
    }
}

/// Map file stem -> path for every supported image directly inside `dir`
pub fn index_images(dir: &Path) -> Result<HashMap<String, PathBuf>> {
    if !dir.exists() {
        return Err(HistoError::PathNotFound(dir.to_path_buf()));
    }

    let mut files = HashMap::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !is_supported_image(path) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            files.insert(stem.to_string(), path.to_path_buf());
        }
    }

    debug!("Indexed {} images in {:?}", files.len(), dir);
    Ok(files)
}

/// Unlabeled patches in `dir`, sorted by id
pub fn list_test_patches(dir: &Path) -> Result<Vec<TestPatch>> {
    let mut patches: Vec<TestPatch> = index_images(dir)?
        .into_iter()
        .map(|(id, path)| TestPatch { id, path })
        .collect();
    patches.sort_by(|a, b| a.id.cmp(&b.id));

    info!("Found {} test patches in {:?}", patches.len(), dir);
    Ok(patches)
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decode a patch as 8-bit RGB
pub fn decode_rgb(path: &Path) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| HistoError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| HistoError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| HistoError::ImageLoad(path.to_path_buf(), e.to_string()))?;
    Ok(img.to_rgb8())
}

/// Load a patch as a CHW float buffer in [0, 1], resized to `image_size` when needed
pub fn load_patch(path: &Path, image_size: usize) -> Result<Vec<f32>> {
    let rgb = decode_rgb(path)?;
    let size = image_size as u32;
    let rgb = if rgb.dimensions() == (size, size) {
        rgb
    } else {
        image::imageops::resize(&rgb, size, size, FilterType::Triangle)
    };
    Ok(rgb_to_chw(&rgb))
}

/// Convert an RGB image to a CHW float buffer in [0, 1]
pub fn rgb_to_chw(rgb: &RgbImage) -> Vec<f32> {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = width * height;
    let mut tensor = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            tensor[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;
    use std::fs;

    /// Write a small labeled dataset: ids p0..pN with alternating labels
    pub(crate) fn write_fixture(root: &Path, count: usize, size: u32) {
        let labels: Vec<u8> = (0..count).map(|i| (i % 2) as u8).collect();
        write_labeled_fixture(root, &labels, size);
    }

    /// Patch `p{i}` gets `labels[i]`
    pub(crate) fn write_labeled_fixture(root: &Path, labels: &[u8], size: u32) {
        let train = root.join("train");
        fs::create_dir_all(&train).unwrap();

        let mut csv = String::from("id,label\n");
        for (i, &label) in labels.iter().enumerate() {
            csv.push_str(&format!("p{},{}\n", i, label));
            let shade = if label == 1 { 200 } else { 40 };
            let img = RgbImage::from_pixel(size, size, Rgb([shade, (i * 7 % 255) as u8, 90]));
            img.save(train.join(format!("p{}.png", i))).unwrap();
        }
        fs::write(root.join("train_labels.csv"), csv).unwrap();
    }

    #[test]
    fn test_dataset_joins_labels_and_files() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path(), 6, 8);
        fs::remove_file(dir.path().join("train/p5.png")).unwrap();

        let dataset = PatchDataset::new(dir.path(), "train_labels.csv", "train", 8).unwrap();
        let stats = dataset.stats();

        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.missing_ids, vec!["p5".to_string()]);
        assert_eq!(stats.benign, 3);
        assert_eq!(stats.malignant, 2);
        assert_eq!(stats.missing_files, 1);
        assert_eq!(dataset.samples_by_class(Diagnosis::Malignant).len(), 2);
    }

    #[test]
    fn test_missing_root_is_error() {
        let err = PatchDataset::new(Path::new("/no/such/dir"), "labels.csv", "train", 8).unwrap_err();
        assert!(matches!(err, HistoError::PathNotFound(_)));
    }

    #[test]
    fn test_index_skips_unsupported_files() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(dir.path().join("a.png")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let files = index_images(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files.contains_key("a"));
    }

    #[test]
    fn test_list_test_patches_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["zeta", "alpha", "mid"] {
            RgbImage::new(4, 4).save(dir.path().join(format!("{}.png", id))).unwrap();
        }
        let ids: Vec<String> = list_test_patches(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_load_patch_chw_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("px.png");
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(1, 0, Rgb([255, 0, 51]));
        img.save(&path).unwrap();

        let data = load_patch(&path, 2).unwrap();
        assert_eq!(data.len(), 12);
        // pixel (x=1, y=0): offset 1 in each 4-element plane
        assert_eq!(data[1], 1.0);
        assert_eq!(data[4 + 1], 0.0);
        assert!((data[8 + 1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_load_patch_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbImage::from_pixel(10, 10, Rgb([10, 20, 30])).save(&path).unwrap();

        let data = load_patch(&path, 4).unwrap();
        assert_eq!(data.len(), 3 * 4 * 4);
    }

    #[test]
    fn test_load_patch_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tif");
        fs::write(&path, b"not an image").unwrap();

        assert!(matches!(load_patch(&path, 4), Err(HistoError::ImageLoad(_, _))));
    }
}
