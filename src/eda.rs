//! Exploratory data analysis
//!
//! Summarizes the labeled patches before any training happens: class
//! balance, per-channel color statistics, grayscale intensity
//! distributions and native image sizes. `write_report` turns the summary
//! into a JSON file, two SVG charts and a PNG montage of sample patches.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::loader::{decode_rgb, PatchDataset, PatchSample};
use crate::dataset::Diagnosis;
use crate::utils::charts::{
    generate_bar_chart, AxisRange, BarData, DataPoint, DataSeries, LineChart, COLOR_PRIMARY,
    COLOR_TERTIARY,
};
use crate::utils::error::{HistoError, Result};
use crate::utils::{format_number, format_progress_bar};

/// Bins of the grayscale intensity histogram
pub const HISTOGRAM_BINS: usize = 32;

/// Sample patches per class in the montage
pub const MONTAGE_COLUMNS: usize = 8;

const MONTAGE_PADDING: u32 = 4;

/// Statistics for one diagnostic class
#[derive(Debug, Clone, Serialize)]
pub struct ClassSummary {
    pub diagnosis: Diagnosis,
    pub count: usize,
    pub fraction: f64,
    /// Patches actually decoded for the pixel statistics
    pub sampled: usize,
    /// RGB means in [0, 1]
    pub channel_mean: [f64; 3],
    pub channel_std: [f64; 3],
    /// Fraction of pixels per grayscale bin, sums to 1
    pub intensity_histogram: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExploratoryReport {
    pub total_samples: usize,
    pub missing_files: usize,
    /// Majority count over minority count
    pub imbalance_ratio: f64,
    pub classes: Vec<ClassSummary>,
    /// "WxH" -> number of sampled patches with that native size
    pub dimensions: BTreeMap<String, usize>,
    pub unreadable: usize,
    #[serde(skip)]
    montage: Vec<(Diagnosis, Vec<RgbImage>)>,
    #[serde(skip)]
    montage_tile: u32,
}

/// Running pixel statistics for a set of patches
#[derive(Debug, Clone)]
struct PixelAccumulator {
    sum: [f64; 3],
    sum_sq: [f64; 3],
    histogram: [u64; HISTOGRAM_BINS],
    pixels: u64,
    images: usize,
}

impl PixelAccumulator {
    fn new() -> Self {
        Self {
            sum: [0.0; 3],
            sum_sq: [0.0; 3],
            histogram: [0; HISTOGRAM_BINS],
            pixels: 0,
            images: 0,
        }
    }

    fn add_image(&mut self, rgb: &RgbImage) {
        for pixel in rgb.pixels() {
            for c in 0..3 {
                let v = pixel[c] as f64 / 255.0;
                self.sum[c] += v;
                self.sum_sq[c] += v * v;
            }
            self.histogram[intensity_bin(pixel)] += 1;
        }
        self.pixels += rgb.width() as u64 * rgb.height() as u64;
        self.images += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        for c in 0..3 {
            self.sum[c] += other.sum[c];
            self.sum_sq[c] += other.sum_sq[c];
        }
        for (a, b) in self.histogram.iter_mut().zip(other.histogram.iter()) {
            *a += b;
        }
        self.pixels += other.pixels;
        self.images += other.images;
        self
    }

    fn mean_std(&self) -> ([f64; 3], [f64; 3]) {
        if self.pixels == 0 {
            return ([0.0; 3], [0.0; 3]);
        }
        let n = self.pixels as f64;
        let mut mean = [0.0; 3];
        let mut std = [0.0; 3];
        for c in 0..3 {
            mean[c] = self.sum[c] / n;
            std[c] = (self.sum_sq[c] / n - mean[c] * mean[c]).max(0.0).sqrt();
        }
        (mean, std)
    }

    fn normalized_histogram(&self) -> Vec<f64> {
        let total = self.pixels.max(1) as f64;
        self.histogram.iter().map(|&c| c as f64 / total).collect()
    }
}

/// Grayscale bin of an 8-bit RGB pixel (ITU-R BT.601 luma)
fn intensity_bin(pixel: &Rgb<u8>) -> usize {
    let gray = 0.299 * pixel[0] as f64 + 0.587 * pixel[1] as f64 + 0.114 * pixel[2] as f64;
    ((gray / 256.0 * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1)
}

impl ExploratoryReport {
    /// Compute the report, decoding at most `sample_limit` patches per class.
    ///
    /// Samples are drawn with a fixed seed so reruns describe the same patches.
    pub fn compute(dataset: &PatchDataset, sample_limit: usize, image_size: usize) -> Result<Self> {
        if dataset.is_empty() {
            return Err(HistoError::Dataset("No labeled patches to analyze".into()));
        }

        info!(
            "Running EDA on {} patches ({} sampled per class)",
            dataset.len(),
            sample_limit
        );

        let total = dataset.len();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut classes = Vec::with_capacity(Diagnosis::ALL.len());
        let mut dimensions = BTreeMap::new();
        let mut unreadable = 0;
        let mut montage = Vec::new();

        for diagnosis in Diagnosis::ALL {
            let mut members: Vec<&PatchSample> = dataset.samples_by_class(diagnosis);
            let count = members.len();
            members.shuffle(&mut rng);
            members.truncate(sample_limit);

            let decoded: Vec<Option<RgbImage>> = members
                .par_iter()
                .map(|s| match decode_rgb(&s.path) {
                    Ok(img) => Some(img),
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                })
                .collect();

            let mut tiles = Vec::new();
            let accumulator = decoded
                .par_iter()
                .flatten()
                .fold(PixelAccumulator::new, |mut acc, img| {
                    acc.add_image(img);
                    acc
                })
                .reduce(PixelAccumulator::new, PixelAccumulator::merge);

            for img in decoded.iter() {
                let Some(img) = img else {
                    unreadable += 1;
                    continue;
                };
                *dimensions
                    .entry(format!("{}x{}", img.width(), img.height()))
                    .or_insert(0) += 1;
                if tiles.len() < MONTAGE_COLUMNS {
                    tiles.push(image::imageops::resize(
                        img,
                        image_size as u32,
                        image_size as u32,
                        FilterType::Triangle,
                    ));
                }
            }

            let (channel_mean, channel_std) = accumulator.mean_std();
            classes.push(ClassSummary {
                diagnosis,
                count,
                fraction: count as f64 / total as f64,
                sampled: accumulator.images,
                channel_mean,
                channel_std,
                intensity_histogram: accumulator.normalized_histogram(),
            });
            montage.push((diagnosis, tiles));
        }

        let counts: Vec<usize> = classes.iter().map(|c| c.count).collect();
        let majority = counts.iter().copied().max().unwrap_or(0);
        let minority = counts.iter().copied().min().unwrap_or(0);
        let imbalance_ratio = if minority == 0 {
            f64::INFINITY
        } else {
            majority as f64 / minority as f64
        };

        Ok(Self {
            total_samples: total,
            missing_files: dataset.missing_ids.len(),
            imbalance_ratio,
            classes,
            dimensions,
            unreadable,
            montage,
            montage_tile: image_size as u32,
        })
    }

    pub fn class(&self, diagnosis: Diagnosis) -> Option<&ClassSummary> {
        self.classes.iter().find(|c| c.diagnosis == diagnosis)
    }

    /// Write `eda_report.json`, `class_distribution.svg`,
    /// `intensity_histogram.svg` and `sample_patches.png` into `dir`
    pub fn write_report(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();

        let json_path = dir.join("eda_report.json");
        fs::write(&json_path, serde_json::to_string_pretty(self)?)?;
        written.push(json_path);

        let bars: Vec<BarData> = self
            .classes
            .iter()
            .map(|c| BarData {
                label: c.diagnosis.name().to_string(),
                value: c.count as f64,
                color: class_color(c.diagnosis).to_string(),
            })
            .collect();
        let bar_path = dir.join("class_distribution.svg");
        generate_bar_chart("Class Distribution", "Patches", &bars, false, &bar_path)?;
        written.push(bar_path);

        let bin_width = 256.0 / HISTOGRAM_BINS as f64;
        let series: Vec<DataSeries> = self
            .classes
            .iter()
            .map(|c| {
                let points = c
                    .intensity_histogram
                    .iter()
                    .enumerate()
                    .map(|(i, &f)| DataPoint::new((i as f64 + 0.5) * bin_width, f * 100.0))
                    .collect();
                DataSeries::new(c.diagnosis.name(), points, class_color(c.diagnosis)).without_markers()
            })
            .collect();
        let hist_path = dir.join("intensity_histogram.svg");
        LineChart::new("Grayscale Intensity", "Intensity", "Pixels (%)")
            .with_x_range(AxisRange::Fixed(0.0, 256.0))
            .write(&series, &hist_path)?;
        written.push(hist_path);

        if let Some(montage) = self.render_montage() {
            let montage_path = dir.join("sample_patches.png");
            montage.save(&montage_path)?;
            written.push(montage_path);
        }

        info!("EDA report written to {:?}", dir);
        Ok(written)
    }

    /// One row of sample patches per class
    fn render_montage(&self) -> Option<RgbImage> {
        let columns = self.montage.iter().map(|(_, t)| t.len()).max()?;
        if columns == 0 {
            return None;
        }

        let cell = self.montage_tile + MONTAGE_PADDING;
        let width = columns as u32 * cell + MONTAGE_PADDING;
        let height = self.montage.len() as u32 * cell + MONTAGE_PADDING;
        let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));

        for (row, (_, tiles)) in self.montage.iter().enumerate() {
            for (col, tile) in tiles.iter().enumerate() {
                let x = MONTAGE_PADDING + col as u32 * cell;
                let y = MONTAGE_PADDING + row as u32 * cell;
                image::imageops::replace(&mut canvas, tile, x as i64, y as i64);
            }
        }

        Some(canvas)
    }

    pub fn print(&self) {
        let total = self.total_samples.max(1) as f64;
        println!("\n🔬 Exploratory Data Analysis:");
        println!("  Patches: {}", format_number(self.total_samples));
        for c in &self.classes {
            println!(
                "    {:<10} {:>9} {}",
                c.diagnosis.name(),
                format_number(c.count),
                format_progress_bar(c.count as f64 / total, 30)
            );
        }
        println!("  Imbalance ratio: {:.2}", self.imbalance_ratio);

        println!("  Channel means (R, G, B) over sampled patches:");
        for c in &self.classes {
            println!(
                "    {:<10} mean ({:.3}, {:.3}, {:.3})  std ({:.3}, {:.3}, {:.3})  n={}",
                c.diagnosis.name(),
                c.channel_mean[0],
                c.channel_mean[1],
                c.channel_mean[2],
                c.channel_std[0],
                c.channel_std[1],
                c.channel_std[2],
                c.sampled
            );
        }

        println!("  Image sizes:");
        for (dims, count) in &self.dimensions {
            println!("    {:<10} {}", dims, format_number(*count));
        }
        if self.unreadable > 0 {
            println!("  Unreadable patches: {}", self.unreadable);
        }
    }
}

fn class_color(diagnosis: Diagnosis) -> &'static str {
    match diagnosis {
        Diagnosis::Benign => COLOR_PRIMARY,
        Diagnosis::Malignant => COLOR_TERTIARY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::tests::write_fixture;

    fn fixture_dataset(dir: &Path, count: usize) -> PatchDataset {
        write_fixture(dir, count, 8);
        PatchDataset::new(dir, "train_labels.csv", "train", 8).unwrap()
    }

    #[test]
    fn test_class_counts_and_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 5);
        let report = ExploratoryReport::compute(&dataset, 10, 8).unwrap();

        assert_eq!(report.total_samples, 5);
        assert_eq!(report.class(Diagnosis::Benign).unwrap().count, 3);
        assert_eq!(report.class(Diagnosis::Malignant).unwrap().count, 2);
        assert!((report.imbalance_ratio - 1.5).abs() < 1e-9);
        assert_eq!(report.dimensions.get("8x8"), Some(&5));
    }

    #[test]
    fn test_channel_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 4);
        let report = ExploratoryReport::compute(&dataset, 10, 8).unwrap();

        // fixture: red channel is 40 for benign, 200 for malignant, blue is 90
        let benign = report.class(Diagnosis::Benign).unwrap();
        let malignant = report.class(Diagnosis::Malignant).unwrap();
        assert!((benign.channel_mean[0] - 40.0 / 255.0).abs() < 1e-6);
        assert!((malignant.channel_mean[0] - 200.0 / 255.0).abs() < 1e-6);
        assert!(benign.channel_std[0] < 1e-6);
        assert!((benign.channel_mean[2] - 90.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_histogram_sums_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 6);
        let report = ExploratoryReport::compute(&dataset, 10, 8).unwrap();

        for class in &report.classes {
            assert_eq!(class.intensity_histogram.len(), HISTOGRAM_BINS);
            let sum: f64 = class.intensity_histogram.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_sample_limit() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 10);
        let report = ExploratoryReport::compute(&dataset, 2, 8).unwrap();

        assert!(report.classes.iter().all(|c| c.sampled == 2));
        assert_eq!(report.class(Diagnosis::Benign).unwrap().count, 5);
    }

    #[test]
    fn test_intensity_bin_bounds() {
        assert_eq!(intensity_bin(&Rgb([0, 0, 0])), 0);
        assert_eq!(intensity_bin(&Rgb([255, 255, 255])), HISTOGRAM_BINS - 1);
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = fixture_dataset(dir.path(), 4);
        let report = ExploratoryReport::compute(&dataset, 10, 8).unwrap();

        let out = dir.path().join("eda");
        let written = report.write_report(&out).unwrap();
        assert_eq!(written.len(), 4);
        for path in &written {
            assert!(path.exists());
        }

        let montage = image::open(out.join("sample_patches.png")).unwrap();
        assert_eq!(montage.height(), 2 * (8 + MONTAGE_PADDING) + MONTAGE_PADDING);

        let json = fs::read_to_string(out.join("eda_report.json")).unwrap();
        assert!(json.contains("\"malignant\""));
    }
}
