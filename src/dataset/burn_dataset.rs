//! Burn Dataset and Batcher integration
//!
//! - `PatchBurnDataset`: labeled patches, lazily loaded or preloaded in parallel
//! - `PatchBatcher`: plain batching for validation, holdout and inference
//! - `AugmentingBatcher`: applies `Augmenter` to every item before batching
//! - `InferenceDataset` / `InferenceBatcher`: unlabeled test patches with ids

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::augmentation::{AugmentationConfig, Augmenter};
use super::loader::{load_patch, PatchSample, TestPatch};
use crate::utils::error::Result;

/// A labeled patch ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatchItem {
    /// Flattened CHW image in [0, 1], length 3 * H * W
    pub image: Vec<f32>,
    pub label: u8,
    pub id: String,
}

impl PatchItem {
    pub fn from_sample(sample: &PatchSample, image_size: usize) -> Result<Self> {
        Ok(Self {
            image: load_patch(&sample.path, image_size)?,
            label: sample.label,
            id: sample.id.clone(),
        })
    }
}

/// Labeled patch dataset implementing Burn's `Dataset`
#[derive(Debug, Clone)]
pub struct PatchBurnDataset {
    samples: Vec<PatchSample>,
    image_size: usize,
    cached_items: Option<Vec<PatchItem>>,
}

impl PatchBurnDataset {
    /// Lazy dataset: images are decoded on every `get`
    pub fn new(samples: Vec<PatchSample>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            cached_items: None,
        }
    }

    /// Decode every image up front on the rayon pool. Unreadable patches are
    /// dropped with a warning.
    pub fn new_cached(samples: Vec<PatchSample>, image_size: usize) -> Self {
        let (items, failed) = preload(&samples, "patches", |s| PatchItem::from_sample(s, image_size));
        if failed > 0 {
            warn!("Skipped {} unreadable patches", failed);
        }

        let loaded: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let samples = samples
            .iter()
            .filter(|s| loaded.contains(s.id.as_str()))
            .cloned()
            .collect::<Vec<_>>();

        Self {
            samples,
            image_size,
            cached_items: Some(items),
        }
    }

    /// Build directly from in-memory items
    pub fn from_items(items: Vec<PatchItem>, image_size: usize) -> Self {
        let samples = items
            .iter()
            .map(|item| PatchSample {
                id: item.id.clone(),
                path: Default::default(),
                label: item.label,
            })
            .collect();

        Self {
            samples,
            image_size,
            cached_items: Some(items),
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// [benign, malignant] counts
    pub fn class_distribution(&self) -> [usize; 2] {
        let malignant = self.samples.iter().filter(|s| s.label == 1).count();
        [self.samples.len() - malignant, malignant]
    }

    pub fn labels(&self) -> Vec<u8> {
        self.samples.iter().map(|s| s.label).collect()
    }
}

impl Dataset<PatchItem> for PatchBurnDataset {
    fn get(&self, index: usize) -> Option<PatchItem> {
        if let Some(cached) = &self.cached_items {
            return cached.get(index).cloned();
        }

        let sample = self.samples.get(index)?;
        match PatchItem::from_sample(sample, self.image_size) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        match &self.cached_items {
            Some(cached) => cached.len(),
            None => self.samples.len(),
        }
    }
}

/// Load items in parallel with a progress bar; returns (items, failures)
fn preload<S, T, F>(sources: &[S], what: &str, load: F) -> (Vec<T>, usize)
where
    S: Sync,
    T: Send,
    F: Fn(&S) -> Result<T> + Sync,
{
    let total = sources.len();
    info!("Pre-loading {} {} into memory", total, what);

    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);

    let loaded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    let items: Vec<T> = sources
        .par_iter()
        .filter_map(|source| {
            let result = load(source);
            let count = loaded.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 || count == total {
                pb.set_position(count as u64);
            }
            match result {
                Ok(item) => Some(item),
                Err(e) => {
                    tracing::debug!("{}", e);
                    failed.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
        })
        .collect();

    pb.finish_and_clear();
    info!("Loaded {} {}", items.len(), what);

    (items, failed.into_inner())
}

/// A batch of labeled patches
#[derive(Clone, Debug)]
pub struct PatchBatch<B: Backend> {
    /// [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// [batch_size], 0 = benign, 1 = malignant
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct PatchBatcher {
    image_size: usize,
}

impl PatchBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

fn images_tensor<B: Backend>(
    data: Vec<f32>,
    batch_size: usize,
    image_size: usize,
    device: &B::Device,
) -> Tensor<B, 4> {
    Tensor::<B, 4>::from_floats(
        TensorData::new(data, [batch_size, 3, image_size, image_size]),
        device,
    )
}

fn targets_tensor<B: Backend>(labels: Vec<i64>, device: &B::Device) -> Tensor<B, 1, Int> {
    let len = labels.len();
    Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [len]), device)
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for PatchBatcher {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let batch_size = items.len();
        let labels: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();

        PatchBatch {
            images: images_tensor(data, batch_size, self.image_size, device),
            targets: targets_tensor(labels, device),
        }
    }
}

/// Batcher that augments every item on the fly
///
/// Each call to `batch` draws a fresh seed from an internal counter, so a
/// run is reproducible from the base seed.
#[derive(Debug)]
pub struct AugmentingBatcher {
    augmenter: Augmenter,
    image_size: usize,
    seed: u64,
    counter: AtomicU64,
}

impl AugmentingBatcher {
    pub fn new(config: AugmentationConfig, image_size: usize, seed: u64) -> Self {
        Self {
            augmenter: Augmenter::new(config, image_size),
            image_size,
            seed,
            counter: AtomicU64::new(0),
        }
    }
}

impl<B: Backend> Batcher<B, PatchItem, PatchBatch<B>> for AugmentingBatcher {
    fn batch(&self, items: Vec<PatchItem>, device: &B::Device) -> PatchBatch<B> {
        let batch_size = items.len();
        let round = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(round));

        let mut data = Vec::with_capacity(batch_size * 3 * self.image_size * self.image_size);
        let mut labels = Vec::with_capacity(batch_size);
        for item in &items {
            data.extend(self.augmenter.augment(&item.image, &mut rng));
            labels.push(item.label as i64);
        }

        PatchBatch {
            images: images_tensor(data, batch_size, self.image_size, device),
            targets: targets_tensor(labels, device),
        }
    }
}

/// An unlabeled test patch
#[derive(Clone, Debug)]
pub struct InferenceItem {
    pub id: String,
    pub image: Vec<f32>,
}

/// Unlabeled test patches, lazily decoded
#[derive(Debug, Clone)]
pub struct InferenceDataset {
    patches: Vec<TestPatch>,
    image_size: usize,
}

impl InferenceDataset {
    pub fn new(patches: Vec<TestPatch>, image_size: usize) -> Self {
        Self { patches, image_size }
    }

    pub fn from_dir(dir: &Path, image_size: usize) -> Result<Self> {
        Ok(Self::new(super::loader::list_test_patches(dir)?, image_size))
    }

    pub fn patches(&self) -> &[TestPatch] {
        &self.patches
    }

    /// Decode items `start..end` in parallel; unreadable patches are reported by id
    pub fn load_range(&self, start: usize, end: usize) -> (Vec<InferenceItem>, Vec<String>) {
        let end = end.min(self.patches.len());
        let results: Vec<_> = self.patches[start.min(end)..end]
            .par_iter()
            .map(|p| (p.id.clone(), load_patch(&p.path, self.image_size)))
            .collect();

        let mut items = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for (id, result) in results {
            match result {
                Ok(image) => items.push(InferenceItem { id, image }),
                Err(e) => {
                    warn!("{}", e);
                    failed.push(id);
                }
            }
        }
        (items, failed)
    }
}

impl Dataset<InferenceItem> for InferenceDataset {
    fn get(&self, index: usize) -> Option<InferenceItem> {
        let patch = self.patches.get(index)?;
        load_patch(&patch.path, self.image_size)
            .ok()
            .map(|image| InferenceItem {
                id: patch.id.clone(),
                image,
            })
    }

    fn len(&self) -> usize {
        self.patches.len()
    }
}

#[derive(Clone, Debug)]
pub struct InferenceBatch<B: Backend> {
    pub ids: Vec<String>,
    pub images: Tensor<B, 4>,
}

#[derive(Clone, Debug)]
pub struct InferenceBatcher {
    image_size: usize,
}

impl InferenceBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, InferenceItem, InferenceBatch<B>> for InferenceBatcher {
    fn batch(&self, items: Vec<InferenceItem>, device: &B::Device) -> InferenceBatch<B> {
        let batch_size = items.len();
        let mut ids = Vec::with_capacity(batch_size);
        let mut data = Vec::with_capacity(batch_size * 3 * self.image_size * self.image_size);
        for item in items {
            ids.push(item.id);
            data.extend(item.image);
        }

        InferenceBatch {
            ids,
            images: images_tensor(data, batch_size, self.image_size, device),
        }
    }
}
