//! Data augmentation for tissue patches
//!
//! Histology patches have no canonical orientation, so flips and quarter
//! turns are label-preserving. Mild brightness and contrast jitter covers
//! staining variation between slides.
//!
//! Augmentation works directly on square CHW float buffers in [0, 1] so it
//! can run on cached items right before batching. Validation, holdout and
//! test data are never augmented.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    pub horizontal_flip_prob: f32,
    pub vertical_flip_prob: f32,
    /// Probability of a random 90, 180 or 270 degree turn
    pub rotate90_prob: f32,
    /// Additive brightness range (±brightness_delta)
    pub brightness_delta: f32,
    pub brightness_prob: f32,
    /// Contrast factor range (1.0 ± contrast_delta)
    pub contrast_delta: f32,
    pub contrast_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
            rotate90_prob: 0.5,
            brightness_delta: 0.1,
            brightness_prob: 0.3,
            contrast_delta: 0.1,
            contrast_prob: 0.3,
        }
    }
}

impl AugmentationConfig {
    /// Geometry only
    pub fn light() -> Self {
        Self {
            brightness_prob: 0.0,
            contrast_prob: 0.0,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
            rotate90_prob: 0.0,
            brightness_delta: 0.0,
            brightness_prob: 0.0,
            contrast_delta: 0.0,
            contrast_prob: 0.0,
        }
    }
}

/// Applies random transforms to square CHW buffers
#[derive(Debug, Clone)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: usize,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: usize) -> Self {
        Self { config, image_size }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Return an augmented copy of `image` (length 3 * size * size)
    pub fn augment(&self, image: &[f32], rng: &mut ChaCha8Rng) -> Vec<f32> {
        let size = self.image_size;
        let mut out = image.to_vec();

        if rng.gen::<f32>() < self.config.horizontal_flip_prob {
            out = remap(&out, size, |x, y| (size - 1 - x, y));
        }

        if rng.gen::<f32>() < self.config.vertical_flip_prob {
            out = remap(&out, size, |x, y| (x, size - 1 - y));
        }

        if rng.gen::<f32>() < self.config.rotate90_prob {
            let turns = rng.gen_range(1..=3);
            for _ in 0..turns {
                out = rotate90(&out, size);
            }
        }

        if self.config.brightness_prob > 0.0 && rng.gen::<f32>() < self.config.brightness_prob {
            let delta = rng.gen_range(-self.config.brightness_delta..=self.config.brightness_delta);
            for v in out.iter_mut() {
                *v = (*v + delta).clamp(0.0, 1.0);
            }
        }

        if self.config.contrast_prob > 0.0 && rng.gen::<f32>() < self.config.contrast_prob {
            let factor = 1.0 + rng.gen_range(-self.config.contrast_delta..=self.config.contrast_delta);
            adjust_contrast(&mut out, size, factor);
        }

        out
    }
}

/// Build a new buffer where output pixel (x, y) reads input pixel `source(x, y)`
fn remap(image: &[f32], size: usize, source: impl Fn(usize, usize) -> (usize, usize)) -> Vec<f32> {
    let plane = size * size;
    let mut out = vec![0.0f32; image.len()];

    for c in 0..3 {
        for y in 0..size {
            for x in 0..size {
                let (sx, sy) = source(x, y);
                out[c * plane + y * size + x] = image[c * plane + sy * size + sx];
            }
        }
    }

    out
}

/// Quarter turn clockwise
fn rotate90(image: &[f32], size: usize) -> Vec<f32> {
    remap(image, size, |x, y| (y, size - 1 - x))
}

/// Scale each channel around its own mean
fn adjust_contrast(image: &mut [f32], size: usize, factor: f32) {
    let plane = size * size;
    for channel in image.chunks_mut(plane) {
        let mean = channel.iter().sum::<f32>() / plane as f32;
        for v in channel.iter_mut() {
            *v = ((*v - mean) * factor + mean).clamp(0.0, 1.0);
        }
    }
}
