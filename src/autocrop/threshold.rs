//! Threshold engine
//!
//! Computes the binarization threshold of a volume with Otsu's method and a
//! two-tier fallback for stacks whose whole-volume threshold is too low.
//!
//! # Algorithm
//!
//! 1. Smooth an 8-bit working copy with a small anisotropic Gaussian
//!    (sigma 0.5 / 0.5 / 1.0 on x / y / z)
//! 2. Otsu over the whole volume; accept if `>= floor`
//! 3. Otherwise Otsu over slices `[start, depth)`, where `start` is the
//!    configured slice or `depth / 2` when that is 0; accept if `>= floor`
//! 4. Otherwise use `floor` itself and flag the result as a default

use rayon::prelude::*;

use crate::volume::{gaussian_blur_3d, Volume, THRESHOLD_BLUR_SIGMA};

// ============================================================
// Constants
// ============================================================

/// Number of histogram bins for an 8-bit working copy
pub const HISTOGRAM_BINS: usize = 256;

/// Slice description reported when the whole volume was used
pub const WHOLE_VOLUME_RANGE: &str = "default";

// ============================================================
// Bi-level threshold methods
// ============================================================

/// Method picking a single threshold from an 8-bit histogram
pub trait BilevelThreshold: Send + Sync {
    fn threshold(&self, histogram: &[u64; HISTOGRAM_BINS]) -> i32;
}

/// Otsu's method: the level maximizing inter-class variance
///
/// Voxels `<= t` form the background class. When several levels reach the
/// same maximum (two well separated modes), the middle of that plateau is
/// returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct Otsu;

impl BilevelThreshold for Otsu {
    fn threshold(&self, histogram: &[u64; HISTOGRAM_BINS]) -> i32 {
        let total: f64 = histogram.iter().map(|&c| c as f64).sum();
        if total == 0.0 {
            return 0;
        }

        let sum_total: f64 = histogram
            .iter()
            .enumerate()
            .map(|(i, &c)| i as f64 * c as f64)
            .sum();

        let mut weight_background = 0.0;
        let mut sum_background = 0.0;
        let mut max_variance = -1.0f64;
        let mut first_best = 0usize;
        let mut last_best = 0usize;

        for (t, &count) in histogram.iter().enumerate() {
            weight_background += count as f64;
            if weight_background == 0.0 {
                continue;
            }

            let weight_foreground = total - weight_background;
            if weight_foreground == 0.0 {
                break;
            }

            sum_background += t as f64 * count as f64;
            let mean_background = sum_background / weight_background;
            let mean_foreground = (sum_total - sum_background) / weight_foreground;
            let diff = mean_background - mean_foreground;
            let variance = weight_background * weight_foreground * diff * diff;

            if variance > max_variance * (1.0 + 1e-12) {
                max_variance = variance;
                first_best = t;
                last_best = t;
            } else if (variance - max_variance).abs() <= max_variance * 1e-12 {
                last_best = t;
            }
        }

        ((first_best + last_best) / 2) as i32
    }
}

/// 256-bin histogram of an 8-bit volume, accumulated per slice in parallel
pub fn histogram(volume: &Volume<u8>) -> [u64; HISTOGRAM_BINS] {
    volume
        .as_slice()
        .par_chunks(volume.extent().plane_len().max(1))
        .fold(
            || [0u64; HISTOGRAM_BINS],
            |mut acc, slice| {
                for &v in slice.iter() {
                    acc[v as usize] += 1;
                }
                acc
            },
        )
        .reduce(
            || [0u64; HISTOGRAM_BINS],
            |mut a, b| {
                for (x, y) in a.iter_mut().zip(b.iter()) {
                    *x += y;
                }
                a
            },
        )
}

// ============================================================
// Threshold Engine
// ============================================================

/// Result of threshold selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdOutcome {
    /// Threshold to binarize with (`value >= threshold` is foreground)
    pub threshold: i32,

    /// `"default"` for the whole volume, else `"Start:a-b"`
    pub slice_range: String,

    /// Both Otsu passes fell below the floor
    pub used_default: bool,
}

/// Otsu with the two-tier fallback policy
#[derive(Debug, Clone)]
pub struct ThresholdEngine<M = Otsu> {
    method: M,
    floor: i32,
    fallback_start: usize,
    sigma: (f32, f32, f32),
}

impl ThresholdEngine<Otsu> {
    /// Engine using Otsu's method
    pub fn new(floor: i32, fallback_start: usize) -> Self {
        Self::with_method(Otsu, floor, fallback_start)
    }
}

impl<M: BilevelThreshold> ThresholdEngine<M> {
    /// Engine using a custom bi-level method
    pub fn with_method(method: M, floor: i32, fallback_start: usize) -> Self {
        Self {
            method,
            floor,
            fallback_start,
            sigma: THRESHOLD_BLUR_SIGMA,
        }
    }

    /// Override the smoothing sigma (x, y, z)
    #[must_use]
    pub fn sigma(mut self, sigma: (f32, f32, f32)) -> Self {
        self.sigma = sigma;
        self
    }

    pub fn floor(&self) -> i32 {
        self.floor
    }

    pub fn method(&self) -> &M {
        &self.method
    }

    /// Slices used by the fallback pass, `None` when that range is empty
    pub fn fallback_range(&self, depth: usize) -> Option<(usize, usize)> {
        let start = if self.fallback_start == 0 {
            depth / 2
        } else {
            self.fallback_start
        };
        (start < depth).then_some((start, depth))
    }

    /// Smoothed working copy that thresholding and binarization operate on
    pub fn smooth(&self, volume: &Volume<u8>) -> Volume<u8> {
        gaussian_blur_3d(volume, self.sigma)
    }

    /// Smooth `volume`, then select a threshold
    ///
    /// Returns `None` for an empty volume.
    pub fn compute(&self, volume: &Volume<u8>) -> Option<ThresholdOutcome> {
        if volume.is_empty() {
            return None;
        }
        self.compute_smoothed(&self.smooth(volume))
    }

    /// Select a threshold on an already smoothed volume
    pub fn compute_smoothed(&self, smoothed: &Volume<u8>) -> Option<ThresholdOutcome> {
        if smoothed.is_empty() {
            tracing::debug!("empty volume, skipping threshold computation");
            return None;
        }

        let whole = self.method.threshold(&histogram(smoothed));
        if whole >= self.floor {
            return Some(ThresholdOutcome {
                threshold: whole,
                slice_range: WHOLE_VOLUME_RANGE.to_string(),
                used_default: false,
            });
        }

        let depth = smoothed.depth();
        let Some((start, end)) = self.fallback_range(depth) else {
            tracing::debug!(
                whole,
                floor = self.floor,
                depth,
                "fallback slice range is empty, using floor"
            );
            return Some(self.default_outcome(WHOLE_VOLUME_RANGE.to_string()));
        };

        let slice_range = format!("Start:{}-{}", start, end);
        let partial = smoothed
            .substack(start, end)
            .map(|sub| self.method.threshold(&histogram(&sub)))
            .unwrap_or(i32::MIN);

        tracing::debug!(whole, partial, %slice_range, floor = self.floor, "otsu fallback");

        if partial >= self.floor {
            Some(ThresholdOutcome {
                threshold: partial,
                slice_range,
                used_default: false,
            })
        } else {
            Some(self.default_outcome(slice_range))
        }
    }

    fn default_outcome(&self, slice_range: String) -> ThresholdOutcome {
        ThresholdOutcome {
            threshold: self.floor,
            slice_range,
            used_default: true,
        }
    }
}

// ============================================================
// Tests
// ============================================================
