//! Volume filter
//!
//! Keeps the labels whose physical volume lies in the configured range and
//! drops single-voxel labels whatever the calibration. Must run after border
//! label removal so that removed labels are not counted.

use crate::volume::{Calibration, LabelVolume};

use super::types::BoxSet;

/// Physical volume range filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeFilter {
    min_volume: f64,
    max_volume: f64,
}

impl VolumeFilter {
    pub fn new(min_volume: f64, max_volume: f64) -> Self {
        Self {
            min_volume,
            max_volume,
        }
    }

    /// Voxel count per label id; index 0 is background
    pub fn voxel_counts(labels: &LabelVolume) -> Vec<u64> {
        let max_label = labels.as_slice().iter().copied().max().unwrap_or(0) as usize;
        let mut counts = vec![0u64; max_label + 1];
        for &label in labels.as_slice() {
            counts[label as usize] += 1;
        }
        counts
    }

    /// Whether a component of `voxel_count` voxels is kept
    pub fn keeps(&self, voxel_count: u64, calibration: &Calibration) -> bool {
        if voxel_count <= 1 {
            return false;
        }
        let volume = voxel_count as f64 * calibration.voxel_volume();
        volume >= self.min_volume && volume <= self.max_volume
    }

    /// Retained labels, each seeded with an empty box
    pub fn filter(&self, labels: &LabelVolume, calibration: &Calibration) -> BoxSet {
        let counts = Self::voxel_counts(labels);
        let retained = counts
            .iter()
            .enumerate()
            .skip(1)
            .filter(|&(_, &count)| self.keeps(count, calibration))
            .map(|(label, _)| label as u32);

        let set = BoxSet::seeded(retained);
        tracing::debug!(
            components = counts.iter().skip(1).filter(|&&c| c > 0).count(),
            retained = set.len(),
            "volume filter"
        );
        set
    }
}

// ============================================================
// Tests
// ============================================================
