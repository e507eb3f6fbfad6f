//! Autocrop module core types
//!
//! Contains the error type, the integer crop box and the label-indexed box
//! arena shared by every stage after labeling.

use thiserror::Error;

use crate::volume::{Region, VolumeError};

// ============================================================
// Error Types
// ============================================================

/// Autocrop error types
#[derive(Debug, Error)]
pub enum AutocropError {
    #[error("Empty volume")]
    EmptyVolume,

    #[error("Channel {channel} out of range (image has {count} channels)")]
    ChannelOutOfRange { channel: usize, count: usize },

    #[error("Label {label} was retained but no voxel carries it")]
    GeometryInconsistency { label: u32 },

    #[error("Invalid coordinates at line {line}: {reason}")]
    InvalidCoordinates { line: usize, reason: String },

    #[error("Volume error: {0}")]
    Volume(#[from] VolumeError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AutocropError>;

// ============================================================
// Crop Box
// ============================================================

/// Axis-aligned integer box in voxel space
///
/// Boxes straight out of bounding-box extraction are tight and closed
/// (`max` is the last voxel). After padding, `max` is `min + extent`, so a
/// padded box covers `[min, max)` on each axis. Geometry helpers below use
/// the half-open reading, which is the one merging and cropping work with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropBox {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
    pub z_min: i32,
    pub z_max: i32,
}

impl Default for CropBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl CropBox {
    /// Sentinel for a box that has not seen any voxel yet
    pub const EMPTY: CropBox = CropBox {
        x_min: i32::MAX,
        x_max: i32::MIN,
        y_min: i32::MAX,
        y_max: i32::MIN,
        z_min: i32::MAX,
        z_max: i32::MIN,
    };

    pub fn new(x_min: i32, x_max: i32, y_min: i32, y_max: i32, z_min: i32, z_max: i32) -> Self {
        Self {
            x_min,
            x_max,
            y_min,
            y_max,
            z_min,
            z_max,
        }
    }

    /// Still the sentinel on at least one axis
    pub fn is_empty(&self) -> bool {
        self.x_min > self.x_max || self.y_min > self.y_max || self.z_min > self.z_max
    }

    /// Grow to include voxel (x, y, z)
    #[inline]
    pub fn include(&mut self, x: i32, y: i32, z: i32) {
        self.x_min = self.x_min.min(x);
        self.x_max = self.x_max.max(x);
        self.y_min = self.y_min.min(y);
        self.y_max = self.y_max.max(y);
        self.z_min = self.z_min.min(z);
        self.z_max = self.z_max.max(z);
    }

    /// Smallest box containing both
    pub fn union(&self, other: &CropBox) -> CropBox {
        CropBox {
            x_min: self.x_min.min(other.x_min),
            x_max: self.x_max.max(other.x_max),
            y_min: self.y_min.min(other.y_min),
            y_max: self.y_max.max(other.y_max),
            z_min: self.z_min.min(other.z_min),
            z_max: self.z_max.max(other.z_max),
        }
    }

    pub fn width(&self) -> i64 {
        i64::from(self.x_max) - i64::from(self.x_min)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.y_max) - i64::from(self.y_min)
    }

    pub fn depth(&self) -> i64 {
        i64::from(self.z_max) - i64::from(self.z_min)
    }

    /// Voxel count of `[min, max)` on each axis
    pub fn volume(&self) -> i64 {
        if self.is_empty() {
            return 0;
        }
        self.width() * self.height() * self.depth()
    }

    /// Voxel count shared with `other`
    pub fn intersection_volume(&self, other: &CropBox) -> i64 {
        fn overlap(a_min: i32, a_max: i32, b_min: i32, b_max: i32) -> i64 {
            (i64::from(a_max.min(b_max)) - i64::from(a_min.max(b_min))).max(0)
        }

        overlap(self.x_min, self.x_max, other.x_min, other.x_max)
            * overlap(self.y_min, self.y_max, other.y_min, other.y_max)
            * overlap(self.z_min, self.z_max, other.z_min, other.z_max)
    }

    /// `other` lies entirely inside this box
    pub fn contains(&self, other: &CropBox) -> bool {
        self.x_min <= other.x_min
            && self.x_max >= other.x_max
            && self.y_min <= other.y_min
            && self.y_max >= other.y_max
            && self.z_min <= other.z_min
            && self.z_max >= other.z_max
    }

    /// Crop region covering `[min, max)`; `None` for negative or empty boxes
    pub fn to_region(&self) -> Option<Region> {
        if self.is_empty() || self.x_min < 0 || self.y_min < 0 || self.z_min < 0 {
            return None;
        }
        Some(Region::new(
            self.x_min as usize,
            self.y_min as usize,
            self.z_min as usize,
            self.width() as usize,
            self.height() as usize,
            self.depth() as usize,
        ))
    }
}

impl std::fmt::Display for CropBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {})-({}, {}, {})",
            self.x_min, self.y_min, self.z_min, self.x_max, self.y_max, self.z_max
        )
    }
}

// ============================================================
// Box Set
// ============================================================

/// Label-indexed arena of boxes
///
/// Labels are kept sorted ascending; the box of a label lives in the slot
/// at the same position. Iteration is always in ascending label order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoxSet {
    labels: Vec<u32>,
    boxes: Vec<CropBox>,
}

impl BoxSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One sentinel box per distinct label
    pub fn seeded(labels: impl IntoIterator<Item = u32>) -> Self {
        let mut labels: Vec<u32> = labels.into_iter().collect();
        labels.sort_unstable();
        labels.dedup();
        let boxes = vec![CropBox::EMPTY; labels.len()];
        Self { labels, boxes }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Slot index of `label`
    pub fn slot(&self, label: u32) -> Option<usize> {
        self.labels.binary_search(&label).ok()
    }

    pub fn contains(&self, label: u32) -> bool {
        self.slot(label).is_some()
    }

    pub fn get(&self, label: u32) -> Option<&CropBox> {
        self.slot(label).map(|s| &self.boxes[s])
    }

    /// Insert or replace the box of `label`
    pub fn insert(&mut self, label: u32, crop_box: CropBox) {
        match self.labels.binary_search(&label) {
            Ok(slot) => self.boxes[slot] = crop_box,
            Err(slot) => {
                self.labels.insert(slot, label);
                self.boxes.insert(slot, crop_box);
            }
        }
    }

    pub fn remove(&mut self, label: u32) -> Option<CropBox> {
        let slot = self.slot(label)?;
        self.labels.remove(slot);
        Some(self.boxes.remove(slot))
    }

    /// Labels in ascending order
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Boxes in ascending label order
    pub fn boxes(&self) -> &[CropBox] {
        &self.boxes
    }

    pub fn boxes_mut(&mut self) -> &mut [CropBox] {
        &mut self.boxes
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &CropBox)> + '_ {
        self.labels.iter().copied().zip(self.boxes.iter())
    }
}

// ============================================================
// Tests
// ============================================================
