//! Box padder/clamper
//!
//! Grows every tight box by a per-axis margin and clamps the result to the
//! volume. The clamp sequence is order dependent and is applied per axis:
//!
//! 1. `min' = min - margin`, raised to [`LOWER_BOUND`] when `<= 0`
//! 2. `extent = max + 2 * margin - min`
//! 3. `extent > size` gives `extent = size - 1`
//! 4. `extent + min' >= size` or `extent < 0` gives `extent = size - min'`
//! 5. `max' = min' + extent`
//!
//! The padded box covers `[min', max')`. Plane 0 of every axis is a border
//! plane, so it never holds a retained component voxel and the lower bound of
//! 1 does not cut into any nucleus. Single-slice volumes have no z border;
//! the pipeline resets their z range to the only plane after padding.

use crate::volume::Extent;

use super::types::{BoxSet, CropBox};

/// Smallest coordinate a padded box may start at
pub const LOWER_BOUND: i32 = 1;

/// Per-axis padding in voxels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Margins {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Margins {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn uniform(m: i32) -> Self {
        Self::new(m, m, m)
    }
}

/// Pad one axis; returns `(min', max')`
///
/// Computed in `i64` so that large margins clamp instead of wrapping.
pub fn pad_axis(min: i32, max: i32, margin: i32, size: i32) -> (i32, i32) {
    let (min, max, margin, size) = (
        i64::from(min),
        i64::from(max),
        i64::from(margin),
        i64::from(size),
    );

    let mut new_min = min - margin;
    if new_min <= 0 {
        new_min = i64::from(LOWER_BOUND);
    }

    let mut extent = max + 2 * margin - min;
    if extent > size {
        extent = size - 1;
    }
    if extent + new_min >= size || extent < 0 {
        extent = size - new_min;
    }

    (narrow(new_min), narrow(new_min + extent))
}

fn narrow(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(if v < 0 { i32::MIN } else { i32::MAX })
}

/// Pad a single box against a volume extent
pub fn pad(crop_box: &CropBox, margins: Margins, extent: Extent) -> CropBox {
    let (x_min, x_max) = pad_axis(
        crop_box.x_min,
        crop_box.x_max,
        margins.x,
        extent.width as i32,
    );
    let (y_min, y_max) = pad_axis(
        crop_box.y_min,
        crop_box.y_max,
        margins.y,
        extent.height as i32,
    );
    let (z_min, z_max) = pad_axis(
        crop_box.z_min,
        crop_box.z_max,
        margins.z,
        extent.depth as i32,
    );

    CropBox::new(x_min, x_max, y_min, y_max, z_min, z_max)
}

/// Pad every box of a set, keeping labels
pub fn pad_all(boxes: &BoxSet, margins: Margins, extent: Extent) -> BoxSet {
    let mut padded = boxes.clone();
    for b in padded.boxes_mut() {
        *b = pad(b, margins, extent);
    }
    padded
}

// ============================================================
// Tests
// ============================================================
