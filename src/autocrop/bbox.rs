//! Bounding-box extractor
//!
//! One pass over the label volume computing the tight, closed box of every
//! retained label. Slices are accumulated in parallel and the partial boxes
//! are combined with a componentwise min/max, so the result does not depend
//! on scan order.

use rayon::prelude::*;

use crate::volume::LabelVolume;

use super::types::{AutocropError, BoxSet, CropBox, Result};

/// Marks a label that is not retained in the dense slot lookup
const NOT_RETAINED: u32 = u32::MAX;

/// Bounding boxes of the labels in `retained`
///
/// Every label of `retained` must own at least one voxel; a label left with
/// its empty seed box is reported as [`AutocropError::GeometryInconsistency`].
pub fn compute_boxes(labels: &LabelVolume, retained: &BoxSet) -> Result<BoxSet> {
    let mut result = retained.clone();
    if retained.is_empty() {
        return Ok(result);
    }

    // label -> slot lookup, dense over the retained label range
    let max_label = retained.labels().last().copied().unwrap_or(0) as usize;
    let mut slot_of = vec![NOT_RETAINED; max_label + 1];
    for (slot, &label) in retained.labels().iter().enumerate() {
        slot_of[label as usize] = slot as u32;
    }

    let extent = labels.extent();
    let slot_count = retained.len();
    let empty = || vec![CropBox::EMPTY; slot_count];

    let accumulated = labels
        .as_slice()
        .par_chunks(extent.plane_len().max(1))
        .enumerate()
        .fold(empty, |mut boxes, (z, slice)| {
            for (idx, &label) in slice.iter().enumerate() {
                let label = label as usize;
                if label == 0 || label > max_label {
                    continue;
                }
                let slot = slot_of[label];
                if slot == NOT_RETAINED {
                    continue;
                }
                let x = (idx % extent.width) as i32;
                let y = (idx / extent.width) as i32;
                boxes[slot as usize].include(x, y, z as i32);
            }
            boxes
        })
        .reduce(empty, |a, b| {
            a.iter().zip(b.iter()).map(|(p, q)| p.union(q)).collect()
        });

    for (target, found) in result.boxes_mut().iter_mut().zip(accumulated) {
        *target = target.union(&found);
    }

    if let Some((label, _)) = result.iter().find(|(_, b)| b.is_empty()) {
        return Err(AutocropError::GeometryInconsistency { label });
    }

    Ok(result)
}

// ============================================================
// Tests
// ============================================================
