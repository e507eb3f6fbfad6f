//! Property-Based Tests
//!
//! Invariants of the detection stages over random inputs:
//! - Binarization only produces the two binary values
//! - The volume filter keeps exactly the labels inside the range
//! - Bounding boxes match a brute-force scan
//! - Merging reaches a fixpoint that covers every input box
//! - Padding stays inside the volume and keeps the nucleus

use nucleus_autocrop::autocrop::{
    binarize, compute_boxes, merge, overlaps_enough, pad_axis, VolumeFilter, BACKGROUND,
    FOREGROUND,
};
use nucleus_autocrop::volume::{Calibration, LabelVolume, Volume};
use nucleus_autocrop::{BoxSet, CropBox};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn dims() -> impl Strategy<Value = (usize, usize, usize)> {
    (1usize..8, 1usize..8, 1usize..6)
}

fn byte_volume() -> impl Strategy<Value = Volume<u8>> {
    dims().prop_flat_map(|(w, h, d)| {
        prop::collection::vec(any::<u8>(), w * h * d)
            .prop_map(move |data| Volume::from_vec(w, h, d, data).unwrap())
    })
}

fn label_volume() -> impl Strategy<Value = LabelVolume> {
    dims().prop_flat_map(|(w, h, d)| {
        prop::collection::vec(0u32..6, w * h * d)
            .prop_map(move |data| Volume::from_vec(w, h, d, data).unwrap())
    })
}

fn crop_box() -> impl Strategy<Value = CropBox> {
    (0i32..30, 1i32..12, 0i32..30, 1i32..12, 0i32..10, 1i32..6)
        .prop_map(|(x, w, y, h, z, d)| CropBox::new(x, x + w, y, y + h, z, z + d))
}

fn box_set() -> impl Strategy<Value = BoxSet> {
    prop::collection::vec(crop_box(), 0..8).prop_map(|boxes| {
        let mut set = BoxSet::new();
        for (i, b) in boxes.into_iter().enumerate() {
            set.insert(i as u32 + 1, b);
        }
        set
    })
}

// ============================================================================
// Binarization Properties
// ============================================================================

/// Property: every voxel becomes foreground exactly when it reaches the threshold
#[test]
fn proptest_binarize_is_two_valued() {
    proptest!(|(volume in byte_volume(), threshold in 0i32..=256)| {
        let binary = binarize(&volume, threshold);
        prop_assert_eq!(binary.extent(), volume.extent());
        for (&v, &b) in volume.as_slice().iter().zip(binary.as_slice()) {
            let expected = if i32::from(v) >= threshold { FOREGROUND } else { BACKGROUND };
            prop_assert_eq!(b, expected);
        }
    });
}

// ============================================================================
// Volume Filter Properties
// ============================================================================

/// Property: retained labels are the multi-voxel labels inside the range
#[test]
fn proptest_filter_matches_counts() {
    proptest!(|(labels in label_volume(), min in 0.0f64..20.0, span in 0.0f64..40.0, cal in 0.1f64..2.0)| {
        let calibration = Calibration::new(cal, 1.0, 1.0);
        let max = min + span;
        let retained = VolumeFilter::new(min, max).filter(&labels, &calibration);

        for label in 1u32..6 {
            let count = labels.as_slice().iter().filter(|&&l| l == label).count();
            let volume = count as f64 * calibration.voxel_volume();
            let expected = count > 1 && volume >= min && volume <= max;
            prop_assert_eq!(retained.contains(label), expected, "label {}", label);
        }
    });
}

// ============================================================================
// Bounding Box Properties
// ============================================================================

/// Property: boxes equal the min/max coordinates of each label
#[test]
fn proptest_boxes_match_brute_force() {
    proptest!(|(labels in label_volume())| {
        let present: Vec<u32> = (1u32..6)
            .filter(|l| labels.as_slice().contains(l))
            .collect();
        let boxes = compute_boxes(&labels, &BoxSet::seeded(present.clone())).unwrap();
        prop_assert_eq!(boxes.len(), present.len());

        for &label in &present {
            let mut expected = CropBox::EMPTY;
            for z in 0..labels.depth() {
                for y in 0..labels.height() {
                    for x in 0..labels.width() {
                        if labels.get(x, y, z) == label {
                            expected.include(x as i32, y as i32, z as i32);
                        }
                    }
                }
            }
            prop_assert_eq!(boxes.get(label), Some(&expected));
        }
    });
}

// ============================================================================
// Merge Properties
// ============================================================================

/// Property: no pair left to merge, never more boxes, every input covered
#[test]
fn proptest_merge_fixpoint() {
    proptest!(|(set in box_set(), percent in 1u32..=100)| {
        let merged = merge(&set, percent, true);
        prop_assert!(merged.len() <= set.len());

        let boxes = merged.boxes();
        for i in 0..boxes.len() {
            for j in i + 1..boxes.len() {
                prop_assert!(!overlaps_enough(&boxes[i], &boxes[j], percent));
            }
        }

        for input in set.boxes() {
            prop_assert!(boxes.iter().any(|b| b.contains(input)));
        }

        let again = merge(&merged, percent, true);
        prop_assert_eq!(again.boxes(), merged.boxes());
    });
}

// ============================================================================
// Padding Properties
// ============================================================================

/// Property: the padded range stays in [1, size] and covers the tight range
#[test]
fn proptest_pad_axis_bounds() {
    proptest!(|(size in 4i32..200, a in 1i32..200, b in 1i32..200, margin in 0i32..60)| {
        let (lo, hi) = (a.min(b), a.max(b));
        prop_assume!(hi <= size - 2);

        let (min, max) = pad_axis(lo, hi, margin, size);
        prop_assert!(min >= 1 && min <= lo);
        prop_assert!(max >= hi && max <= size);
        prop_assert!(min < max || lo == hi);
    });
}

/// Property: a zero margin leaves an interior range untouched
#[test]
fn proptest_pad_axis_zero_margin() {
    proptest!(|(size in 4i32..200, a in 1i32..200, b in 1i32..200)| {
        let (lo, hi) = (a.min(b), a.max(b));
        prop_assume!(hi <= size - 2);
        prop_assert_eq!(pad_axis(lo, hi, 0, size), (lo, hi));
    });
}
