//! Box merger
//!
//! Iteratively replaces overlapping pairs of padded boxes by their union
//! until a full scan finds nothing left to merge.
//!
//! # Algorithm
//!
//! Pairs are scanned in ascending label order. A pair merges when its
//! intersection is non-empty and covers at least `percent`% of the smaller
//! box's volume. The union is stored under the lower label, the higher label
//! disappears, and the scan restarts from the first pair. Every merge removes
//! one box, so the loop ends after at most `n - 1` merges.
//!
//! Merging mutates the shared set and always runs on the calling thread.

use super::types::{BoxSet, CropBox};

/// Counters of one merge run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeStats {
    /// Scans started, including the final one that found nothing
    pub passes: usize,
    /// Pairs replaced by their union
    pub merges: usize,
}

/// Whether `a` and `b` overlap by at least `percent`% of the smaller volume
pub fn overlaps_enough(a: &CropBox, b: &CropBox, percent: u32) -> bool {
    let intersection = a.intersection_volume(b);
    if intersection <= 0 {
        return false;
    }
    let smaller = a.volume().min(b.volume());
    intersection * 100 >= i64::from(percent) * smaller
}

/// Merge overlapping boxes; returns the input unchanged when disabled
pub fn merge(boxes: &BoxSet, percent: u32, enabled: bool) -> BoxSet {
    merge_with_stats(boxes, percent, enabled).0
}

/// [`merge`] plus pass and merge counters
pub fn merge_with_stats(boxes: &BoxSet, percent: u32, enabled: bool) -> (BoxSet, MergeStats) {
    let mut set = boxes.clone();
    let mut stats = MergeStats::default();
    if !enabled {
        return (set, stats);
    }

    'scan: loop {
        stats.passes += 1;
        let labels = set.labels().to_vec();
        let current = set.boxes().to_vec();

        for i in 0..current.len() {
            for j in i + 1..current.len() {
                if !overlaps_enough(&current[i], &current[j], percent) {
                    continue;
                }

                let union = current[i].union(&current[j]);
                tracing::trace!(
                    kept = labels[i],
                    absorbed = labels[j],
                    union = %union,
                    "merging boxes"
                );
                set.remove(labels[j]);
                set.insert(labels[i], union);
                stats.merges += 1;
                continue 'scan;
            }
        }

        break;
    }

    tracing::debug!(
        before = boxes.len(),
        after = set.len(),
        passes = stats.passes,
        "box merge"
    );
    (set, stats)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(origin: i32, size: i32) -> CropBox {
        CropBox::new(
            origin,
            origin + size,
            origin,
            origin + size,
            origin,
            origin + size,
        )
    }

    fn set_of(boxes: &[(u32, CropBox)]) -> BoxSet {
        let mut set = BoxSet::new();
        for &(label, b) in boxes {
            set.insert(label, b);
        }
        set
    }

    #[test]
    fn test_overlap_relative_to_smaller_box() {
        let big = CropBox::new(0, 10, 0, 10, 0, 10);
        // 10 voxels, 6 of them inside `big`
        let small = CropBox::new(4, 14, 0, 1, 0, 1);
        assert!(overlaps_enough(&big, &small, 50));
        assert!(overlaps_enough(&big, &small, 60));
        assert!(!overlaps_enough(&big, &small, 70));
    }

    #[test]
    fn test_disjoint_never_merges() {
        let a = cube(0, 4);
        let b = cube(10, 4);
        assert!(!overlaps_enough(&a, &b, 0));
    }

    #[test]
    fn test_merge_disabled_is_noop() {
        let set = set_of(&[(1, cube(0, 10)), (2, cube(1, 10))]);
        let (out, stats) = merge_with_stats(&set, 50, false);
        assert_eq!(out, set);
        assert_eq!(stats.passes, 0);
    }

    #[test]
    fn test_union_stored_under_lower_label() {
        let set = set_of(&[(7, cube(1, 10)), (3, cube(0, 10))]);
        let out = merge(&set, 50, true);
        assert_eq!(out.labels(), &[3]);
        assert_eq!(out.get(3), Some(&CropBox::new(0, 11, 0, 11, 0, 11)));
    }

    #[test]
    fn test_chain_merges_after_restart() {
        // 1 and 2 overlap; their union then swallows 3
        let set = set_of(&[
            (1, CropBox::new(0, 10, 0, 10, 0, 10)),
            (2, CropBox::new(5, 15, 0, 10, 0, 10)),
            (3, CropBox::new(12, 22, 0, 10, 0, 10)),
        ]);
        let (out, stats) = merge_with_stats(&set, 20, true);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get(1), Some(&CropBox::new(0, 22, 0, 10, 0, 10)));
        assert_eq!(stats.merges, 2);
        assert_eq!(stats.passes, 3);
    }

    #[test]
    fn test_merge_reaches_fixpoint() {
        let set = set_of(&[
            (1, cube(0, 8)),
            (2, cube(6, 8)),
            (4, cube(30, 5)),
            (5, cube(31, 5)),
            (9, cube(60, 3)),
        ]);
        let once = merge(&set, 10, true);
        let twice = merge(&once, 10, true);
        assert_eq!(once, twice);
        assert!(once.len() <= set.len());
    }

    #[test]
    fn test_union_contains_inputs() {
        let a = cube(0, 6);
        let b = cube(3, 6);
        let out = merge(&set_of(&[(1, a), (2, b)]), 1, true);
        let merged = out.get(1).unwrap();
        assert!(merged.contains(&a));
        assert!(merged.contains(&b));
    }
}
