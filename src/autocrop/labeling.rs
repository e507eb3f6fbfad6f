//! Component labeler
//!
//! 3D connected-component labeling of a binary volume and removal of the
//! components that touch the volume faces.
//!
//! Labels are assigned 1, 2, 3, ... in scan order (z outer, then y, then x);
//! 0 stays background.

use std::collections::VecDeque;

use crate::volume::{LabelVolume, Volume};

// ============================================================
// Connectivity
// ============================================================

/// Neighborhood used to join foreground voxels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    /// Face neighbors only
    Six,
    /// Face and edge neighbors
    Eighteen,
    /// Face, edge and corner neighbors
    #[default]
    TwentySix,
}

impl Connectivity {
    /// Neighbor offsets (dx, dy, dz), excluding the center
    pub fn offsets(&self) -> Vec<(i64, i64, i64)> {
        let mut offsets = Vec::with_capacity(26);
        for dz in -1i64..=1 {
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let manhattan = dx.abs() + dy.abs() + dz.abs();
                    let keep = match self {
                        Connectivity::Six => manhattan == 1,
                        Connectivity::Eighteen => manhattan == 1 || manhattan == 2,
                        Connectivity::TwentySix => manhattan > 0,
                    };
                    if keep {
                        offsets.push((dx, dy, dz));
                    }
                }
            }
        }
        offsets
    }

    pub fn value(&self) -> u8 {
        match self {
            Connectivity::Six => 6,
            Connectivity::Eighteen => 18,
            Connectivity::TwentySix => 26,
        }
    }
}

impl TryFrom<u8> for Connectivity {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            6 => Ok(Connectivity::Six),
            18 => Ok(Connectivity::Eighteen),
            26 => Ok(Connectivity::TwentySix),
            other => Err(other),
        }
    }
}

// ============================================================
// Labeler
// ============================================================

/// Connected-component labeling of binary volumes
pub trait ComponentLabeler: Send + Sync {
    /// Label every non-zero voxel; returns the label volume and label count
    fn label(&self, binary: &Volume<u8>, connectivity: Connectivity) -> (LabelVolume, u32);
}

/// Breadth-first flood fill labeler
#[derive(Debug, Clone, Copy, Default)]
pub struct FloodFillLabeler;

impl FloodFillLabeler {
    /// Flood one component from a seed voxel
    fn flood_fill(
        binary: &Volume<u8>,
        labels: &mut LabelVolume,
        seed: (usize, usize, usize),
        label: u32,
        offsets: &[(i64, i64, i64)],
    ) {
        let extent = binary.extent();
        let (w, h, d) = (
            extent.width as i64,
            extent.height as i64,
            extent.depth as i64,
        );

        let mut queue = VecDeque::new();
        labels.set(seed.0, seed.1, seed.2, label);
        queue.push_back(seed);

        while let Some((x, y, z)) = queue.pop_front() {
            for &(dx, dy, dz) in offsets {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                let nz = z as i64 + dz;
                if nx < 0 || ny < 0 || nz < 0 || nx >= w || ny >= h || nz >= d {
                    continue;
                }

                let (nx, ny, nz) = (nx as usize, ny as usize, nz as usize);
                if binary.get(nx, ny, nz) != 0 && labels.get(nx, ny, nz) == 0 {
                    labels.set(nx, ny, nz, label);
                    queue.push_back((nx, ny, nz));
                }
            }
        }
    }
}

impl ComponentLabeler for FloodFillLabeler {
    fn label(&self, binary: &Volume<u8>, connectivity: Connectivity) -> (LabelVolume, u32) {
        let extent = binary.extent();
        let mut labels = LabelVolume::new(extent.width, extent.height, extent.depth);
        let offsets = connectivity.offsets();
        let mut next_label = 0u32;

        for z in 0..extent.depth {
            for y in 0..extent.height {
                for x in 0..extent.width {
                    if binary.get(x, y, z) != 0 && labels.get(x, y, z) == 0 {
                        next_label += 1;
                        Self::flood_fill(binary, &mut labels, (x, y, z), next_label, &offsets);
                    }
                }
            }
        }

        (labels, next_label)
    }
}

/// Zero every label that touches one of the six faces, in place
///
/// Returns the number of labels removed.
pub fn remove_border_labels(labels: &mut LabelVolume) -> usize {
    let extent = labels.extent();
    let max_label = labels.as_slice().iter().copied().max().unwrap_or(0) as usize;
    let mut on_border = vec![false; max_label + 1];

    for z in 0..extent.depth {
        for y in 0..extent.height {
            for x in 0..extent.width {
                if extent.on_border(x, y, z) {
                    on_border[labels.get(x, y, z) as usize] = true;
                }
            }
        }
    }
    on_border[0] = false;

    for v in labels.as_mut_slice() {
        if on_border[*v as usize] {
            *v = 0;
        }
    }

    on_border.iter().filter(|&&b| b).count()
}

// ============================================================
// Tests
// ============================================================
