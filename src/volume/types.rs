//! Volume module core types
//!
//! Dense 3D rasters, crop regions and multi-channel image stacks.

use std::path::PathBuf;
use thiserror::Error;

use super::calibration::Calibration;

// ============================================================
// Error Types
// ============================================================

/// Volume error types
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Region out of bounds: {0}")]
    RegionOutOfBounds(String),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VolumeError>;

// ============================================================
// Extent / Region
// ============================================================

/// Voxel dimensions of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Extent {
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Number of voxels in one z-slice
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    /// Total number of voxels
    pub fn voxel_count(&self) -> usize {
        self.plane_len() * self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_count() == 0
    }

    /// Linear index of voxel (x, y, z); x varies fastest
    #[inline]
    pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.height + y) * self.width + x
    }

    /// Whether (x, y, z) lies on one of the six faces
    ///
    /// A single-slice extent is a plane: only its four edges count.
    #[inline]
    pub fn on_border(&self, x: usize, y: usize, z: usize) -> bool {
        let edge = x == 0 || y == 0 || x + 1 == self.width || y + 1 == self.height;
        edge || (self.depth > 1 && (z == 0 || z + 1 == self.depth))
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.depth)
    }
}

/// Axis-aligned sub-volume, origin plus size in voxels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, z: usize, width: usize, height: usize, depth: usize) -> Self {
        Self {
            x,
            y,
            z,
            width,
            height,
            depth,
        }
    }
}

// ============================================================
// Volume
// ============================================================

/// Dense 3D raster stored slice by slice (x fastest, then y, then z)
#[derive(Debug, Clone, PartialEq)]
pub struct Volume<T> {
    extent: Extent,
    data: Vec<T>,
}

/// Connected-component labels; 0 is background
pub type LabelVolume = Volume<u32>;

impl<T: Copy + Default> Volume<T> {
    /// Create a volume filled with `T::default()`
    pub fn new(width: usize, height: usize, depth: usize) -> Self {
        Self::filled(Extent::new(width, height, depth), T::default())
    }

    /// Create a volume with every voxel set to `value`
    pub fn filled(extent: Extent, value: T) -> Self {
        Self {
            extent,
            data: vec![value; extent.voxel_count()],
        }
    }

    /// Wrap an existing buffer
    pub fn from_vec(width: usize, height: usize, depth: usize, data: Vec<T>) -> Result<Self> {
        let extent = Extent::new(width, height, depth);
        if data.len() != extent.voxel_count() {
            return Err(VolumeError::InvalidImage(format!(
                "buffer of {} samples does not match {}",
                data.len(),
                extent
            )));
        }
        Ok(Self { extent, data })
    }

    /// Stack equally sized planes along z
    pub fn from_slices(width: usize, height: usize, slices: Vec<Vec<T>>) -> Result<Self> {
        let depth = slices.len();
        let mut data = Vec::with_capacity(width * height * depth);
        for (z, plane) in slices.into_iter().enumerate() {
            if plane.len() != width * height {
                return Err(VolumeError::InvalidImage(format!(
                    "slice {} has {} samples, expected {}",
                    z,
                    plane.len(),
                    width * height
                )));
            }
            data.extend(plane);
        }
        Self::from_vec(width, height, depth, data)
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn width(&self) -> usize {
        self.extent.width
    }

    pub fn height(&self) -> usize {
        self.extent.height
    }

    pub fn depth(&self) -> usize {
        self.extent.depth
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.extent.index(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let idx = self.extent.index(x, y, z);
        self.data[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Iterate z-slices in order
    pub fn slices(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.extent.plane_len().max(1))
    }

    /// Apply `f` to every voxel
    pub fn map<U: Copy + Default>(&self, f: impl Fn(T) -> U) -> Volume<U> {
        Volume {
            extent: self.extent,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Copy slices `[start, end)` into a new volume
    pub fn substack(&self, start: usize, end: usize) -> Result<Self> {
        if start >= end || end > self.extent.depth {
            return Err(VolumeError::RegionOutOfBounds(format!(
                "slices {}..{} of a stack with depth {}",
                start, end, self.extent.depth
            )));
        }
        let len = self.extent.plane_len();
        Ok(Self {
            extent: Extent::new(self.extent.width, self.extent.height, end - start),
            data: self.data[start * len..end * len].to_vec(),
        })
    }

    /// Copy the voxels of `region` into a new volume
    pub fn crop(&self, region: &Region) -> Result<Self> {
        let fits = region.width > 0
            && region.height > 0
            && region.depth > 0
            && region.x + region.width <= self.extent.width
            && region.y + region.height <= self.extent.height
            && region.z + region.depth <= self.extent.depth;
        if !fits {
            return Err(VolumeError::RegionOutOfBounds(format!(
                "{:?} outside {}",
                region, self.extent
            )));
        }

        let mut data = Vec::with_capacity(region.width * region.height * region.depth);
        for z in region.z..region.z + region.depth {
            for y in region.y..region.y + region.height {
                let start = self.extent.index(region.x, y, z);
                data.extend_from_slice(&self.data[start..start + region.width]);
            }
        }

        Ok(Self {
            extent: Extent::new(region.width, region.height, region.depth),
            data,
        })
    }
}

// ============================================================
// Image Stack
// ============================================================

/// Multi-channel stack as loaded from disk
#[derive(Debug, Clone)]
pub struct ImageStack {
    /// One same-shaped raster per channel
    pub channels: Vec<Volume<u16>>,

    /// Bits per sample of the source (8 or 16)
    pub bit_depth: u8,

    /// Voxel size found in the file metadata, if any
    pub calibration: Option<Calibration>,
}

impl ImageStack {
    /// Create a stack, checking that every channel has the same extent
    pub fn new(channels: Vec<Volume<u16>>, bit_depth: u8) -> Result<Self> {
        if let Some(first) = channels.first() {
            let extent = first.extent();
            if let Some((idx, bad)) = channels
                .iter()
                .enumerate()
                .find(|(_, c)| c.extent() != extent)
            {
                return Err(VolumeError::InvalidImage(format!(
                    "channel {} is {} but channel 0 is {}",
                    idx,
                    bad.extent(),
                    extent
                )));
            }
        }
        Ok(Self {
            channels,
            bit_depth,
            calibration: None,
        })
    }

    /// Single-channel stack
    pub fn single(volume: Volume<u16>, bit_depth: u8) -> Self {
        Self {
            channels: vec![volume],
            bit_depth,
            calibration: None,
        }
    }

    #[must_use]
    pub fn with_calibration(mut self, calibration: Calibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn channel(&self, index: usize) -> Option<&Volume<u16>> {
        self.channels.get(index)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn extent(&self) -> Extent {
        self.channels
            .first()
            .map(Volume::extent)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(Volume::is_empty)
    }
}

// ============================================================
// Tests
// ============================================================
