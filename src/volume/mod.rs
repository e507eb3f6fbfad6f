//! Volume module
//!
//! 3D rasters and the collaborators around them:
//!
//! # Features
//!
//! - **Types** ([`types`]) - `Volume<T>`, `LabelVolume`, crop regions, multi-channel stacks
//! - **Calibration** ([`calibration`]) - physical voxel size and its resolution
//! - **Operations** ([`ops`]) - 8-bit working copy, 3D Gaussian blur, z-projection
//! - **TIFF I/O** ([`tiff_io`]) - multi-page stack reader/writer behind
//!   the `VolumeSource` / `VolumeSink` traits

pub mod calibration;
pub mod ops;
pub mod tiff_io;
mod types;

// Re-export public API
pub use calibration::{Calibration, CalibrationResolver, CalibrationSource};
pub use ops::{gaussian_blur_3d, max_projection, to_8bit, THRESHOLD_BLUR_SIGMA};
pub use tiff_io::{HyperstackInfo, TiffStackReader, TiffStackWriter, VolumeSink, VolumeSource};
pub use types::{Extent, ImageStack, LabelVolume, Region, Result, Volume, VolumeError};
