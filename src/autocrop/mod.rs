//! Autocrop module
//!
//! Nucleus detection and cropping for calibrated 3D stacks.
//!
//! # Features
//!
//! - **Threshold** ([`threshold`]) - Otsu on a smoothed working copy with a
//!   sub-stack fallback and a default floor
//! - **Labeling** ([`labeling`]) - 6/18/26-connected components, border removal
//! - **Filter** ([`filter`]) - physical volume range of the components
//! - **Boxes** ([`bbox`], [`padding`], [`merge`]) - tight boxes, margins and
//!   clamping, overlap merging
//! - **Output** ([`crop`], [`report`]) - per-channel crops and coordinates file
//! - **Pipeline** ([`pipeline`]) - all of the above for one image

pub mod bbox;
pub mod binarize;
pub mod crop;
pub mod filter;
pub mod labeling;
pub mod merge;
pub mod padding;
pub mod pipeline;
pub mod report;
pub mod threshold;
mod types;

// Re-export public API
pub use bbox::compute_boxes;
pub use binarize::{binarize, BACKGROUND, FOREGROUND};
pub use crop::{CropExtractor, CropFailure, CropRecord, CropReport, NUCLEI_DIR};
pub use filter::VolumeFilter;
pub use labeling::{remove_border_labels, ComponentLabeler, Connectivity, FloodFillLabeler};
pub use merge::{merge, merge_with_stats, overlaps_enough, MergeStats};
pub use padding::{pad, pad_all, pad_axis, Margins};
pub use pipeline::{image_prefix, Analysis, AutoCrop, ImageResult};
pub use report::{CoordinatesBlock, SummaryLine, COLUMN_HEADER, COORDINATES_DIR};
pub use threshold::{histogram, BilevelThreshold, Otsu, ThresholdEngine, ThresholdOutcome};
pub use types::{AutocropError, BoxSet, CropBox, Result};
