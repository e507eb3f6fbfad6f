//! nucleus-autocrop - Nucleus detection and cropping for 3D microscopy stacks
//!
//! # Features
//!
//! - Otsu thresholding with a sub-stack fallback and a default floor
//! - 3D connected components, border removal and physical volume filtering
//! - Padded, clamped and merged bounding boxes, one per nucleus
//! - One crop per nucleus and channel, a coordinates file per image and a
//!   run summary
//! - Annotated z-projection overview
//! - Parallel batches with cooperative cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use nucleus_autocrop::{AutoCrop, AutocropParameters, NoopProgress};
//!
//! let params = AutocropParameters::builder().margins(20, 20, 10).build();
//! let pipeline = AutoCrop::new(params);
//! let result = pipeline
//!     .process(Path::new("stack.tif"), Path::new("out"), &NoopProgress)
//!     .unwrap();
//! println!("{}", result.summary_line());
//! ```

pub mod annotate;
pub mod autocrop;
pub mod batch;
pub mod cli;
pub mod config;
pub mod logging;
pub mod progress;
pub mod volume;

// Re-export public API
pub use annotate::{write_projection, AnnotateError, ZPROJECTION_DIR};
pub use autocrop::{
    AutoCrop, AutocropError, BoxSet, CoordinatesBlock, CropBox, CropReport, ImageResult,
    SummaryLine, ThresholdOutcome,
};
pub use batch::{
    collect_image_files, BatchError, BatchReport, BatchRunner, ImageOutcome, SUMMARY_FILE,
};
pub use cli::{AutocropArgs, Cli, Commands, ConfigExampleArgs, CropFromCoordinatesArgs};
pub use config::{example_config, AutocropParameters, CliOverrides, ConfigError};
pub use progress::{
    NoopProgress, OutputMode, ProcessingStage, ProgressCallback, RunSummary, TracingProgress,
};
pub use volume::{Calibration, ImageStack, Volume, VolumeError};

/// Process exit codes
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const INVALID_ARGS: i32 = 2;
    pub const INPUT_NOT_FOUND: i32 = 3;
    pub const CONFIG_ERROR: i32 = 4;
}
