//! Progress tracking module for autocrop runs.
//!
//! Per-image stage callbacks plus the batch-level progress bar and summary.

use std::fmt;

use indicatif::{ProgressBar, ProgressStyle};

/// Processing stages of one image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessingStage {
    /// Initializing
    #[default]
    Initializing,
    /// Reading the image stack
    Loading,
    /// Smoothing and Otsu threshold selection
    Thresholding,
    /// Applying the threshold
    Binarizing,
    /// Connected components and border removal
    Labeling,
    /// Physical volume filter
    Filtering,
    /// Bounding-box accumulation
    BoundingBoxes,
    /// Margin padding and clamping
    Padding,
    /// Overlap merging
    Merging,
    /// Writing crops
    Cropping,
    /// Writing the coordinates file
    Reporting,
    /// Writing the z-projection overview
    Projecting,
    /// Completed
    Completed,
}

impl ProcessingStage {
    /// Get the name of the stage
    pub fn name(&self) -> &'static str {
        match self {
            ProcessingStage::Initializing => "Initializing",
            ProcessingStage::Loading => "Loading",
            ProcessingStage::Thresholding => "Thresholding",
            ProcessingStage::Binarizing => "Binarizing",
            ProcessingStage::Labeling => "Labeling",
            ProcessingStage::Filtering => "Filtering",
            ProcessingStage::BoundingBoxes => "BoundingBoxes",
            ProcessingStage::Padding => "Padding",
            ProcessingStage::Merging => "Merging",
            ProcessingStage::Cropping => "Cropping",
            ProcessingStage::Reporting => "Reporting",
            ProcessingStage::Projecting => "Projecting",
            ProcessingStage::Completed => "Completed",
        }
    }
}

impl fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// No output
    Quiet,
    /// Normal output (batch bar and summary)
    #[default]
    Normal,
    /// Verbose output (stage display)
    Verbose,
    /// Very verbose (debug messages)
    VeryVerbose,
}

impl OutputMode {
    /// Create OutputMode from verbosity level
    pub fn from_verbosity(level: u8) -> Self {
        match level {
            0 => OutputMode::Normal,
            1 => OutputMode::Verbose,
            _ => OutputMode::VeryVerbose,
        }
    }

    /// Check if output should be shown at this mode
    pub fn should_show(&self, required: OutputMode) -> bool {
        use OutputMode::*;
        match (self, required) {
            (Quiet, _) => false,
            (Normal, Quiet | Normal) => true,
            (Verbose, Quiet | Normal | Verbose) => true,
            (VeryVerbose, _) => true,
            _ => false,
        }
    }
}

// ============================================================
// Callbacks
// ============================================================

/// Stage notifications emitted while one image is processed
///
/// Implementations are shared across batch workers.
pub trait ProgressCallback: Send + Sync {
    fn on_stage_start(&self, _image: &str, _stage: ProcessingStage) {}

    fn on_stage_complete(&self, _image: &str, _stage: ProcessingStage, _message: &str) {}

    fn on_debug(&self, _message: &str) {}
}

/// Ignores every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {}

/// Forwards notifications to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressCallback for TracingProgress {
    fn on_stage_start(&self, image: &str, stage: ProcessingStage) {
        tracing::debug!(image, stage = stage.name(), "stage start");
    }

    fn on_stage_complete(&self, image: &str, stage: ProcessingStage, message: &str) {
        tracing::debug!(image, stage = stage.name(), message, "stage complete");
    }

    fn on_debug(&self, message: &str) {
        tracing::trace!("{}", message);
    }
}

// ============================================================
// Batch Progress
// ============================================================

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";

/// Progress bar over the images of a batch, hidden in quiet mode
pub fn batch_progress_bar(total: usize, mode: OutputMode) -> ProgressBar {
    if !mode.should_show(OutputMode::Normal) {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Counters printed at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub crops: usize,
}

impl RunSummary {
    /// Print final summary
    pub fn print(&self, elapsed_secs: f64) {
        println!();
        println!("{}", "=".repeat(80));
        println!("Autocrop Summary");
        println!("{}", "=".repeat(80));
        println!("  Total images: {}", self.total);
        println!("  Succeeded:    {}", self.succeeded);
        println!("  Skipped:      {}", self.skipped);
        println!("  Errors:       {}", self.failed);
        if self.cancelled > 0 {
            println!("  Cancelled:    {}", self.cancelled);
        }
        println!("  Crops:        {}", self.crops);
        println!("  Total time:   {:.2}s", elapsed_secs);
        println!("{}", "=".repeat(80));
        println!();
    }
}
