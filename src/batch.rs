//! Batch runner
//!
//! Processes many images with one [`AutoCrop`] on a rayon pool, one image
//! per task. Images never share mutable state; results come back in input
//! order. A shared flag stops the batch between images.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use thiserror::Error;

use crate::autocrop::{AutoCrop, AutocropError, ImageResult};
use crate::config::AutocropParameters;
use crate::progress::{batch_progress_bar, OutputMode, ProgressCallback, RunSummary};

/// Run-level summary file written at the output root
pub const SUMMARY_FILE: &str = "result_Autocrop_Analyse.csv";

/// Column header of the summary file
pub const SUMMARY_COLUMNS: &str = "FileName\tNumberOfCrop\tOTSUThreshold\tDefaultOTSUThreshold";

/// Extension never treated as an image (coordinates, notes)
const SKIPPED_EXTENSION: &str = "txt";

// ============================================================
// Error Types
// ============================================================

/// Batch error types
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;

// ============================================================
// Types
// ============================================================

/// What happened to one image
#[derive(Debug, Clone)]
pub enum ImageOutcome {
    Done(Box<ImageResult>),
    /// Degenerate input, nothing written
    Skipped(String),
    Failed(String),
    Cancelled,
}

/// One image of a batch with its outcome
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub image: PathBuf,
    pub outcome: ImageOutcome,
}

/// Outcome of a whole batch, in input order
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub summary_path: Option<PathBuf>,
    pub elapsed_seconds: f64,
}

impl BatchReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.entries.len(),
            ..RunSummary::default()
        };
        for entry in &self.entries {
            match &entry.outcome {
                ImageOutcome::Done(result) => {
                    summary.succeeded += 1;
                    summary.crops += result.crops.written();
                }
                ImageOutcome::Skipped(_) => summary.skipped += 1,
                ImageOutcome::Failed(_) => summary.failed += 1,
                ImageOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn results(&self) -> impl Iterator<Item = &ImageResult> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            ImageOutcome::Done(result) => Some(result.as_ref()),
            _ => None,
        })
    }
}

// ============================================================
// Batch Runner
// ============================================================

/// Runs an [`AutoCrop`] over a list of images
pub struct BatchRunner {
    pipeline: AutoCrop,
    threads: usize,
    cancel: Arc<AtomicBool>,
    output_mode: OutputMode,
}

impl BatchRunner {
    /// Pool size from the pipeline parameters, else every core
    pub fn new(pipeline: AutoCrop) -> Self {
        let threads = pipeline.params().threads.unwrap_or_else(num_cpus::get).max(1);
        Self {
            pipeline,
            threads,
            cancel: Arc::new(AtomicBool::new(false)),
            output_mode: OutputMode::Quiet,
        }
    }

    #[must_use]
    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Flag that stops the batch before the next image when set
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn pipeline(&self) -> &AutoCrop {
        &self.pipeline
    }

    /// Process `images` and write the run summary under `output_dir`
    pub fn run(
        &self,
        images: &[PathBuf],
        input: &Path,
        output_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<BatchReport> {
        let start = Instant::now();
        let started_at = chrono::Local::now();
        std::fs::create_dir_all(output_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| BatchError::ThreadPool(e.to_string()))?;

        tracing::info!(
            images = images.len(),
            threads = self.threads,
            output = %output_dir.display(),
            "starting autocrop batch"
        );

        let pb = batch_progress_bar(images.len(), self.output_mode);
        let entries: Vec<BatchEntry> = pool.install(|| {
            images
                .par_iter()
                .map(|image| {
                    let outcome = self.run_one(image, output_dir, progress);
                    pb.inc(1);
                    BatchEntry {
                        image: image.clone(),
                        outcome,
                    }
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut report = BatchReport {
            entries,
            summary_path: None,
            elapsed_seconds: 0.0,
        };

        let summary_path = output_dir.join(SUMMARY_FILE);
        let text = render_summary_file(
            self.pipeline.params(),
            &started_at.format("%Y-%m-%d:%H-%M-%S").to_string(),
            input,
            output_dir,
            &report,
        );
        match std::fs::write(&summary_path, text) {
            Ok(()) => report.summary_path = Some(summary_path),
            Err(e) => tracing::warn!(
                path = %summary_path.display(),
                error = %e,
                "failed to write run summary"
            ),
        }

        report.elapsed_seconds = start.elapsed().as_secs_f64();
        Ok(report)
    }

    fn run_one(
        &self,
        image: &Path,
        output_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> ImageOutcome {
        if self.cancel.load(Ordering::SeqCst) {
            tracing::debug!(image = %image.display(), "cancelled");
            return ImageOutcome::Cancelled;
        }

        match self.pipeline.process(image, output_dir, progress) {
            Ok(result) => ImageOutcome::Done(Box::new(result)),
            Err(AutocropError::EmptyVolume) => {
                tracing::warn!(image = %image.display(), "empty volume, skipping");
                ImageOutcome::Skipped("empty volume".to_string())
            }
            Err(e) => {
                tracing::error!(image = %image.display(), error = %e, "image failed");
                ImageOutcome::Failed(e.to_string())
            }
        }
    }
}

// ============================================================
// Summary File
// ============================================================

/// Header block, column header and one line per processed image
pub fn render_summary_file(
    params: &AutocropParameters,
    started_at: &str,
    input: &Path,
    output_dir: &Path,
    report: &BatchReport,
) -> String {
    let calibration = match params.manual_calibration() {
        Some(cal) => cal.to_string(),
        None => "x:default-y:default-z:default".to_string(),
    };

    let mut out = String::new();
    out.push_str("#Header\n");
    out.push_str(&format!("#Star time analyse: {}\n", started_at));
    out.push_str(&format!("#Input folder: {}\n", input.display()));
    out.push_str(&format!("#Output folder: {}\n", output_dir.display()));
    out.push_str(&format!("#Calibration:{}\n", calibration));
    for (key, value) in parameter_lines(params) {
        out.push_str(&format!("#{}:{}\n", key, value));
    }
    out.push_str(SUMMARY_COLUMNS);
    out.push('\n');
    for result in report.results() {
        out.push_str(&result.summary_line().to_string());
        out.push('\n');
    }
    out
}

fn parameter_lines(p: &AutocropParameters) -> Vec<(&'static str, String)> {
    vec![
        ("xCropBoxSize", p.x_crop_box_size.to_string()),
        ("yCropBoxSize", p.y_crop_box_size.to_string()),
        ("zCropBoxSize", p.z_crop_box_size.to_string()),
        ("minVolumeNucleus", p.min_volume_nucleus.to_string()),
        ("maxVolumeNucleus", p.max_volume_nucleus.to_string()),
        ("thresholdOTSUComputing", p.threshold_otsu_computing.to_string()),
        ("channelToComputeThreshold", p.channel_to_compute_threshold.to_string()),
        ("slicesOTSUComputing", p.slices_otsu_computing.to_string()),
        ("boxesPercentSurfaceToFilter", p.boxes_percent_surface_to_filter.to_string()),
        ("boxesRegroupement", p.boxes_regroupement.to_string()),
        ("connectivity", p.connectivity.to_string()),
    ]
}

// ============================================================
// Input Traversal
// ============================================================

/// Images under `input`: the file itself, or every file of the directory
/// tree except `.txt` files, sorted
pub fn collect_image_files(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        return Err(BatchError::InputNotFound(input.to_path_buf()));
    }

    let mut files = Vec::new();
    let walker = walkdir::WalkDir::new(input)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if entry.file_type().is_file()
            && !path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(SKIPPED_EXTENSION))
        {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use crate::volume::{
        Calibration, Extent, ImageStack, Volume, VolumeError, VolumeSink, VolumeSource,
    };
    use tempfile::tempdir;

    struct NamedSource;

    impl VolumeSource for NamedSource {
        fn open(&self, path: &Path) -> crate::volume::Result<ImageStack> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with("broken") {
                return Err(VolumeError::InvalidImage("truncated".to_string()));
            }
            if name.starts_with("empty") {
                return Ok(ImageStack::single(Volume::new(0, 0, 0), 8));
            }
            let mut vol = Volume::filled(Extent::new(20, 20, 8), 5u16);
            for z in 3..6 {
                for y in 6..10 {
                    for x in 6..10 {
                        vol.set(x, y, z, 220);
                    }
                }
            }
            Ok(ImageStack::single(vol, 8))
        }
    }

    struct NullSink;

    impl VolumeSink for NullSink {
        fn write(
            &self,
            _volume: &Volume<u16>,
            _bit_depth: u8,
            _calibration: Option<Calibration>,
            _path: &Path,
        ) -> crate::volume::Result<()> {
            Ok(())
        }
    }

    fn runner() -> BatchRunner {
        let params = AutocropParameters::builder()
            .margins(2, 2, 1)
            .z_projection(false)
            .threads(2)
            .build();
        let pipeline = AutoCrop::new(params)
            .with_source(Arc::new(NamedSource))
            .with_sink(Arc::new(NullSink));
        BatchRunner::new(pipeline)
    }

    fn images(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(|n| PathBuf::from(format!("/in/{}", n))).collect()
    }

    #[test]
    fn test_outcomes_in_input_order() {
        let dir = tempdir().unwrap();
        let list = images(&["a.tif", "broken.tif", "b.tif", "empty.tif"]);
        let report = runner()
            .run(&list, Path::new("/in"), dir.path(), &NoopProgress)
            .unwrap();

        let order: Vec<&Path> = report.entries.iter().map(|e| e.image.as_path()).collect();
        assert_eq!(order, list.iter().map(PathBuf::as_path).collect::<Vec<_>>());
        assert!(matches!(report.entries[0].outcome, ImageOutcome::Done(_)));
        assert!(matches!(report.entries[1].outcome, ImageOutcome::Failed(_)));
        assert!(matches!(report.entries[2].outcome, ImageOutcome::Done(_)));
        assert!(matches!(report.entries[3].outcome, ImageOutcome::Skipped(_)));

        let summary = report.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.crops, 2);
    }

    #[test]
    fn test_summary_file() {
        let dir = tempdir().unwrap();
        let report = runner()
            .run(&images(&["a.tif", "b.tif"]), Path::new("/in"), dir.path(), &NoopProgress)
            .unwrap();

        let path = report.summary_path.clone().unwrap();
        assert_eq!(path, dir.path().join(SUMMARY_FILE));
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#Header");
        assert!(lines[1].starts_with("#Star time analyse: "));
        assert_eq!(lines[2], "#Input folder: /in");
        assert_eq!(lines[4], "#Calibration:x:default-y:default-z:default");
        assert!(lines.contains(&SUMMARY_COLUMNS));
        assert!(lines.iter().any(|l| l.starts_with("/in/a.tif\t1\t")));
        assert!(lines.last().unwrap().starts_with("/in/b.tif\t1\t"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let runner = runner();
        runner.cancel_flag().store(true, Ordering::SeqCst);
        let report = runner
            .run(&images(&["a.tif", "b.tif"]), Path::new("/in"), dir.path(), &NoopProgress)
            .unwrap();
        assert_eq!(report.summary().cancelled, 2);
        assert_eq!(report.results().count(), 0);
    }

    /// Sets a shared flag while opening its first image, like Ctrl-C mid-run
    struct InterruptingSource {
        flag: Arc<AtomicBool>,
    }

    impl VolumeSource for InterruptingSource {
        fn open(&self, path: &Path) -> crate::volume::Result<ImageStack> {
            self.flag.store(true, Ordering::SeqCst);
            NamedSource.open(path)
        }
    }

    #[test]
    fn test_cancel_mid_run_keeps_finished_images() {
        let dir = tempdir().unwrap();
        let params = AutocropParameters::builder()
            .margins(2, 2, 1)
            .z_projection(false)
            .threads(1)
            .build();
        let flag = Arc::new(AtomicBool::new(false));
        let pipeline = AutoCrop::new(params)
            .with_source(Arc::new(InterruptingSource {
                flag: Arc::clone(&flag),
            }))
            .with_sink(Arc::new(NullSink));
        let mut runner = BatchRunner::new(pipeline);
        runner.cancel = Arc::clone(&flag);

        let list = images(&["a.tif", "b.tif", "c.tif"]);
        let report = runner
            .run(&list, Path::new("/in"), dir.path(), &NoopProgress)
            .unwrap();

        let summary = report.summary();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.cancelled, 2);

        let text = std::fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("/in/")).count(), 1);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let runner = runner();
        let flag = runner.cancel_flag();
        assert!(!flag.load(Ordering::SeqCst));
        runner.cancel();
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_collect_walks_every_level() {
        let dir = tempdir().unwrap();
        let deep = dir.path().join("plate2").join("well3");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("c.tif"), b"").unwrap();
        std::fs::write(deep.join("README.TXT"), b"").unwrap();
        std::fs::write(dir.path().join("plate2").join("a.tif"), b"").unwrap();

        let files = collect_image_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![dir.path().join("plate2").join("a.tif"), deep.join("c.tif")]
        );
    }

    #[test]
    fn test_collect_image_files() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("plate1");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.tif"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(nested.join("a.tif"), b"").unwrap();

        let files = collect_image_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("b.tif"), nested.join("a.tif")]);

        let single = collect_image_files(&nested.join("a.tif")).unwrap();
        assert_eq!(single.len(), 1);

        assert!(matches!(
            collect_image_files(Path::new("/no/such/dir")),
            Err(BatchError::InputNotFound(_))
        ));
    }
}
