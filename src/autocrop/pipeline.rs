//! Autocrop pipeline
//!
//! Runs one image through every stage:
//!
//! 1. Resolve the calibration (manual override, else image metadata)
//! 2. 8-bit working copy of the threshold channel, smoothed
//! 3. Otsu threshold with fallback, then binarization of the smoothed copy
//! 4. Labeling, border removal, volume filter
//! 5. Tight boxes, padding, merging
//! 6. Crops of every channel, coordinates file, z-projection overview
//!
//! Images are independent: an [`AutoCrop`] only holds read-only parameters
//! and collaborators, so one instance can serve every batch worker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::annotate;
use crate::config::AutocropParameters;
use crate::progress::{NoopProgress, ProcessingStage, ProgressCallback};
use crate::volume::{
    to_8bit, Calibration, CalibrationResolver, CalibrationSource, ImageStack,
    TiffStackReader, TiffStackWriter, Volume, VolumeSink, VolumeSource,
};

use super::bbox::compute_boxes;
use super::binarize::binarize;
use super::crop::{CropExtractor, CropReport};
use super::filter::VolumeFilter;
use super::labeling::{remove_border_labels, ComponentLabeler, FloodFillLabeler};
use super::merge::merge_with_stats;
use super::padding::pad_all;
use super::report::{CoordinatesBlock, SummaryLine};
use super::threshold::{ThresholdEngine, ThresholdOutcome};
use super::types::{AutocropError, BoxSet, Result};

// ============================================================
// Results
// ============================================================

/// Detection outcome of one image, before anything is written
#[derive(Debug, Clone)]
pub struct Analysis {
    pub calibration: Calibration,
    pub calibration_source: CalibrationSource,
    pub threshold: ThresholdOutcome,
    /// Final boxes: padded and merged
    pub boxes: BoxSet,
}

/// Everything produced for one image
#[derive(Debug, Clone)]
pub struct ImageResult {
    pub image: PathBuf,
    pub prefix: String,
    pub analysis: Analysis,
    pub crops: CropReport,
    pub coordinates_path: Option<PathBuf>,
    pub projection_path: Option<PathBuf>,
    pub elapsed_seconds: f64,
}

impl ImageResult {
    pub fn nuclei_count(&self) -> usize {
        self.analysis.boxes.len()
    }

    pub fn summary_line(&self) -> SummaryLine {
        SummaryLine {
            image: self.image.clone(),
            nuclei_count: self.nuclei_count(),
            threshold: self.analysis.threshold.threshold,
            used_default: self.analysis.threshold.used_default,
        }
    }
}

/// Output prefix of an image: its file name up to the first `.`
pub fn image_prefix(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

// ============================================================
// Pipeline
// ============================================================

/// Autocrop pipeline over one image at a time
pub struct AutoCrop {
    params: AutocropParameters,
    resolver: CalibrationResolver,
    source: Arc<dyn VolumeSource>,
    sink: Arc<dyn VolumeSink>,
    labeler: Arc<dyn ComponentLabeler>,
}

impl AutoCrop {
    /// Pipeline reading and writing TIFF stacks
    pub fn new(params: AutocropParameters) -> Self {
        let resolver = CalibrationResolver::new(params.manual_calibration());
        Self {
            params,
            resolver,
            source: Arc::new(TiffStackReader),
            sink: Arc::new(TiffStackWriter),
            labeler: Arc::new(FloodFillLabeler),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn VolumeSource>) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn VolumeSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_labeler(mut self, labeler: Arc<dyn ComponentLabeler>) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn params(&self) -> &AutocropParameters {
        &self.params
    }

    pub fn threshold_engine(&self) -> ThresholdEngine {
        ThresholdEngine::new(
            self.params.threshold_otsu_computing,
            self.params.slices_otsu_computing,
        )
    }

    /// Open an image through the configured source
    pub fn open(&self, image_path: &Path) -> Result<ImageStack> {
        Ok(self.source.open(image_path)?)
    }

    /// Boxes of a binary volume: label, filter, extract, pad, merge
    pub fn detect_boxes(&self, binary: &Volume<u8>, calibration: &Calibration) -> Result<BoxSet> {
        self.detect_boxes_with_progress(binary, calibration, "", &NoopProgress)
    }

    fn detect_boxes_with_progress(
        &self,
        binary: &Volume<u8>,
        calibration: &Calibration,
        name: &str,
        progress: &dyn ProgressCallback,
    ) -> Result<BoxSet> {
        let extent = binary.extent();

        progress.on_stage_start(name, ProcessingStage::Labeling);
        let (mut labels, count) = self.labeler.label(binary, self.params.connectivity());
        let removed = remove_border_labels(&mut labels);
        progress.on_stage_complete(
            name,
            ProcessingStage::Labeling,
            &format!("{} components, {} on the border", count, removed),
        );

        progress.on_stage_start(name, ProcessingStage::Filtering);
        let retained = VolumeFilter::new(
            self.params.min_volume_nucleus,
            self.params.max_volume_nucleus,
        )
        .filter(&labels, calibration);
        progress.on_stage_complete(
            name,
            ProcessingStage::Filtering,
            &format!("{} retained", retained.len()),
        );

        progress.on_stage_start(name, ProcessingStage::BoundingBoxes);
        let tight = compute_boxes(&labels, &retained)?;
        progress.on_stage_complete(name, ProcessingStage::BoundingBoxes, "");

        progress.on_stage_start(name, ProcessingStage::Padding);
        let mut padded = pad_all(&tight, self.params.margins(), extent);
        if extent.depth == 1 {
            flatten_z(&mut padded);
        }
        progress.on_stage_complete(name, ProcessingStage::Padding, "");

        progress.on_stage_start(name, ProcessingStage::Merging);
        let (merged, stats) = merge_with_stats(
            &padded,
            self.params.boxes_percent_surface_to_filter,
            self.params.boxes_regroupement,
        );
        progress.on_stage_complete(
            name,
            ProcessingStage::Merging,
            &format!("{} boxes after {} merges", merged.len(), stats.merges),
        );

        Ok(merged)
    }

    /// Threshold and detect on an already loaded stack
    pub fn analyse(
        &self,
        name: &str,
        stack: &ImageStack,
        progress: &dyn ProgressCallback,
    ) -> Result<Analysis> {
        let (calibration, calibration_source) = self.resolver.resolve(stack.calibration);
        tracing::debug!(image = name, %calibration, ?calibration_source, "calibration");

        let channel_index = self.params.channel_to_compute_threshold;
        let channel = stack
            .channel(channel_index)
            .ok_or(AutocropError::ChannelOutOfRange {
                channel: channel_index,
                count: stack.channel_count(),
            })?;
        if channel.is_empty() {
            return Err(AutocropError::EmptyVolume);
        }

        progress.on_stage_start(name, ProcessingStage::Thresholding);
        let engine = self.threshold_engine();
        let smoothed = engine.smooth(&to_8bit(channel, stack.bit_depth));
        let threshold = engine
            .compute_smoothed(&smoothed)
            .ok_or(AutocropError::EmptyVolume)?;
        progress.on_stage_complete(
            name,
            ProcessingStage::Thresholding,
            &format!("threshold {} ({})", threshold.threshold, threshold.slice_range),
        );
        if threshold.used_default {
            tracing::info!(
                image = name,
                threshold = threshold.threshold,
                "otsu below floor, using default threshold"
            );
        }

        progress.on_stage_start(name, ProcessingStage::Binarizing);
        let binary = binarize(&smoothed, threshold.threshold);
        drop(smoothed);
        progress.on_stage_complete(name, ProcessingStage::Binarizing, "");

        let boxes = self.detect_boxes_with_progress(&binary, &calibration, name, progress)?;

        Ok(Analysis {
            calibration,
            calibration_source,
            threshold,
            boxes,
        })
    }

    /// Analyse a loaded stack and write every artifact under `output_dir`
    pub fn process_stack(
        &self,
        image_path: &Path,
        stack: &ImageStack,
        output_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<ImageResult> {
        let start = Instant::now();
        let name = image_path.display().to_string();
        let prefix = image_prefix(image_path);

        let analysis = self.analyse(&name, stack, progress)?;
        if analysis.boxes.is_empty() {
            tracing::info!(image = %name, "no nucleus detected");
        }

        progress.on_stage_start(&name, ProcessingStage::Cropping);
        let extractor = CropExtractor::new(self.sink.as_ref(), output_dir, &prefix);
        let crops = match extractor.extract(stack, &analysis.boxes, analysis.calibration) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(image = %name, error = %e, "cannot create crop directory");
                CropReport::default()
            }
        };
        progress.on_stage_complete(
            &name,
            ProcessingStage::Cropping,
            &format!("{} crops, {} failed", crops.written(), crops.failures.len()),
        );

        progress.on_stage_start(&name, ProcessingStage::Reporting);
        let block = CoordinatesBlock::new(image_path, &analysis.threshold, crops.records.clone());
        let coordinates_path = match block.write(output_dir, &prefix) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(image = %name, error = %e, "failed to write coordinates");
                None
            }
        };
        progress.on_stage_complete(&name, ProcessingStage::Reporting, "");

        let projection_path = if self.params.z_projection {
            progress.on_stage_start(&name, ProcessingStage::Projecting);
            let written = stack
                .channel(self.params.channel_to_compute_threshold)
                .ok_or(annotate::AnnotateError::EmptyVolume)
                .and_then(|channel| {
                    annotate::write_projection(channel, &analysis.boxes, output_dir, &prefix)
                });
            progress.on_stage_complete(&name, ProcessingStage::Projecting, "");
            match written {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!(image = %name, error = %e, "failed to write z-projection");
                    None
                }
            }
        } else {
            None
        };

        let elapsed_seconds = start.elapsed().as_secs_f64();
        tracing::info!(
            image = %name,
            nuclei = analysis.boxes.len(),
            threshold = analysis.threshold.threshold,
            crops = crops.written(),
            elapsed = format!("{:.2}s", elapsed_seconds),
            "image done"
        );
        progress.on_stage_complete(&name, ProcessingStage::Completed, "");

        Ok(ImageResult {
            image: image_path.to_path_buf(),
            prefix,
            analysis,
            crops,
            coordinates_path,
            projection_path,
            elapsed_seconds,
        })
    }

    /// Open `image_path` and run [`AutoCrop::process_stack`]
    pub fn process(
        &self,
        image_path: &Path,
        output_dir: &Path,
        progress: &dyn ProgressCallback,
    ) -> Result<ImageResult> {
        let name = image_path.display().to_string();
        progress.on_stage_start(&name, ProcessingStage::Loading);
        let stack = self.open(image_path)?;
        if stack.is_empty() {
            return Err(AutocropError::EmptyVolume);
        }
        progress.on_stage_complete(
            &name,
            ProcessingStage::Loading,
            &format!("{} x {} channels", stack.extent(), stack.channel_count()),
        );
        self.process_stack(image_path, &stack, output_dir, progress)
    }

    /// Re-crop `image_path` with the rows of a coordinates file
    ///
    /// Crops are written straight into `output_dir`, one per row.
    pub fn crop_from_coordinates(
        &self,
        block: &CoordinatesBlock,
        image_path: &Path,
        output_dir: &Path,
    ) -> Result<CropReport> {
        let stack = self.open(image_path)?;
        let (calibration, _) = self.resolver.resolve(stack.calibration);
        let prefix = image_prefix(image_path);

        std::fs::create_dir_all(output_dir)?;
        let extractor = CropExtractor::in_dir(self.sink.as_ref(), output_dir, &prefix);

        let mut report = CropReport::default();
        for record in &block.records {
            report.push(extractor.extract_one(
                &stack,
                record.channel,
                record.crop_id,
                &record.crop_box(),
                calibration,
            ));
        }

        tracing::info!(
            image = %image_path.display(),
            crops = report.written(),
            failed = report.failures.len(),
            "crop from coordinates"
        );
        Ok(report)
    }
}

/// Single-slice images keep their only plane in every box
fn flatten_z(boxes: &mut BoxSet) {
    for b in boxes.boxes_mut() {
        b.z_min = 0;
        b.z_max = 1;
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autocrop::CropBox;
    use crate::volume::{Extent, VolumeError};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct MemorySink {
        written: Mutex<Vec<(PathBuf, Extent)>>,
    }

    impl VolumeSink for MemorySink {
        fn write(
            &self,
            volume: &Volume<u16>,
            _bit_depth: u8,
            _calibration: Option<Calibration>,
            path: &Path,
        ) -> crate::volume::Result<()> {
            self.written
                .lock()
                .unwrap()
                .push((path.to_path_buf(), volume.extent()));
            Ok(())
        }
    }

    struct FixedSource(ImageStack);

    impl VolumeSource for FixedSource {
        fn open(&self, path: &Path) -> crate::volume::Result<ImageStack> {
            if path.ends_with("missing.tif") {
                return Err(VolumeError::ImageNotFound(path.to_path_buf()));
            }
            Ok(self.0.clone())
        }
    }

    fn params() -> AutocropParameters {
        AutocropParameters::builder()
            .margins(1, 1, 1)
            .z_projection(false)
            .build()
    }

    fn cube_binary(size: usize, lo: usize, hi: usize) -> Volume<u8> {
        let mut vol = Volume::new(size, size, size);
        for z in lo..=hi {
            for y in lo..=hi {
                for x in lo..=hi {
                    vol.set(x, y, z, 255);
                }
            }
        }
        vol
    }

    fn bright_cube_stack() -> ImageStack {
        let mut vol = Volume::filled(Extent::new(24, 24, 12), 10u16);
        for z in 4..8 {
            for y in 8..14 {
                for x in 8..14 {
                    vol.set(x, y, z, 200);
                }
            }
        }
        ImageStack::single(vol, 8)
    }

    #[test]
    fn test_image_prefix() {
        assert_eq!(image_prefix(Path::new("/d/img.tif")), "img");
        assert_eq!(image_prefix(Path::new("/d/img.ome.tif")), "img");
        assert_eq!(image_prefix(Path::new("plain")), "plain");
    }

    #[test]
    fn test_detect_single_cube() {
        let pipeline = AutoCrop::new(params());
        let boxes = pipeline
            .detect_boxes(&cube_binary(8, 3, 4), &Calibration::default())
            .unwrap();
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes.boxes()[0], CropBox::new(2, 5, 2, 5, 2, 5));
    }

    #[test]
    fn test_detect_on_single_slice() {
        let mut binary = Volume::new(10, 10, 1);
        for y in 4..6 {
            for x in 4..6 {
                binary.set(x, y, 0, 255);
            }
        }
        let boxes = AutoCrop::new(params())
            .detect_boxes(&binary, &Calibration::default())
            .unwrap();
        assert_eq!(boxes.boxes(), &[CropBox::new(3, 6, 3, 6, 0, 1)]);
    }

    #[test]
    fn test_analyse_bright_cube() {
        let pipeline = AutoCrop::new(params());
        let analysis = pipeline
            .analyse("cube", &bright_cube_stack(), &NoopProgress)
            .unwrap();
        assert!(!analysis.threshold.used_default);
        assert_eq!(analysis.threshold.slice_range, "default");
        assert_eq!(analysis.boxes.len(), 1);
        assert_eq!(analysis.calibration_source, CalibrationSource::Default);
    }

    #[test]
    fn test_manual_calibration_wins() {
        let p = AutocropParameters::builder()
            .calibration(Calibration::new(0.5, 0.5, 2.0))
            .build();
        let stack = bright_cube_stack().with_calibration(Calibration::new(0.1, 0.1, 0.1));
        let analysis = AutoCrop::new(p).analyse("cube", &stack, &NoopProgress).unwrap();
        assert_eq!(analysis.calibration, Calibration::new(0.5, 0.5, 2.0));
        assert_eq!(analysis.calibration_source, CalibrationSource::Manual);
    }

    #[test]
    fn test_channel_out_of_range() {
        let p = AutocropParameters::builder().threshold_channel(3).build();
        let err = AutoCrop::new(p)
            .analyse("cube", &bright_cube_stack(), &NoopProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            AutocropError::ChannelOutOfRange { channel: 3, count: 1 }
        ));
    }

    #[test]
    fn test_process_writes_crops_and_coordinates() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(MemorySink::default());
        let pipeline = AutoCrop::new(params())
            .with_source(Arc::new(FixedSource(bright_cube_stack())))
            .with_sink(sink.clone());

        let result = pipeline
            .process(Path::new("/data/cube.tif"), dir.path(), &NoopProgress)
            .unwrap();

        assert_eq!(result.prefix, "cube");
        assert_eq!(result.nuclei_count(), 1);
        assert_eq!(result.crops.written(), 1);
        assert!(result.projection_path.is_none());

        let coordinates = result.coordinates_path.clone().unwrap();
        let block = CoordinatesBlock::load(&coordinates).unwrap();
        assert_eq!(block.records, result.crops.records);
        assert_eq!(block.threshold, result.analysis.threshold.threshold);

        let written = sink.written.lock().unwrap();
        assert_eq!(written[0].0, dir.path().join("nuclei").join("cube_1_C0.tif"));

        let line = result.summary_line().to_string();
        assert!(line.starts_with("/data/cube.tif\t1\t"));
    }

    #[test]
    fn test_process_missing_image() {
        let dir = tempdir().unwrap();
        let pipeline = AutoCrop::new(params())
            .with_source(Arc::new(FixedSource(bright_cube_stack())));
        let err = pipeline
            .process(Path::new("missing.tif"), dir.path(), &NoopProgress)
            .unwrap_err();
        assert!(matches!(
            err,
            AutocropError::Volume(VolumeError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_crop_from_coordinates() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(MemorySink::default());
        let pipeline = AutoCrop::new(params())
            .with_source(Arc::new(FixedSource(bright_cube_stack())))
            .with_sink(sink.clone());

        let text = "#Image: /data/cube.tif\n\
                    out/cube_1_C0.tif\t0\t1\t2\t3\t1\t4\t5\t2\n\
                    out/cube_1_C1.tif\t1\t1\t2\t3\t1\t4\t5\t2\n";
        let block = CoordinatesBlock::parse(text).unwrap();
        let report = pipeline
            .crop_from_coordinates(&block, Path::new("/data/cube.tif"), dir.path())
            .unwrap();

        assert_eq!(report.written(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].channel, 1);

        let written = sink.written.lock().unwrap();
        assert_eq!(written[0], (dir.path().join("cube_1_C0.tif"), Extent::new(4, 5, 2)));
    }
}
