//! Crop extractor
//!
//! Writes one sub-volume per (final box, channel) and collects one metadata
//! record per written crop. A failed write is logged and recorded, and the
//! remaining crops are still attempted.

use std::path::{Path, PathBuf};

use crate::volume::{Calibration, ImageStack, VolumeSink};

use super::types::{AutocropError, BoxSet, CropBox, Result};

/// Sub-directory of the output folder holding the crops
pub const NUCLEI_DIR: &str = "nuclei";

// ============================================================
// Types
// ============================================================

/// One written crop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropRecord {
    pub file_name: PathBuf,
    pub channel: usize,
    pub crop_id: u32,
    pub x_start: i32,
    pub y_start: i32,
    pub z_start: i32,
    pub width: i64,
    pub height: i64,
    pub depth: i64,
}

impl CropRecord {
    fn new(file_name: PathBuf, channel: usize, crop_id: u32, b: &CropBox) -> Self {
        Self {
            file_name,
            channel,
            crop_id,
            x_start: b.x_min,
            y_start: b.y_min,
            z_start: b.z_min,
            width: b.width(),
            height: b.height(),
            depth: b.depth(),
        }
    }

    /// Box described by this record, [`CropBox::EMPTY`] when an end does
    /// not fit in `i32`
    pub fn crop_box(&self) -> CropBox {
        let end = |start: i32, len: i64| i32::try_from(i64::from(start) + len).ok();
        match (
            end(self.x_start, self.width),
            end(self.y_start, self.height),
            end(self.z_start, self.depth),
        ) {
            (Some(x_end), Some(y_end), Some(z_end)) => CropBox::new(
                self.x_start,
                x_end,
                self.y_start,
                y_end,
                self.z_start,
                z_end,
            ),
            _ => CropBox::EMPTY,
        }
    }
}

/// A crop that could not be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropFailure {
    pub path: PathBuf,
    pub channel: usize,
    pub crop_id: u32,
    pub reason: String,
}

/// Outcome of extracting every crop of one image
#[derive(Debug, Clone, Default)]
pub struct CropReport {
    pub records: Vec<CropRecord>,
    pub failures: Vec<CropFailure>,
}

impl CropReport {
    pub fn written(&self) -> usize {
        self.records.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn push(&mut self, outcome: std::result::Result<CropRecord, CropFailure>) {
        match outcome {
            Ok(record) => self.records.push(record),
            Err(failure) => self.failures.push(failure),
        }
    }
}

// ============================================================
// Crop Extractor
// ============================================================

/// Materializes crops through a [`VolumeSink`]
pub struct CropExtractor<'a> {
    sink: &'a dyn VolumeSink,
    output_dir: PathBuf,
    prefix: String,
}

impl<'a> CropExtractor<'a> {
    /// Crops go to `<output_dir>/nuclei/<prefix>_<id>_C<channel>.tif`
    pub fn new(sink: &'a dyn VolumeSink, output_dir: &Path, prefix: &str) -> Self {
        Self::in_dir(sink, &output_dir.join(NUCLEI_DIR), prefix)
    }

    /// Crops go straight into `dir`
    pub fn in_dir(sink: &'a dyn VolumeSink, dir: &Path, prefix: &str) -> Self {
        Self {
            sink,
            output_dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
        }
    }

    pub fn crop_path(&self, crop_id: u32, channel: usize) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_C{}.tif", self.prefix, crop_id, channel))
    }

    /// Crop every channel of `stack` with every box, channel-major
    pub fn extract(
        &self,
        stack: &ImageStack,
        boxes: &BoxSet,
        calibration: Calibration,
    ) -> Result<CropReport> {
        let mut report = CropReport::default();
        if boxes.is_empty() {
            return Ok(report);
        }

        std::fs::create_dir_all(&self.output_dir).map_err(AutocropError::IoError)?;

        for channel in 0..stack.channel_count() {
            for (crop_id, crop_box) in boxes.iter() {
                report.push(self.extract_one(stack, channel, crop_id, crop_box, calibration));
            }
        }

        Ok(report)
    }

    /// Crop one box out of one channel
    ///
    /// The output directory must exist.
    pub fn extract_one(
        &self,
        stack: &ImageStack,
        channel: usize,
        crop_id: u32,
        crop_box: &CropBox,
        calibration: Calibration,
    ) -> std::result::Result<CropRecord, CropFailure> {
        let path = self.crop_path(crop_id, channel);

        let written = stack
            .channel(channel)
            .ok_or_else(|| {
                format!(
                    "channel {} out of range ({} channels)",
                    channel,
                    stack.channel_count()
                )
            })
            .and_then(|volume| {
                crop_box
                    .to_region()
                    .ok_or_else(|| format!("box {} has no valid region", crop_box))
                    .and_then(|region| volume.crop(&region).map_err(|e| e.to_string()))
            })
            .and_then(|cropped| {
                self.sink
                    .write(&cropped, stack.bit_depth, Some(calibration), &path)
                    .map_err(|e| e.to_string())
            });

        match written {
            Ok(()) => Ok(CropRecord::new(path, channel, crop_id, crop_box)),
            Err(reason) => {
                tracing::warn!(
                    prefix = %self.prefix,
                    crop_id,
                    channel,
                    %reason,
                    "failed to write crop"
                );
                Err(CropFailure {
                    path,
                    channel,
                    crop_id,
                    reason,
                })
            }
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Extent, Volume, VolumeError};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Remembers what it was asked to write; fails for crop ids in `fail_on`
    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<(PathBuf, Extent, Option<Calibration>)>>,
        fail_on: Vec<String>,
    }

    impl VolumeSink for RecordingSink {
        fn write(
            &self,
            volume: &Volume<u16>,
            _bit_depth: u8,
            calibration: Option<Calibration>,
            path: &Path,
        ) -> crate::volume::Result<()> {
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if self.fail_on.iter().any(|f| name.contains(f.as_str())) {
                return Err(VolumeError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            self.written
                .lock()
                .unwrap()
                .push((path.to_path_buf(), volume.extent(), calibration));
            Ok(())
        }
    }

    fn two_channel_stack() -> ImageStack {
        let a = Volume::filled(Extent::new(10, 10, 10), 100u16);
        let b = Volume::filled(Extent::new(10, 10, 10), 7u16);
        ImageStack::new(vec![a, b], 16).unwrap()
    }

    fn boxes() -> BoxSet {
        let mut set = BoxSet::new();
        set.insert(2, CropBox::new(1, 4, 1, 5, 1, 3));
        set.insert(5, CropBox::new(5, 9, 5, 9, 5, 9));
        set
    }

    #[test]
    fn test_crop_path_layout() {
        let sink = RecordingSink::default();
        let extractor = CropExtractor::new(&sink, Path::new("/out"), "img");
        assert_eq!(
            extractor.crop_path(3, 1),
            PathBuf::from("/out/nuclei/img_3_C1.tif")
        );
    }

    #[test]
    fn test_extract_every_box_every_channel() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let extractor = CropExtractor::new(&sink, dir.path(), "img");
        let cal = Calibration::new(0.1, 0.1, 0.2);

        let report = extractor
            .extract(&two_channel_stack(), &boxes(), cal)
            .unwrap();

        assert_eq!(report.written(), 4);
        assert!(!report.has_failures());
        let order: Vec<(usize, u32)> = report
            .records
            .iter()
            .map(|r| (r.channel, r.crop_id))
            .collect();
        assert_eq!(order, vec![(0, 2), (0, 5), (1, 2), (1, 5)]);

        let first = &report.records[0];
        assert_eq!((first.width, first.height, first.depth), (3, 4, 2));
        assert_eq!(first.crop_box(), CropBox::new(1, 4, 1, 5, 1, 3));

        let written = sink.written.lock().unwrap();
        assert_eq!(written[0].1, Extent::new(3, 4, 2));
        assert!(written.iter().all(|w| w.2 == Some(cal)));
        assert!(dir.path().join(NUCLEI_DIR).is_dir());
    }

    #[test]
    fn test_failed_write_does_not_stop_others() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink {
            fail_on: vec!["img_2_C0".to_string()],
            ..Default::default()
        };
        let extractor = CropExtractor::new(&sink, dir.path(), "img");

        let report = extractor
            .extract(&two_channel_stack(), &boxes(), Calibration::default())
            .unwrap();

        assert_eq!(report.written(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].crop_id, 2);
        assert_eq!(report.failures[0].channel, 0);
    }

    #[test]
    fn test_box_outside_volume_is_failure() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let extractor = CropExtractor::new(&sink, dir.path(), "img");
        let mut set = BoxSet::new();
        set.insert(1, CropBox::new(8, 12, 0, 2, 0, 2));

        let report = extractor
            .extract(&two_channel_stack(), &set, Calibration::default())
            .unwrap();
        assert_eq!(report.written(), 0);
        assert_eq!(report.failures.len(), 2);
    }

    #[test]
    fn test_record_with_overflowing_end_has_no_region() {
        let record = CropRecord {
            file_name: PathBuf::from("img_1_C0.tif"),
            channel: 0,
            crop_id: 1,
            x_start: 2_147_483_600,
            y_start: 0,
            z_start: 0,
            width: 100,
            height: 1,
            depth: 1,
        };
        let crop_box = record.crop_box();
        assert!(crop_box.to_region().is_none());

        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let extractor = CropExtractor::in_dir(&sink, dir.path(), "img");
        let result = extractor.extract_one(
            &two_channel_stack(),
            0,
            1,
            &crop_box,
            Calibration::default(),
        );
        assert!(result.is_err());
        assert!(sink.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_channel_is_failure() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let extractor = CropExtractor::in_dir(&sink, dir.path(), "img");
        let result = extractor.extract_one(
            &two_channel_stack(),
            4,
            1,
            &CropBox::new(1, 3, 1, 3, 1, 3),
            Calibration::default(),
        );
        let failure = result.unwrap_err();
        assert_eq!(failure.channel, 4);
        assert_eq!(failure.path, dir.path().join("img_1_C4.tif"));
    }

    #[test]
    fn test_no_boxes_no_directory() {
        let dir = tempdir().unwrap();
        let sink = RecordingSink::default();
        let extractor = CropExtractor::new(&sink, dir.path(), "img");
        let report = extractor
            .extract(&two_channel_stack(), &BoxSet::new(), Calibration::default())
            .unwrap();
        assert_eq!(report.written(), 0);
        assert!(!dir.path().join(NUCLEI_DIR).exists());
    }
}
