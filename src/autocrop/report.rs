//! Coordinates file and summary line
//!
//! Every processed image gets a tab-delimited coordinates file under
//! `<out>/coordinates/<prefix>.txt`:
//!
//! ```text
//! #Image: /data/img.tif
//! #OTSU threshold: 37
//! #Slice used for OTSU threshold: default
//! FileName	ChannelNumber	CropNumber	XStart	YStart	ZStart	width	height	depth
//! /out/nuclei/img_3_C0.tif	0	3	12	40	1	88	91	23
//! ```
//!
//! The same rows can be parsed back to re-crop a raw image.

use std::fmt;
use std::path::{Path, PathBuf};

use super::crop::CropRecord;
use super::threshold::ThresholdOutcome;
use super::types::{AutocropError, Result};

/// Sub-directory of the output folder holding the coordinates files
pub const COORDINATES_DIR: &str = "coordinates";

/// Column header row of the coordinates table
pub const COLUMN_HEADER: &str =
    "FileName\tChannelNumber\tCropNumber\tXStart\tYStart\tZStart\twidth\theight\tdepth";

const IMAGE_TAG: &str = "#Image: ";
const THRESHOLD_TAG: &str = "#OTSU threshold: ";
const SLICE_TAG: &str = "#Slice used for OTSU threshold: ";

// ============================================================
// Coordinates Block
// ============================================================

/// Per-image metadata block: threshold header plus one row per crop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatesBlock {
    pub image: PathBuf,
    pub threshold: i32,
    pub slice_range: String,
    pub records: Vec<CropRecord>,
}

impl CoordinatesBlock {
    pub fn new(image: &Path, outcome: &ThresholdOutcome, records: Vec<CropRecord>) -> Self {
        Self {
            image: image.to_path_buf(),
            threshold: outcome.threshold,
            slice_range: outcome.slice_range.clone(),
            records,
        }
    }

    /// Path of the coordinates file of `prefix`
    pub fn path_for(output_dir: &Path, prefix: &str) -> PathBuf {
        output_dir
            .join(COORDINATES_DIR)
            .join(format!("{}.txt", prefix))
    }

    /// Render the block as written to disk
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{}{}\n", IMAGE_TAG, self.image.display()));
        out.push_str(&format!("{}{}\n", THRESHOLD_TAG, self.threshold));
        out.push_str(&format!("{}{}\n", SLICE_TAG, self.slice_range));
        out.push_str(COLUMN_HEADER);
        out.push('\n');
        for r in &self.records {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                r.file_name.display(),
                r.channel,
                r.crop_id,
                r.x_start,
                r.y_start,
                r.z_start,
                r.width,
                r.height,
                r.depth
            ));
        }
        out
    }

    /// Write to `<output_dir>/coordinates/<prefix>.txt`
    pub fn write(&self, output_dir: &Path, prefix: &str) -> Result<PathBuf> {
        let path = Self::path_for(output_dir, prefix);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, self.render())?;
        Ok(path)
    }

    /// Parse a rendered block
    ///
    /// Header lines are optional; a missing threshold reads as 0 and a
    /// missing slice range as `"default"`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut block = CoordinatesBlock {
            image: PathBuf::new(),
            threshold: 0,
            slice_range: super::threshold::WHOLE_VOLUME_RANGE.to_string(),
            records: Vec::new(),
        };

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            if let Some(image) = line.strip_prefix(IMAGE_TAG) {
                block.image = PathBuf::from(image.trim());
            } else if let Some(threshold) = line.strip_prefix(THRESHOLD_TAG) {
                block.threshold =
                    threshold
                        .trim()
                        .parse()
                        .map_err(|_| AutocropError::InvalidCoordinates {
                            line: line_no,
                            reason: format!("bad threshold '{}'", threshold.trim()),
                        })?;
            } else if let Some(range) = line.strip_prefix(SLICE_TAG) {
                block.slice_range = range.trim().to_string();
            } else if line.starts_with('#') || line.starts_with("FileName\t") {
                continue;
            } else {
                block.records.push(parse_row(line, line_no)?);
            }
        }

        Ok(block)
    }

    /// Read and parse a coordinates file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }
}

fn parse_row(line: &str, line_no: usize) -> Result<CropRecord> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() != 9 {
        return Err(AutocropError::InvalidCoordinates {
            line: line_no,
            reason: format!("expected 9 columns, found {}", fields.len()),
        });
    }

    fn num<T: std::str::FromStr>(field: &str, name: &str, line: usize) -> Result<T> {
        field.parse().map_err(|_| AutocropError::InvalidCoordinates {
            line,
            reason: format!("bad {} '{}'", name, field),
        })
    }

    let record = CropRecord {
        file_name: PathBuf::from(fields[0]),
        channel: num(fields[1], "channel", line_no)?,
        crop_id: num(fields[2], "crop number", line_no)?,
        x_start: num(fields[3], "x start", line_no)?,
        y_start: num(fields[4], "y start", line_no)?,
        z_start: num(fields[5], "z start", line_no)?,
        width: num(fields[6], "width", line_no)?,
        height: num(fields[7], "height", line_no)?,
        depth: num(fields[8], "depth", line_no)?,
    };

    let axes = [
        ("x", record.x_start, record.width),
        ("y", record.y_start, record.height),
        ("z", record.z_start, record.depth),
    ];
    for (axis, start, len) in axes {
        if start < 0 || len < 0 || i64::from(start) + len > i64::from(i32::MAX) {
            return Err(AutocropError::InvalidCoordinates {
                line: line_no,
                reason: format!("{} range {}+{} out of bounds", axis, start, len),
            });
        }
    }
    Ok(record)
}

// ============================================================
// Summary Line
// ============================================================

/// One line of the run summary: path, nuclei count, threshold, default flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    pub image: PathBuf,
    pub nuclei_count: usize,
    pub threshold: i32,
    pub used_default: bool,
}

impl fmt::Display for SummaryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{}\t{}",
            self.image.display(),
            self.nuclei_count,
            self.threshold,
            self.used_default
        )
    }
}

// ============================================================
// Tests
// ============================================================
