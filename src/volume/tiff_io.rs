//! Multi-page TIFF stack adapter
//!
//! Reads and writes grayscale 8/16-bit stacks, one page per z-slice (and per
//! channel for multi-channel stacks, channel varying fastest). Stack layout
//! and calibration follow the ImageJ convention:
//!
//! - `ImageDescription` holds `key=value` lines (`channels=`, `slices=`,
//!   `spacing=`, `unit=`)
//! - `XResolution` / `YResolution` hold pixels per unit, so the pixel size
//!   is the reciprocal

use std::fs::File;
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;

use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::{Rational, TiffEncoder, TiffValue};
use tiff::tags::{ResolutionUnit, Tag};

use super::calibration::Calibration;
use super::types::{ImageStack, Result, Volume, VolumeError};

// ============================================================
// Constants
// ============================================================

/// Denominator scale used when writing resolution rationals
const RESOLUTION_SCALE: f64 = 1_000_000.0;

/// Unit written into the stack description
const DEFAULT_UNIT: &str = "micron";

// ============================================================
// Collaborator traits
// ============================================================

/// Loads an image stack
pub trait VolumeSource: Send + Sync {
    fn open(&self, path: &Path) -> Result<ImageStack>;
}

/// Persists a single-channel volume
pub trait VolumeSink: Send + Sync {
    fn write(
        &self,
        volume: &Volume<u16>,
        bit_depth: u8,
        calibration: Option<Calibration>,
        path: &Path,
    ) -> Result<()>;
}

// ============================================================
// Hyperstack description
// ============================================================

/// Fields of an ImageJ-style description that matter for stack layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HyperstackInfo {
    pub channels: Option<usize>,
    pub slices: Option<usize>,
    pub spacing: Option<f64>,
    pub unit: Option<String>,
}

impl HyperstackInfo {
    /// Parse `key=value` lines; unknown keys are ignored
    pub fn parse(description: &str) -> Self {
        let mut info = Self::default();
        for line in description.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "channels" => info.channels = value.parse().ok(),
                "slices" => info.slices = value.parse().ok(),
                "spacing" => info.spacing = value.parse().ok(),
                "unit" => info.unit = Some(value.to_string()),
                _ => {}
            }
        }
        info
    }

    /// Render a description for a single-channel stack
    pub fn render(depth: usize, calibration: Option<Calibration>) -> String {
        let mut out = format!(
            "ImageJ=1.54f\nimages={}\nchannels=1\nslices={}\n",
            depth, depth
        );
        if let Some(cal) = calibration {
            out.push_str(&format!("unit={}\nspacing={}\n", DEFAULT_UNIT, cal.z));
        }
        out.push_str("loop=false\n");
        out
    }
}

// ============================================================
// Reader
// ============================================================

/// TIFF stack reader
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffStackReader;

impl TiffStackReader {
    fn pixel_size<R: std::io::Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> Option<f64> {
        let value = decoder.find_tag(tag).ok()??;
        let per_unit = match value {
            Value::Rational(n, d) if d != 0 => f64::from(n) / f64::from(d),
            Value::Float(v) => f64::from(v),
            Value::Double(v) => v,
            _ => return None,
        };
        (per_unit > 0.0).then(|| 1.0 / per_unit)
    }

    fn read_stack(path: &Path) -> Result<ImageStack> {
        let file = BufReader::new(File::open(path)?);
        let mut decoder = Decoder::new(file)?.with_limits(Limits::unlimited());

        let info = decoder
            .get_tag_ascii_string(Tag::ImageDescription)
            .map(|d| HyperstackInfo::parse(&d))
            .unwrap_or_default();
        let x_size = Self::pixel_size(&mut decoder, Tag::XResolution);
        let y_size = Self::pixel_size(&mut decoder, Tag::YResolution);

        let (width, height) = decoder.dimensions()?;
        let mut planes: Vec<Vec<u16>> = Vec::new();
        let mut bit_depth = 8u8;

        loop {
            if decoder.dimensions()? != (width, height) {
                return Err(VolumeError::InvalidImage(format!(
                    "page {} differs in size from page 0",
                    planes.len()
                )));
            }

            let color_type = decoder.colortype()?;
            if !matches!(color_type, tiff::ColorType::Gray(_)) {
                return Err(VolumeError::UnsupportedFormat(format!("{:?}", color_type)));
            }

            let plane = match decoder.read_image()? {
                DecodingResult::U8(data) => data.into_iter().map(u16::from).collect(),
                DecodingResult::U16(data) => {
                    bit_depth = 16;
                    data
                }
                _ => return Err(VolumeError::UnsupportedFormat(format!("{:?}", color_type))),
            };
            planes.push(plane);

            if !decoder.more_images() {
                break;
            }
            decoder.next_image()?;
        }

        let channel_count = info.channels.unwrap_or(1).max(1);
        if planes.len() % channel_count != 0 {
            return Err(VolumeError::InvalidImage(format!(
                "{} pages cannot be split into {} channels",
                planes.len(),
                channel_count
            )));
        }

        let mut per_channel: Vec<Vec<Vec<u16>>> = vec![Vec::new(); channel_count];
        for (i, plane) in planes.into_iter().enumerate() {
            per_channel[i % channel_count].push(plane);
        }

        let channels = per_channel
            .into_iter()
            .map(|slices| Volume::from_slices(width as usize, height as usize, slices))
            .collect::<Result<Vec<_>>>()?;

        // Encoders write 1/1 resolution by default; only treat it as a
        // calibration when something else says the stack is calibrated.
        let calibrated = info.unit.is_some()
            || info.spacing.is_some()
            || x_size.is_some_and(|x| (x - 1.0).abs() > f64::EPSILON);

        let mut stack = ImageStack::new(channels, bit_depth)?;
        if calibrated {
            let x = x_size.unwrap_or(1.0);
            stack = stack.with_calibration(Calibration::new(
                x,
                y_size.unwrap_or(x),
                info.spacing.unwrap_or(1.0),
            ));
        }
        Ok(stack)
    }
}

impl VolumeSource for TiffStackReader {
    fn open(&self, path: &Path) -> Result<ImageStack> {
        if !path.exists() {
            return Err(VolumeError::ImageNotFound(path.to_path_buf()));
        }
        Self::read_stack(path)
    }
}

// ============================================================
// Writer
// ============================================================

/// TIFF stack writer
#[derive(Debug, Clone, Copy, Default)]
pub struct TiffStackWriter;

impl TiffStackWriter {
    fn resolution(size: f64) -> Rational {
        Rational {
            n: RESOLUTION_SCALE as u32,
            d: ((size * RESOLUTION_SCALE).round() as u32).max(1),
        }
    }

    fn write_page<W, C>(
        encoder: &mut TiffEncoder<W>,
        width: u32,
        height: u32,
        data: &[C::Inner],
        description: Option<&str>,
        calibration: Option<Calibration>,
    ) -> Result<()>
    where
        W: Write + Seek,
        C: ColorType,
        [C::Inner]: TiffValue,
    {
        let mut image = encoder.new_image::<C>(width, height)?;
        if let Some(desc) = description {
            image.encoder().write_tag(Tag::ImageDescription, desc)?;
        }
        if let Some(cal) = calibration {
            image.resolution_unit(ResolutionUnit::None);
            image.x_resolution(Self::resolution(cal.x));
            image.y_resolution(Self::resolution(cal.y));
        }
        image.write_data(data)?;
        Ok(())
    }
}

impl VolumeSink for TiffStackWriter {
    fn write(
        &self,
        volume: &Volume<u16>,
        bit_depth: u8,
        calibration: Option<Calibration>,
        path: &Path,
    ) -> Result<()> {
        if volume.is_empty() {
            return Err(VolumeError::InvalidImage(format!(
                "refusing to write empty volume to {}",
                path.display()
            )));
        }

        let mut encoder = TiffEncoder::new(BufWriter::new(File::create(path)?))?;
        let description = HyperstackInfo::render(volume.depth(), calibration);
        let (width, height) = (volume.width() as u32, volume.height() as u32);

        for (z, slice) in volume.slices().enumerate() {
            let desc = (z == 0).then_some(description.as_str());
            if bit_depth <= 8 {
                let plane: Vec<u8> = slice.iter().map(|&v| v.min(255) as u8).collect();
                Self::write_page::<_, colortype::Gray8>(
                    &mut encoder,
                    width,
                    height,
                    &plane,
                    desc,
                    calibration,
                )?;
            } else {
                Self::write_page::<_, colortype::Gray16>(
                    &mut encoder,
                    width,
                    height,
                    slice,
                    desc,
                    calibration,
                )?;
            }
        }

        Ok(())
    }
}

// ============================================================
// Tests
// ============================================================
