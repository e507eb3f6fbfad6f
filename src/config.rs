//! Configuration for autocrop runs
//!
//! # Features
//!
//! - `AutocropParameters` keyed by the tool's historical option names
//! - TOML files and the legacy `key:value` line format
//! - Lookup of a default config file (`./nucleus-autocrop.toml`, then the
//!   user config directory)
//! - CLI overrides merged on top of file values

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::autocrop::{Connectivity, Margins};
use crate::volume::Calibration;

// ============================================================
// Constants
// ============================================================

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "nucleus-autocrop.toml";

/// Sub-directory of the user config dir holding `config.toml`
pub const USER_CONFIG_DIR: &str = "nucleus-autocrop";

const DEFAULT_X_CROP_BOX_SIZE: i32 = 40;
const DEFAULT_Y_CROP_BOX_SIZE: i32 = 40;
const DEFAULT_Z_CROP_BOX_SIZE: i32 = 20;
const DEFAULT_MIN_VOLUME: f64 = 1.0;
const DEFAULT_MAX_VOLUME: f64 = i32::MAX as f64;
const DEFAULT_THRESHOLD_FLOOR: i32 = 20;
const DEFAULT_OVERLAP_PERCENT: u32 = 50;
const DEFAULT_CONNECTIVITY: u8 = 26;

/// Largest accepted crop margin, far beyond any stack size
pub const MAX_MARGIN: i32 = i32::MAX / 4;

// ============================================================
// Error Types
// ============================================================

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ============================================================
// Parameters
// ============================================================

/// Every recognized autocrop option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutocropParameters {
    /// Padding along x, in voxels
    pub x_crop_box_size: i32,
    /// Padding along y, in voxels
    pub y_crop_box_size: i32,
    /// Padding along z, in voxels
    pub z_crop_box_size: i32,

    /// Smallest physical volume kept
    pub min_volume_nucleus: f64,
    /// Largest physical volume kept
    pub max_volume_nucleus: f64,

    /// Otsu results below this engage the fallback
    #[serde(rename = "thresholdOTSUComputing", alias = "thresholdOSTUcomputing")]
    pub threshold_otsu_computing: i32,

    /// Channel the threshold is computed on
    pub channel_to_compute_threshold: usize,

    /// First slice of the fallback sub-stack; 0 means the back half
    #[serde(rename = "slicesOTSUComputing", alias = "slicesOTSUcomputing")]
    pub slices_otsu_computing: usize,

    /// Overlap percentage of the smaller box that triggers a merge
    pub boxes_percent_surface_to_filter: u32,

    /// Merge step enabled
    #[serde(deserialize_with = "bool_or_int")]
    pub boxes_regroupement: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub xcal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ycal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zcal: Option<f64>,

    /// Labeling connectivity: 6, 18 or 26
    pub connectivity: u8,

    /// Worker threads for batches (None = all cores)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    /// Write the annotated z-projection overview
    pub z_projection: bool,
}

impl Default for AutocropParameters {
    fn default() -> Self {
        Self {
            x_crop_box_size: DEFAULT_X_CROP_BOX_SIZE,
            y_crop_box_size: DEFAULT_Y_CROP_BOX_SIZE,
            z_crop_box_size: DEFAULT_Z_CROP_BOX_SIZE,
            min_volume_nucleus: DEFAULT_MIN_VOLUME,
            max_volume_nucleus: DEFAULT_MAX_VOLUME,
            threshold_otsu_computing: DEFAULT_THRESHOLD_FLOOR,
            channel_to_compute_threshold: 0,
            slices_otsu_computing: 0,
            boxes_percent_surface_to_filter: DEFAULT_OVERLAP_PERCENT,
            boxes_regroupement: true,
            xcal: None,
            ycal: None,
            zcal: None,
            connectivity: DEFAULT_CONNECTIVITY,
            threads: None,
            z_projection: true,
        }
    }
}

/// `boxesRegroupement` historically held an integer; non-zero enables
fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i != 0,
    })
}

impl AutocropParameters {
    /// Create a builder
    pub fn builder() -> AutocropParametersBuilder {
        AutocropParametersBuilder::default()
    }

    /// Per-axis padding
    pub fn margins(&self) -> Margins {
        Margins::new(
            self.x_crop_box_size,
            self.y_crop_box_size,
            self.z_crop_box_size,
        )
    }

    /// Labeling connectivity, 26 when the configured value is not recognized
    pub fn connectivity(&self) -> Connectivity {
        Connectivity::try_from(self.connectivity).unwrap_or_default()
    }

    /// Manual calibration if any axis is overridden; unset axes are 1.0
    pub fn manual_calibration(&self) -> Option<Calibration> {
        if self.xcal.is_none() && self.ycal.is_none() && self.zcal.is_none() {
            return None;
        }
        let default = Calibration::default();
        Some(Calibration::new(
            self.xcal.unwrap_or(default.x),
            self.ycal.unwrap_or(default.y),
            self.zcal.unwrap_or(default.z),
        ))
    }

    fn margins_max(&self) -> i32 {
        self.x_crop_box_size
            .max(self.y_crop_box_size)
            .max(self.z_crop_box_size)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.x_crop_box_size < 0 || self.y_crop_box_size < 0 || self.z_crop_box_size < 0 {
            return Err(ConfigError::InvalidValue {
                key: "xCropBoxSize/yCropBoxSize/zCropBoxSize",
                reason: "margins must be non-negative".to_string(),
            });
        }
        if self.margins_max() > MAX_MARGIN {
            return Err(ConfigError::InvalidValue {
                key: "xCropBoxSize/yCropBoxSize/zCropBoxSize",
                reason: format!("{} is above {}", self.margins_max(), MAX_MARGIN),
            });
        }
        if self.min_volume_nucleus.is_nan()
            || self.max_volume_nucleus.is_nan()
            || self.min_volume_nucleus > self.max_volume_nucleus
        {
            return Err(ConfigError::InvalidValue {
                key: "minVolumeNucleus",
                reason: format!(
                    "{} is above maxVolumeNucleus {}",
                    self.min_volume_nucleus, self.max_volume_nucleus
                ),
            });
        }
        if self.boxes_percent_surface_to_filter > 100 {
            return Err(ConfigError::InvalidValue {
                key: "boxesPercentSurfaceToFilter",
                reason: format!("{} is above 100", self.boxes_percent_surface_to_filter),
            });
        }
        if Connectivity::try_from(self.connectivity).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "connectivity",
                reason: format!("{} is not one of 6, 18, 26", self.connectivity),
            });
        }
        if let Some(cal) = self.manual_calibration() {
            if !cal.is_valid() {
                return Err(ConfigError::InvalidValue {
                    key: "xcal/ycal/zcal",
                    reason: format!("calibration {} must be positive", cal),
                });
            }
        }
        if self.threads == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "threads",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    // ============ Loading ============

    /// Load from a TOML file or a legacy `key:value` file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let params = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_legacy(&content)?
        };
        params.validate()?;
        Ok(params)
    }

    /// Load the first default config file found, or defaults
    pub fn load() -> Result<Self> {
        for path in Self::default_locations() {
            if path.is_file() {
                tracing::debug!(path = %path.display(), "loading config");
                return Self::load_from_path(&path);
            }
        }
        Ok(Self::default())
    }

    /// Locations searched by [`AutocropParameters::load`], in order
    pub fn default_locations() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(USER_CONFIG_DIR).join("config.toml"));
        }
        paths
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse `key:value` lines; `#` starts a comment line
    pub fn from_legacy(content: &str) -> Result<Self> {
        let mut table = toml::Table::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(ConfigError::Parse(format!(
                    "line {}: expected key:value, found '{}'",
                    idx + 1,
                    line
                )));
            };
            table.insert(key.trim().to_string(), legacy_value(value.trim()));
        }

        toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Merge with CLI overrides (CLI takes precedence)
    pub fn merge_with_cli(&self, cli: &CliOverrides) -> Self {
        let mut merged = self.clone();
        if cli.xcal.is_some() {
            merged.xcal = cli.xcal;
        }
        if cli.ycal.is_some() {
            merged.ycal = cli.ycal;
        }
        if cli.zcal.is_some() {
            merged.zcal = cli.zcal;
        }
        if let Some(channel) = cli.channel {
            merged.channel_to_compute_threshold = channel;
        }
        if let Some(threads) = cli.threads {
            merged.threads = Some(threads);
        }
        if let Some(merge) = cli.merge {
            merged.boxes_regroupement = merge;
        }
        if let Some(projection) = cli.z_projection {
            merged.z_projection = projection;
        }
        merged
    }
}

/// Typed value for a legacy option: integer, float, bool, else string
fn legacy_value(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        toml::Value::Float(f)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}

// ============================================================
// Builder
// ============================================================

/// Builder for [`AutocropParameters`]
#[derive(Debug, Default)]
pub struct AutocropParametersBuilder {
    params: AutocropParameters,
}

impl AutocropParametersBuilder {
    /// Per-axis padding, clamped to `[0, MAX_MARGIN]`
    #[must_use]
    pub fn margins(mut self, x: i32, y: i32, z: i32) -> Self {
        self.params.x_crop_box_size = x.clamp(0, MAX_MARGIN);
        self.params.y_crop_box_size = y.clamp(0, MAX_MARGIN);
        self.params.z_crop_box_size = z.clamp(0, MAX_MARGIN);
        self
    }

    #[must_use]
    pub fn volume_range(mut self, min: f64, max: f64) -> Self {
        self.params.min_volume_nucleus = min;
        self.params.max_volume_nucleus = max;
        self
    }

    #[must_use]
    pub fn threshold_floor(mut self, floor: i32) -> Self {
        self.params.threshold_otsu_computing = floor;
        self
    }

    #[must_use]
    pub fn threshold_channel(mut self, channel: usize) -> Self {
        self.params.channel_to_compute_threshold = channel;
        self
    }

    #[must_use]
    pub fn fallback_start_slice(mut self, slice: usize) -> Self {
        self.params.slices_otsu_computing = slice;
        self
    }

    /// Merge trigger, clamped to [0, 100]
    #[must_use]
    pub fn overlap_percent(mut self, percent: u32) -> Self {
        self.params.boxes_percent_surface_to_filter = percent.min(100);
        self
    }

    #[must_use]
    pub fn merge(mut self, enabled: bool) -> Self {
        self.params.boxes_regroupement = enabled;
        self
    }

    #[must_use]
    pub fn calibration(mut self, calibration: Calibration) -> Self {
        self.params.xcal = Some(calibration.x);
        self.params.ycal = Some(calibration.y);
        self.params.zcal = Some(calibration.z);
        self
    }

    #[must_use]
    pub fn connectivity(mut self, connectivity: Connectivity) -> Self {
        self.params.connectivity = connectivity.value();
        self
    }

    #[must_use]
    pub fn threads(mut self, threads: usize) -> Self {
        self.params.threads = Some(threads.max(1));
        self
    }

    #[must_use]
    pub fn z_projection(mut self, enabled: bool) -> Self {
        self.params.z_projection = enabled;
        self
    }

    pub fn build(self) -> AutocropParameters {
        self.params
    }
}

// ============================================================
// CLI Overrides
// ============================================================

/// Values given on the command line; `None` keeps the file value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub xcal: Option<f64>,
    pub ycal: Option<f64>,
    pub zcal: Option<f64>,
    pub channel: Option<usize>,
    pub threads: Option<usize>,
    pub merge: Option<bool>,
    pub z_projection: Option<bool>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Commented example config with every default
pub fn example_config() -> String {
    format!(
        r#"# nucleus-autocrop configuration
#
# Looked up as ./{local} or <config dir>/{dir}/config.toml
# when no --config is given. Legacy key:value files are accepted too.

# Padding added around every nucleus, in voxels
xCropBoxSize = {x}
yCropBoxSize = {y}
zCropBoxSize = {z}

# Physical volume range of a nucleus (calibrated units cubed)
minVolumeNucleus = {min:.1}
maxVolumeNucleus = {max:.1}

# Otsu results below this value engage the fallback threshold
thresholdOTSUComputing = {floor}

# Channel used to compute the threshold
channelToComputeThreshold = 0

# First slice of the fallback sub-stack (0 = back half of the stack)
slicesOTSUComputing = 0

# Merge boxes overlapping by this percentage of the smaller box
boxesPercentSurfaceToFilter = {pct}
boxesRegroupement = true

# Manual calibration (overrides image metadata)
# xcal = 0.1
# ycal = 0.1
# zcal = 0.2

# Labeling connectivity: 6, 18 or 26
connectivity = {conn}

# Worker threads (default: all cores)
# threads = 4

# Write an annotated z-projection per image
zProjection = true
"#,
        local = LOCAL_CONFIG_FILE,
        dir = USER_CONFIG_DIR,
        x = DEFAULT_X_CROP_BOX_SIZE,
        y = DEFAULT_Y_CROP_BOX_SIZE,
        z = DEFAULT_Z_CROP_BOX_SIZE,
        min = DEFAULT_MIN_VOLUME,
        max = DEFAULT_MAX_VOLUME,
        floor = DEFAULT_THRESHOLD_FLOOR,
        pct = DEFAULT_OVERLAP_PERCENT,
        conn = DEFAULT_CONNECTIVITY,
    )
}

// ============================================================
// Tests
// ============================================================
