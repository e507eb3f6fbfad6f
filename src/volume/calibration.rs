//! Physical voxel size
//!
//! A [`Calibration`] is resolved once per image, either from a manual
//! override that applies to the whole run or from the image metadata,
//! and is then passed by value to everything that needs physical units.

use serde::{Deserialize, Serialize};

/// Default voxel edge length when neither override nor metadata is usable
pub const DEFAULT_VOXEL_SIZE: f64 = 1.0;

/// Per-axis voxel size in physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            x: DEFAULT_VOXEL_SIZE,
            y: DEFAULT_VOXEL_SIZE,
            z: DEFAULT_VOXEL_SIZE,
        }
    }
}

impl Calibration {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Physical volume of one voxel
    pub fn voxel_volume(&self) -> f64 {
        self.x * self.y * self.z
    }

    /// All three sizes are finite and strictly positive
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.z]
            .iter()
            .all(|v| v.is_finite() && *v > 0.0)
    }
}

impl std::fmt::Display for Calibration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x:{}-y:{}-z:{}", self.x, self.y, self.z)
    }
}

/// Where a resolved calibration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSource {
    /// Run-wide manual override
    Manual,
    /// Image metadata
    Metadata,
    /// Neither was usable
    Default,
}

/// Chooses between the manual override and image metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct CalibrationResolver {
    manual: Option<Calibration>,
}

impl CalibrationResolver {
    /// Resolver that always prefers `manual` when it is set
    pub fn new(manual: Option<Calibration>) -> Self {
        Self { manual }
    }

    pub fn manual(&self) -> Option<Calibration> {
        self.manual
    }

    /// Resolve the calibration of one image
    pub fn resolve(&self, metadata: Option<Calibration>) -> (Calibration, CalibrationSource) {
        if let Some(manual) = self.manual.filter(Calibration::is_valid) {
            return (manual, CalibrationSource::Manual);
        }

        match metadata {
            Some(meta) if meta.is_valid() => (meta, CalibrationSource::Metadata),
            Some(meta) => {
                tracing::warn!(calibration = %meta, "ignoring invalid calibration from metadata");
                (Calibration::default(), CalibrationSource::Default)
            }
            None => (Calibration::default(), CalibrationSource::Default),
        }
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voxel_volume() {
        let cal = Calibration::new(0.5, 0.5, 2.0);
        assert!((cal.voxel_volume() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_default_is_unit() {
        let cal = Calibration::default();
        assert_eq!(cal.voxel_volume(), 1.0);
        assert!(cal.is_valid());
    }

    #[test]
    fn test_manual_wins_over_metadata() {
        let resolver = CalibrationResolver::new(Some(Calibration::new(0.1, 0.1, 0.3)));
        let (cal, source) = resolver.resolve(Some(Calibration::new(1.0, 1.0, 1.0)));
        assert_eq!(cal, Calibration::new(0.1, 0.1, 0.3));
        assert_eq!(source, CalibrationSource::Manual);
    }

    #[test]
    fn test_metadata_used_without_override() {
        let resolver = CalibrationResolver::default();
        let (cal, source) = resolver.resolve(Some(Calibration::new(0.2, 0.2, 0.5)));
        assert_eq!(cal.z, 0.5);
        assert_eq!(source, CalibrationSource::Metadata);
    }

    #[test]
    fn test_invalid_metadata_falls_back_to_default() {
        let resolver = CalibrationResolver::default();
        let (cal, source) = resolver.resolve(Some(Calibration::new(0.0, 1.0, f64::NAN)));
        assert_eq!(cal, Calibration::default());
        assert_eq!(source, CalibrationSource::Default);

        let (_, source) = resolver.resolve(None);
        assert_eq!(source, CalibrationSource::Default);
    }

    #[test]
    fn test_display_matches_report_format() {
        assert_eq!(Calibration::new(1.0, 2.0, 0.5).to_string(), "x:1-y:2-z:0.5");
    }
}
