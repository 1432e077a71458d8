use std::fmt;
use std::str::FromStr;

use super::geometry::ImageGeometry;
use crate::error::XpadError;

/// Rows of one chip.
pub const CHIP_NB_ROW: usize = 120;
/// Columns of one chip.
pub const CHIP_NB_COLUMN: usize = 80;
/// Every supported model carries seven chips per module.
pub const CHIPS_PER_MODULE: usize = 7;
/// Pixel pitch in micrometres, both axes.
pub const PIXEL_SIZE_UM: f64 = 130.0;

/// Detector models understood by the vendor driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorModel {
    Backplane,
    Hub,
    ImxpadS70,
    ImxpadS140,
    ImxpadS340,
    ImxpadS540,
}

/// Which correction, if any, a model supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionSupport {
    None,
    /// Seam redistribution done on the host.
    DoublePixel,
    /// Done by the vendor driver, float output.
    Geometric,
}

impl DetectorModel {
    pub const ALL: [DetectorModel; 6] = [
        DetectorModel::Backplane,
        DetectorModel::Hub,
        DetectorModel::ImxpadS70,
        DetectorModel::ImxpadS140,
        DetectorModel::ImxpadS340,
        DetectorModel::ImxpadS540,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectorModel::Backplane => "BACKPLANE",
            DetectorModel::Hub => "HUB",
            DetectorModel::ImxpadS70 => "IMXPAD_S70",
            DetectorModel::ImxpadS140 => "IMXPAD_S140",
            DetectorModel::ImxpadS340 => "IMXPAD_S340",
            DetectorModel::ImxpadS540 => "IMXPAD_S540",
        }
    }

    /// Model identifier handed to the driver at init.
    pub fn vendor_code(self) -> u16 {
        match self {
            DetectorModel::Backplane => 0,
            DetectorModel::Hub => 1,
            DetectorModel::ImxpadS70 => 2,
            DetectorModel::ImxpadS140 => 3,
            DetectorModel::ImxpadS340 => 4,
            DetectorModel::ImxpadS540 => 5,
        }
    }

    pub fn correction_support(self) -> CorrectionSupport {
        match self {
            DetectorModel::ImxpadS70 | DetectorModel::ImxpadS140 => CorrectionSupport::DoublePixel,
            DetectorModel::ImxpadS340 | DetectorModel::ImxpadS540 => CorrectionSupport::Geometric,
            DetectorModel::Backplane | DetectorModel::Hub => CorrectionSupport::None,
        }
    }

    /// Image size once double-pixel correction is applied.
    pub fn double_pixel_size(self) -> Option<ImageGeometry> {
        match self {
            DetectorModel::ImxpadS70 => Some(ImageGeometry::new(578, 120)),
            DetectorModel::ImxpadS140 => Some(ImageGeometry::new(578, 243)),
            _ => None,
        }
    }

    /// Image size produced by the driver's geometric correction.
    pub fn geometric_size(self) -> Option<ImageGeometry> {
        match self {
            DetectorModel::ImxpadS340 => Some(ImageGeometry::new(578, 612)),
            DetectorModel::ImxpadS540 => Some(ImageGeometry::new(578, 981)),
            _ => None,
        }
    }
}

impl fmt::Display for DetectorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorModel {
    type Err = XpadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectorModel::ALL
            .into_iter()
            .find(|model| model.name() == s)
            .ok_or_else(|| XpadError::config(format!("Xpad model not supported: {}", s)))
    }
}
