use serde::{Deserialize, Serialize};

use super::model::{DetectorModel, CHIP_NB_COLUMN, CHIP_NB_ROW};

/// Counter depth of the raw detector output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelDepth {
    #[default]
    Bpp16,
    Bpp32,
}

impl PixelDepth {
    /// Format code of the exposure-parameter upload.
    pub fn vendor_format(self) -> u32 {
        match self {
            PixelDepth::Bpp16 => 0,
            PixelDepth::Bpp32 => 1,
        }
    }

    pub fn sample_type(self) -> SampleType {
        match self {
            PixelDepth::Bpp16 => SampleType::U16,
            PixelDepth::Bpp32 => SampleType::U32,
        }
    }
}

/// Element type of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    U16,
    U32,
    F32,
}

impl SampleType {
    pub fn bytes(self) -> usize {
        match self {
            SampleType::U16 => 2,
            SampleType::U32 | SampleType::F32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageGeometry {
    pub width: usize,
    pub height: usize,
}

impl ImageGeometry {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Uncorrected canonical size of `module_count` stacked modules.
    pub fn uncorrected(chips_per_module: usize, module_count: usize) -> Self {
        Self::new(CHIP_NB_COLUMN * chips_per_module, CHIP_NB_ROW * module_count)
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// What a buffer slot has to hold for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameDim {
    pub geometry: ImageGeometry,
    pub sample: SampleType,
}

impl FrameDim {
    pub fn new(geometry: ImageGeometry, sample: SampleType) -> Self {
        Self { geometry, sample }
    }

    pub fn size_in_bytes(&self) -> usize {
        self.geometry.pixel_count() * self.sample.bytes()
    }
}

/// Correction switches, checked against the model by the camera settings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Corrections {
    pub double_pixel: bool,
    pub geometric: bool,
}

/// Geometry seen by the buffer manager for the given model and corrections.
///
/// Falls back to the uncorrected size when a flag is set on a model without a
/// corrected size; settings validation prevents that combination.
pub fn derive_geometry(
    model: DetectorModel,
    chips_per_module: usize,
    module_count: usize,
    corrections: Corrections,
) -> ImageGeometry {
    let base = ImageGeometry::uncorrected(chips_per_module, module_count);
    if corrections.geometric {
        model.geometric_size().unwrap_or(base)
    } else if corrections.double_pixel {
        model.double_pixel_size().unwrap_or(base)
    } else {
        base
    }
}

/// Output frame dimension for a depth and correction combination.
pub fn derive_frame_dim(
    model: DetectorModel,
    chips_per_module: usize,
    module_count: usize,
    depth: PixelDepth,
    corrections: Corrections,
) -> FrameDim {
    let geometry = derive_geometry(model, chips_per_module, module_count, corrections);
    let sample = if corrections.geometric {
        SampleType::F32
    } else {
        depth.sample_type()
    };
    FrameDim::new(geometry, sample)
}
