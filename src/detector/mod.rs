mod geometry;
mod model;
mod session;

pub use geometry::{derive_frame_dim, derive_geometry, Corrections, FrameDim, ImageGeometry, PixelDepth, SampleType};
pub use model::{
    CorrectionSupport, DetectorModel, CHIPS_PER_MODULE, CHIP_NB_COLUMN, CHIP_NB_ROW, PIXEL_SIZE_UM,
};
pub use session::{number_to_mask, DeviceSession};
