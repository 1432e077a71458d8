mod buffer;
pub mod correction;
mod export;
mod processor;
pub mod reorder;
mod types;

pub use buffer::{FrameBuffer, RawArena, RawBuffer};
pub use correction::{DoublePixelCorrector, DEFAULT_NORMALIZATION_FACTOR};
pub use export::{save_acquisition_metadata, save_frame, FrameMetadata};
pub use processor::{Correction, FrameLayout, FrameProcessor, RawLayout};
pub use reorder::LineLayout;
pub use types::{ArcFrame, Frame, FrameInfo, Pixel, PixelData};
