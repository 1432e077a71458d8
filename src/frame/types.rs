use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::detector::{FrameDim, SampleType};

/// Integer counter sample handled by the host-side transforms.
pub trait Pixel: Copy + Default + Send + Sync + 'static {
    fn to_u64(self) -> u64;
    fn saturating_from(value: u64) -> Self;
}

impl Pixel for u16 {
    fn to_u64(self) -> u64 {
        self as u64
    }

    fn saturating_from(value: u64) -> Self {
        value.min(u16::MAX as u64) as u16
    }
}

impl Pixel for u32 {
    fn to_u64(self) -> u64 {
        self as u64
    }

    fn saturating_from(value: u64) -> Self {
        value.min(u32::MAX as u64) as u32
    }
}

/// Owned, size-tagged pixel storage.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U16(Vec<u16>),
    U32(Vec<u32>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn zeroed(sample: SampleType, len: usize) -> Self {
        match sample {
            SampleType::U16 => PixelData::U16(vec![0; len]),
            SampleType::U32 => PixelData::U32(vec![0; len]),
            SampleType::F32 => PixelData::F32(vec![0.0; len]),
        }
    }

    pub fn sample_type(&self) -> SampleType {
        match self {
            PixelData::U16(_) => SampleType::U16,
            PixelData::U32(_) => SampleType::U32,
            PixelData::F32(_) => SampleType::F32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PixelData::U16(v) => v.len(),
            PixelData::U32(v) => v.len(),
            PixelData::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fill_zero(&mut self) {
        match self {
            PixelData::U16(v) => v.fill(0),
            PixelData::U32(v) => v.fill(0),
            PixelData::F32(v) => v.fill(0.0),
        }
    }

    /// Sum of all samples, floats truncated.
    pub fn total_counts(&self) -> u64 {
        match self {
            PixelData::U16(v) => v.iter().map(|&p| p as u64).sum(),
            PixelData::U32(v) => v.iter().map(|&p| p as u64).sum(),
            PixelData::F32(v) => v.iter().map(|&p| p.max(0.0) as u64).sum(),
        }
    }

    /// Little-endian byte image of the samples.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            PixelData::U16(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
            PixelData::U32(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
            PixelData::F32(v) => v.iter().flat_map(|p| p.to_le_bytes()).collect(),
        }
    }
}

/// Metadata attached to a frame when it is published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub acq_frame_nb: usize,
    pub timestamp: DateTime<Utc>,
}

impl FrameInfo {
    pub fn new(acq_frame_nb: usize) -> Self {
        Self {
            acq_frame_nb,
            timestamp: Utc::now(),
        }
    }
}

/// A published frame, owned by the buffer manager.
#[derive(Debug, Clone)]
pub struct Frame {
    pub info: FrameInfo,
    pub dim: FrameDim,
    pub data: PixelData,
}

impl Frame {
    pub fn new(info: FrameInfo, dim: FrameDim, data: PixelData) -> Self {
        Self { info, dim, data }
    }

    pub fn width(&self) -> usize {
        self.dim.geometry.width
    }

    pub fn height(&self) -> usize {
        self.dim.geometry.height
    }
}

pub type ArcFrame = Arc<Frame>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_from() {
        assert_eq!(u16::saturating_from(70_000), u16::MAX);
        assert_eq!(u16::saturating_from(12), 12);
        assert_eq!(u32::saturating_from(u64::MAX), u32::MAX);
    }

    #[test]
    fn test_le_bytes_length() {
        let data = PixelData::zeroed(SampleType::U32, 10);
        assert_eq!(data.to_le_bytes().len(), 40);
        assert_eq!(data.sample_type(), SampleType::U32);
    }
}
