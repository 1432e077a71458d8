use log::trace;

use super::correction::DoublePixelCorrector;
use super::reorder::{reorder_lines, LineLayout};
use super::types::{Pixel, PixelData};
use crate::detector::{FrameDim, ImageGeometry, SampleType};
use crate::error::{Result, XpadError};

/// Host-side transform applied between the raw buffer and the slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    None,
    DoublePixel(DoublePixelCorrector),
    /// Done by the driver; the raw buffer already holds the output.
    Geometric,
}

/// What the driver writes for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLayout {
    pub sample: SampleType,
    /// Image the raw data describes once lines are in place.
    pub geometry: ImageGeometry,
    /// Present when the driver emits headed, module-interleaved lines.
    pub lines: Option<LineLayout>,
}

impl RawLayout {
    pub fn raw_len(&self) -> usize {
        match &self.lines {
            Some(lines) => lines.raw_len(),
            None => self.geometry.pixel_count(),
        }
    }
}

/// Complete description of how one raw frame becomes a published frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    pub raw: RawLayout,
    pub output: FrameDim,
    pub correction: Correction,
}

impl FrameLayout {
    pub fn geom_corr(&self) -> bool {
        matches!(self.correction, Correction::Geometric)
    }
}

pub struct FrameProcessor;

impl FrameProcessor {
    /// Writes the canonical (and possibly corrected) image of `raw` into
    /// `slot`. The slot is fully overwritten.
    pub fn process_frame(layout: &FrameLayout, raw: &PixelData, slot: &mut PixelData) -> Result<()> {
        if raw.len() != layout.raw.raw_len() {
            return Err(XpadError::frame_processing(format!(
                "raw frame holds {} samples, layout expects {}",
                raw.len(),
                layout.raw.raw_len()
            )));
        }
        if slot.len() != layout.output.geometry.pixel_count() {
            return Err(XpadError::frame_processing(format!(
                "buffer slot holds {} pixels, frame needs {}",
                slot.len(),
                layout.output.geometry.pixel_count()
            )));
        }

        trace!(
            "Processing {:?} raw frame into {}x{} {:?}",
            raw.sample_type(),
            layout.output.geometry.width,
            layout.output.geometry.height,
            layout.output.sample
        );

        match (raw, slot) {
            (PixelData::U16(raw), PixelData::U16(slot)) => Self::process_counts(layout, raw, slot),
            (PixelData::U32(raw), PixelData::U32(slot)) => Self::process_counts(layout, raw, slot),
            (PixelData::F32(raw), PixelData::F32(slot)) if layout.geom_corr() => {
                slot.copy_from_slice(raw);
                Ok(())
            }
            (raw, slot) => Err(XpadError::frame_processing(format!(
                "cannot turn {:?} raw samples into a {:?} frame",
                raw.sample_type(),
                slot.sample_type()
            ))),
        }
    }

    fn process_counts<T: Pixel>(layout: &FrameLayout, raw: &[T], slot: &mut [T]) -> Result<()> {
        match (&layout.correction, &layout.raw.lines) {
            (Correction::None, None) => {
                slot.copy_from_slice(raw);
                Ok(())
            }
            (Correction::None, Some(lines)) => {
                slot.fill(T::default());
                reorder_lines(raw, lines, slot)
            }
            (Correction::DoublePixel(corrector), None) => corrector.correct(raw, slot),
            (Correction::DoublePixel(corrector), Some(lines)) => {
                let mut canonical = vec![T::default(); lines.image_len()];
                reorder_lines(raw, lines, &mut canonical)?;
                corrector.correct(&canonical, slot)
            }
            (Correction::Geometric, _) => Err(XpadError::frame_processing(
                "geometric correction produces float frames only",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::reorder::encode_line;

    fn plain_layout(sample: SampleType) -> FrameLayout {
        let geometry = ImageGeometry::uncorrected(7, 1);
        FrameLayout {
            raw: RawLayout {
                sample,
                geometry,
                lines: None,
            },
            output: FrameDim::new(geometry, sample),
            correction: Correction::None,
        }
    }

    #[test]
    fn test_plain_copy() {
        let layout = plain_layout(SampleType::U32);
        let raw = PixelData::U32((0..560 * 120).collect());
        let mut slot = PixelData::zeroed(SampleType::U32, 560 * 120);
        FrameProcessor::process_frame(&layout, &raw, &mut slot).unwrap();
        assert_eq!(slot, raw);
    }

    #[test]
    fn test_reorder_then_correct() {
        let lines = LineLayout::new(7, 2);
        let corrector = DoublePixelCorrector::new(7, 2, 2.5).unwrap();
        let layout = FrameLayout {
            raw: RawLayout {
                sample: SampleType::U16,
                geometry: ImageGeometry::uncorrected(7, 2),
                lines: Some(lines),
            },
            output: FrameDim::new(corrector.output_geometry(), SampleType::U16),
            correction: Correction::DoublePixel(corrector),
        };

        let mut raw = vec![0u16; lines.raw_len()];
        let payload = vec![3u16; lines.payload_words()];
        for (i, line) in raw.chunks_exact_mut(lines.line_words()).enumerate() {
            encode_line(i % 2, i / 2 + 1, &payload, line);
        }
        let raw = PixelData::U16(raw);
        let mut slot = PixelData::zeroed(SampleType::U16, 578 * 243);
        FrameProcessor::process_frame(&layout, &raw, &mut slot).unwrap();
        assert_eq!(slot.total_counts(), 3 * 560 * 240);
    }

    #[test]
    fn test_mismatched_sample_types() {
        let layout = plain_layout(SampleType::U16);
        let raw = PixelData::U16(vec![0; 560 * 120]);
        let mut slot = PixelData::zeroed(SampleType::U32, 560 * 120);
        assert!(FrameProcessor::process_frame(&layout, &raw, &mut slot).is_err());
    }

    #[test]
    fn test_wrong_raw_length() {
        let layout = plain_layout(SampleType::U16);
        let raw = PixelData::U16(vec![0; 10]);
        let mut slot = PixelData::zeroed(SampleType::U16, 560 * 120);
        assert!(FrameProcessor::process_frame(&layout, &raw, &mut slot).is_err());
    }
}
