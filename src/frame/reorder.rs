//! Placement of V1 driver lines into the canonical image.
//!
//! The V1 driver emits one line per (row, module) pair, interleaving modules:
//! row 1 of every module, then row 2 of every module, and so on. Each line is
//! framed by a header and a footer:
//!
//! ```text
//! | sync | module | - | - | row | payload (chips * 80) ... | footer |
//! ```
//!
//! `module` is the 0-based position of the module in the acquisition and
//! `row` the 1-based row within that module.

use super::types::Pixel;
use crate::detector::{CHIP_NB_COLUMN, CHIP_NB_ROW};
use crate::error::{Result, XpadError};

pub const HEADER_WORDS: usize = 5;
pub const FOOTER_WORDS: usize = 1;
pub const SYNC_WORD: usize = 0;
pub const MODULE_WORD: usize = 1;
pub const ROW_WORD: usize = 4;

/// Shape of a raw V1 frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLayout {
    pub chips: usize,
    pub modules: usize,
}

impl LineLayout {
    pub fn new(chips: usize, modules: usize) -> Self {
        Self { chips, modules }
    }

    pub fn payload_words(&self) -> usize {
        self.chips * CHIP_NB_COLUMN
    }

    pub fn line_words(&self) -> usize {
        HEADER_WORDS + self.payload_words() + FOOTER_WORDS
    }

    pub fn line_count(&self) -> usize {
        CHIP_NB_ROW * self.modules
    }

    /// Samples in one raw frame.
    pub fn raw_len(&self) -> usize {
        self.line_count() * self.line_words()
    }

    /// Samples in the canonical image the lines are placed into.
    pub fn image_len(&self) -> usize {
        self.line_count() * self.payload_words()
    }

    /// Destination row of a line, from its header fields.
    pub fn dest_row(&self, module: usize, row_in_module: usize) -> Option<usize> {
        if module >= self.modules || row_in_module == 0 || row_in_module > CHIP_NB_ROW {
            return None;
        }
        Some(CHIP_NB_ROW * module + (row_in_module - 1))
    }
}

/// Copies every line payload of `raw` to its row in `image`.
///
/// `image` is not cleared here; rows of absent modules keep whatever the
/// caller put there, which must be zero.
pub fn reorder_lines<T: Pixel>(raw: &[T], layout: &LineLayout, image: &mut [T]) -> Result<()> {
    let line_words = layout.line_words();
    let width = layout.payload_words();

    if raw.len() % line_words != 0 {
        return Err(XpadError::frame_processing(format!(
            "raw frame of {} words is not a whole number of {}-word lines",
            raw.len(),
            line_words
        )));
    }
    if image.len() != layout.image_len() {
        return Err(XpadError::frame_processing(format!(
            "destination holds {} pixels, expected {}",
            image.len(),
            layout.image_len()
        )));
    }

    for (index, line) in raw.chunks_exact(line_words).enumerate() {
        let module = line[MODULE_WORD].to_u64() as usize;
        let row = line[ROW_WORD].to_u64() as usize;
        let dest = layout.dest_row(module, row).ok_or_else(|| {
            XpadError::frame_processing(format!(
                "line {} has an invalid header (module {}, row {})",
                index, module, row
            ))
        })?;

        let payload = &line[HEADER_WORDS..HEADER_WORDS + width];
        image[dest * width..(dest + 1) * width].copy_from_slice(payload);
    }

    Ok(())
}

/// Builds one raw line. Used by the simulated driver and by tests.
pub fn encode_line<T: Pixel>(module: usize, row_in_module: usize, payload: &[T], out: &mut [T]) {
    out[SYNC_WORD] = T::saturating_from(0xAA55);
    out[MODULE_WORD] = T::saturating_from(module as u64);
    out[2] = T::default();
    out[3] = T::default();
    out[ROW_WORD] = T::saturating_from(row_in_module as u64);
    out[HEADER_WORDS..HEADER_WORDS + payload.len()].copy_from_slice(payload);
    let footer = HEADER_WORDS + payload.len();
    out[footer] = T::saturating_from(0xF0F0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel_value(module: usize, row: usize, col: usize) -> u16 {
        (module * 1000 + row * 7 + col % 5 + 1) as u16
    }

    /// Raw frame in driver order with a value identifying each pixel.
    fn interleaved_raw(layout: &LineLayout) -> Vec<u16> {
        let mut raw = vec![0u16; layout.raw_len()];
        let width = layout.payload_words();
        let mut lines = raw.chunks_exact_mut(layout.line_words());
        for row in 0..CHIP_NB_ROW {
            for module in 0..layout.modules {
                let payload: Vec<u16> = (0..width).map(|c| pixel_value(module, row, c)).collect();
                encode_line(module, row + 1, &payload, lines.next().unwrap());
            }
        }
        raw
    }

    #[test]
    fn test_reorder_places_every_module_row() {
        for modules in 1..=3 {
            let layout = LineLayout::new(7, modules);
            let raw = interleaved_raw(&layout);
            let mut image = vec![0u16; layout.image_len()];
            reorder_lines(&raw, &layout, &mut image).unwrap();

            let width = layout.payload_words();
            for module in 0..modules {
                for row in 0..CHIP_NB_ROW {
                    let dest = CHIP_NB_ROW * module + row;
                    for col in [0, 1, 79, 80, width - 1] {
                        assert_eq!(
                            image[dest * width + col],
                            pixel_value(module, row, col),
                            "module {} row {} col {}",
                            module,
                            row,
                            col
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_absent_module_rows_stay_zero() {
        let layout = LineLayout::new(7, 2);
        let raw = interleaved_raw(&layout);
        // keep only module 0 lines
        let module0: Vec<u16> = raw
            .chunks_exact(layout.line_words())
            .filter(|line| line[MODULE_WORD] == 0)
            .flatten()
            .copied()
            .collect();
        let mut image = vec![0u16; layout.image_len()];
        reorder_lines(&module0, &layout, &mut image).unwrap();

        let width = layout.payload_words();
        assert!(image[CHIP_NB_ROW * width..].iter().all(|&p| p == 0));
        assert!(image[..CHIP_NB_ROW * width].iter().all(|&p| p != 0));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let layout = LineLayout::new(7, 1);
        let mut raw = interleaved_raw(&layout);
        raw[MODULE_WORD] = 3;
        let mut image = vec![0u16; layout.image_len()];
        assert!(reorder_lines(&raw, &layout, &mut image).is_err());

        let mut raw = interleaved_raw(&layout);
        raw[ROW_WORD] = 0;
        assert!(reorder_lines(&raw, &layout, &mut image).is_err());
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let layout = LineLayout::new(7, 1);
        let raw = interleaved_raw(&layout);
        let mut image = vec![0u16; layout.image_len()];
        assert!(reorder_lines(&raw[..raw.len() - 1], &layout, &mut image).is_err());
    }

    #[test]
    fn test_reorder_32_bit() {
        let layout = LineLayout::new(1, 1);
        let mut raw = vec![0u32; layout.raw_len()];
        for (row, line) in raw.chunks_exact_mut(layout.line_words()).rev().enumerate() {
            let payload = vec![100_000 + row as u32; 80];
            encode_line(0, CHIP_NB_ROW - row, &payload, line);
        }
        let mut image = vec![0u32; layout.image_len()];
        reorder_lines(&raw, &layout, &mut image).unwrap();
        assert_eq!(image[0], 100_000 + (CHIP_NB_ROW - 1) as u32);
        assert_eq!(image[(CHIP_NB_ROW - 1) * 80], 100_000);
    }
}
