//! Double-pixel correction.
//!
//! Pixels on each side of a chip seam (and of a module seam) are physically
//! 2.5 times wider than the others but read out as one value. Each seam pair
//! `(L, R)` is spread over five output pixels:
//!
//! ```text
//! lo = round(L / F)    ro = round(R / F)
//! [ lo, lo, L + R - 2 (lo + ro), ro, ro ]
//! ```
//!
//! which adds three columns (or rows) per seam and keeps `L + R` unchanged.
//! Columns are corrected first, then rows.

use super::types::Pixel;
use crate::detector::{ImageGeometry, CHIP_NB_COLUMN, CHIP_NB_ROW};
use crate::error::{Result, XpadError};

pub const DEFAULT_NORMALIZATION_FACTOR: f64 = 2.5;
/// Pixels added by each corrected seam.
pub const DOUBLE_PIXEL_GAP: usize = 3;

/// Spreads one seam pair. The middle value is clamped at zero, which only
/// happens with a factor below 2.5.
pub fn split_seam(left: u64, right: u64, factor: f64) -> [u64; 5] {
    let lo = (left as f64 / factor).round() as u64;
    let ro = (right as f64 / factor).round() as u64;
    let middle = (left as i128 + right as i128 - 2 * (lo as i128 + ro as i128)).max(0) as u64;
    [lo, lo, middle, ro, ro]
}

/// Source of one output run along an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cell {
    /// One pixel copied as is.
    Copy(usize),
    /// A seam pair spread over five pixels.
    Seam(usize, usize),
}

impl Cell {
    fn width(self) -> usize {
        match self {
            Cell::Copy(_) => 1,
            Cell::Seam(..) => 5,
        }
    }
}

/// Cells for an axis made of `segments` blocks of `segment` pixels.
fn axis_cells(segment: usize, segments: usize) -> Vec<Cell> {
    let len = segment * segments;
    let mut cells = Vec::with_capacity(len);
    let mut i = 0;
    while i < len {
        if (i + 1) % segment == 0 && i + 1 < len {
            cells.push(Cell::Seam(i, i + 1));
            i += 2;
        } else {
            cells.push(Cell::Copy(i));
            i += 1;
        }
    }
    cells
}

fn axis_len(cells: &[Cell]) -> usize {
    cells.iter().map(|cell| cell.width()).sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoublePixelCorrector {
    chips: usize,
    modules: usize,
    factor: f64,
    column_cells: Vec<Cell>,
    row_cells: Vec<Cell>,
}

impl DoublePixelCorrector {
    pub fn new(chips: usize, modules: usize, factor: f64) -> Result<Self> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(XpadError::config(format!(
                "normalization factor must be a positive number, got {}",
                factor
            )));
        }
        if chips == 0 || modules == 0 {
            return Err(XpadError::config("double pixel correction needs at least one chip and one module"));
        }
        Ok(Self {
            chips,
            modules,
            factor,
            column_cells: axis_cells(CHIP_NB_COLUMN, chips),
            row_cells: axis_cells(CHIP_NB_ROW, modules),
        })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn input_geometry(&self) -> ImageGeometry {
        ImageGeometry::uncorrected(self.chips, self.modules)
    }

    pub fn output_geometry(&self) -> ImageGeometry {
        ImageGeometry::new(axis_len(&self.column_cells), axis_len(&self.row_cells))
    }

    /// Corrects `input` (uncorrected geometry) into `output` (corrected
    /// geometry), both row-major.
    pub fn correct<T: Pixel>(&self, input: &[T], output: &mut [T]) -> Result<()> {
        let src = self.input_geometry();
        let dst = self.output_geometry();
        if input.len() != src.pixel_count() || output.len() != dst.pixel_count() {
            return Err(XpadError::frame_processing(format!(
                "double pixel correction expects {} -> {} pixels, got {} -> {}",
                src.pixel_count(),
                dst.pixel_count(),
                input.len(),
                output.len()
            )));
        }

        // column pass: src.height rows of dst.width
        let mut widened = vec![0u64; dst.width * src.height];
        for (row, out) in input.chunks_exact(src.width).zip(widened.chunks_exact_mut(dst.width)) {
            self.spread(&self.column_cells, |i| row[i].to_u64(), out);
        }

        // row pass, one column at a time
        let mut column = vec![0u64; dst.height];
        for col in 0..dst.width {
            self.spread(&self.row_cells, |r| widened[r * dst.width + col], &mut column);
            for (row, value) in column.iter().enumerate() {
                output[row * dst.width + col] = T::saturating_from(*value);
            }
        }

        Ok(())
    }

    fn spread(&self, cells: &[Cell], value: impl Fn(usize) -> u64, out: &mut [u64]) {
        let mut pos = 0;
        for cell in cells {
            match *cell {
                Cell::Copy(i) => out[pos] = value(i),
                Cell::Seam(left, right) => {
                    let spread = split_seam(value(left), value(right), self.factor);
                    out[pos..pos + 5].copy_from_slice(&spread);
                }
            }
            pos += cell.width();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorModel;
    use rand::Rng;

    #[test]
    fn test_split_seam_conserves_counts() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let left: u64 = rng.gen_range(0..200_000);
            let right: u64 = rng.gen_range(0..200_000);
            let spread = split_seam(left, right, DEFAULT_NORMALIZATION_FACTOR);
            assert_eq!(spread.iter().sum::<u64>(), left + right, "L={} R={}", left, right);

            let lo = (left as f64 / 2.5).round() as u64;
            let ro = (right as f64 / 2.5).round() as u64;
            assert_eq!(spread[0], lo);
            assert_eq!(spread[4], ro);
            assert_eq!(spread[2] as i128, left as i128 + right as i128 - 2 * (lo + ro) as i128);
        }
    }

    #[test]
    fn test_split_seam_small_values() {
        assert_eq!(split_seam(0, 0, 2.5), [0, 0, 0, 0, 0]);
        assert_eq!(split_seam(5, 5, 2.5), [2, 2, 2, 2, 2]);
        assert_eq!(split_seam(1, 0, 2.5), [0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_output_matches_model_constants() {
        let s70 = DoublePixelCorrector::new(7, 1, 2.5).unwrap();
        assert_eq!(Some(s70.output_geometry()), DetectorModel::ImxpadS70.double_pixel_size());
        let s140 = DoublePixelCorrector::new(7, 2, 2.5).unwrap();
        assert_eq!(Some(s140.output_geometry()), DetectorModel::ImxpadS140.double_pixel_size());
        assert_eq!(s140.output_geometry().width, 560 + 6 * DOUBLE_PIXEL_GAP);
        assert_eq!(s140.output_geometry().height, 240 + DOUBLE_PIXEL_GAP);
    }

    #[test]
    fn test_uniform_image_conserves_total() {
        let corrector = DoublePixelCorrector::new(7, 2, 2.5).unwrap();
        let input = vec![10u32; corrector.input_geometry().pixel_count()];
        let mut output = vec![0u32; corrector.output_geometry().pixel_count()];
        corrector.correct(&input, &mut output).unwrap();

        let before: u64 = input.iter().map(|&p| p as u64).sum();
        let after: u64 = output.iter().map(|&p| p as u64).sum();
        assert_eq!(before, after);
        // interior pixel untouched
        assert_eq!(output[5 * 578 + 5], 10);
    }

    #[test]
    fn test_column_seam_layout() {
        let corrector = DoublePixelCorrector::new(2, 1, 2.5).unwrap();
        let src = corrector.input_geometry();
        let dst = corrector.output_geometry();
        assert_eq!(dst.width, 163);
        let mut input = vec![0u16; src.pixel_count()];
        input[79] = 25; // left of the seam, row 0
        input[80] = 50; // right of the seam, row 0
        let mut output = vec![0u16; dst.pixel_count()];
        corrector.correct(&input, &mut output).unwrap();
        assert_eq!(&output[79..84], &[10, 10, 15, 20, 20]);
    }

    #[test]
    fn test_row_seam_layout() {
        let corrector = DoublePixelCorrector::new(1, 2, 2.5).unwrap();
        let src = corrector.input_geometry();
        let dst = corrector.output_geometry();
        assert_eq!(dst.height, 243);
        let mut input = vec![0u32; src.pixel_count()];
        input[119 * src.width + 3] = 5;
        input[120 * src.width + 3] = 5;
        let mut output = vec![0u32; dst.pixel_count()];
        corrector.correct(&input, &mut output).unwrap();
        let column: Vec<u32> = (119..124).map(|r| output[r * dst.width + 3]).collect();
        assert_eq!(column, vec![2, 2, 2, 2, 2]);
    }

    #[test]
    fn test_invalid_factor_rejected() {
        assert!(DoublePixelCorrector::new(7, 1, 0.0).is_err());
        assert!(DoublePixelCorrector::new(7, 1, f64::NAN).is_err());
    }

    #[test]
    fn test_wrong_buffer_sizes_rejected() {
        let corrector = DoublePixelCorrector::new(7, 1, 2.5).unwrap();
        let input = vec![0u16; 10];
        let mut output = vec![0u16; 10];
        assert!(corrector.correct(&input, &mut output).is_err());
    }
}
