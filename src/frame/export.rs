use image::{ImageBuffer, Luma};
use log::{debug, info};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::types::{Frame, PixelData};
use crate::detector::SampleType;
use crate::error::{Result, XpadError};

/// Sidecar describing a raw frame dump.
#[derive(Debug, Serialize)]
pub struct FrameMetadata {
    pub sequence: usize,
    pub acq_frame_nb: usize,
    pub width: usize,
    pub height: usize,
    pub sample: SampleType,
    pub timestamp: String,
    pub total_counts: u64,
}

impl FrameMetadata {
    pub fn from_frame(sequence: usize, frame: &Frame) -> Self {
        Self {
            sequence,
            acq_frame_nb: frame.info.acq_frame_nb,
            width: frame.width(),
            height: frame.height(),
            sample: frame.dim.sample,
            timestamp: frame.info.timestamp.to_rfc3339(),
            total_counts: frame.data.total_counts(),
        }
    }
}

/// Writes `frame` under `folder` as a little-endian dump with a JSON sidecar,
/// plus a PNG for 16-bit frames. `sequence` keeps live frames, which all carry
/// acquisition number 0, apart. Returns the path of the dump.
pub fn save_frame(frame: &Frame, sequence: usize, folder: &Path) -> Result<PathBuf> {
    fs::create_dir_all(folder)?;
    let stem = folder.join(format!("frame_{:05}", sequence));

    let raw_path = stem.with_extension("raw");
    File::create(&raw_path)?.write_all(&frame.data.to_le_bytes())?;

    let metadata = FrameMetadata::from_frame(sequence, frame);
    let sidecar = File::create(stem.with_extension("json"))?;
    serde_json::to_writer_pretty(sidecar, &metadata)?;

    if let PixelData::U16(pixels) = &frame.data {
        let png_path = stem.with_extension("png");
        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(frame.width() as u32, frame.height() as u32, pixels.clone())
                .ok_or_else(|| XpadError::frame_processing("frame data does not match its size"))?;
        image.save(&png_path)?;
        debug!("Saved {}", png_path.display());
    }

    debug!("Saved frame {} to {}", frame.info.acq_frame_nb, raw_path.display());
    Ok(raw_path)
}

/// Writes one CSV line per saved frame.
pub fn save_acquisition_metadata(metadata: &[FrameMetadata], save_path: &Path) -> Result<()> {
    info!("Saving acquisition metadata to {}", save_path.display());

    let mut file = File::create(save_path)?;
    writeln!(file, "sequence,acq_frame_nb,width,height,timestamp,total_counts")?;
    for entry in metadata {
        writeln!(
            file,
            "{},{},{},{},{},{}",
            entry.sequence, entry.acq_frame_nb, entry.width, entry.height, entry.timestamp, entry.total_counts
        )?;
    }

    info!("Successfully saved metadata for {} frames", metadata.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{FrameDim, ImageGeometry};
    use crate::frame::types::FrameInfo;

    #[test]
    fn test_save_16_bit_frame() {
        let dir = tempfile::tempdir().unwrap();
        let dim = FrameDim::new(ImageGeometry::new(4, 3), SampleType::U16);
        let frame = Frame::new(FrameInfo::new(2), dim, PixelData::U16((0..12).collect()));

        let raw_path = save_frame(&frame, 7, dir.path()).unwrap();
        assert_eq!(fs::read(&raw_path).unwrap().len(), 24);
        assert!(dir.path().join("frame_00007.png").exists());

        let sidecar = fs::read_to_string(dir.path().join("frame_00007.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(value["acq_frame_nb"], 2);
        assert_eq!(value["total_counts"], 66);
        assert_eq!(value["sample"], "u16");
    }

    #[test]
    fn test_float_frame_has_no_png() {
        let dir = tempfile::tempdir().unwrap();
        let dim = FrameDim::new(ImageGeometry::new(2, 2), SampleType::F32);
        let frame = Frame::new(FrameInfo::new(0), dim, PixelData::F32(vec![1.5; 4]));
        save_frame(&frame, 0, dir.path()).unwrap();
        assert!(!dir.path().join("frame_00000.png").exists());

        let metadata = vec![FrameMetadata::from_frame(0, &frame)];
        let csv = dir.path().join("metadata.csv");
        save_acquisition_metadata(&metadata, &csv).unwrap();
        assert_eq!(fs::read_to_string(csv).unwrap().lines().count(), 2);
    }
}
