use crossbeam::channel::Sender;

use super::config::{AcquisitionMode, CameraSettings, PipelineTuning};
use crate::detector::{DeviceSession, PixelDepth};
use crate::error::{Result, XpadError};
use crate::frame::{Correction, DoublePixelCorrector, FrameLayout, LineLayout, RawLayout};
use crate::transport::{ApiVersion, CalibrationRequest, ConfigUpload, ExposureParameters};

/// Snapshot of everything one acquisition needs. The worker reads nothing
/// else.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    pub generation: u64,
    /// 0 selects live mode.
    pub nb_frames: usize,
    pub mode: AcquisitionMode,
    pub depth: PixelDepth,
    pub exposure: ExposureParameters,
    pub layout: FrameLayout,
    pub tuning: PipelineTuning,
}

impl AcquisitionRequest {
    pub fn new(session: &DeviceSession, settings: &CameraSettings, generation: u64) -> Result<Self> {
        Ok(Self {
            generation,
            nb_frames: settings.nb_frames,
            mode: settings.acquisition_mode,
            depth: settings.pixel_depth,
            exposure: settings.exposure_parameters(),
            layout: frame_layout(session, settings)?,
            tuning: settings.tuning,
        })
    }

    pub fn is_live(&self) -> bool {
        self.nb_frames == 0
    }

    /// Live mode and synchronous mode both go through the blocking call.
    pub fn is_sequential(&self) -> bool {
        self.is_live() || self.mode == AcquisitionMode::Synchronous
    }

    /// Frames read out per transport sequence.
    pub fn frames_per_cycle(&self) -> usize {
        self.nb_frames.max(1)
    }
}

/// How raw frames of `session` become published frames under `settings`.
pub fn frame_layout(session: &DeviceSession, settings: &CameraSettings) -> Result<FrameLayout> {
    let corrections = settings.corrections();
    let output = session.frame_dim(settings.pixel_depth, corrections);

    if corrections.geometric {
        if settings.is_live() {
            return Err(XpadError::config(
                "Geometric correction is not available in live mode",
            ));
        }
        return Ok(FrameLayout {
            raw: RawLayout {
                sample: output.sample,
                geometry: output.geometry,
                lines: None,
            },
            output,
            correction: Correction::Geometric,
        });
    }

    let chips = session.chips_per_module();
    let modules = session.module_count();
    let lines = match session.api_version() {
        ApiVersion::V1 => Some(LineLayout::new(chips, modules)),
        ApiVersion::V2 => None,
    };
    let correction = if corrections.double_pixel {
        let corrector = DoublePixelCorrector::new(chips, modules, settings.normalization_factor)?;
        if corrector.output_geometry() != output.geometry {
            return Err(XpadError::config(format!(
                "Double pixel correction of {} expects a {}x{} image, {} module(s) give {}x{}",
                session.model(),
                output.geometry.width,
                output.geometry.height,
                modules,
                corrector.output_geometry().width,
                corrector.output_geometry().height
            )));
        }
        Correction::DoublePixel(corrector)
    } else {
        Correction::None
    };

    Ok(FrameLayout {
        raw: RawLayout {
            sample: settings.pixel_depth.sample_type(),
            geometry: session.base_geometry(),
            lines,
        },
        output,
        correction,
    })
}

/// Expert operations answered synchronously by the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpertRequest {
    Upload(ConfigUpload),
    /// Reboots the module controllers; clears a fault.
    Reset,
    Debug(bool),
}

pub(crate) enum Command {
    Start(AcquisitionRequest),
    /// Next cycle of a live acquisition, posted by the worker itself.
    LiveCycle(AcquisitionRequest),
    Calibrate(CalibrationRequest),
    Expert(ExpertRequest, Sender<Result<()>>),
    Exit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ImageGeometry, SampleType};
    use crate::transport::{SimConfig, SimulatedTransport};
    use std::sync::Arc;

    fn session(model: &str, module_mask: u32, api_version: ApiVersion) -> DeviceSession {
        let transport = Arc::new(SimulatedTransport::new(SimConfig {
            module_mask,
            api_version,
            ..SimConfig::default()
        }));
        DeviceSession::open(model, transport).unwrap()
    }

    #[test]
    fn test_plain_layout_v2() {
        let session = session("IMXPAD_S140", 0b11, ApiVersion::V2);
        let layout = frame_layout(&session, &CameraSettings::default()).unwrap();
        assert_eq!(layout.raw.lines, None);
        assert_eq!(layout.correction, Correction::None);
        assert_eq!(layout.output.geometry, ImageGeometry::new(560, 240));
    }

    #[test]
    fn test_v1_layout_has_lines() {
        let session = session("IMXPAD_S70", 0b1, ApiVersion::V1);
        let settings = CameraSettings::new().with_double_pixel_correction(true);
        let layout = frame_layout(&session, &settings).unwrap();
        assert_eq!(layout.raw.lines, Some(LineLayout::new(7, 1)));
        assert_eq!(layout.output.geometry, ImageGeometry::new(578, 120));
        assert!(matches!(layout.correction, Correction::DoublePixel(_)));
    }

    #[test]
    fn test_double_pixel_needs_every_module() {
        let session = session("IMXPAD_S140", 0b1, ApiVersion::V2);
        let settings = CameraSettings::new().with_double_pixel_correction(true);
        assert!(frame_layout(&session, &settings).unwrap_err().is_config());
    }

    #[test]
    fn test_geometric_layout_is_float() {
        let session = session("IMXPAD_S340", 0x1f, ApiVersion::V1);
        let settings = CameraSettings::new()
            .with_acquisition_mode(AcquisitionMode::Asynchronous)
            .with_geom_correction(true);
        let layout = frame_layout(&session, &settings).unwrap();
        assert!(layout.geom_corr());
        assert_eq!(layout.raw.sample, SampleType::F32);
        assert_eq!(layout.raw.lines, None);
        assert_eq!(layout.output.geometry, ImageGeometry::new(578, 612));
    }

    #[test]
    fn test_geometric_refused_in_live_mode() {
        let session = session("IMXPAD_S340", 0x1f, ApiVersion::V2);
        let settings = CameraSettings::new()
            .with_acquisition_mode(AcquisitionMode::Asynchronous)
            .with_geom_correction(true)
            .with_nb_frames(0);
        assert!(frame_layout(&session, &settings).unwrap_err().is_config());
        assert!(AcquisitionRequest::new(&session, &settings, 1).unwrap_err().is_config());
    }

    #[test]
    fn test_live_request_is_sequential() {
        let session = session("IMXPAD_S70", 0b1, ApiVersion::V2);
        let settings = CameraSettings::new()
            .with_nb_frames(0)
            .with_acquisition_mode(AcquisitionMode::Asynchronous);
        let request = AcquisitionRequest::new(&session, &settings, 1).unwrap();
        assert!(request.is_live());
        assert!(request.is_sequential());
        assert_eq!(request.frames_per_cycle(), 1);
        assert_eq!(request.exposure.nb_images, 1);
    }
}
