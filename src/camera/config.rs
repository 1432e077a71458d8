use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::detector::{CorrectionSupport, Corrections, DetectorModel, PixelDepth};
use crate::error::{Result, XpadError};
use crate::frame::DEFAULT_NORMALIZATION_FACTOR;
use crate::transport::ExposureParameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrigMode {
    #[default]
    IntTrig,
    ExtGate,
    ExtTrigSingle,
    ExtTrigMult,
}

impl TrigMode {
    pub fn vendor_code(self) -> u32 {
        match self {
            TrigMode::IntTrig => 0,
            TrigMode::ExtGate => 1,
            TrigMode::ExtTrigSingle => 2,
            TrigMode::ExtTrigMult => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// All frames read out by one blocking call.
    #[default]
    Synchronous,
    /// Frames fetched one by one while the sequence runs.
    Asynchronous,
}

/// Timing parameters of the exposure-parameter upload besides the exposure
/// itself. All durations in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecificParameters {
    pub dead_time_us: u32,
    pub init_time_us: u32,
    pub shutter_time_us: u32,
    pub overflow_time_us: u32,
    pub n: u32,
    pub p: u32,
    pub busy_out_sel: u32,
    pub general_purpose: [u32; 4],
}

impl Default for SpecificParameters {
    fn default() -> Self {
        Self {
            dead_time_us: 5000,
            init_time_us: 0,
            shutter_time_us: 0,
            overflow_time_us: 4000,
            n: 0,
            p: 0,
            busy_out_sel: 0,
            general_purpose: [0; 4],
        }
    }
}

/// Host-side timing of the acquisition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTuning {
    /// Back-off between two async progress queries that found nothing new.
    pub poll_interval: Duration,
    /// Async acquisitions fault when progress stops for this long.
    pub stall_timeout: Duration,
    /// How long expert uploads wait for the worker's answer.
    pub reply_timeout: Duration,
}

impl Default for PipelineTuning {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(48),
            stall_timeout: Duration::from_secs(8),
            reply_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub pixel_depth: PixelDepth,
    /// 0 selects live mode.
    pub nb_frames: usize,
    pub trig_mode: TrigMode,
    pub exp_time_us: u32,
    pub acquisition_mode: AcquisitionMode,
    pub specific: SpecificParameters,
    pub double_pixel_correction: bool,
    pub geom_correction: bool,
    pub normalization_factor: f64,
    pub calibration_adjusting_number: u32,
    pub tuning: PipelineTuning,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            pixel_depth: PixelDepth::Bpp16,
            nb_frames: 1,
            trig_mode: TrigMode::IntTrig,
            exp_time_us: 1_000_000,
            acquisition_mode: AcquisitionMode::Synchronous,
            specific: SpecificParameters::default(),
            double_pixel_correction: false,
            geom_correction: false,
            normalization_factor: DEFAULT_NORMALIZATION_FACTOR,
            calibration_adjusting_number: 1,
            tuning: PipelineTuning::default(),
        }
    }
}

/// Seconds to the microsecond count uploaded to the detector.
pub fn exp_time_to_us(seconds: f64) -> Result<u32> {
    let us = (seconds * 1e6).round();
    if !us.is_finite() || us < 0.0 || us > u32::MAX as f64 {
        return Err(XpadError::config(format!("Invalid exposure time: {} s", seconds)));
    }
    Ok(us as u32)
}

impl CameraSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pixel_depth(mut self, pixel_depth: PixelDepth) -> Self {
        self.pixel_depth = pixel_depth;
        self
    }

    pub fn with_nb_frames(mut self, nb_frames: usize) -> Self {
        self.nb_frames = nb_frames;
        self
    }

    pub fn with_trig_mode(mut self, trig_mode: TrigMode) -> Self {
        self.trig_mode = trig_mode;
        self
    }

    pub fn with_exp_time_us(mut self, exp_time_us: u32) -> Self {
        self.exp_time_us = exp_time_us;
        self
    }

    pub fn with_acquisition_mode(mut self, mode: AcquisitionMode) -> Self {
        self.acquisition_mode = mode;
        self
    }

    pub fn with_double_pixel_correction(mut self, enable: bool) -> Self {
        self.double_pixel_correction = enable;
        self
    }

    pub fn with_geom_correction(mut self, enable: bool) -> Self {
        self.geom_correction = enable;
        self
    }

    pub fn with_normalization_factor(mut self, factor: f64) -> Self {
        self.normalization_factor = factor;
        self
    }

    pub fn with_tuning(mut self, tuning: PipelineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn corrections(&self) -> Corrections {
        Corrections {
            double_pixel: self.double_pixel_correction,
            geometric: self.geom_correction,
        }
    }

    pub fn is_live(&self) -> bool {
        self.nb_frames == 0
    }

    /// Checks the settings against what `model` supports.
    pub fn validate(&self, model: DetectorModel) -> Result<()> {
        let support = model.correction_support();
        if self.double_pixel_correction && support != CorrectionSupport::DoublePixel {
            return Err(XpadError::config(format!(
                "Double pixel correction is not available on {}",
                model
            )));
        }
        if self.geom_correction {
            if support != CorrectionSupport::Geometric {
                return Err(XpadError::config(format!(
                    "Geometric correction is not available on {}",
                    model
                )));
            }
            if self.acquisition_mode == AcquisitionMode::Synchronous {
                return Err(XpadError::config(
                    "Geometric correction requires asynchronous acquisition",
                ));
            }
            if self.is_live() {
                return Err(XpadError::config(
                    "Geometric correction is not available in live mode",
                ));
            }
        }
        if self.double_pixel_correction && self.geom_correction {
            return Err(XpadError::config(
                "Double pixel and geometric corrections are exclusive",
            ));
        }
        if !self.normalization_factor.is_finite() || self.normalization_factor <= 0.0 {
            return Err(XpadError::config(format!(
                "Normalization factor must be positive, got {}",
                self.normalization_factor
            )));
        }
        if self.tuning.poll_interval.is_zero() || self.tuning.stall_timeout.is_zero() {
            return Err(XpadError::config("Poll interval and stall timeout must be non-zero"));
        }
        Ok(())
    }

    /// Upload for the next acquisition; live mode asks for one image per cycle.
    pub fn exposure_parameters(&self) -> ExposureParameters {
        ExposureParameters {
            exposure_us: self.exp_time_us,
            dead_time_us: self.specific.dead_time_us,
            init_time_us: self.specific.init_time_us,
            shutter_time_us: self.specific.shutter_time_us,
            overflow_time_us: self.specific.overflow_time_us,
            trigger_mode: self.trig_mode.vendor_code(),
            n: self.specific.n,
            p: self.specific.p,
            nb_images: self.nb_frames.max(1) as u32,
            busy_out_sel: self.specific.busy_out_sel,
            format: self.pixel_depth.vendor_format(),
            post_proc: 0,
            general_purpose: self.specific.general_purpose,
        }
    }
}
