//! Framework-facing view of the camera: status mapping and detector info.

use log::debug;
use std::sync::Arc;

use crate::camera::{AcquisitionState, Camera, MaxImageSizeCallback};
use crate::detector::{ImageGeometry, PixelDepth};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetStatus {
    Idle,
    Exposure,
    Readout,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqStatus {
    Ready,
    Running,
    Fault,
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwStatus {
    pub acq: AcqStatus,
    pub det: DetStatus,
}

impl From<AcquisitionState> for HwStatus {
    fn from(state: AcquisitionState) -> Self {
        let (det, acq) = match state {
            AcquisitionState::Ready => (DetStatus::Idle, AcqStatus::Ready),
            AcquisitionState::Exposure => (DetStatus::Exposure, AcqStatus::Running),
            AcquisitionState::Readout => (DetStatus::Readout, AcqStatus::Running),
            AcquisitionState::Fault => (DetStatus::Fault, AcqStatus::Fault),
            // calibration exposes the detector but the acquisition is unavailable
            AcquisitionState::Calibrating => (DetStatus::Exposure, AcqStatus::Config),
        };
        HwStatus { acq, det }
    }
}

/// Detector description delegated to the camera.
pub struct DetInfo {
    camera: Arc<Camera>,
}

impl DetInfo {
    pub fn max_image_size(&self) -> ImageGeometry {
        self.camera.image_size()
    }

    pub fn detector_image_size(&self) -> ImageGeometry {
        self.camera.session().base_geometry()
    }

    pub fn def_image_type(&self) -> PixelDepth {
        PixelDepth::Bpp16
    }

    pub fn cur_image_type(&self) -> PixelDepth {
        self.camera.pixel_depth()
    }

    pub fn set_cur_image_type(&self, depth: PixelDepth) -> Result<()> {
        self.camera.set_pixel_depth(depth)
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        self.camera.pixel_size()
    }

    pub fn detector_type(&self) -> &'static str {
        self.camera.detector_type()
    }

    pub fn detector_model(&self) -> &'static str {
        self.camera.detector_model()
    }

    pub fn register_max_image_size_callback(&self, callback: MaxImageSizeCallback) -> usize {
        self.camera.register_max_image_size_listener(callback)
    }

    pub fn unregister_max_image_size_callback(&self, id: usize) -> bool {
        self.camera.unregister_max_image_size_listener(id)
    }
}

pub struct Interface {
    camera: Arc<Camera>,
    det_info: DetInfo,
}

impl Interface {
    pub fn new(camera: Arc<Camera>) -> Self {
        let det_info = DetInfo {
            camera: Arc::clone(&camera),
        };
        Self { camera, det_info }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn det_info(&self) -> &DetInfo {
        &self.det_info
    }

    /// Stops any acquisition and returns to Ready, fault included. Does not
    /// reboot the modules.
    pub fn reset(&self) {
        debug!("Interface reset");
        self.camera.stop_and_clear_fault();
    }

    pub fn prepare_acq(&self) -> Result<()> {
        self.camera.prepare()
    }

    pub fn start_acq(&self) -> Result<()> {
        self.camera.start()
    }

    pub fn stop_acq(&self) {
        self.camera.stop();
    }

    pub fn status(&self) -> HwStatus {
        self.camera.status().into()
    }

    pub fn nb_hw_acquired_frames(&self) -> usize {
        self.camera.nb_hw_acquired_frames()
    }
}
