//! Abstraction over the vendor PCIe driver.
//!
//! The driver is a process-wide C library, so every call takes `&self` and
//! implementations handle their own interior mutability. `abort_exposure` may
//! be called from another thread while a blocking retrieval is in flight.

mod sim;

pub use sim::{SimConfig, SimFault, SimPattern, SimulatedTransport};

use std::path::PathBuf;

use serde::Deserialize;

use crate::detector::{DetectorModel, PixelDepth};
use crate::error::TransportError;
use crate::frame::RawBuffer;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Driver generation. V1 emits module-interleaved lines with headers, V2
/// already returns canonical module-major images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApiVersion {
    V1,
    #[default]
    V2,
}

/// Everything uploaded by `xpci_modExposureParam` before an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExposureParameters {
    pub exposure_us: u32,
    pub dead_time_us: u32,
    pub init_time_us: u32,
    pub shutter_time_us: u32,
    pub overflow_time_us: u32,
    pub trigger_mode: u32,
    pub n: u32,
    pub p: u32,
    pub nb_images: u32,
    pub busy_out_sel: u32,
    pub format: u32,
    pub post_proc: u32,
    pub general_purpose: [u32; 4],
}

/// Calibration entry points. The path is where the driver stores (or, for
/// uploads, reads) the DACL and global configuration files.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationRequest {
    OtnSlow { path: PathBuf, adjusting_number: u32 },
    OtnMedium { path: PathBuf, adjusting_number: u32 },
    OtnHigh { path: PathBuf, adjusting_number: u32 },
    Otn { path: PathBuf, itune: u32, imfp: u32 },
    Beam {
        path: PathBuf,
        texp: u32,
        ithl_max: u32,
        itune: u32,
        imfp: u32,
    },
    Upload { path: PathBuf },
}

impl CalibrationRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            CalibrationRequest::OtnSlow { .. } => "OTN slow",
            CalibrationRequest::OtnMedium { .. } => "OTN medium",
            CalibrationRequest::OtnHigh { .. } => "OTN high",
            CalibrationRequest::Otn { .. } => "OTN",
            CalibrationRequest::Beam { .. } => "beam",
            CalibrationRequest::Upload { .. } => "upload",
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            CalibrationRequest::OtnSlow { path, .. }
            | CalibrationRequest::OtnMedium { path, .. }
            | CalibrationRequest::OtnHigh { path, .. }
            | CalibrationRequest::Otn { path, .. }
            | CalibrationRequest::Beam { path, .. }
            | CalibrationRequest::Upload { path } => path,
        }
    }
}

/// Register and configuration uploads of the expert interface.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigUpload {
    FlatConfig {
        module_mask: u32,
        chip_mask: u32,
        value: u32,
    },
    /// Values in register order: CMOS_TP, AMP_TP, ITHH, VADJ, VREF, IMFP,
    /// IOTA, IPRE, ITHL, ITUNE, IBUFFER.
    AllConfigG {
        module_mask: u32,
        chip_mask: u32,
        values: [u32; 11],
    },
    ConfigG {
        module_mask: u32,
        chips: u32,
        register: u32,
        value: u32,
    },
    AutoTest {
        module_mask: u32,
        value: u32,
        mode: u32,
    },
    SaveConfigL {
        module_mask: u32,
        calib_id: u32,
        chip: u32,
        row: u32,
        values: Vec<u32>,
    },
    SaveConfigG {
        module_mask: u32,
        calib_id: u32,
        register: u32,
        values: Vec<u32>,
    },
    LoadConfig {
        module_mask: u32,
        calib_id: u32,
    },
    ExpWaitTimes {
        module_mask: u32,
        wait_times: Vec<u32>,
    },
    IncrementIthl {
        module_mask: u32,
    },
    DecrementIthl {
        module_mask: u32,
    },
}

impl ConfigUpload {
    /// Name of the vendor call carrying this upload.
    pub fn call_name(&self) -> &'static str {
        match self {
            ConfigUpload::FlatConfig { .. } => "xpci_modLoadFlatConfig",
            ConfigUpload::AllConfigG { .. } => "xpci_modLoadAllConfigG",
            ConfigUpload::ConfigG { .. } => "xpci_modLoadConfigG",
            ConfigUpload::AutoTest { .. } => "xpci_modLoadAutoTest",
            ConfigUpload::SaveConfigL { .. } => "xpci_modSaveConfigL",
            ConfigUpload::SaveConfigG { .. } => "xpci_modSaveConfigG",
            ConfigUpload::LoadConfig { .. } => "xpci_modDetLoadConfig",
            ConfigUpload::ExpWaitTimes { .. } => "imxpad_uploadExpWaitTimes",
            ConfigUpload::IncrementIthl { .. } => "imxpad_incrITHL",
            ConfigUpload::DecrementIthl { .. } => "imxpad_decrITHL",
        }
    }
}

/// Vendor driver entry points used by the camera.
///
/// Retrieval calls fill caller-owned buffers whose lengths already match the
/// layout the driver emits for the requested depth and correction.
pub trait Transport: Send + Sync {
    fn init(&self, model: DetectorModel) -> TransportResult<()>;

    fn close(&self);

    fn api_version(&self) -> ApiVersion;

    /// Bitmask of the modules answering as ready.
    fn modules_ready(&self) -> TransportResult<u32>;

    /// PCIe board self-test.
    fn pcie_ok(&self) -> bool;

    fn set_exposure_parameters(
        &self,
        module_mask: u32,
        params: &ExposureParameters,
    ) -> TransportResult<()>;

    /// Blocks until every frame of the sequence is read out, or the exposure
    /// is aborted, in which case it fails.
    fn get_image_sequence(
        &self,
        depth: PixelDepth,
        module_mask: u32,
        chips: u32,
        frames: &mut [RawBuffer],
    ) -> TransportResult<()>;

    /// Starts a non-blocking sequence of `nb_frames` images.
    fn start_async_sequence(
        &self,
        depth: PixelDepth,
        module_mask: u32,
        chips: u32,
        nb_frames: usize,
    ) -> TransportResult<()>;

    /// Number of images of the running async sequence read out so far.
    fn last_acquired_async_image(&self) -> TransportResult<usize>;

    /// Copies image `index` of the async sequence. With `geom_corr` set the
    /// driver applies its geometric correction and writes float samples.
    fn get_async_image(
        &self,
        depth: PixelDepth,
        module_mask: u32,
        chips: u32,
        index: usize,
        frame: &mut RawBuffer,
        geom_corr: bool,
    ) -> TransportResult<()>;

    /// Idempotent; safe with nothing in flight.
    fn abort_exposure(&self) -> TransportResult<()>;

    fn calibrate(&self, module_mask: u32, request: &CalibrationRequest) -> TransportResult<()>;

    fn upload(&self, upload: &ConfigUpload) -> TransportResult<()>;

    /// Reboots the module controllers.
    fn reboot_modules(&self, module_mask: u32) -> TransportResult<()>;

    fn set_debug(&self, enable: bool);
}
