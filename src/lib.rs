//! A library for driving XPAD hybrid-pixel photon-counting detectors.
//!
//! This library provides functionality for:
//! - Opening a detector session and deriving its image geometry
//! - Running synchronous, asynchronous and live acquisitions on a worker thread
//! - Reordering raw module lines and applying double-pixel correction
//! - Calibrations and expert configuration uploads
//! - Saving frames and acquisition metadata

pub mod buffer_ctrl;
pub mod camera;
pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod interface;
pub mod logging;
pub mod transport;

pub use buffer_ctrl::{BufferManager, SoftBufferManager};
pub use camera::{AcquisitionState, Camera, CameraSettings};
pub use config::Config;
pub use detector::{DetectorModel, DeviceSession, PixelDepth};
pub use error::{Result, XpadError};
pub use frame::{Frame, FrameProcessor};
pub use interface::{HwStatus, Interface};
pub use transport::{SimConfig, SimulatedTransport, Transport};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the library
///
/// Sets up logging and announces the library version. Call once, before
/// opening a detector.
///
/// # Arguments
///
/// * `verbosity` - 0 for info, 1 for debug, 2 and above for trace
/// * `log_file` - Optional path to a log file. If None, logs will only be output to stdout.
pub fn initialize(verbosity: u8, log_file: Option<&str>) -> anyhow::Result<()> {
    logging::setup_logging(verbosity, log_file)?;
    logging::log_app_start(VERSION);
    Ok(())
}
