use log::{debug, error, info};
use std::sync::Arc;

use super::geometry::{derive_frame_dim, derive_geometry, Corrections, FrameDim, ImageGeometry, PixelDepth};
use super::model::{DetectorModel, CHIPS_PER_MODULE};
use crate::error::{Result, XpadError};
use crate::transport::{ApiVersion, Transport};

/// An initialised vendor driver with its discovered modules.
///
/// Dropping the session closes the driver; no transport call is valid
/// afterwards.
pub struct DeviceSession {
    model: DetectorModel,
    module_mask: u32,
    module_count: usize,
    chips_per_module: usize,
    api_version: ApiVersion,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("model", &self.model)
            .field("module_mask", &self.module_mask)
            .field("module_count", &self.module_count)
            .field("chips_per_module", &self.chips_per_module)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    pub fn open(model: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let model: DetectorModel = model.parse()?;
        info!("Initializing XPAD {} detector", model);

        transport
            .init(model)
            .map_err(|e| XpadError::hardware_init(format!("PCIe board unsuccessfully initialized: {}", e)))?;
        debug!("PCIe board successfully initialized");

        let module_mask = match transport.modules_ready() {
            Ok(mask) => mask,
            Err(e) => {
                error!("Ask modules that are ready: FAILED");
                transport.close();
                return Err(XpadError::hardware_init(format!("No modules are ready: {}", e)));
            }
        };
        let module_count = module_mask.count_ones() as usize;
        debug!("Modules ready: mask = {:#x}, count = {}", module_mask, module_count);

        if module_count == 0 {
            error!("No modules found");
            let message = if transport.pcie_ok() {
                "No modules found: PCIe hardware check is OK, retry to init".to_string()
            } else {
                error!("PCIe hardware check has FAILED:");
                error!("1. Check if green led is ON (if not go to 3.)");
                error!("2. Reset PCIe board");
                error!("3. Power off and power on PC (do not reboot, power has to be cut off)");
                "No modules found and PCIe hardware check has FAILED".to_string()
            };
            transport.close();
            return Err(XpadError::hardware_init(message));
        }

        let session = Self {
            model,
            module_mask,
            module_count,
            chips_per_module: CHIPS_PER_MODULE,
            api_version: transport.api_version(),
            transport,
        };

        let geometry = session.base_geometry();
        info!(
            "XPAD {} ready: {} module(s), {} chips, image {}x{}",
            model, module_count, session.chips_per_module, geometry.width, geometry.height
        );
        Ok(session)
    }

    pub fn model(&self) -> DetectorModel {
        self.model
    }

    pub fn module_mask(&self) -> u32 {
        self.module_mask
    }

    pub fn module_count(&self) -> usize {
        self.module_count
    }

    pub fn chips_per_module(&self) -> usize {
        self.chips_per_module
    }

    pub fn api_version(&self) -> ApiVersion {
        self.api_version
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Image size with no correction applied.
    pub fn base_geometry(&self) -> ImageGeometry {
        ImageGeometry::uncorrected(self.chips_per_module, self.module_count)
    }

    pub fn geometry(&self, corrections: Corrections) -> ImageGeometry {
        derive_geometry(self.model, self.chips_per_module, self.module_count, corrections)
    }

    pub fn frame_dim(&self, depth: PixelDepth, corrections: Corrections) -> FrameDim {
        derive_frame_dim(self.model, self.chips_per_module, self.module_count, depth, corrections)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.transport.close();
        info!("XPCI library closed");
    }
}

/// Single-bit mask of a 1-based module or chip number.
pub fn number_to_mask(number: u32, what: &str) -> Result<u32> {
    if number == 0 || number > 32 {
        return Err(XpadError::config(format!(
            "{} number must be between 1 and 32, got {}",
            what, number
        )));
    }
    Ok(1 << (number - 1))
}
