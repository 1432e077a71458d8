//! Camera facade: settings, acquisition control and expert operations.
//!
//! Setters validate and store synchronously. `start` and the calibrations
//! post a command to the acquisition worker and return at once; their outcome
//! shows up in `status()` and on the event channel. Expert uploads wait for
//! the worker's answer.

mod command;
mod config;
mod events;
mod pipeline;
mod state;
mod task;

pub use command::{frame_layout, AcquisitionRequest, ExpertRequest};
pub use config::{
    exp_time_to_us, AcquisitionMode, CameraSettings, PipelineTuning, SpecificParameters, TrigMode,
};
pub use events::{DetectorEvent, EventSeverity};
pub use pipeline::{FramePipeline, Outcome};
pub use state::{AcquisitionState, SharedStatus};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use command::Command;
use events::EventSink;
use task::CameraTask;

use crate::buffer_ctrl::BufferManager;
use crate::detector::{number_to_mask, DeviceSession, ImageGeometry, PixelDepth, CHIP_NB_COLUMN, PIXEL_SIZE_UM};
use crate::error::{Result, XpadError};
use crate::frame::RawArena;
use crate::transport::{CalibrationRequest, ConfigUpload};

const EVENT_QUEUE_DEPTH: usize = 256;

/// Called with the new maximum image size and pixel depth.
pub type MaxImageSizeCallback = Box<dyn Fn(ImageGeometry, PixelDepth) + Send + Sync>;

pub struct Camera {
    session: Arc<DeviceSession>,
    settings: Mutex<CameraSettings>,
    status: Arc<SharedStatus>,
    arena: RawArena,
    commands: Sender<Command>,
    events: Receiver<DetectorEvent>,
    listeners: Mutex<Vec<(usize, MaxImageSizeCallback)>>,
    next_listener: AtomicUsize,
    worker: Option<JoinHandle<()>>,
}

impl Camera {
    /// Takes over `session` and starts the acquisition worker.
    pub fn new(
        session: DeviceSession,
        buffer: Arc<dyn BufferManager>,
        settings: CameraSettings,
    ) -> Result<Self> {
        settings.validate(session.model())?;
        frame_layout(&session, &settings)?;

        let session = Arc::new(session);
        let status = Arc::new(SharedStatus::new());
        let arena = RawArena::new();
        let (commands, rx) = unbounded();
        let (event_tx, events) = bounded(EVENT_QUEUE_DEPTH);

        let task = CameraTask::new(
            Arc::clone(&session),
            buffer,
            Arc::clone(&status),
            arena.clone(),
            EventSink::new(event_tx),
            commands.clone(),
        );
        let worker = task.spawn(rx)?;

        let geometry = session.geometry(settings.corrections());
        info!(
            "Camera ready: XPAD {} {}x{} {:?}",
            session.model(),
            geometry.width,
            geometry.height,
            settings.pixel_depth
        );

        Ok(Self {
            session,
            settings: Mutex::new(settings),
            status,
            arena,
            commands,
            events,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicUsize::new(0),
            worker: Some(worker),
        })
    }

    fn settings(&self) -> MutexGuard<'_, CameraSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(usize, MaxImageSizeCallback)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `change` to a copy of the settings and keeps it only if the
    /// result is valid for this detector.
    fn update(&self, change: impl FnOnce(&mut CameraSettings) -> Result<()>) -> Result<()> {
        let mut settings = self.settings();
        let mut next = settings.clone();
        change(&mut next)?;
        next.validate(self.session.model())?;
        frame_layout(&self.session, &next)?;

        let before = (self.session.geometry(settings.corrections()), settings.pixel_depth);
        let after = (self.session.geometry(next.corrections()), next.pixel_depth);
        let depth_or_corrections_changed =
            settings.pixel_depth != next.pixel_depth || settings.corrections() != next.corrections();
        *settings = next;
        drop(settings);

        if depth_or_corrections_changed {
            debug!(
                "Max image size {}x{} {:?} -> {}x{} {:?}",
                before.0.width, before.0.height, before.1, after.0.width, after.0.height, after.1
            );
            for (_, callback) in self.listeners().iter() {
                callback(after.0, after.1);
            }
        }
        Ok(())
    }

    fn post(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| XpadError::task_unavailable("acquisition worker has exited"))
    }

    fn expert(&self, request: ExpertRequest) -> Result<()> {
        let timeout = self.settings().tuning.reply_timeout;
        let (reply_tx, reply_rx) = bounded(1);
        self.post(Command::Expert(request, reply_tx))?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|e| XpadError::task_unavailable(format!("no answer from acquisition worker: {}", e)))?
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn settings_snapshot(&self) -> CameraSettings {
        self.settings().clone()
    }

    /// Image size after the active correction.
    pub fn image_size(&self) -> ImageGeometry {
        let corrections = self.settings().corrections();
        self.session.geometry(corrections)
    }

    pub fn set_pixel_depth(&self, depth: PixelDepth) -> Result<()> {
        self.update(|s| {
            s.pixel_depth = depth;
            Ok(())
        })
    }

    pub fn pixel_depth(&self) -> PixelDepth {
        self.settings().pixel_depth
    }

    /// Pixel pitch in micrometres, (x, y).
    pub fn pixel_size(&self) -> (f64, f64) {
        (PIXEL_SIZE_UM, PIXEL_SIZE_UM)
    }

    pub fn detector_type(&self) -> &'static str {
        "XPAD"
    }

    pub fn detector_model(&self) -> &'static str {
        self.session.model().name()
    }

    pub fn set_nb_frames(&self, nb_frames: usize) {
        self.settings().nb_frames = nb_frames;
    }

    pub fn nb_frames(&self) -> usize {
        self.settings().nb_frames
    }

    pub fn set_trig_mode(&self, mode: TrigMode) {
        self.settings().trig_mode = mode;
    }

    pub fn trig_mode(&self) -> TrigMode {
        self.settings().trig_mode
    }

    /// Exposure in seconds, kept with microsecond resolution.
    pub fn set_exp_time(&self, seconds: f64) -> Result<()> {
        let us = exp_time_to_us(seconds)?;
        self.settings().exp_time_us = us;
        Ok(())
    }

    pub fn exp_time(&self) -> f64 {
        self.settings().exp_time_us as f64 / 1e6
    }

    pub fn set_acquisition_mode(&self, mode: AcquisitionMode) -> Result<()> {
        self.update(|s| {
            s.acquisition_mode = mode;
            Ok(())
        })
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        self.settings().acquisition_mode
    }

    pub fn set_specific_parameters(&self, params: SpecificParameters) {
        debug!("Specific parameters: {:?}", params);
        self.settings().specific = params;
    }

    pub fn set_calibration_adjusting_number(&self, number: u32) {
        self.settings().calibration_adjusting_number = number;
    }

    pub fn set_geom_correction(&self, enable: bool) -> Result<()> {
        self.update(|s| {
            s.geom_correction = enable;
            Ok(())
        })
    }

    pub fn set_double_pixel_correction(&self, enable: bool) -> Result<()> {
        self.update(|s| {
            s.double_pixel_correction = enable;
            Ok(())
        })
    }

    pub fn set_normalization_factor(&self, factor: f64) -> Result<()> {
        self.update(|s| {
            s.normalization_factor = factor;
            Ok(())
        })
    }

    /// Checks that the current settings produce a valid acquisition.
    pub fn prepare(&self) -> Result<()> {
        let settings = self.settings();
        let layout = frame_layout(&self.session, &settings)?;
        debug!(
            "Prepared: {} frame(s), {:?}, {} bytes per frame",
            settings.nb_frames,
            settings.acquisition_mode,
            layout.output.size_in_bytes()
        );
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut request = {
            let settings = self.settings();
            AcquisitionRequest::new(&self.session, &settings, 0)?
        };
        request.generation = self.status.next_generation();
        self.post(Command::Start(request))
    }

    /// Aborts the running exposure and returns to Ready, unless faulted.
    pub fn stop(&self) {
        self.status.request_stop();
        if let Err(e) = self.session.transport().abort_exposure() {
            warn!("Abort exposure failed: {}", e);
        }
        let previous = self.status.force_ready_unless_fault();
        info!("Stop requested (was {})", previous);
    }

    /// Stops like `stop` and also clears a fault. The modules are not
    /// rebooted; use `reset` for that.
    pub fn stop_and_clear_fault(&self) {
        self.stop();
        if self.status.state() == AcquisitionState::Fault {
            self.status.set_state(AcquisitionState::Ready);
            info!("Fault cleared");
        }
    }

    pub fn status(&self) -> AcquisitionState {
        self.status.state()
    }

    pub fn nb_hw_acquired_frames(&self) -> usize {
        self.status.acquired()
    }

    /// Raw buffers currently held by the acquisition worker.
    pub fn outstanding_raw_buffers(&self) -> usize {
        self.arena.outstanding()
    }

    /// Notifications from the acquisition worker. Receivers share one queue.
    pub fn events(&self) -> Receiver<DetectorEvent> {
        self.events.clone()
    }

    pub fn register_max_image_size_listener(&self, callback: MaxImageSizeCallback) -> usize {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners().push((id, callback));
        id
    }

    pub fn unregister_max_image_size_listener(&self, id: usize) -> bool {
        let mut listeners = self.listeners();
        let before = listeners.len();
        listeners.retain(|(listener, _)| *listener != id);
        listeners.len() != before
    }

    fn calibrate(&self, request: CalibrationRequest) -> Result<()> {
        debug!("Posting calibration {}", request.kind());
        self.post(Command::Calibrate(request))
    }

    pub fn calibrate_otn_slow(&self, path: impl Into<PathBuf>) -> Result<()> {
        let adjusting_number = self.settings().calibration_adjusting_number;
        self.calibrate(CalibrationRequest::OtnSlow {
            path: path.into(),
            adjusting_number,
        })
    }

    pub fn calibrate_otn_medium(&self, path: impl Into<PathBuf>) -> Result<()> {
        let adjusting_number = self.settings().calibration_adjusting_number;
        self.calibrate(CalibrationRequest::OtnMedium {
            path: path.into(),
            adjusting_number,
        })
    }

    pub fn calibrate_otn_high(&self, path: impl Into<PathBuf>) -> Result<()> {
        let adjusting_number = self.settings().calibration_adjusting_number;
        self.calibrate(CalibrationRequest::OtnHigh {
            path: path.into(),
            adjusting_number,
        })
    }

    pub fn calibrate_otn(&self, path: impl Into<PathBuf>, itune: u32, imfp: u32) -> Result<()> {
        self.calibrate(CalibrationRequest::Otn {
            path: path.into(),
            itune,
            imfp,
        })
    }

    pub fn calibrate_beam(
        &self,
        path: impl Into<PathBuf>,
        texp: u32,
        ithl_max: u32,
        itune: u32,
        imfp: u32,
    ) -> Result<()> {
        self.calibrate(CalibrationRequest::Beam {
            path: path.into(),
            texp,
            ithl_max,
            itune,
            imfp,
        })
    }

    pub fn upload_calibration(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.calibrate(CalibrationRequest::Upload { path: path.into() })
    }

    fn all_chips_mask(&self) -> u32 {
        (1u32 << self.session.chips_per_module()) - 1
    }

    /// Same flat value on every chip of every module.
    pub fn load_flat_config(&self, value: u32) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::FlatConfig {
            module_mask: self.session.module_mask(),
            chip_mask: self.all_chips_mask(),
            value,
        }))
    }

    /// `module` and `chip` are 1-based.
    pub fn load_all_config_g(&self, module: u32, chip: u32, values: [u32; 11]) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::AllConfigG {
            module_mask: number_to_mask(module, "module")?,
            chip_mask: number_to_mask(chip, "chip")?,
            values,
        }))
    }

    pub fn load_config_g(&self, register: u32, value: u32) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::ConfigG {
            module_mask: self.session.module_mask(),
            chips: self.session.chips_per_module() as u32,
            register,
            value,
        }))
    }

    pub fn load_auto_test(&self, value: u32, mode: u32) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::AutoTest {
            module_mask: self.session.module_mask(),
            value,
            mode,
        }))
    }

    /// Stores one chip row of DACL values. `module` is 1-based.
    pub fn save_config_l(
        &self,
        module: u32,
        calib_id: u32,
        chip: u32,
        row: u32,
        values: Vec<u32>,
    ) -> Result<()> {
        if values.len() != CHIP_NB_COLUMN {
            return Err(XpadError::config(format!(
                "A chip row holds {} values, got {}",
                CHIP_NB_COLUMN,
                values.len()
            )));
        }
        self.expert(ExpertRequest::Upload(ConfigUpload::SaveConfigL {
            module_mask: number_to_mask(module, "module")?,
            calib_id,
            chip,
            row,
            values,
        }))
    }

    /// Stores one global register for every chip of a module. `module` is
    /// 1-based.
    pub fn save_config_g(&self, module: u32, calib_id: u32, register: u32, values: Vec<u32>) -> Result<()> {
        if values.len() != self.session.chips_per_module() {
            return Err(XpadError::config(format!(
                "One value per chip expected ({}), got {}",
                self.session.chips_per_module(),
                values.len()
            )));
        }
        self.expert(ExpertRequest::Upload(ConfigUpload::SaveConfigG {
            module_mask: number_to_mask(module, "module")?,
            calib_id,
            register,
            values,
        }))
    }

    /// Loads a stored calibration into a module. `module` is 1-based.
    pub fn load_config(&self, module: u32, calib_id: u32) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::LoadConfig {
            module_mask: number_to_mask(module, "module")?,
            calib_id,
        }))
    }

    /// One wait time per image of the next acquisition.
    pub fn upload_exp_wait_times(&self, wait_times: &[u32]) -> Result<()> {
        let nb_frames = self.nb_frames();
        if wait_times.len() != nb_frames {
            return Err(XpadError::config(format!(
                "{} wait times given for {} images",
                wait_times.len(),
                nb_frames
            )));
        }
        self.expert(ExpertRequest::Upload(ConfigUpload::ExpWaitTimes {
            module_mask: self.session.module_mask(),
            wait_times: wait_times.to_vec(),
        }))
    }

    pub fn increment_ithl(&self) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::IncrementIthl {
            module_mask: self.session.module_mask(),
        }))
    }

    pub fn decrement_ithl(&self) -> Result<()> {
        self.expert(ExpertRequest::Upload(ConfigUpload::DecrementIthl {
            module_mask: self.session.module_mask(),
        }))
    }

    /// Reboots the modules. The only way out of Fault.
    pub fn reset(&self) -> Result<()> {
        self.expert(ExpertRequest::Reset)
    }

    pub fn xpix_debug(&self, enable: bool) -> Result<()> {
        self.expert(ExpertRequest::Debug(enable))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.stop();
        let _ = self.commands.send(Command::Exit);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Acquisition worker panicked");
            }
        }
        debug!("Camera closed");
    }
}
