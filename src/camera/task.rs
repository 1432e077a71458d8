//! The acquisition worker: one thread draining the command channel.

use chrono::Utc;
use crossbeam::channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::command::{AcquisitionRequest, Command, ExpertRequest};
use super::events::EventSink;
use super::pipeline::{FramePipeline, Outcome};
use super::state::{AcquisitionState, SharedStatus};
use crate::buffer_ctrl::BufferManager;
use crate::detector::DeviceSession;
use crate::error::{Result, XpadError};
use crate::frame::RawArena;
use crate::transport::CalibrationRequest;

pub(crate) struct CameraTask {
    session: Arc<DeviceSession>,
    buffer: Arc<dyn BufferManager>,
    status: Arc<SharedStatus>,
    arena: RawArena,
    events: EventSink,
    /// Used to re-arm live cycles.
    commands: Sender<Command>,
}

impl CameraTask {
    pub(crate) fn new(
        session: Arc<DeviceSession>,
        buffer: Arc<dyn BufferManager>,
        status: Arc<SharedStatus>,
        arena: RawArena,
        events: EventSink,
        commands: Sender<Command>,
    ) -> Self {
        Self {
            session,
            buffer,
            status,
            arena,
            events,
            commands,
        }
    }

    pub(crate) fn spawn(self, rx: Receiver<Command>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("xpad-task".to_string())
            .spawn(move || self.run(rx))
    }

    fn run(self, rx: Receiver<Command>) {
        debug!("Acquisition task started");
        for command in rx.iter() {
            if !self.handle_message(command) {
                break;
            }
        }
        debug!("Acquisition task exiting");
    }

    /// Returns false once the task must exit.
    fn handle_message(&self, command: Command) -> bool {
        match command {
            Command::Start(request) => self.on_start(request),
            Command::LiveCycle(request) => self.on_live_cycle(request),
            Command::Calibrate(request) => self.on_calibrate(request),
            Command::Expert(request, reply) => {
                let result = self.on_expert(request);
                let _ = reply.send(result);
            }
            Command::Exit => return false,
        }
        true
    }

    fn on_start(&self, request: AcquisitionRequest) {
        if self.status.state() == AcquisitionState::Fault {
            self.events
                .warning("Start ignored: the detector is in fault, reset it first");
            return;
        }
        if !self.status.is_current(request.generation) || self.status.stop_requested(request.generation) {
            debug!("Start of generation {} superseded before it ran", request.generation);
            return;
        }

        self.status.reset_acquired();
        self.buffer.set_start_timestamp(Utc::now());
        if request.is_live() {
            info!("Starting live acquisition");
        } else {
            info!(
                "Starting {:?} acquisition of {} frame(s)",
                request.mode, request.nb_frames
            );
        }
        self.acquire(request);
    }

    fn on_live_cycle(&self, request: AcquisitionRequest) {
        let generation = request.generation;
        if !self.status.is_current(generation) || self.status.stop_requested(generation) {
            debug!("Dropping live cycle of generation {}", generation);
            return;
        }
        if self.status.state() == AcquisitionState::Fault {
            return;
        }
        self.acquire(request);
    }

    fn acquire(&self, request: AcquisitionRequest) {
        let generation = request.generation;
        self.status.set_state(AcquisitionState::Exposure);

        let result = self.run_pipeline(&request);

        match result {
            Ok(Outcome::Completed(count)) if request.is_live() => {
                if self.status.stop_requested(generation) {
                    self.finish_stopped(count);
                } else if self.commands.send(Command::LiveCycle(request)).is_err() {
                    self.status.set_state(AcquisitionState::Ready);
                }
            }
            Ok(Outcome::Completed(count)) => {
                self.status.set_state(AcquisitionState::Ready);
                info!("Acquisition complete: {} frame(s) published", count);
            }
            Ok(Outcome::Stopped(count)) => self.finish_stopped(count),
            Err(e) if self.status.stop_requested(generation) => {
                debug!("Retrieval interrupted by stop: {}", e);
                self.finish_stopped(0);
            }
            Err(e) => {
                self.status.set_state(AcquisitionState::Fault);
                self.events.error(format!("Acquisition failed: {}", e));
            }
        }
    }

    fn run_pipeline(&self, request: &AcquisitionRequest) -> Result<Outcome> {
        self.session
            .transport()
            .set_exposure_parameters(self.session.module_mask(), &request.exposure)
            .map_err(|e| XpadError::hardware("exposure parameters upload", e))?;

        let pipeline = FramePipeline::new(&self.session, self.buffer.as_ref(), &self.status, &self.arena);
        if request.is_sequential() {
            pipeline.run_sequence(request)
        } else {
            pipeline.run_async(request)
        }
    }

    fn finish_stopped(&self, published: usize) {
        self.status.force_ready_unless_fault();
        info!(
            "Acquisition stopped ({} frame(s) published in the last cycle)",
            published
        );
    }

    fn on_calibrate(&self, request: CalibrationRequest) {
        match self.status.state() {
            AcquisitionState::Ready => {}
            AcquisitionState::Fault => {
                self.events.warning(format!(
                    "Calibration {} ignored: the detector is in fault, reset it first",
                    request.kind()
                ));
                return;
            }
            busy => {
                self.events.warning(format!(
                    "Calibration {} ignored: the detector is busy ({})",
                    request.kind(),
                    busy
                ));
                return;
            }
        }

        self.status.set_state(AcquisitionState::Calibrating);
        info!(
            "Calibration {} started, files in {}",
            request.kind(),
            request.path().display()
        );
        match self
            .session
            .transport()
            .calibrate(self.session.module_mask(), &request)
        {
            Ok(()) => {
                self.status.set_state(AcquisitionState::Ready);
                self.events
                    .info(format!("Calibration {} finished", request.kind()));
            }
            Err(e) => {
                self.status.set_state(AcquisitionState::Fault);
                self.events.error(format!(
                    "Calibration {} failed: {}",
                    request.kind(),
                    XpadError::hardware("calibration", e)
                ));
            }
        }
    }

    fn on_expert(&self, request: ExpertRequest) -> Result<()> {
        let transport = self.session.transport();
        let result = match request {
            ExpertRequest::Upload(upload) => {
                debug!("Uploading {}", upload.call_name());
                transport
                    .upload(&upload)
                    .map_err(|e| XpadError::hardware(upload.call_name(), e))
            }
            ExpertRequest::Reset => {
                warn!("Rebooting modules {:#x}", self.session.module_mask());
                transport
                    .reboot_modules(self.session.module_mask())
                    .map_err(|e| XpadError::hardware("module reset", e))
                    .map(|()| {
                        self.status.set_state(AcquisitionState::Ready);
                        info!("Modules rebooted, detector ready");
                    })
            }
            ExpertRequest::Debug(enable) => {
                transport.set_debug(enable);
                debug!("Driver debug output {}", if enable { "enabled" } else { "disabled" });
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!("{}", e);
            self.status.set_state(AcquisitionState::Fault);
        }
        result
    }
}
