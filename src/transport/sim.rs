//! In-process stand-in for the PCIe driver.
//!
//! Produces frames in the layout the real driver would emit for the
//! configured API version, honours `abort_exposure` during blocking
//! retrievals, and lets tests inject failures and script the async progress
//! counter.

use log::{debug, trace, warn};
use rand::Rng;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use super::{ApiVersion, CalibrationRequest, ConfigUpload, ExposureParameters, Transport, TransportResult};
use crate::detector::{DetectorModel, PixelDepth, CHIP_NB_ROW};
use crate::error::TransportError;
use crate::frame::reorder::encode_line;
use crate::frame::{LineLayout, Pixel, PixelData, RawBuffer};

const ABORT_CHECK_INTERVAL: Duration = Duration::from_millis(2);
const NOISE_MAX: u64 = 100;

/// Pixel content of simulated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SimPattern {
    #[default]
    Zero,
    /// Value depends on the canonical pixel position and the frame number.
    Ramp,
    Noise,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub module_mask: u32,
    pub api_version: ApiVersion,
    /// Readout time of one frame.
    pub frame_period: Duration,
    pub pattern: SimPattern,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            module_mask: 0x1,
            api_version: ApiVersion::V2,
            frame_period: Duration::from_millis(5),
            pattern: SimPattern::Zero,
        }
    }
}

/// Vendor call that fails once injected, until cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    Init,
    ModulesReady,
    ExposureParameters,
    ImageSequence,
    AsyncStart,
    /// Fetching this async image index fails.
    AsyncImage(usize),
    Calibration,
    Upload,
    Reboot,
}

struct AsyncRun {
    started: Instant,
    nb_frames: usize,
}

#[derive(Default)]
struct SimState {
    model: Option<DetectorModel>,
    closed: bool,
    debug: bool,
    fault: Option<SimFault>,
    async_run: Option<AsyncRun>,
    scripted_counts: Option<VecDeque<usize>>,
    last_count: usize,
    frames_served: usize,
    exposure: Option<ExposureParameters>,
    calls: Vec<&'static str>,
    calibrations: Vec<CalibrationRequest>,
    uploads: Vec<ConfigUpload>,
}

pub struct SimulatedTransport {
    config: SimConfig,
    state: Mutex<SimState>,
    aborted: AtomicBool,
}

impl SimulatedTransport {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
            aborted: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records the call and fails it if `fault` is injected.
    fn enter(&self, call: &'static str, fault: SimFault) -> TransportResult<()> {
        let mut state = self.state();
        state.calls.push(call);
        if state.fault == Some(fault) {
            warn!("Simulated failure of {}", call);
            return Err(TransportError::new(call));
        }
        Ok(())
    }

    pub fn inject_fault(&self, fault: SimFault) {
        self.state().fault = Some(fault);
    }

    pub fn clear_fault(&self) {
        self.state().fault = None;
    }

    /// Replaces the time-based async progress with these successive answers.
    /// The last one repeats once the script is exhausted.
    pub fn script_async_counts(&self, counts: impl IntoIterator<Item = usize>) {
        self.state().scripted_counts = Some(counts.into_iter().collect());
    }

    pub fn is_initialized(&self) -> bool {
        self.state().model.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn debug_enabled(&self) -> bool {
        self.state().debug
    }

    /// Names of the vendor calls received, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.state().calls.iter().filter(|&&c| c == call).count()
    }

    pub fn last_exposure(&self) -> Option<ExposureParameters> {
        self.state().exposure
    }

    pub fn calibrations(&self) -> Vec<CalibrationRequest> {
        self.state().calibrations.clone()
    }

    pub fn uploads(&self) -> Vec<ConfigUpload> {
        self.state().uploads.clone()
    }

    fn module_count(&self) -> usize {
        self.config.module_mask.count_ones() as usize
    }

    /// Sleeps for `duration`, failing early if an abort arrives.
    fn wait_readout(&self, call: &'static str, duration: Duration) -> TransportResult<()> {
        let deadline = Instant::now() + duration;
        loop {
            if self.aborted.load(Ordering::SeqCst) {
                debug!("{} interrupted by abort", call);
                return Err(TransportError::new(call));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(ABORT_CHECK_INTERVAL.min(deadline - now));
        }
    }

    fn fill(&self, data: &mut PixelData, chips: usize, frame_nb: usize) {
        let pattern = self.config.pattern;
        let lines = LineLayout::new(chips, self.module_count());
        let interleaved = self.config.api_version == ApiVersion::V1 && data.len() == lines.raw_len();
        match data {
            PixelData::U16(v) if interleaved => fill_lines(v, &lines, pattern, frame_nb),
            PixelData::U32(v) if interleaved => fill_lines(v, &lines, pattern, frame_nb),
            PixelData::U16(v) => fill_canonical(v, pattern, frame_nb),
            PixelData::U32(v) => fill_canonical(v, pattern, frame_nb),
            PixelData::F32(v) => {
                let mut rng = rand::thread_rng();
                for (index, pixel) in v.iter_mut().enumerate() {
                    *pixel = sample(pattern, index, frame_nb, &mut rng) as f32 * 0.5;
                }
            }
        }
    }
}

fn sample(pattern: SimPattern, index: usize, frame_nb: usize, rng: &mut impl Rng) -> u64 {
    match pattern {
        SimPattern::Zero => 0,
        SimPattern::Ramp => ((index + frame_nb) % 4096) as u64,
        SimPattern::Noise => rng.gen_range(0..NOISE_MAX),
    }
}

fn fill_canonical<T: Pixel>(data: &mut [T], pattern: SimPattern, frame_nb: usize) {
    let mut rng = rand::thread_rng();
    for (index, pixel) in data.iter_mut().enumerate() {
        *pixel = T::saturating_from(sample(pattern, index, frame_nb, &mut rng));
    }
}

/// Row-interleaved lines: row 1 of every module, then row 2, and so on.
fn fill_lines<T: Pixel>(data: &mut [T], layout: &LineLayout, pattern: SimPattern, frame_nb: usize) {
    let mut rng = rand::thread_rng();
    let width = layout.payload_words();
    let mut payload = vec![T::default(); width];
    let mut lines = data.chunks_exact_mut(layout.line_words());
    for row in 1..=CHIP_NB_ROW {
        for module in 0..layout.modules {
            let Some(dest) = layout.dest_row(module, row) else {
                continue;
            };
            for (col, pixel) in payload.iter_mut().enumerate() {
                *pixel = T::saturating_from(sample(pattern, dest * width + col, frame_nb, &mut rng));
            }
            if let Some(line) = lines.next() {
                encode_line(module, row, &payload, line);
            }
        }
    }
}

impl Transport for SimulatedTransport {
    fn init(&self, model: DetectorModel) -> TransportResult<()> {
        self.enter("xpci_init", SimFault::Init)?;
        let mut state = self.state();
        state.model = Some(model);
        state.closed = false;
        debug!("Simulated {} driver opened", model);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        state.calls.push("xpci_close");
        state.closed = true;
    }

    fn api_version(&self) -> ApiVersion {
        self.config.api_version
    }

    fn modules_ready(&self) -> TransportResult<u32> {
        self.enter("xpci_modAskReady", SimFault::ModulesReady)?;
        Ok(self.config.module_mask)
    }

    fn pcie_ok(&self) -> bool {
        self.state().calls.push("xpci_isPCIeOK");
        true
    }

    fn set_exposure_parameters(
        &self,
        module_mask: u32,
        params: &ExposureParameters,
    ) -> TransportResult<()> {
        self.enter("xpci_modExposureParam", SimFault::ExposureParameters)?;
        trace!("Exposure parameters for modules {:#x}: {:?}", module_mask, params);
        self.state().exposure = Some(*params);
        Ok(())
    }

    fn get_image_sequence(
        &self,
        depth: PixelDepth,
        module_mask: u32,
        chips: u32,
        frames: &mut [RawBuffer],
    ) -> TransportResult<()> {
        const CALL: &str = "xpci_getImgSeq";
        self.aborted.store(false, Ordering::SeqCst);
        self.enter(CALL, SimFault::ImageSequence)?;
        // the blocking call only returns counter images
        if frames.iter().any(|frame| matches!(&**frame, PixelData::F32(_))) {
            warn!("{} cannot fill float buffers", CALL);
            return Err(TransportError::new(CALL));
        }
        trace!(
            "Reading {} {:?} frames from modules {:#x}",
            frames.len(),
            depth,
            module_mask
        );

        self.wait_readout(CALL, self.config.frame_period * frames.len() as u32)?;

        let first = {
            let mut state = self.state();
            let first = state.frames_served;
            state.frames_served += frames.len();
            first
        };
        for (offset, frame) in frames.iter_mut().enumerate() {
            self.fill(frame, chips as usize, first + offset);
        }
        Ok(())
    }

    fn start_async_sequence(
        &self,
        depth: PixelDepth,
        module_mask: u32,
        _chips: u32,
        nb_frames: usize,
    ) -> TransportResult<()> {
        self.aborted.store(false, Ordering::SeqCst);
        self.enter("xpci_getImgSeqAs", SimFault::AsyncStart)?;
        debug!(
            "Async sequence of {} {:?} frames started on modules {:#x}",
            nb_frames, depth, module_mask
        );
        let mut state = self.state();
        state.async_run = Some(AsyncRun {
            started: Instant::now(),
            nb_frames,
        });
        state.last_count = 0;
        Ok(())
    }

    fn last_acquired_async_image(&self) -> TransportResult<usize> {
        const CALL: &str = "xpci_getNumberLastAcquiredAsyncImage";
        let mut state = self.state();
        let Some(run) = &state.async_run else {
            return Err(TransportError::new(CALL));
        };
        let nb_frames = run.nb_frames;
        let elapsed = run.started.elapsed();
        let last_count = state.last_count;

        let count = match state.scripted_counts.as_mut() {
            Some(script) => script.pop_front().unwrap_or(last_count),
            None if self.aborted.load(Ordering::SeqCst) => last_count,
            None if self.config.frame_period.is_zero() => nb_frames,
            None => {
                let done = elapsed.as_nanos() / self.config.frame_period.as_nanos();
                (done as usize).min(nb_frames)
            }
        };
        state.last_count = count;
        Ok(count)
    }

    fn get_async_image(
        &self,
        _depth: PixelDepth,
        _module_mask: u32,
        chips: u32,
        index: usize,
        frame: &mut RawBuffer,
        geom_corr: bool,
    ) -> TransportResult<()> {
        const CALL: &str = "xpci_getAsyncImage";
        self.enter(CALL, SimFault::AsyncImage(index))?;
        let nb_frames = match &self.state().async_run {
            Some(run) => run.nb_frames,
            None => return Err(TransportError::new(CALL)),
        };
        if index >= nb_frames {
            return Err(TransportError::new(CALL));
        }
        if geom_corr && !matches!(&**frame, PixelData::F32(_)) {
            return Err(TransportError::new(CALL));
        }
        self.fill(frame, chips as usize, index);
        Ok(())
    }

    fn abort_exposure(&self) -> TransportResult<()> {
        self.aborted.store(true, Ordering::SeqCst);
        self.state().calls.push("xpci_modAbortExposure");
        debug!("Exposure aborted");
        Ok(())
    }

    fn calibrate(&self, module_mask: u32, request: &CalibrationRequest) -> TransportResult<()> {
        let call = match request {
            CalibrationRequest::OtnSlow { .. } => "imxpad_calibration_OTN_slow",
            CalibrationRequest::OtnMedium { .. } => "imxpad_calibration_OTN_medium",
            CalibrationRequest::OtnHigh { .. } => "imxpad_calibration_OTN_high",
            CalibrationRequest::Otn { .. } => "imxpad_calibration_OTN",
            CalibrationRequest::Beam { .. } => "imxpad_calibration_BEAM",
            CalibrationRequest::Upload { .. } => "imxpad_uploadCalibration",
        };
        self.enter(call, SimFault::Calibration)?;
        debug!(
            "Calibration {} on modules {:#x} using {}",
            request.kind(),
            module_mask,
            request.path().display()
        );
        self.state().calibrations.push(request.clone());
        Ok(())
    }

    fn upload(&self, upload: &ConfigUpload) -> TransportResult<()> {
        self.enter(upload.call_name(), SimFault::Upload)?;
        self.state().uploads.push(upload.clone());
        Ok(())
    }

    fn reboot_modules(&self, module_mask: u32) -> TransportResult<()> {
        self.enter("xpci_modRebootNIOS", SimFault::Reboot)?;
        debug!("Modules {:#x} rebooted", module_mask);
        Ok(())
    }

    fn set_debug(&self, enable: bool) {
        self.state().debug = enable;
    }
}
