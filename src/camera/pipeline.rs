//! Frame retrieval loops run by the acquisition worker.

use log::{debug, info, trace};
use std::thread;
use std::time::Instant;

use super::command::AcquisitionRequest;
use super::state::{AcquisitionState, SharedStatus};
use crate::buffer_ctrl::BufferManager;
use crate::detector::DeviceSession;
use crate::error::{Result, TransportError, XpadError};
use crate::frame::{FrameInfo, FrameLayout, FrameProcessor, PixelData, RawArena};

/// How a retrieval loop ended when nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every requested frame was published.
    Completed(usize),
    /// A stop was observed after this many frames.
    Stopped(usize),
}

pub struct FramePipeline<'a> {
    session: &'a DeviceSession,
    buffer: &'a dyn BufferManager,
    status: &'a SharedStatus,
    arena: &'a RawArena,
}

impl<'a> FramePipeline<'a> {
    pub fn new(
        session: &'a DeviceSession,
        buffer: &'a dyn BufferManager,
        status: &'a SharedStatus,
        arena: &'a RawArena,
    ) -> Self {
        Self {
            session,
            buffer,
            status,
            arena,
        }
    }

    /// One blocking read of the whole sequence, then publication in order.
    ///
    /// Live cycles come through here with a single frame, always published
    /// as frame 0.
    pub fn run_sequence(&self, request: &AcquisitionRequest) -> Result<Outcome> {
        let layout = &request.layout;
        let count = request.frames_per_cycle();
        let mut raws = self
            .arena
            .lease_many(count, layout.raw.sample, layout.raw.raw_len());

        debug!("Reading a sequence of {} frame(s)", count);
        let started = Instant::now();
        self.session
            .transport()
            .get_image_sequence(
                request.depth,
                self.session.module_mask(),
                self.session.chips_per_module() as u32,
                &mut raws,
            )
            .map_err(|e| XpadError::hardware("image sequence readout", e))?;
        trace!("Sequence read in {:?}", started.elapsed());

        self.status.set_state(AcquisitionState::Readout);

        for (frame_nb, raw) in raws.into_iter().enumerate() {
            if self.status.stop_requested(request.generation) {
                return Ok(Outcome::Stopped(frame_nb));
            }
            self.publish_frame(frame_nb, &raw, layout)?;
        }
        Ok(Outcome::Completed(count))
    }

    /// Starts the sequence and publishes each frame as the driver completes it.
    pub fn run_async(&self, request: &AcquisitionRequest) -> Result<Outcome> {
        let layout = &request.layout;
        let nb_frames = request.nb_frames;
        let transport = self.session.transport();
        let module_mask = self.session.module_mask();
        let chips = self.session.chips_per_module() as u32;

        transport
            .start_async_sequence(request.depth, module_mask, chips, nb_frames)
            .map_err(|e| XpadError::hardware("async sequence start", e))?;
        info!("Async acquisition of {} frame(s) started", nb_frames);

        let mut next = 0;
        let mut last_progress = Instant::now();
        while next < nb_frames {
            if self.status.stop_requested(request.generation) {
                return Ok(Outcome::Stopped(next));
            }

            let completed = transport
                .last_acquired_async_image()
                .map_err(|e| XpadError::hardware("async progress query", e))?
                .min(nb_frames);

            if completed <= next {
                if last_progress.elapsed() >= request.tuning.stall_timeout {
                    return Err(XpadError::hardware(
                        format!("async acquisition stalled at frame {}/{}", next, nb_frames),
                        TransportError::new("xpci_getNumberLastAcquiredAsyncImage"),
                    ));
                }
                thread::sleep(request.tuning.poll_interval);
                continue;
            }

            trace!("Driver reports {} frame(s) done", completed);
            self.status.set_state(AcquisitionState::Readout);
            for index in next..completed {
                if self.status.stop_requested(request.generation) {
                    return Ok(Outcome::Stopped(index));
                }
                let mut raw = self.arena.lease(layout.raw.sample, layout.raw.raw_len());
                transport
                    .get_async_image(
                        request.depth,
                        module_mask,
                        chips,
                        index,
                        &mut raw,
                        layout.geom_corr(),
                    )
                    .map_err(|e| XpadError::hardware(format!("async image {} readout", index), e))?;
                self.publish_frame(index, &raw, layout)?;
            }
            next = completed;
            last_progress = Instant::now();
        }
        Ok(Outcome::Completed(nb_frames))
    }

    fn publish_frame(&self, frame_nb: usize, raw: &PixelData, layout: &FrameLayout) -> Result<()> {
        let mut slot = self.buffer.acquire_slot(frame_nb, &layout.output)?;
        FrameProcessor::process_frame(layout, raw, &mut slot)?;
        self.buffer.publish(frame_nb, slot, FrameInfo::new(frame_nb))?;
        self.status.frame_acquired();
        trace!("Frame {} published", frame_nb);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_ctrl::SoftBufferManager;
    use crate::detector::FrameDim;
    use crate::camera::config::{AcquisitionMode, CameraSettings};
    use crate::transport::{ApiVersion, SimConfig, SimFault, SimPattern, SimulatedTransport};
    use std::sync::Arc;
    use std::time::Duration;

    struct Rig {
        sim: Arc<SimulatedTransport>,
        session: DeviceSession,
        buffer: SoftBufferManager,
        status: SharedStatus,
        arena: RawArena,
    }

    impl Rig {
        fn new(model: &str, module_mask: u32, api_version: ApiVersion) -> Self {
            let sim = Arc::new(SimulatedTransport::new(SimConfig {
                module_mask,
                api_version,
                frame_period: Duration::ZERO,
                pattern: SimPattern::Ramp,
            }));
            let session = DeviceSession::open(model, sim.clone()).unwrap();
            Self {
                sim,
                session,
                buffer: SoftBufferManager::new(16),
                status: SharedStatus::new(),
                arena: RawArena::new(),
            }
        }

        fn request(&self, settings: &CameraSettings) -> AcquisitionRequest {
            let generation = self.status.next_generation();
            AcquisitionRequest::new(&self.session, settings, generation).unwrap()
        }

        fn pipeline(&self) -> FramePipeline<'_> {
            FramePipeline::new(&self.session, &self.buffer, &self.status, &self.arena)
        }

        fn published(&self) -> Vec<usize> {
            self.buffer.frames().iter().map(|f| f.info.acq_frame_nb).collect()
        }
    }

    /// Requests a stop once `after` frames have been published.
    struct StopAfter<'a> {
        inner: SoftBufferManager,
        status: &'a SharedStatus,
        after: usize,
    }

    impl BufferManager for StopAfter<'_> {
        fn set_start_timestamp(&self, start: chrono::DateTime<chrono::Utc>) {
            self.inner.set_start_timestamp(start);
        }

        fn acquire_slot(&self, frame_nb: usize, dim: &FrameDim) -> Result<PixelData> {
            self.inner.acquire_slot(frame_nb, dim)
        }

        fn publish(&self, frame_nb: usize, pixels: PixelData, info: FrameInfo) -> Result<()> {
            self.inner.publish(frame_nb, pixels, info)?;
            if self.inner.published() >= self.after {
                self.status.request_stop();
            }
            Ok(())
        }
    }

    fn async_settings(nb_frames: usize) -> CameraSettings {
        let mut settings = CameraSettings::new()
            .with_nb_frames(nb_frames)
            .with_acquisition_mode(AcquisitionMode::Asynchronous);
        settings.tuning.poll_interval = Duration::from_millis(1);
        settings.tuning.stall_timeout = Duration::from_millis(100);
        settings
    }

    #[test]
    fn test_bulk_publishes_in_order_without_leak() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        let request = rig.request(&CameraSettings::new().with_nb_frames(5));
        let rx = rig.buffer.subscribe();

        let outcome = rig.pipeline().run_sequence(&request).unwrap();

        assert_eq!(outcome, Outcome::Completed(5));
        let order: Vec<usize> = rx.try_iter().map(|f| f.info.acq_frame_nb).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(rig.arena.total_leased(), 5);
        assert_eq!(rig.arena.outstanding(), 0);
        assert_eq!(rig.status.acquired(), 5);
    }

    #[test]
    fn test_bulk_failure_releases_buffers() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        rig.sim.inject_fault(SimFault::ImageSequence);
        let request = rig.request(&CameraSettings::new().with_nb_frames(3));

        let err = rig.pipeline().run_sequence(&request).unwrap_err();

        assert!(matches!(err, XpadError::HardwareOperation { .. }));
        assert_eq!(rig.arena.outstanding(), 0);
        assert_eq!(rig.buffer.published(), 0);
    }

    #[test]
    fn test_stop_before_readout_publishes_nothing() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        let request = rig.request(&CameraSettings::new().with_nb_frames(4));
        rig.status.request_stop();

        let outcome = rig.pipeline().run_sequence(&request).unwrap();

        assert_eq!(outcome, Outcome::Stopped(0));
        assert_eq!(rig.buffer.published(), 0);
        assert_eq!(rig.arena.outstanding(), 0);
    }

    #[test]
    fn test_v1_sequence_with_double_pixel() {
        let rig = Rig::new("IMXPAD_S140", 0b11, ApiVersion::V1);
        let settings = CameraSettings::new()
            .with_nb_frames(2)
            .with_double_pixel_correction(true);
        let request = rig.request(&settings);

        rig.pipeline().run_sequence(&request).unwrap();

        let frames = rig.buffer.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].width(), 578);
        assert_eq!(frames[0].height(), 243);
    }

    #[test]
    fn test_async_repeated_counts_publish_once() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        rig.sim.script_async_counts([0, 1, 1, 1, 3, 3, 2, 4]);
        let request = rig.request(&async_settings(4));

        let outcome = rig.pipeline().run_async(&request).unwrap();

        assert_eq!(outcome, Outcome::Completed(4));
        assert_eq!(rig.published(), vec![0, 1, 2, 3]);
        assert_eq!(rig.sim.call_count("xpci_getAsyncImage"), 4);
        assert_eq!(rig.arena.outstanding(), 0);
    }

    #[test]
    fn test_async_counts_above_total_are_clamped() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        rig.sim.script_async_counts([7]);
        let request = rig.request(&async_settings(2));

        rig.pipeline().run_async(&request).unwrap();

        assert_eq!(rig.published(), vec![0, 1]);
    }

    #[test]
    fn test_async_failure_keeps_earlier_frames() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        rig.sim.inject_fault(SimFault::AsyncImage(2));
        let request = rig.request(&async_settings(5));

        assert!(rig.pipeline().run_async(&request).is_err());
        assert_eq!(rig.published(), vec![0, 1]);
        assert_eq!(rig.arena.outstanding(), 0);
    }

    #[test]
    fn test_async_stall_is_an_error() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        rig.sim.script_async_counts([1]);
        let request = rig.request(&async_settings(3));

        let err = rig.pipeline().run_async(&request).unwrap_err();

        assert!(err.to_string().contains("stalled at frame 1/3"));
        assert_eq!(rig.published(), vec![0]);
    }

    #[test]
    fn test_async_geometric_publishes_float_frames() {
        let rig = Rig::new("IMXPAD_S540", 0xff, ApiVersion::V2);
        let settings = async_settings(2).with_geom_correction(true);
        let request = rig.request(&settings);

        rig.pipeline().run_async(&request).unwrap();

        let frame = rig.buffer.latest().unwrap();
        assert!(matches!(frame.data, PixelData::F32(_)));
        assert_eq!((frame.width(), frame.height()), (578, 981));
    }

    #[test]
    fn test_async_stop_before_first_poll() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        let request = rig.request(&async_settings(3));
        rig.status.request_stop();

        let outcome = rig.pipeline().run_async(&request).unwrap();

        assert_eq!(outcome, Outcome::Stopped(0));
        assert_eq!(rig.sim.call_count("xpci_getNumberLastAcquiredAsyncImage"), 0);
        assert_eq!(rig.buffer.published(), 0);
        assert_eq!(rig.arena.outstanding(), 0);
    }

    #[test]
    fn test_async_stop_between_fetches() {
        let rig = Rig::new("IMXPAD_S70", 0b1, ApiVersion::V2);
        rig.sim.script_async_counts([4]);
        let request = rig.request(&async_settings(4));
        let buffer = StopAfter {
            inner: rig.buffer.clone(),
            status: &rig.status,
            after: 2,
        };

        let outcome = FramePipeline::new(&rig.session, &buffer, &rig.status, &rig.arena)
            .run_async(&request)
            .unwrap();

        assert_eq!(outcome, Outcome::Stopped(2));
        assert_eq!(rig.published(), vec![0, 1]);
        assert_eq!(rig.sim.call_count("xpci_getAsyncImage"), 2);
        assert_eq!(rig.arena.outstanding(), 0);
    }
}
