use xpad_camera::{
    buffer_ctrl::SoftBufferManager,
    camera::{AcquisitionState, Camera, EventSeverity},
    cli::CliArgs,
    config::Config,
    detector::DeviceSession,
    frame::{save_acquisition_metadata, save_frame, ArcFrame, FrameMetadata},
    logging,
    transport::SimulatedTransport,
};

use anyhow::{Context, Result};
use crossbeam::channel::RecvTimeoutError;
use clap::Parser;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const STATUS_POLL: Duration = Duration::from_millis(20);

fn main() -> Result<()> {
    // Parse command-line arguments
    let cli_args = CliArgs::parse();

    // Setup logging
    logging::setup_logging(cli_args.verbosity(), cli_args.log_file.as_deref())?;
    logging::log_app_start(env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&cli_args)?;
    logging::log_app_config(&config);

    // Open the detector
    let transport = Arc::new(SimulatedTransport::new(config.sim_config()));
    let session = DeviceSession::open(&config.camera.model, transport)
        .context("Failed to open detector session")?;

    let buffer = SoftBufferManager::new(config.output.buffer_capacity);
    let frames = buffer.subscribe();
    let settings = config.camera_settings()?;
    let live = settings.is_live();
    let camera = Camera::new(session, Arc::new(buffer.clone()), settings)?;
    let events = camera.events();

    camera.prepare()?;
    camera.start()?;

    let mut received: Vec<ArcFrame> = Vec::new();
    if live {
        let duration = config.live_duration()?;
        info!("Live acquisition for {:.1} s", duration.as_secs_f64());
        thread::sleep(duration);
        camera.stop();
        received.extend(frames.try_iter());
    } else {
        let expected = camera.nb_frames();
        let deadline = Instant::now()
            + Duration::from_secs_f64(camera.exp_time() * expected as f64)
            + config.tuning().stall_timeout;
        while received.len() < expected {
            match frames.recv_timeout(STATUS_POLL) {
                Ok(frame) => received.push(frame),
                Err(RecvTimeoutError::Timeout) => {
                    if camera.status() == AcquisitionState::Fault || Instant::now() > deadline {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    for event in events.try_iter() {
        match event.severity {
            EventSeverity::Error => error!("Detector event: {}", event.message),
            EventSeverity::Warning => warn!("Detector event: {}", event.message),
            EventSeverity::Info => info!("Detector event: {}", event.message),
        }
    }

    info!(
        "Acquisition finished in state {} with {} frames",
        camera.status(),
        received.len()
    );

    let save_folder = Path::new(&config.output.save_folder);
    let mut metadata = Vec::with_capacity(received.len());
    for (sequence, frame) in received.iter().enumerate() {
        save_frame(frame, sequence, save_folder)?;
        metadata.push(FrameMetadata::from_frame(sequence, frame));
    }
    if !metadata.is_empty() {
        save_acquisition_metadata(&metadata, &save_folder.join("acquisition_metadata.csv"))?;
    }

    if camera.status() == AcquisitionState::Fault {
        anyhow::bail!("Detector ended in fault state");
    }

    info!("Application shutting down");
    Ok(())
}
