use anyhow::Result;
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use log::{debug, info, LevelFilter};
use std::io;
use std::thread;

/// Level for the `-v` count: 0 = info, 1 = debug, 2+ = trace.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Thread name shown in log lines; the acquisition worker is "xpad-task".
fn thread_label() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}

/// Logs to stdout with coloured levels, and to `log_file` with full dates
/// when given. The `image` encoder is capped at warnings.
pub fn setup_logging(verbosity: u8, log_file: Option<&str>) -> Result<()> {
    let level = level_for(verbosity);
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);

    let console = fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}][{}] {}",
                Local::now().format("[%H:%M:%S%.3f]"),
                thread_label(),
                record.target(),
                colors.color(record.level()),
                message
            ))
        })
        .chain(io::stdout());

    let mut dispatch = fern::Dispatch::new()
        .level(level)
        .level_for("image", LevelFilter::Warn)
        .chain(console);

    if let Some(path) = log_file {
        let file = fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "{}[{}][{}][{}] {}",
                    Local::now().format("[%Y-%m-%d][%H:%M:%S%.3f]"),
                    thread_label(),
                    record.target(),
                    record.level(),
                    message
                ))
            })
            .chain(fern::log_file(path)?);
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;

    info!("Logging at {} level", level);
    debug!("Log file: {}", log_file.unwrap_or("none"));

    Ok(())
}

pub fn log_app_start(version: &str) {
    info!("Starting XPAD camera driver v{}", version);
}

pub fn log_app_config(config: &crate::config::Config) {
    info!("Application configured with:");
    info!("  Camera:");
    info!("    Model: {}", config.camera.model);
    info!("    Pixel depth: {:?}", config.camera.pixel_depth);
    info!("    Double pixel correction: {}", config.camera.double_pixel_correction);
    info!("    Geometric correction: {}", config.camera.geom_correction);
    info!("  Acquisition:");
    info!("    Mode: {:?}", config.acquisition.mode);
    info!("    Frames: {}", config.acquisition.nb_frames);
    info!("    Exposure: {} s", config.acquisition.exp_time);
    info!("    Trigger: {:?}", config.acquisition.trig_mode);
    info!("  Timing:");
    info!("    Poll interval: {} ms", config.timing.poll_interval_ms);
    info!("    Stall timeout: {} ms", config.timing.stall_timeout_ms);
    info!("  Simulation:");
    info!("    Module mask: {:#x}", config.simulation.module_mask);
    info!("    API version: {:?}", config.simulation.api_version);
    info!("  Output:");
    info!("    Save folder: {}", config.output.save_folder);
}
