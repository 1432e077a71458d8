use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::camera::{
    exp_time_to_us, AcquisitionMode, CameraSettings, PipelineTuning, SpecificParameters, TrigMode,
};
use crate::cli::CliArgs;
use crate::detector::{DetectorModel, PixelDepth};
use crate::frame::DEFAULT_NORMALIZATION_FACTOR;
use crate::transport::{ApiVersion, SimConfig, SimPattern};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub camera: CameraSection,
    pub acquisition: AcquisitionSection,
    #[serde(default)]
    pub timing: TimingSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    pub output: OutputSection,
}

#[derive(Debug, Deserialize)]
pub struct CameraSection {
    pub model: String,
    #[serde(default)]
    pub pixel_depth: PixelDepth,
    #[serde(default)]
    pub double_pixel_correction: bool,
    #[serde(default)]
    pub geom_correction: bool,
    #[serde(default = "default_normalization_factor")]
    pub normalization_factor: f64,
    #[serde(default = "default_adjusting_number")]
    pub calibration_adjusting_number: u32,
    #[serde(default)]
    pub specific: SpecificParameters,
}

#[derive(Debug, Deserialize)]
pub struct AcquisitionSection {
    #[serde(default)]
    pub mode: AcquisitionMode,
    pub nb_frames: usize,
    /// Seconds.
    pub exp_time: f64,
    #[serde(default)]
    pub trig_mode: TrigMode,
    /// Live acquisitions are stopped after this many seconds.
    #[serde(default = "default_live_duration")]
    pub live_duration_s: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub poll_interval_ms: u64,
    pub stall_timeout_ms: u64,
    pub reply_timeout_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        let tuning = PipelineTuning::default();
        Self {
            poll_interval_ms: tuning.poll_interval.as_millis() as u64,
            stall_timeout_ms: tuning.stall_timeout.as_millis() as u64,
            reply_timeout_ms: tuning.reply_timeout.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    pub module_mask: u32,
    pub api_version: ApiVersion,
    pub frame_period_ms: u64,
    pub pattern: SimPattern,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            module_mask: 0x3,
            api_version: ApiVersion::V2,
            frame_period_ms: 10,
            pattern: SimPattern::Noise,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OutputSection {
    pub save_folder: String,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_normalization_factor() -> f64 {
    DEFAULT_NORMALIZATION_FACTOR
}

fn default_adjusting_number() -> u32 {
    1
}

fn default_live_duration() -> f64 {
    2.0
}

fn default_buffer_capacity() -> usize {
    16
}

impl Config {
    pub fn load(cli_args: &CliArgs) -> Result<Self> {
        let config_path = cli_args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
        info!("Loading configuration from {}", config_path);

        let config_str = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;

        let mut config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", config_path))?;

        config.override_with_cli_args(cli_args);

        config.validate()?;

        Ok(config)
    }

    fn override_with_cli_args(&mut self, args: &CliArgs) {
        if let Some(model) = &args.model {
            self.camera.model = model.clone();
        }
        if let Some(depth) = args.depth {
            self.camera.pixel_depth = depth.into();
        }
        if args.double_pixel {
            self.camera.double_pixel_correction = true;
        }
        if args.geom_correction {
            self.camera.geom_correction = true;
        }

        if let Some(frames) = args.frames {
            self.acquisition.nb_frames = frames;
        }
        if let Some(exposure) = args.exposure {
            self.acquisition.exp_time = exposure;
        }
        if let Some(mode) = args.mode {
            self.acquisition.mode = mode.into();
        }
        if let Some(seconds) = args.live_seconds {
            self.acquisition.live_duration_s = seconds;
        }

        if let Some(folder) = &args.save_folder {
            self.output.save_folder = folder.clone();
        }
    }

    pub fn model(&self) -> Result<DetectorModel> {
        self.camera
            .model
            .parse()
            .context("Invalid camera configuration")
    }

    pub fn tuning(&self) -> PipelineTuning {
        PipelineTuning {
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
            stall_timeout: Duration::from_millis(self.timing.stall_timeout_ms),
            reply_timeout: Duration::from_millis(self.timing.reply_timeout_ms),
        }
    }

    pub fn camera_settings(&self) -> Result<CameraSettings> {
        let mut settings = CameraSettings::new()
            .with_pixel_depth(self.camera.pixel_depth)
            .with_nb_frames(self.acquisition.nb_frames)
            .with_trig_mode(self.acquisition.trig_mode)
            .with_exp_time_us(exp_time_to_us(self.acquisition.exp_time)?)
            .with_acquisition_mode(self.acquisition.mode)
            .with_double_pixel_correction(self.camera.double_pixel_correction)
            .with_geom_correction(self.camera.geom_correction)
            .with_normalization_factor(self.camera.normalization_factor)
            .with_tuning(self.tuning());
        settings.specific = self.camera.specific;
        settings.calibration_adjusting_number = self.camera.calibration_adjusting_number;
        Ok(settings)
    }

    pub fn sim_config(&self) -> SimConfig {
        SimConfig {
            module_mask: self.simulation.module_mask,
            api_version: self.simulation.api_version,
            frame_period: Duration::from_millis(self.simulation.frame_period_ms),
            pattern: self.simulation.pattern,
        }
    }

    pub fn live_duration(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.acquisition.live_duration_s)
            .context("Live duration must be a non-negative number of seconds")
    }

    fn validate(&self) -> Result<()> {
        // Camera and acquisition settings
        let model = self.model()?;
        self.camera_settings()?
            .validate(model)
            .context("Invalid camera configuration")?;
        self.live_duration()?;

        if self.simulation.module_mask == 0 {
            warn!("Simulated detector has no module; initialization will fail");
        }

        if self.output.save_folder.is_empty() {
            return Err(anyhow::anyhow!("Save folder cannot be empty"));
        }
        if self.output.buffer_capacity == 0 {
            return Err(anyhow::anyhow!("Buffer capacity must be at least 1"));
        }

        // Ensure save folder exists
        let save_folder = Path::new(&self.output.save_folder);
        if !save_folder.exists() {
            warn!("Save folder does not exist. Creating it.");
            fs::create_dir_all(save_folder)
                .with_context(|| format!("Failed to create save folder: {}", self.output.save_folder))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn write_config(dir: &Path, body: &str) -> String {
        let path = dir.join("xpad.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn minimal(save_folder: &Path) -> String {
        format!(
            r#"
[camera]
model = "IMXPAD_S140"

[acquisition]
nb_frames = 4
exp_time = 0.01

[output]
save_folder = "{}"
"#,
            save_folder.display()
        )
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("frames");
        let path = write_config(dir.path(), &minimal(&out));
        let args = CliArgs::parse_from(["xpad_camera", "--config", &path]);

        let config = Config::load(&args).unwrap();
        let settings = config.camera_settings().unwrap();

        assert_eq!(config.model().unwrap(), DetectorModel::ImxpadS140);
        assert_eq!(settings.nb_frames, 4);
        assert_eq!(settings.exp_time_us, 10_000);
        assert_eq!(settings.tuning, PipelineTuning::default());
        assert_eq!(config.simulation.module_mask, 0x3);
        assert!(out.exists());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &minimal(dir.path()));
        let args = CliArgs::parse_from([
            "xpad_camera",
            "--config",
            &path,
            "--frames",
            "0",
            "--double-pixel",
            "--depth",
            "32",
        ]);

        let config = Config::load(&args).unwrap();
        let settings = config.camera_settings().unwrap();
        assert!(settings.is_live());
        assert!(settings.double_pixel_correction);
        assert_eq!(settings.pixel_depth, PixelDepth::Bpp32);
    }

    #[test]
    fn test_unsupported_correction_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &minimal(dir.path()));
        let args = CliArgs::parse_from(["xpad_camera", "--config", &path, "--geom-correction"]);
        assert!(Config::load(&args).is_err());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), &minimal(dir.path()));
        let args = CliArgs::parse_from(["xpad_camera", "--config", &path, "--model", "MAXIPIX"]);
        let err = Config::load(&args).unwrap_err();
        assert!(format!("{:#}", err).contains("Xpad model not supported"));
    }

    #[test]
    fn test_missing_file() {
        let args = CliArgs::parse_from(["xpad_camera", "--config", "/nonexistent/xpad.toml"]);
        assert!(Config::load(&args).is_err());
    }
}
