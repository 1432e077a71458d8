use clap::{Parser, ValueEnum};

use crate::camera::AcquisitionMode;
use crate::detector::PixelDepth;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeArg {
    Sync,
    Async,
}

impl From<ModeArg> for AcquisitionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sync => AcquisitionMode::Synchronous,
            ModeArg::Async => AcquisitionMode::Asynchronous,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthArg {
    #[value(name = "16")]
    Bits16,
    #[value(name = "32")]
    Bits32,
}

impl From<DepthArg> for PixelDepth {
    fn from(depth: DepthArg) -> Self {
        match depth {
            DepthArg::Bits16 => PixelDepth::Bpp16,
            DepthArg::Bits32 => PixelDepth::Bpp32,
        }
    }
}

/// Every option overrides the matching configuration file entry.
#[derive(Parser, Debug)]
#[command(author, version, about = "Acquire frames from an XPAD detector", long_about = None)]
pub struct CliArgs {
    #[arg(long)]
    pub config: Option<String>,

    /// BACKPLANE, HUB, IMXPAD_S70, IMXPAD_S140, IMXPAD_S340 or IMXPAD_S540
    #[arg(long)]
    pub model: Option<String>,

    /// Number of frames; 0 runs live mode
    #[arg(long)]
    pub frames: Option<usize>,

    /// Exposure time in seconds
    #[arg(long)]
    pub exposure: Option<f64>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,

    #[arg(long, value_enum)]
    pub depth: Option<DepthArg>,

    #[arg(long)]
    pub double_pixel: bool,

    #[arg(long)]
    pub geom_correction: bool,

    /// How long a live acquisition runs before it is stopped
    #[arg(long)]
    pub live_seconds: Option<f64>,

    #[arg(long)]
    pub save_folder: Option<String>,

    #[arg(long)]
    pub log_file: Option<String>,

    #[arg(long)]
    pub debug: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl CliArgs {
    /// 0 = info, 1 = debug, 2+ = trace.
    pub fn verbosity(&self) -> u8 {
        if self.debug {
            self.verbose.max(1)
        } else {
            self.verbose
        }
    }
}
