use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::capture::CaptureConfig;
use crate::core::settings::AppSettings;

#[derive(Parser, Debug)]
#[command(name = "dremel3d")]
#[command(about = "Control Dremel 3D printers and capture print timelapses", long_about = None)]
pub struct Cli {
    /// Printer IP address or hostname (defaults to "host" in settings.json)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Log progress information
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log debug information
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show printer information
    Info,
    /// Show the current job status
    Job,
    /// Pause the current print
    Pause,
    /// Resume a paused print
    Resume,
    /// Cancel the current print
    Stop,
    /// Upload a G-code file and start printing it
    Print(PrintArgs),
    /// Capture a timelapse GIF of the current print (3D45 only)
    Gif(CaptureArgs),
    /// Record an MP4 video of the current print (3D45 only, needs ffmpeg)
    Record(CaptureArgs),
    /// Keep a JPEG file updated with the live camera view (3D45 only)
    Stream(StreamArgs),
    /// Save a single camera frame (3D45 only)
    Snapshot(SnapshotArgs),
}

#[derive(Args, Debug)]
pub struct PrintArgs {
    #[command(flatten)]
    pub source: PrintSource,

    /// Capture a timelapse GIF to this path once the print is submitted
    #[arg(long, value_name = "OUTPUT")]
    pub timelapse: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct PrintSource {
    /// Local G-code file
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// URL of a G-code file
    #[arg(long)]
    pub url: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct CaptureArgs {
    /// Output file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Frames per second of the output
    #[arg(long)]
    pub fps: Option<u32>,

    /// Maximum output size in MB
    #[arg(long, value_name = "MB")]
    pub max_output_size: Option<f64>,

    /// Length in seconds of the output; the whole print is compressed into it
    #[arg(long, conflicts_with = "length")]
    pub duration: Option<u64>,

    /// Record in real time and stop once the output is this many seconds long
    #[arg(long)]
    pub length: Option<u64>,

    /// Stop after this many seconds of wall-clock time
    #[arg(long, value_name = "SECONDS")]
    pub runtime: Option<u64>,

    /// Capture even when the printer is idle (implies --silent)
    #[arg(long)]
    pub idle: bool,

    /// Do not print progress
    #[arg(long)]
    pub silent: bool,

    /// Keep frames untouched (no progress overlay)
    #[arg(long)]
    pub original: bool,

    /// Rescale frames by this factor
    #[arg(long)]
    pub scale: Option<f64>,
}

#[derive(Args, Debug, Default)]
pub struct StreamArgs {
    /// JPEG file replaced with every new frame
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Keep frames untouched (no progress overlay)
    #[arg(long)]
    pub original: bool,

    /// Rescale frames by this factor
    #[arg(long)]
    pub scale: Option<f64>,

    /// Stop after this many seconds
    #[arg(long, value_name = "SECONDS")]
    pub runtime: Option<u64>,
}

#[derive(Args, Debug, Default)]
pub struct SnapshotArgs {
    /// Image file; the format follows the extension
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keep the frame untouched (no progress overlay)
    #[arg(long)]
    pub original: bool,

    /// Rescale the frame by this factor
    #[arg(long)]
    pub scale: Option<f64>,
}

impl CaptureArgs {
    /// Merge with settings. `continuous` removes the default frame target.
    pub fn into_config(
        self,
        settings: &AppSettings,
        default_output: &str,
        continuous: bool,
    ) -> CaptureConfig {
        let mut config =
            CaptureConfig::new(self.output.unwrap_or_else(|| PathBuf::from(default_output)));

        config.fps = self.fps.unwrap_or(settings.fps);
        config.max_output_size_mb = self.max_output_size.unwrap_or(settings.max_output_size_mb);
        config.target_duration_secs = self.duration;
        config.target_length_secs = self.length;
        config.runtime_cap_secs = self.runtime;
        config.record_while_idle = self.idle;
        config.silent = self.silent || self.idle;
        config.keep_original_frames = self.original;
        config.rescale_factor = self.scale.unwrap_or(settings.scale);
        config.continuous = continuous;
        config.timings = settings.timings();
        config
    }
}
