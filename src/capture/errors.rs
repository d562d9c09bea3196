use thiserror::Error;

use crate::printer::PrinterError;

/// Errors from writing frames to an output artifact.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Failed to encode frame: {0}")]
    Encode(String),
    #[error("Output I/O failed: {0}")]
    Io(String),
    #[error("FFmpeg not found. Please install ffmpeg.")]
    FfmpegNotFound,
    #[error("FFmpeg process failed with exit code {exit_code}: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },
}

impl SinkError {
    /// Returns true if only the current frame is lost and the sink can keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SinkError::Encode(_))
    }
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e.to_string())
    }
}

/// Errors surfaced by a capture, snapshot or live stream run.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Printer is not printing")]
    NotPrinting,
    #[error("Printer model {model} has no camera (3D45 required)")]
    Capability { model: String },
    #[error("Lost contact with printer after {attempts} attempts: {source}")]
    Connectivity {
        attempts: u32,
        #[source]
        source: PrinterError,
    },
    #[error("Camera stream unavailable: {0}")]
    StreamUnavailable(String),
    #[error(transparent)]
    Output(#[from] SinkError),
    #[error("Invalid capture configuration: {0}")]
    Config(String),
}
