use thiserror::Error;

use crate::capture::{CaptureError, SinkError};
use crate::printer::PrinterError;

/// Top-level error for one CLI invocation.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Printer(#[from] PrinterError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("No printer host given (use --host or set \"host\" in settings.json)")]
    MissingHost,
    #[error("Nothing to print (use --file or --url)")]
    MissingPrintSource,
    #[error("Failed to start async runtime: {0}")]
    Runtime(String),
    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<SinkError> for AppError {
    fn from(e: SinkError) -> Self {
        AppError::Capture(CaptureError::Output(e))
    }
}
