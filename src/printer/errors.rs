use thiserror::Error;

/// Errors from the printer's HTTP command API.
#[derive(Error, Debug)]
pub enum PrinterError {
    #[error("Printer unreachable: {0}")]
    Connectivity(String),
    #[error("Printer rejected {command}: {message}")]
    Api { command: String, message: String },
    #[error("Invalid printer response: {0}")]
    InvalidResponse(String),
    #[error("Failed to read print file: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for PrinterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            PrinterError::InvalidResponse(e.to_string())
        } else {
            PrinterError::Connectivity(e.to_string())
        }
    }
}

impl PrinterError {
    /// Returns true for failures a later poll may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PrinterError::Connectivity(_) | PrinterError::InvalidResponse(_)
        )
    }
}
