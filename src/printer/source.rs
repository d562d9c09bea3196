use async_trait::async_trait;

use super::errors::PrinterError;
use super::status::{JobState, JobStatus};

/// Polled view of a printer's job.
///
/// Only `refresh` touches the network. Every other accessor reads the status
/// cached by the last successful refresh, so callers refresh after any wait
/// before trusting the derived booleans.
#[async_trait]
pub trait PrinterStatusSource: Send {
    /// Fetch the current job status. Fails with a connectivity error when the
    /// printer cannot be reached; the cached status is left untouched.
    async fn refresh(&mut self) -> Result<(), PrinterError>;

    /// Status cached by the last successful refresh.
    fn job_status(&self) -> &JobStatus;

    fn is_busy(&self) -> bool {
        self.job_status().is_busy()
    }

    fn is_building(&self) -> bool {
        self.job_status().is_building()
    }

    fn is_completed(&self) -> bool {
        self.job_status().is_completed()
    }

    fn job_state(&self) -> JobState {
        self.job_status().job_state()
    }

    /// Seconds, 0 if unknown.
    fn total_time(&self) -> u64 {
        self.job_status().total_time
    }

    /// Seconds, 0 if unknown.
    fn remaining_time(&self) -> u64 {
        self.job_status().remaining_time
    }

    fn progress(&self) -> f64 {
        self.job_status().progress
    }
}
