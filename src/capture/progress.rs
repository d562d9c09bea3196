use std::io::Write;

use crate::printer::JobState;

/// Single-line progress readout on stderr.
pub struct ProgressReporter {
    enabled: bool,
    printed: bool,
}

impl ProgressReporter {
    pub fn new(silent: bool) -> Self {
        Self {
            enabled: !silent,
            printed: false,
        }
    }

    pub fn update(&mut self, state: JobState, job_progress: f64, frames: u64, bytes: u64) {
        if !self.enabled {
            return;
        }

        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\r[{:>9}] job {:5.1}% | {} frames | {:.2} MB   ",
            state.to_string(),
            job_progress,
            frames,
            bytes as f64 / (1024.0 * 1024.0)
        );
        let _ = stderr.flush();
        self.printed = true;
    }

    pub fn finish(&mut self) {
        if self.printed {
            eprintln!();
            self.printed = false;
        }
    }
}
