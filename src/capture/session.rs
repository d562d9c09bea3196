use std::path::PathBuf;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::errors::CaptureError;
use super::state::SessionState;
use crate::printer::JobState;

/// Why a capture run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    JobFinished,
    StopRequested,
    RuntimeCapReached,
    SizeCapReached,
    TargetReached,
    StreamLost,
    PollingFailed,
    OutputFailed,
}

impl StopReason {
    pub fn from_error(error: &CaptureError) -> Self {
        match error {
            CaptureError::Connectivity { .. } => StopReason::PollingFailed,
            CaptureError::StreamUnavailable(_) => StopReason::StreamLost,
            _ => StopReason::OutputFailed,
        }
    }
}

/// Mutable state of one run, owned by the orchestrator.
#[derive(Debug)]
pub struct CaptureSession {
    pub state: SessionState,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub frames_dropped: u64,
    pub consecutive_misses: u32,
    pub consecutive_poll_failures: u32,
    pub started_at: Instant,
    /// Wall-clock start, RFC 3339.
    pub started_ts: String,
    pub last_status_refresh_at: Option<Instant>,
    pub degraded_timing: bool,
    pub pacing_interval: Option<Duration>,
}

impl CaptureSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            frames_written: 0,
            bytes_written: 0,
            frames_dropped: 0,
            consecutive_misses: 0,
            consecutive_poll_failures: 0,
            started_at: Instant::now(),
            started_ts: now_rfc3339(),
            last_status_refresh_at: None,
            degraded_timing: false,
            pacing_interval: None,
        }
    }

    pub fn record_frame(&mut self, bytes: u64) {
        self.frames_written += 1;
        self.bytes_written = self.bytes_written.saturating_add(bytes);
        self.consecutive_misses = 0;
    }

    /// Whether a frame of `frame_bytes` still fits under `budget`.
    pub fn fits(&self, frame_bytes: u64, budget: u64) -> bool {
        self.bytes_written.saturating_add(frame_bytes) <= budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of a finished run, printed as JSON by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReport {
    pub frames_written: u64,
    /// Estimate; the encoder may still buffer a trailer.
    pub bytes_written: u64,
    pub frames_dropped: u64,
    pub stop_reason: StopReason,
    pub output_path: Option<PathBuf>,
    pub last_job_state: JobState,
    pub degraded_timing: bool,
    #[serde(with = "duration_secs")]
    pub pacing_interval: Option<Duration>,
    #[serde(with = "duration_secs")]
    pub elapsed: Option<Duration>,
    pub started_at: String,
    pub finished_at: String,
}

impl CaptureReport {
    pub fn from_session(
        session: &CaptureSession,
        stop_reason: StopReason,
        output_path: Option<PathBuf>,
        last_job_state: JobState,
    ) -> Self {
        Self {
            frames_written: session.frames_written,
            bytes_written: session.bytes_written,
            frames_dropped: session.frames_dropped,
            stop_reason,
            output_path,
            last_job_state,
            degraded_timing: session.degraded_timing,
            pacing_interval: session.pacing_interval,
            elapsed: Some(session.elapsed()),
            started_at: session.started_ts.clone(),
            finished_at: now_rfc3339(),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_f64(d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_uses_exact_frame_size() {
        let mut session = CaptureSession::new();
        assert!(session.fits(500, 500));
        assert!(!session.fits(501, 500));

        session.record_frame(200);
        session.record_frame(300);
        assert_eq!(session.bytes_written, 500);
        assert!(session.fits(0, 500));
        assert!(!session.fits(1, 500));
        assert!(!session.fits(u64::MAX, u64::MAX - 1));
    }

    #[test]
    fn test_stop_reason_from_error() {
        let err = CaptureError::StreamUnavailable("closed".to_string());
        assert_eq!(StopReason::from_error(&err), StopReason::StreamLost);
    }

    #[test]
    fn test_report_serializes() {
        let session = CaptureSession::new();
        let report = CaptureReport::from_session(
            &session,
            StopReason::SizeCapReached,
            None,
            JobState::Building,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stop_reason"], "size_cap_reached");
        assert_eq!(json["last_job_state"], "building");
        assert!(json["pacing_interval"].is_null());
        assert!(json["started_at"].as_str().unwrap().ends_with('Z'));
    }
}
