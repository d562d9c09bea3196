//! Pure state machine for the capture lifecycle.
//!
//! `transition(phase, event)` never performs I/O. Events that do not apply to
//! the current phase leave it unchanged.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CapturePhase {
    /// Startup grace and busy check.
    #[default]
    AwaitingStart,
    /// Printer is busy but not building yet (heating, preparing).
    WaitingForJobToBegin,
    Capturing,
    /// Grace window after the job ended.
    Draining,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    StartConfirmed,
    JobStarted,
    JobEnded,
    GraceElapsed,
    StopRequested,
    SizeCapReached,
    TargetReached,
    Failed,
}

pub fn transition(phase: CapturePhase, event: PhaseEvent) -> CapturePhase {
    use CapturePhase::*;
    use PhaseEvent::*;

    match (phase, event) {
        (Finished, _) => Finished,

        (_, StopRequested) | (_, Failed) => Finished,

        (AwaitingStart, StartConfirmed) => WaitingForJobToBegin,

        (WaitingForJobToBegin, JobStarted) => Capturing,
        (WaitingForJobToBegin, JobEnded) => Draining,

        (Capturing, JobEnded) => Draining,
        (Capturing, SizeCapReached) | (Capturing, TargetReached) => Finished,

        (Draining, GraceElapsed) | (Draining, SizeCapReached) | (Draining, TargetReached) => {
            Finished
        }

        (current, _) => current,
    }
}

/// Coarse session state exposed in logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Polling,
    Capturing,
    Draining,
    Stopped,
}

impl From<CapturePhase> for SessionState {
    fn from(phase: CapturePhase) -> Self {
        match phase {
            CapturePhase::AwaitingStart => SessionState::Idle,
            CapturePhase::WaitingForJobToBegin => SessionState::Polling,
            CapturePhase::Capturing => SessionState::Capturing,
            CapturePhase::Draining => SessionState::Draining,
            CapturePhase::Finished => SessionState::Stopped,
        }
    }
}
