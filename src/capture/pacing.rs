//! Frame pacing.
//!
//! Duration and frame-count modes stretch the job's estimated print time over
//! a fixed number of frames, so the timelapse covers the whole job. Length and
//! real-time modes sample at the output frame rate instead.

use std::time::Duration;

use serde::Serialize;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// How the number of frames and the interval between them are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
pub enum TargetMode {
    /// Output length in seconds; the whole job is compressed into it.
    Duration(u64),
    /// Output length in seconds, sampled in real time and stopped when reached.
    Length(u64),
    /// A fixed number of frames spread over the whole job.
    Frames(u64),
    /// Sample at the output frame rate until the job ends.
    RealTime,
}

/// Job time estimates reported by the printer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBudget {
    pub total_time_secs: u64,
    pub remaining_time_secs: u64,
    pub fallback_secs: u64,
}

impl TimeBudget {
    /// Larger of total and remaining time, or the fallback when both are zero.
    /// The flag is true when the fallback was used.
    pub fn effective_total(&self) -> (u64, bool) {
        let total = self.total_time_secs.max(self.remaining_time_secs);
        if total == 0 {
            (self.fallback_secs.max(1), true)
        } else {
            (total, false)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    pub interval: Duration,
    /// Stop once this many frames were written.
    pub target_frames: Option<u64>,
    /// The fallback total time was used.
    pub degraded: bool,
}

pub fn compute_pacing(mode: TargetMode, fps: u32, budget: TimeBudget) -> Pacing {
    let fps = fps.max(1);
    let realtime = Duration::from_secs_f64(1.0 / fps as f64);

    let stretched = |frames: u64| {
        let (total, degraded) = budget.effective_total();
        let interval = Duration::from_secs_f64(total as f64 / frames.max(1) as f64);
        Pacing {
            interval: interval.max(MIN_INTERVAL),
            target_frames: None,
            degraded,
        }
    };

    match mode {
        TargetMode::Duration(secs) => stretched(secs.saturating_mul(fps as u64)),
        TargetMode::Frames(frames) => stretched(frames),
        TargetMode::Length(secs) => Pacing {
            interval: realtime,
            target_frames: Some(secs.saturating_mul(fps as u64)),
            degraded: false,
        },
        TargetMode::RealTime => Pacing {
            interval: realtime,
            target_frames: None,
            degraded: false,
        },
    }
}
