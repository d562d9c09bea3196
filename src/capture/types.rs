use std::path::PathBuf;
use std::time::Duration;

use super::errors::CaptureError;
use super::pacing::TargetMode;

/// The only model with a built-in camera.
pub const CAMERA_MODEL: &str = "3D45";

pub const DEFAULT_FPS: u32 = 10;
pub const DEFAULT_MAX_SIZE_MB: f64 = 100.0;
pub const DEFAULT_SCALE: f64 = 1.0;
pub const DEFAULT_FRAME_COUNT: u64 = 100;

pub const DEFAULT_GIF_OUTPUT: &str = "timelapse.gif";
pub const DEFAULT_VIDEO_OUTPUT: &str = "timelapse.mp4";
pub const DEFAULT_LIVE_OUTPUT: &str = "live.jpg";
pub const DEFAULT_SNAPSHOT_OUTPUT: &str = "snapshot.jpg";

/// Fixed intervals of the capture loop.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTimings {
    /// Wait before the first status check, letting the camera come up.
    pub startup_grace: Duration,
    pub poll_until_start: Duration,
    pub status_refresh_interval: Duration,
    pub completed_grace_period: Duration,
    pub drain_min_interval: Duration,
    pub max_consecutive_poll_failures: u32,
    /// Consecutive empty reads before a warning is logged.
    pub frame_miss_warn_threshold: u32,
    pub fallback_total_time: Duration,
    pub snapshot_max_attempts: u32,
    pub stream_reconnect_delay: Duration,
}

impl Default for CaptureTimings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(5),
            poll_until_start: Duration::from_secs(2),
            status_refresh_interval: Duration::from_secs(30),
            completed_grace_period: Duration::from_secs(10),
            drain_min_interval: Duration::from_millis(100),
            max_consecutive_poll_failures: 10,
            frame_miss_warn_threshold: 10,
            fallback_total_time: Duration::from_secs(3600),
            snapshot_max_attempts: 10,
            stream_reconnect_delay: Duration::from_secs(2),
        }
    }
}

/// Immutable configuration of one capture run.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub output_path: PathBuf,
    pub fps: u32,
    pub max_output_size_mb: f64,
    pub target_duration_secs: Option<u64>,
    pub target_length_secs: Option<u64>,
    /// Enforced by the caller through the cancellation token.
    pub runtime_cap_secs: Option<u64>,
    pub record_while_idle: bool,
    pub rescale_factor: f64,
    pub silent: bool,
    pub keep_original_frames: bool,
    /// No frame target when neither duration nor length is set (video recording).
    pub continuous: bool,
    pub timings: CaptureTimings,
}

impl CaptureConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            fps: DEFAULT_FPS,
            max_output_size_mb: DEFAULT_MAX_SIZE_MB,
            target_duration_secs: None,
            target_length_secs: None,
            runtime_cap_secs: None,
            record_while_idle: false,
            rescale_factor: DEFAULT_SCALE,
            silent: false,
            keep_original_frames: false,
            continuous: false,
            timings: CaptureTimings::default(),
        }
    }

    pub fn target_mode(&self) -> TargetMode {
        match (self.target_duration_secs, self.target_length_secs) {
            (Some(duration), _) => TargetMode::Duration(duration),
            (None, Some(length)) => TargetMode::Length(length),
            (None, None) if self.continuous => TargetMode::RealTime,
            (None, None) => TargetMode::Frames(DEFAULT_FRAME_COUNT),
        }
    }

    pub fn max_output_bytes(&self) -> u64 {
        (self.max_output_size_mb * 1024.0 * 1024.0) as u64
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.fps == 0 {
            return Err(CaptureError::Config("fps must be greater than 0".to_string()));
        }
        if !(self.rescale_factor.is_finite() && self.rescale_factor > 0.0) {
            return Err(CaptureError::Config(format!(
                "scale must be positive, got {}",
                self.rescale_factor
            )));
        }
        if !(self.max_output_size_mb.is_finite() && self.max_output_size_mb > 0.0) {
            return Err(CaptureError::Config(format!(
                "max output size must be positive, got {}",
                self.max_output_size_mb
            )));
        }
        if self.target_duration_secs.is_some() && self.target_length_secs.is_some() {
            return Err(CaptureError::Config(
                "duration and length are mutually exclusive".to_string(),
            ));
        }
        if self.target_duration_secs == Some(0) || self.target_length_secs == Some(0) {
            return Err(CaptureError::Config(
                "duration and length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fails unless the printer has a camera.
pub fn require_camera_model(model: &str) -> Result<(), CaptureError> {
    if model.trim().eq_ignore_ascii_case(CAMERA_MODEL) {
        Ok(())
    } else {
        Err(CaptureError::Capability {
            model: if model.is_empty() {
                "unknown".to_string()
            } else {
                model.to_string()
            },
        })
    }
}
