pub mod camera;
pub mod errors;
pub mod frame;
pub mod orchestrator;
pub mod pacing;
pub mod progress;
pub mod session;
pub mod sink;
pub mod snapshot;
pub mod state;
pub mod stream;
pub mod types;

pub use camera::{FrameSource, FrameStream, MjpegCamera};
pub use errors::{CaptureError, SinkError};
pub use frame::{FrameProcessor, Overlay};
pub use orchestrator::CaptureOrchestrator;
pub use pacing::{compute_pacing, Pacing, TargetMode, TimeBudget};
pub use session::{CaptureReport, CaptureSession, StopReason};
pub use sink::{check_ffmpeg, EncodedFrame, FrameSink, GifSink, OutputGuard, VideoSink};
pub use snapshot::take_snapshot;
pub use state::{CapturePhase, PhaseEvent, SessionState};
pub use stream::{FrameDisplay, LiveFileDisplay, LiveStream, StreamReport};
pub use types::{require_camera_model, CaptureConfig, CaptureTimings, CAMERA_MODEL};
