use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};

use super::{promote, remove_if_exists, EncodedFrame, FrameSink};
use crate::capture::errors::SinkError;
use crate::shared::paths::{ensure_dir, partial_path_for};

pub const ENCODING_CRF: &str = "18";
pub const ENCODING_PRESET: &str = "slower";
const JPEG_QUALITY: u8 = 90;

pub fn check_ffmpeg() -> Result<(), SinkError> {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|_| SinkError::FfmpegNotFound)?;
    Ok(())
}

/// Run the child in its own process group. A terminal Ctrl-C then reaches
/// only this process, and FFmpeg is stopped by closing its stdin.
#[cfg(unix)]
fn configure_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn configure_process_group(_command: &mut Command) {}

/// Kills FFmpeg and deletes the partial file unless marked completed.
struct FfmpegGuard {
    child: Option<Child>,
    partial_path: PathBuf,
    completed: bool,
}

impl FfmpegGuard {
    fn mark_completed(&mut self) {
        self.completed = true;
    }

    fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }

    fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    fn abort(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;

        if let Some(mut child) = self.child.take() {
            tracing::info!(target: "capture", "[SINK] Killing FFmpeg process");
            if let Err(e) = child.kill() {
                tracing::warn!(target: "capture", "[SINK] Failed to kill FFmpeg: {}", e);
            }
            let _ = child.wait();
        }

        if self.partial_path.exists() {
            tracing::info!(target: "capture", "[SINK] Deleting partial file: {:?}", self.partial_path);
            if let Err(e) = std::fs::remove_file(&self.partial_path) {
                tracing::warn!(target: "capture", "[SINK] Failed to delete partial file: {}", e);
            }
        }
    }
}

impl Drop for FfmpegGuard {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(target: "capture", "[SINK] FfmpegGuard dropping without completion, cleaning up...");
            self.abort();
        }
    }
}

/// MP4 (H.264) recording through a piped `ffmpeg` process fed with JPEG frames.
pub struct VideoSink {
    guard: FfmpegGuard,
    stdin: Option<ChildStdin>,
    frames: u64,
    bytes: u64,
    output_path: PathBuf,
}

pub(crate) fn ffmpeg_args(fps: u32, partial_path: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    // JPEG frames on stdin
    args.extend([
        "-f".to_string(), "image2pipe".to_string(),
        "-c:v".to_string(), "mjpeg".to_string(),
        "-framerate".to_string(), fps.max(1).to_string(),
        "-i".to_string(), "pipe:0".to_string(),
    ]);

    // yuv420p needs even dimensions
    args.extend([
        "-c:v".to_string(), "libx264".to_string(),
        "-pix_fmt".to_string(), "yuv420p".to_string(),
        "-vf".to_string(), "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-crf".to_string(), ENCODING_CRF.to_string(),
        "-preset".to_string(), ENCODING_PRESET.to_string(),
    ]);

    args.extend([
        "-movflags".to_string(), "+faststart".to_string(),
        "-y".to_string(),
        partial_path.to_string_lossy().to_string(),
    ]);

    args
}

impl VideoSink {
    pub fn create(output: &Path, fps: u32) -> Result<Self, SinkError> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }

        let partial_path = partial_path_for(output);
        remove_if_exists(output)?;
        remove_if_exists(&partial_path)?;

        let args = ffmpeg_args(fps, &partial_path);
        tracing::info!(
            target: "capture",
            "[SINK] Starting FFmpeg: {}fps, preset={}, crf={} -> {:?}",
            fps,
            ENCODING_PRESET,
            ENCODING_CRF,
            output
        );
        tracing::debug!(target: "capture", "[SINK] FFmpeg args: {:?}", args);

        let mut command = Command::new("ffmpeg");
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        configure_process_group(&mut command);

        let child = command
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => SinkError::FfmpegNotFound,
                _ => SinkError::Io(format!("Failed to spawn FFmpeg: {}", e)),
            })?;

        let mut guard = FfmpegGuard {
            child: Some(child),
            partial_path,
            completed: false,
        };

        let stdin = guard
            .child_mut()
            .and_then(|c| c.stdin.take())
            .ok_or_else(|| SinkError::Io("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            guard,
            stdin: Some(stdin),
            frames: 0,
            bytes: 0,
            output_path: output.to_path_buf(),
        })
    }
}

impl FrameSink for VideoSink {
    fn encode(&mut self, frame: &RgbaImage) -> Result<EncodedFrame, SinkError> {
        if self.stdin.is_none() {
            return Err(SinkError::Io("video output already finished".to_string()));
        }

        let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&rgb)
            .map_err(|e| SinkError::Encode(e.to_string()))?;
        Ok(EncodedFrame::new(jpeg))
    }

    /// The returned size is the JPEG fed to FFmpeg. The H.264 output is far
    /// smaller, so the running total overestimates the file.
    fn commit(&mut self, frame: EncodedFrame) -> Result<u64, SinkError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SinkError::Io("video output already finished".to_string()))?;

        stdin.write_all(frame.as_bytes()).map_err(|e| {
            SinkError::Io(format!("Failed to write frame {}: {}", self.frames, e))
        })?;

        self.frames += 1;
        self.bytes += frame.len();

        if self.frames % 60 == 0 {
            tracing::debug!(target: "capture", "[SINK] Written {} frames", self.frames);
        }

        Ok(frame.len())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, SinkError> {
        let Some(stdin) = self.stdin.take() else {
            return Ok(None);
        };

        if self.frames == 0 {
            drop(stdin);
            tracing::warn!(target: "capture", "[SINK] No frames captured, discarding video");
            self.guard.abort();
            return Ok(None);
        }

        drop(stdin);
        tracing::info!(target: "capture", "[SINK] Finalizing video ({} frames, {} input bytes)...", self.frames, self.bytes);

        let Some(mut child) = self.guard.take_child() else {
            return Err(SinkError::Io("FFmpeg process missing".to_string()));
        };

        let status = child
            .wait()
            .map_err(|e| SinkError::Io(format!("Failed to wait for FFmpeg: {}", e)))?;

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr);
            }
            tracing::error!(target: "capture", "[SINK] FFmpeg failed: {}", stderr);
            return Err(SinkError::ProcessFailed {
                exit_code: status.code().unwrap_or(-1),
                stderr,
            });
        }

        let path = promote(&self.guard.partial_path, &self.output_path)?;
        self.guard.mark_completed();
        Ok(Some(path))
    }
}
