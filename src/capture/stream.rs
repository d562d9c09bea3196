//! Live camera view.
//!
//! Runs until cancelled: no size or duration limit, and a lost camera stream
//! is reopened after a delay instead of ending the run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::camera::{FrameSource, FrameStream};
use super::errors::SinkError;
use super::frame::{FrameProcessor, Overlay};
use super::sink::promote;
use super::types::CaptureTimings;
use crate::printer::PrinterStatusSource;
use crate::shared::paths::{ensure_dir, partial_path_for};

const LIVE_JPEG_QUALITY: u8 = 85;

/// Where live frames go.
pub trait FrameDisplay: Send {
    fn show(&mut self, frame: &RgbaImage) -> Result<(), SinkError>;
}

/// Keeps a JPEG file on disk replaced with the newest frame, for image
/// viewers that reload on change.
pub struct LiveFileDisplay {
    path: PathBuf,
    partial: PathBuf,
}

impl LiveFileDisplay {
    pub fn new(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            partial: partial_path_for(path),
        })
    }
}

impl FrameDisplay for LiveFileDisplay {
    fn show(&mut self, frame: &RgbaImage) -> Result<(), SinkError> {
        let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, LIVE_JPEG_QUALITY)
            .encode_image(&rgb)
            .map_err(|e| SinkError::Encode(e.to_string()))?;

        std::fs::write(&self.partial, &jpeg)?;
        std::fs::rename(&self.partial, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamReport {
    pub frames_shown: u64,
    pub reconnects: u64,
    pub output_path: Option<PathBuf>,
}

pub struct LiveStream<'a, P, F, D> {
    pub printer: &'a mut P,
    pub source: &'a F,
    pub url: &'a str,
    pub display: &'a mut D,
    pub processor: FrameProcessor,
    pub fps: u32,
    pub timings: CaptureTimings,
}

impl<P, F, D> LiveStream<'_, P, F, D>
where
    P: PrinterStatusSource,
    F: FrameSource,
    D: FrameDisplay,
{
    /// Show frames until `cancel` fires.
    pub async fn run(mut self, cancel: &CancellationToken) -> StreamReport {
        let mut report = StreamReport::default();
        let interval = Duration::from_secs_f64(1.0 / self.fps.max(1) as f64);
        let mut next_refresh = Instant::now();

        tracing::info!(target: "capture", "[STREAM] Live view from {}", self.url);

        'reconnect: loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'reconnect,
                result = self.source.open_stream(self.url) => result,
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(target: "capture", "[STREAM] Cannot open camera: {}", e);
                    report.reconnects += 1;
                    if wait(cancel, self.timings.stream_reconnect_delay).await {
                        break 'reconnect;
                    }
                    continue 'reconnect;
                }
            };

            let mut next_tick = Instant::now();
            loop {
                if Instant::now() >= next_refresh {
                    next_refresh = Instant::now() + self.timings.status_refresh_interval;
                    let refreshed = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.printer.refresh() => Some(result),
                    };
                    match refreshed {
                        None => {
                            stream.close();
                            break 'reconnect;
                        }
                        Some(Err(e)) => {
                            tracing::debug!(target: "capture", "[STREAM] Status refresh failed: {}", e);
                        }
                        Some(Ok(())) => {}
                    }
                }

                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = stream.read_frame() => Some(result),
                };

                match read {
                    None => {
                        stream.close();
                        break 'reconnect;
                    }
                    Some(Ok(Some(frame))) => {
                        let overlay = Overlay {
                            progress: self.printer.progress(),
                            state: self.printer.job_state(),
                        };
                        let processed = self.processor.process(frame, Some(&overlay));
                        match self.display.show(&processed) {
                            Ok(()) => report.frames_shown += 1,
                            Err(e) => {
                                tracing::warn!(target: "capture", "[STREAM] Display failed: {}", e)
                            }
                        }
                    }
                    Some(Ok(None)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(target: "capture", "[STREAM] Stream lost, reconnecting: {}", e);
                        stream.close();
                        report.reconnects += 1;
                        if wait(cancel, self.timings.stream_reconnect_delay).await {
                            break 'reconnect;
                        }
                        continue 'reconnect;
                    }
                }

                next_tick += interval;
                let now = Instant::now();
                if next_tick < now {
                    next_tick = now;
                }
                if wait_until(cancel, next_tick).await {
                    stream.close();
                    break 'reconnect;
                }
            }
        }

        tracing::info!(
            target: "capture",
            "[STREAM] Stopped after {} frames ({} reconnects)",
            report.frames_shown,
            report.reconnects
        );
        report
    }
}

/// Returns true if cancelled.
async fn wait(cancel: &CancellationToken, duration: Duration) -> bool {
    wait_until(cancel, Instant::now() + duration).await
}

async fn wait_until(cancel: &CancellationToken, deadline: Instant) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep_until(deadline) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_live_file_display_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.jpg");
        let mut display = LiveFileDisplay::new(&path).unwrap();

        let frame = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
        display.show(&frame).unwrap();
        display.show(&frame).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(!partial_path_for(&path).exists());
    }
}
