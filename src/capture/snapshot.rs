use std::path::{Path, PathBuf};

use image::DynamicImage;
use tokio_util::sync::CancellationToken;

use super::camera::{FrameSource, FrameStream};
use super::errors::{CaptureError, SinkError};
use super::frame::{FrameProcessor, Overlay};
use super::sink::promote;
use crate::shared::paths::{ensure_dir, partial_path_for};

/// Grab one frame from a fresh stream and write it to `output`.
///
/// The image format follows the file extension. Returns `Ok(None)` when
/// cancelled before a frame arrived.
pub async fn take_snapshot<F: FrameSource>(
    source: &F,
    url: &str,
    output: &Path,
    processor: &FrameProcessor,
    overlay: Option<Overlay>,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>, CaptureError> {
    let mut stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        result = source.open_stream(url) => result?,
    };

    let frame = read_one(&mut stream, max_attempts.max(1), cancel).await;
    stream.close();

    let Some(frame) = frame? else {
        return Ok(None);
    };

    let processed = processor.process(frame, overlay.as_ref());
    let rgb = DynamicImage::ImageRgba8(processed).into_rgb8();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).map_err(SinkError::from)?;
    }
    let partial = partial_path_for(output);
    rgb.save(&partial)
        .map_err(|e| SinkError::Encode(format!("cannot write {:?}: {}", output, e)))?;

    let path = promote(&partial, output)?;
    tracing::info!(target: "capture", "[SNAPSHOT] Saved {:?}", path);
    Ok(Some(path))
}

async fn read_one<S: FrameStream>(
    stream: &mut S,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<Option<DynamicImage>, CaptureError> {
    for attempt in 1..=max_attempts {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            result = stream.read_frame() => result?,
        };

        if let Some(frame) = result {
            return Ok(Some(frame));
        }
        tracing::debug!(target: "capture", "[SNAPSHOT] Empty read {}/{}", attempt, max_attempts);
    }

    Err(CaptureError::StreamUnavailable(format!(
        "no frame after {} attempts",
        max_attempts
    )))
}
