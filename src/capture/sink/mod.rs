pub mod gif;
pub mod video;

use std::path::{Path, PathBuf};

use image::RgbaImage;

use super::errors::SinkError;

pub use gif::GifSink;
pub use video::{check_ffmpeg, VideoSink};

/// A frame encoded for one sink but not yet written to its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    data: Vec<u8>,
}

impl EncodedFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Exact number of bytes committing this frame adds to the output.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Destination for captured frames.
///
/// Appending is split in two so the caller can check the real encoded size
/// against its budget before anything reaches the output.
pub trait FrameSink: Send {
    /// Encode one frame in memory. Nothing is written yet.
    fn encode(&mut self, frame: &RgbaImage) -> Result<EncodedFrame, SinkError>;

    /// Write a frame returned by `encode`. Returns the bytes it added.
    fn commit(&mut self, frame: EncodedFrame) -> Result<u64, SinkError>;

    /// Bytes `finish` still appends after the last frame.
    fn trailer_bytes(&self) -> u64 {
        0
    }

    /// Flush and move the artifact into place. `None` when nothing was written.
    fn finish(&mut self) -> Result<Option<PathBuf>, SinkError>;
}

/// Finalizes the sink exactly once: explicitly through `finalize`, or on drop
/// if the owner bails out early.
pub struct OutputGuard<K: FrameSink> {
    sink: Option<K>,
}

impl<K: FrameSink> OutputGuard<K> {
    pub fn new(sink: K) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn sink_mut(&mut self) -> Option<&mut K> {
        self.sink.as_mut()
    }

    pub fn finalize(&mut self) -> Result<Option<PathBuf>, SinkError> {
        match self.sink.take() {
            Some(mut sink) => sink.finish(),
            None => Ok(None),
        }
    }
}

impl<K: FrameSink> Drop for OutputGuard<K> {
    fn drop(&mut self) {
        if self.sink.is_none() {
            return;
        }

        tracing::warn!(target: "capture", "[SINK] OutputGuard dropping without finalize, finishing output...");
        if let Err(e) = self.finalize() {
            tracing::warn!(target: "capture", "[SINK] Finalize on drop failed: {}", e);
        }
    }
}

/// Remove a file if it exists.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), SinkError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(target: "capture", "[SINK] Removed existing file {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SinkError::Io(format!("cannot remove {:?}: {}", path, e))),
    }
}

/// Move a finished partial file onto its final path.
pub(crate) fn promote(partial: &Path, output: &Path) -> Result<PathBuf, SinkError> {
    std::fs::rename(partial, output)
        .map_err(|e| SinkError::Io(format!("cannot move {:?} to {:?}: {}", partial, output, e)))?;
    tracing::info!(target: "capture", "[SINK] Wrote {:?}", output);
    Ok(output.to_path_buf())
}
