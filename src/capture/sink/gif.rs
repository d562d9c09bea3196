use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageError, RgbaImage};

use super::{promote, remove_if_exists, EncodedFrame, FrameSink};
use crate::capture::errors::SinkError;
use crate::shared::paths::{ensure_dir, partial_path_for};

/// Encoder speed, 1 (best) to 30 (fastest).
const GIF_SPEED: i32 = 10;
/// The `;` trailer written when the encoder is dropped.
const GIF_TRAILER_BYTES: u64 = 1;

/// In-memory target of the encoder. Each frame's blocks are taken out of it
/// and only reach the file once committed.
#[derive(Clone, Default)]
struct PendingBuffer(Arc<Mutex<Vec<u8>>>);

impl PendingBuffer {
    fn take(&self) -> Vec<u8> {
        match self.0.lock() {
            Ok(mut buf) => std::mem::take(&mut *buf),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Write for PendingBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut pending = self
            .0
            .lock()
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "pending buffer poisoned"))?;
        pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Looping animated GIF written to a partial file and renamed on finish.
pub struct GifSink {
    encoder: Option<GifEncoder<PendingBuffer>>,
    pending: PendingBuffer,
    file: Option<BufWriter<File>>,
    written: u64,
    delay: Delay,
    frames: u64,
    partial_path: PathBuf,
    output_path: PathBuf,
}

impl GifSink {
    pub fn create(output: &Path, fps: u32) -> Result<Self, SinkError> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }

        let partial_path = partial_path_for(output);
        remove_if_exists(output)?;
        remove_if_exists(&partial_path)?;

        let file = File::create(&partial_path)
            .map_err(|e| SinkError::Io(format!("cannot create {:?}: {}", partial_path, e)))?;

        tracing::info!(target: "capture", "[SINK] GIF output {:?} at {}fps", output, fps);

        Ok(Self {
            encoder: None,
            pending: PendingBuffer::default(),
            file: Some(BufWriter::new(file)),
            written: 0,
            delay: Delay::from_numer_denom_ms(1000, fps.max(1)),
            frames: 0,
            partial_path,
            output_path: output.to_path_buf(),
        })
    }

    /// Start a fresh encoder so the GIF header travels with the next frame.
    /// Used until a first frame is committed.
    fn reset_encoder(&mut self) -> Result<(), SinkError> {
        drop(self.encoder.take());
        self.pending.take();

        let mut encoder = GifEncoder::new_with_speed(self.pending.clone(), GIF_SPEED);
        encoder.set_repeat(Repeat::Infinite).map_err(map_image_error)?;
        self.encoder = Some(encoder);
        Ok(())
    }
}

impl FrameSink for GifSink {
    fn encode(&mut self, frame: &RgbaImage) -> Result<EncodedFrame, SinkError> {
        if self.file.is_none() {
            return Err(SinkError::Io("GIF output already finished".to_string()));
        }
        if self.frames == 0 {
            self.reset_encoder()?;
        }

        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| SinkError::Io("GIF encoder missing".to_string()))?;

        // Leftovers of a failed encode never belong to the next frame.
        self.pending.take();
        let result = encoder.encode_frame(Frame::from_parts(frame.clone(), 0, 0, self.delay));
        let data = self.pending.take();
        result.map_err(map_image_error)?;

        Ok(EncodedFrame::new(data))
    }

    fn commit(&mut self, frame: EncodedFrame) -> Result<u64, SinkError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SinkError::Io("GIF output already finished".to_string()))?;

        file.write_all(frame.as_bytes())
            .map_err(|e| SinkError::Io(format!("cannot write {:?}: {}", self.partial_path, e)))?;
        self.frames += 1;
        self.written += frame.len();
        Ok(frame.len())
    }

    fn trailer_bytes(&self) -> u64 {
        GIF_TRAILER_BYTES
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, SinkError> {
        let Some(mut file) = self.file.take() else {
            return Ok(None);
        };
        // Dropping the encoder emits the trailer into the pending buffer.
        drop(self.encoder.take());
        let trailer = self.pending.take();

        if self.frames == 0 {
            drop(file);
            tracing::warn!(target: "capture", "[SINK] No frames captured, discarding GIF");
            remove_if_exists(&self.partial_path)?;
            return Ok(None);
        }

        file.write_all(&trailer)
            .and_then(|()| file.flush())
            .map_err(|e| SinkError::Io(format!("cannot finish {:?}: {}", self.partial_path, e)))?;
        drop(file);

        tracing::info!(
            target: "capture",
            "[SINK] GIF finished: {} frames, {} bytes",
            self.frames,
            self.written + trailer.len() as u64
        );
        promote(&self.partial_path, &self.output_path).map(Some)
    }
}

fn map_image_error(e: ImageError) -> SinkError {
    match e {
        ImageError::IoError(io) => SinkError::Io(io.to_string()),
        other => SinkError::Encode(other.to_string()),
    }
}
