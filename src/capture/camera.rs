use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::errors::CaptureError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait for a new frame before reporting a miss.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Something that hands out camera streams.
#[async_trait]
pub trait FrameSource: Send + Sync {
    type Stream: FrameStream;

    async fn open_stream(&self, url: &str) -> Result<Self::Stream, CaptureError>;
}

/// An open camera connection.
#[async_trait]
pub trait FrameStream: Send {
    /// `Ok(None)` is a transient miss. An error means the stream is gone.
    async fn read_frame(&mut self) -> Result<Option<DynamicImage>, CaptureError>;

    /// Release the connection. Calling it twice is a no-op.
    fn close(&mut self);
}

/// MJPEG camera served over HTTP (`multipart/x-mixed-replace`).
pub struct MjpegCamera {
    http: reqwest::Client,
}

impl MjpegCamera {
    pub fn new() -> Result<Self, CaptureError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CaptureError::StreamUnavailable(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FrameSource for MjpegCamera {
    type Stream = MjpegStream;

    async fn open_stream(&self, url: &str) -> Result<MjpegStream, CaptureError> {
        tracing::info!(target: "capture", "[CAMERA] Opening stream {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CaptureError::StreamUnavailable(e.to_string()))?;

        let (tx, rx) = watch::channel(LatestFrame::default());
        let reader = tokio::spawn(read_body(response, tx));
        Ok(MjpegStream::with_reader(rx, reader))
    }
}

/// Newest complete JPEG published by the reader task.
#[derive(Debug, Clone, Default)]
struct LatestFrame {
    jpeg: Option<Arc<Vec<u8>>>,
    /// Bumped on every published frame.
    seq: u64,
    /// Set once the HTTP body ended or failed.
    ended: Option<String>,
}

fn publish(tx: &watch::Sender<LatestFrame>, jpeg: Vec<u8>) {
    tx.send_modify(|latest| {
        latest.jpeg = Some(Arc::new(jpeg));
        latest.seq += 1;
    });
}

fn mark_ended(tx: &watch::Sender<LatestFrame>, reason: String) {
    tx.send_modify(|latest| latest.ended = Some(reason));
}

/// Splits the multipart body into JPEGs on SOI/EOI markers.
#[derive(Default)]
struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    /// Add a chunk and return the newest frame it completed, if any.
    fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let frame = take_latest_frame(&mut self.buffer);

        if self.buffer.len() > MAX_BUFFER_BYTES {
            tracing::warn!(target: "capture", "[CAMERA] Buffer overflow, discarding {} bytes", self.buffer.len());
            self.buffer.clear();
        }
        frame
    }
}

/// Drain the HTTP body for as long as the stream is open, keeping only the
/// newest frame. Reads never wait on the capture pacing.
async fn read_body(mut response: reqwest::Response, tx: watch::Sender<LatestFrame>) {
    let mut assembler = FrameAssembler::default();

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if let Some(jpeg) = assembler.push(&chunk) {
                    publish(&tx, jpeg);
                }
                if tx.is_closed() {
                    break;
                }
            }
            Ok(None) => {
                tracing::info!(target: "capture", "[CAMERA] Stream ended");
                mark_ended(&tx, "camera stream ended".to_string());
                break;
            }
            Err(e) => {
                tracing::warn!(target: "capture", "[CAMERA] Stream read failed: {}", e);
                mark_ended(&tx, e.to_string());
                break;
            }
        }
    }
}

pub struct MjpegStream {
    latest: watch::Receiver<LatestFrame>,
    seen: u64,
    reader: Option<JoinHandle<()>>,
}

impl MjpegStream {
    fn with_reader(latest: watch::Receiver<LatestFrame>, reader: JoinHandle<()>) -> Self {
        Self {
            latest,
            seen: 0,
            reader: Some(reader),
        }
    }
}

#[async_trait]
impl FrameStream for MjpegStream {
    async fn read_frame(&mut self) -> Result<Option<DynamicImage>, CaptureError> {
        if self.reader.is_none() {
            return Err(CaptureError::StreamUnavailable("stream closed".to_string()));
        }

        let mut waited = false;
        loop {
            let latest = self.latest.borrow_and_update().clone();

            if latest.seq > self.seen {
                self.seen = latest.seq;
                return Ok(latest.jpeg.and_then(|jpeg| decode(&jpeg)));
            }
            if let Some(reason) = latest.ended {
                return Err(CaptureError::StreamUnavailable(reason));
            }
            if waited {
                return Ok(None);
            }
            waited = true;

            match tokio::time::timeout(READ_TIMEOUT, self.latest.changed()).await {
                Err(_) => return Ok(None),
                Ok(Err(_)) => {
                    return Err(CaptureError::StreamUnavailable(
                        "camera reader stopped".to_string(),
                    ))
                }
                Ok(Ok(())) => {}
            }
        }
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            tracing::debug!(target: "capture", "[CAMERA] Stream closed");
        }
    }
}

impl Drop for MjpegStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode(jpeg: &[u8]) -> Option<DynamicImage> {
    match image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::debug!(target: "capture", "[CAMERA] Undecodable frame ({} bytes): {}", jpeg.len(), e);
            None
        }
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

/// Remove every complete JPEG from the buffer and return the newest one.
/// A trailing incomplete frame stays buffered.
fn take_latest_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let mut cursor = 0;
    let mut latest = None;

    while let Some(start) = find(buffer, &JPEG_SOI, cursor) {
        let Some(eoi) = find(buffer, &JPEG_EOI, start + 2) else {
            break;
        };
        let end = eoi + 2;
        latest = Some((start, end));
        cursor = end;
    }

    let (start, end) = latest?;
    let frame = buffer[start..end].to_vec();
    buffer.drain(..end);
    Some(frame)
}
