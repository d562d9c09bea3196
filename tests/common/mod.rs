//! Scripted stand-ins for the printer, the camera and the output sink.
//!
//! Everything is driven by the tokio clock, so tests run on a paused runtime
//! and a multi-hour print takes milliseconds.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, Rgba, RgbaImage};
use tokio::time::Instant;

use dremel3d_lib::capture::{
    CaptureError, EncodedFrame, FrameSink, FrameSource, FrameStream, SinkError,
};
use dremel3d_lib::printer::{JobStatus, PrinterError, PrinterStatusSource};

// =============================================================================
// Printer
// =============================================================================

/// A printer whose job follows a fixed timeline.
pub struct ScriptedPrinter {
    start: Instant,
    /// (offset from start, printer status, job status), sorted by offset.
    timeline: Vec<(Duration, &'static str, &'static str)>,
    failures: Option<(Duration, Duration)>,
    total_time: u64,
    remaining_time: u64,
    status: JobStatus,
    pub refreshes: Arc<AtomicU32>,
}

impl ScriptedPrinter {
    pub fn new(timeline: Vec<(u64, &'static str, &'static str)>) -> Self {
        Self {
            start: Instant::now(),
            timeline: timeline
                .into_iter()
                .map(|(secs, status, job)| (Duration::from_secs(secs), status, job))
                .collect(),
            failures: None,
            total_time: 0,
            remaining_time: 0,
            status: JobStatus::default(),
            refreshes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Busy and building for the whole test.
    pub fn always_building() -> Self {
        Self::new(vec![(0, "busy", "building")])
    }

    pub fn idle() -> Self {
        Self::new(vec![(0, "ready", "")])
    }

    pub fn with_times(mut self, total: u64, remaining: u64) -> Self {
        self.total_time = total;
        self.remaining_time = remaining;
        self
    }

    /// Refreshes fail between `from` and `until` seconds after start.
    pub fn failing_between(mut self, from: u64, until: u64) -> Self {
        self.failures = Some((Duration::from_secs(from), Duration::from_secs(until)));
        self
    }
}

#[async_trait]
impl PrinterStatusSource for ScriptedPrinter {
    async fn refresh(&mut self) -> Result<(), PrinterError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let elapsed = Instant::now() - self.start;

        if let Some((from, until)) = self.failures {
            if elapsed >= from && elapsed < until {
                return Err(PrinterError::Connectivity("connection refused".to_string()));
            }
        }

        let (_, printer_status, job_status) = self
            .timeline
            .iter()
            .rev()
            .find(|(offset, _, _)| *offset <= elapsed)
            .copied()
            .unwrap_or((Duration::ZERO, "ready", ""));

        self.status = JobStatus {
            printer_status: printer_status.to_string(),
            job_status: job_status.to_string(),
            total_time: self.total_time,
            remaining_time: self.remaining_time,
            progress: 50.0,
            ..JobStatus::default()
        };
        Ok(())
    }

    fn job_status(&self) -> &JobStatus {
        &self.status
    }
}

// =============================================================================
// Camera
// =============================================================================

#[derive(Clone, Default)]
pub struct CameraStats {
    pub opens: Arc<AtomicU32>,
    pub reads: Arc<AtomicU32>,
    pub closes: Arc<AtomicU32>,
}

impl CameraStats {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Camera producing 8x8 frames. Each opened stream dies after `fail_after` reads.
#[derive(Default)]
pub struct StubCamera {
    pub stats: CameraStats,
    pub fail_after: Option<u32>,
}

impl StubCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(reads: u32) -> Self {
        Self {
            fail_after: Some(reads),
            ..Self::default()
        }
    }
}

pub struct StubStream {
    stats: CameraStats,
    fail_after: Option<u32>,
    reads: u32,
    closed: bool,
}

#[async_trait]
impl FrameSource for StubCamera {
    type Stream = StubStream;

    async fn open_stream(&self, _url: &str) -> Result<StubStream, CaptureError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(StubStream {
            stats: self.stats.clone(),
            fail_after: self.fail_after,
            reads: 0,
            closed: false,
        })
    }
}

#[async_trait]
impl FrameStream for StubStream {
    async fn read_frame(&mut self) -> Result<Option<DynamicImage>, CaptureError> {
        if self.closed {
            return Err(CaptureError::StreamUnavailable("closed".to_string()));
        }
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.reads += 1;

        if let Some(limit) = self.fail_after {
            if self.reads > limit {
                return Err(CaptureError::StreamUnavailable("camera went away".to_string()));
            }
        }

        Ok(Some(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            8,
            8,
            Rgba([120, 120, 120, 255]),
        ))))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// Sink
// =============================================================================

#[derive(Clone, Default)]
pub struct SinkStats {
    pub appends: Arc<Mutex<Vec<Instant>>>,
    pub attempts: Arc<AtomicU32>,
    pub finishes: Arc<AtomicU32>,
    pub created: Arc<AtomicU32>,
}

impl SinkStats {
    pub fn append_times(&self) -> Vec<Instant> {
        self.appends.lock().unwrap().clone()
    }

    pub fn appended(&self) -> usize {
        self.appends.lock().unwrap().len()
    }

    pub fn finishes(&self) -> u32 {
        self.finishes.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

/// Sink where the n-th encoded frame costs `sizes[n]` bytes. The last size
/// repeats once the list runs out.
pub struct StubSink {
    stats: SinkStats,
    sizes: Vec<u64>,
    fail_every: Option<u32>,
}

impl StubSink {
    pub fn new(stats: &SinkStats, bytes_per_frame: u64) -> Self {
        Self::with_sizes(stats, vec![bytes_per_frame])
    }

    pub fn with_sizes(stats: &SinkStats, sizes: Vec<u64>) -> Self {
        stats.created.fetch_add(1, Ordering::SeqCst);
        Self {
            stats: stats.clone(),
            sizes,
            fail_every: None,
        }
    }

    /// Every n-th encode fails with a recoverable encode error.
    pub fn failing_every(mut self, n: u32) -> Self {
        self.fail_every = Some(n);
        self
    }
}

impl FrameSink for StubSink {
    fn encode(&mut self, _frame: &RgbaImage) -> Result<EncodedFrame, SinkError> {
        let attempt = self.stats.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.fail_every {
            if attempt % n == 0 {
                return Err(SinkError::Encode("corrupt frame".to_string()));
            }
        }

        let index = (attempt as usize - 1).min(self.sizes.len().saturating_sub(1));
        let size = self.sizes.get(index).copied().unwrap_or(0);
        Ok(EncodedFrame::new(vec![0; size as usize]))
    }

    fn commit(&mut self, frame: EncodedFrame) -> Result<u64, SinkError> {
        self.stats.appends.lock().unwrap().push(Instant::now());
        Ok(frame.len())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, SinkError> {
        self.stats.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(Some(PathBuf::from("stub.gif")))
    }
}
