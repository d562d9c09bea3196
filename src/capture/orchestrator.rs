//! CaptureOrchestrator - single owner of one timelapse run.
//!
//! The orchestrator owns the printer handle, the camera stream and the output
//! sink, and walks the phases of `state::transition`:
//!
//! - AwaitingStart: startup grace, first status refresh, busy check
//! - WaitingForJobToBegin: poll until the printer starts building
//! - Capturing: paced frame capture with an independent status refresh timer
//! - Draining: short grace window sampling frames of the completed job
//!
//! Every sleep, status refresh and frame read races the cancellation token.
//! The sink sits in an `OutputGuard`, so it is finalized exactly once whichever
//! way the run ends.

use std::time::Duration;

use image::DynamicImage;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::camera::{FrameSource, FrameStream};
use super::errors::{CaptureError, SinkError};
use super::frame::{FrameProcessor, Overlay};
use super::pacing::{compute_pacing, TargetMode, TimeBudget};
use super::progress::ProgressReporter;
use super::session::{CaptureReport, CaptureSession, StopReason};
use super::sink::{FrameSink, OutputGuard};
use super::state::{transition, CapturePhase, PhaseEvent};
use super::types::CaptureConfig;
use crate::printer::{JobState, PrinterStatusSource};

/// Why a phase handler returned early.
enum Interrupt {
    Stop,
    Fatal(CaptureError),
}

impl From<CaptureError> for Interrupt {
    fn from(e: CaptureError) -> Self {
        Interrupt::Fatal(e)
    }
}

type Flow<T> = Result<T, Interrupt>;

pub struct CaptureOrchestrator<P: PrinterStatusSource, F: FrameSource> {
    printer: P,
    camera: F,
    stream_url: String,
    config: CaptureConfig,
    cancel: CancellationToken,
    runtime_cap: Option<CancellationToken>,
    processor: FrameProcessor,
    session: CaptureSession,
    phase: CapturePhase,
    progress: ProgressReporter,
    next_refresh: Instant,
}

impl<P: PrinterStatusSource, F: FrameSource> CaptureOrchestrator<P, F> {
    pub fn new(
        printer: P,
        camera: F,
        stream_url: impl Into<String>,
        config: CaptureConfig,
        cancel: CancellationToken,
    ) -> Self {
        let processor = FrameProcessor::new(config.rescale_factor, config.keep_original_frames);
        let progress = ProgressReporter::new(config.silent);

        Self {
            printer,
            camera,
            stream_url: stream_url.into(),
            config,
            cancel,
            runtime_cap: None,
            processor,
            session: CaptureSession::new(),
            phase: CapturePhase::AwaitingStart,
            progress,
            next_refresh: Instant::now(),
        }
    }

    /// Token cancelled by the runtime cap timer. A stop seen after it fired is
    /// reported as `RuntimeCapReached` instead of `StopRequested`.
    pub fn with_runtime_cap(mut self, reached: CancellationToken) -> Self {
        self.runtime_cap = Some(reached);
        self
    }

    fn stop_reason(&self) -> StopReason {
        match &self.runtime_cap {
            Some(reached) if reached.is_cancelled() => StopReason::RuntimeCapReached,
            _ => StopReason::StopRequested,
        }
    }

    /// Run the capture to completion.
    ///
    /// `make_sink` is only called once the printer is confirmed busy and the
    /// camera stream is open, so a failed start leaves no output behind.
    pub async fn run<K, M>(mut self, make_sink: M) -> Result<CaptureReport, CaptureError>
    where
        K: FrameSink,
        M: FnOnce() -> Result<K, SinkError>,
    {
        self.config.validate()?;
        let timings = self.config.timings.clone();

        tracing::info!(
            target: "capture",
            "[ORCHESTRATOR] Starting capture to {:?} ({:?}, {}fps, cap {:.1}MB)",
            self.config.output_path,
            self.config.target_mode(),
            self.config.fps,
            self.config.max_output_size_mb
        );

        if self.sleep(timings.startup_grace).await.is_err() {
            return Ok(self.stopped_before_start());
        }

        match self.confirm_start().await {
            Ok(()) => {}
            Err(Interrupt::Stop) => return Ok(self.stopped_before_start()),
            Err(Interrupt::Fatal(e)) => return Err(e),
        }

        let cancel = self.cancel.clone();
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.camera.open_stream(&self.stream_url) => Some(result),
        };
        let mut stream = match opened {
            Some(result) => result?,
            None => return Ok(self.stopped_before_start()),
        };

        let sink = match make_sink() {
            Ok(sink) => sink,
            Err(e) => {
                stream.close();
                return Err(e.into());
            }
        };
        let mut guard = OutputGuard::new(sink);

        self.advance(PhaseEvent::StartConfirmed);

        let mut failure: Option<CaptureError> = None;
        let mut stop_reason = StopReason::JobFinished;

        while self.phase != CapturePhase::Finished {
            let step = match self.phase {
                CapturePhase::WaitingForJobToBegin => self.wait_for_job().await,
                CapturePhase::Capturing => self.capture(&mut stream, &mut guard).await,
                CapturePhase::Draining => self.drain(&mut stream, &mut guard).await,
                CapturePhase::AwaitingStart | CapturePhase::Finished => break,
            };

            let event = match step {
                Ok(event) => event,
                Err(Interrupt::Stop) => PhaseEvent::StopRequested,
                Err(Interrupt::Fatal(e)) => {
                    tracing::error!(target: "capture", "[ORCHESTRATOR] Capture failed: {}", e);
                    stop_reason = StopReason::from_error(&e);
                    failure = Some(e);
                    PhaseEvent::Failed
                }
            };

            stop_reason = match event {
                PhaseEvent::StopRequested => self.stop_reason(),
                PhaseEvent::SizeCapReached => StopReason::SizeCapReached,
                PhaseEvent::TargetReached => StopReason::TargetReached,
                PhaseEvent::Failed => stop_reason,
                _ => StopReason::JobFinished,
            };

            self.advance(event);
        }

        self.progress.finish();
        stream.close();

        let output_path = match guard.finalize() {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(target: "capture", "[ORCHESTRATOR] Failed to finalize output: {}", e);
                if failure.is_none() {
                    stop_reason = StopReason::OutputFailed;
                    failure = Some(e.into());
                }
                None
            }
        };

        let report = self.report(stop_reason, output_path);
        tracing::info!(
            target: "capture",
            "[ORCHESTRATOR] Finished: {:?}, {} frames, {} bytes, {} dropped",
            report.stop_reason,
            report.frames_written,
            report.bytes_written,
            report.frames_dropped
        );

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    fn advance(&mut self, event: PhaseEvent) {
        let next = transition(self.phase, event);
        if next != self.phase {
            tracing::debug!(target: "capture", "[ORCHESTRATOR] {:?} --{:?}--> {:?}", self.phase, event, next);
        }
        self.phase = next;
        self.session.state = next.into();
    }

    fn report(&self, reason: StopReason, output_path: Option<std::path::PathBuf>) -> CaptureReport {
        CaptureReport::from_session(&self.session, reason, output_path, self.printer.job_state())
    }

    fn stopped_before_start(&mut self) -> CaptureReport {
        tracing::info!(target: "capture", "[ORCHESTRATOR] Stopped before capture started");
        self.advance(PhaseEvent::StopRequested);
        self.report(self.stop_reason(), None)
    }

    /// First refresh (with the retry budget) and the busy check.
    async fn confirm_start(&mut self) -> Flow<()> {
        while !self.refresh().await? {
            self.sleep(self.config.timings.poll_until_start).await?;
        }

        if !self.printer.is_busy() && !self.config.record_while_idle {
            tracing::warn!(
                target: "capture",
                "[ORCHESTRATOR] Printer is {}, not printing",
                self.printer.job_state()
            );
            return Err(CaptureError::NotPrinting.into());
        }
        Ok(())
    }

    async fn wait_for_job(&mut self) -> Flow<PhaseEvent> {
        if self.config.record_while_idle {
            return Ok(PhaseEvent::JobStarted);
        }

        loop {
            self.refresh().await?;

            if self.printer.is_building() {
                return Ok(PhaseEvent::JobStarted);
            }
            if !self.printer.is_busy() {
                tracing::info!(target: "capture", "[ORCHESTRATOR] Job ended before building started");
                return Ok(PhaseEvent::JobEnded);
            }

            tracing::debug!(
                target: "capture",
                "[ORCHESTRATOR] Waiting for job to begin ({})",
                self.printer.job_state()
            );
            self.sleep(self.config.timings.poll_until_start).await?;
        }
    }

    async fn capture(
        &mut self,
        stream: &mut F::Stream,
        guard: &mut OutputGuard<impl FrameSink>,
    ) -> Flow<PhaseEvent> {
        let timings = self.config.timings.clone();

        self.refresh().await?;
        let budget = TimeBudget {
            total_time_secs: self.printer.total_time(),
            remaining_time_secs: self.printer.remaining_time(),
            fallback_secs: timings.fallback_total_time.as_secs(),
        };
        let pacing = compute_pacing(self.config.target_mode(), self.config.fps, budget);

        if pacing.degraded {
            tracing::warn!(
                target: "capture",
                "[ORCHESTRATOR] Couldn't fetch total time from the printing job, using {}s",
                budget.fallback_secs
            );
        }
        self.session.degraded_timing = pacing.degraded;
        self.session.pacing_interval = Some(pacing.interval);

        tracing::info!(
            target: "capture",
            "[ORCHESTRATOR] Capturing every {:.2}s (target frames: {:?})",
            pacing.interval.as_secs_f64(),
            pacing.target_frames
        );

        let mut next_tick = Instant::now();

        loop {
            self.refresh_if_due().await?;

            let state = self.printer.job_state();
            if !self.config.record_while_idle
                && (!self.printer.is_busy() || state == JobState::Completed)
            {
                tracing::info!(target: "capture", "[ORCHESTRATOR] Job ended ({})", state);
                return Ok(PhaseEvent::JobEnded);
            }

            if self.config.record_while_idle || state == JobState::Building {
                if let Some(event) = self.capture_frame(stream, guard).await? {
                    return Ok(event);
                }
                if let Some(target) = pacing.target_frames {
                    if self.session.frames_written >= target {
                        tracing::info!(target: "capture", "[ORCHESTRATOR] Reached {} frames", target);
                        return Ok(PhaseEvent::TargetReached);
                    }
                }
            } else {
                tracing::trace!(target: "capture", "[ORCHESTRATOR] Skipping frame while {}", state);
            }

            self.report_progress();

            next_tick += pacing.interval;
            let now = Instant::now();
            if next_tick < now {
                next_tick = now;
            }
            self.sleep_until(next_tick).await?;
        }
    }

    async fn drain(
        &mut self,
        stream: &mut F::Stream,
        guard: &mut OutputGuard<impl FrameSink>,
    ) -> Flow<PhaseEvent> {
        let timings = self.config.timings.clone();

        self.refresh().await?;
        if !self.printer.is_completed() {
            return Ok(PhaseEvent::GraceElapsed);
        }

        let realtime = Duration::from_secs_f64(1.0 / self.config.fps.max(1) as f64);
        let interval = realtime.max(timings.drain_min_interval);
        let deadline = Instant::now() + timings.completed_grace_period;
        let target = match self.config.target_mode() {
            TargetMode::Length(secs) => Some(secs.saturating_mul(self.config.fps as u64)),
            _ => None,
        };

        tracing::info!(
            target: "capture",
            "[ORCHESTRATOR] Job completed, draining for {:?}",
            timings.completed_grace_period
        );

        let mut next_tick = Instant::now();
        while Instant::now() < deadline {
            self.refresh_if_due().await?;

            if self.printer.is_completed() {
                if let Some(event) = self.capture_frame(stream, guard).await? {
                    return Ok(event);
                }
                if target.is_some_and(|t| self.session.frames_written >= t) {
                    return Ok(PhaseEvent::TargetReached);
                }
            }

            self.report_progress();

            next_tick += interval;
            let now = Instant::now();
            if next_tick < now {
                next_tick = now;
            }
            if next_tick >= deadline {
                break;
            }
            self.sleep_until(next_tick).await?;
        }

        Ok(PhaseEvent::GraceElapsed)
    }

    /// Read, process, encode and commit one frame. Returns an event when the
    /// size cap ends the run. A frame that would cross the cap is never written.
    async fn capture_frame(
        &mut self,
        stream: &mut F::Stream,
        guard: &mut OutputGuard<impl FrameSink>,
    ) -> Flow<Option<PhaseEvent>> {
        let Some(frame) = self.read_frame(stream).await? else {
            self.session.consecutive_misses += 1;
            if self.session.consecutive_misses == self.config.timings.frame_miss_warn_threshold {
                tracing::warn!(
                    target: "capture",
                    "[ORCHESTRATOR] {} consecutive empty reads from camera",
                    self.session.consecutive_misses
                );
            }
            return Ok(None);
        };

        let overlay = Overlay {
            progress: self.printer.progress(),
            state: self.printer.job_state(),
        };
        let processed = self.processor.process(frame, Some(&overlay));

        let Some(sink) = guard.sink_mut() else {
            return Err(CaptureError::Output(SinkError::Io("output already finalized".to_string())).into());
        };

        let encoded = match sink.encode(&processed) {
            Ok(encoded) => encoded,
            Err(e) if e.is_recoverable() => {
                self.session.frames_dropped += 1;
                tracing::warn!(target: "capture", "[ORCHESTRATOR] Dropped frame: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(CaptureError::Output(e).into()),
        };

        let budget = self.config.max_output_bytes().saturating_sub(sink.trailer_bytes());
        if !self.session.fits(encoded.len(), budget) {
            tracing::info!(
                target: "capture",
                "[ORCHESTRATOR] Size cap reached ({} + {} > {} bytes), frame not written",
                self.session.bytes_written,
                encoded.len(),
                budget
            );
            self.refresh().await?;
            return Ok(Some(PhaseEvent::SizeCapReached));
        }

        let bytes = sink.commit(encoded).map_err(CaptureError::Output)?;
        self.session.record_frame(bytes);
        if self.session.frames_written % 50 == 0 {
            tracing::debug!(target: "capture", "[ORCHESTRATOR] {} frames written", self.session.frames_written);
        }
        if self.session.bytes_written >= budget {
            tracing::info!(target: "capture", "[ORCHESTRATOR] Size cap reached ({} bytes)", budget);
            self.refresh().await?;
            return Ok(Some(PhaseEvent::SizeCapReached));
        }

        Ok(None)
    }

    fn report_progress(&mut self) {
        self.progress.update(
            self.printer.job_state(),
            self.printer.progress(),
            self.session.frames_written,
            self.session.bytes_written,
        );
    }

    /// Refresh job status. Ok(false) on a failure still within the retry budget.
    async fn refresh(&mut self) -> Flow<bool> {
        let cancel = self.cancel.clone();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Interrupt::Stop),
            result = self.printer.refresh() => result,
        };

        let now = Instant::now();
        self.next_refresh = now + self.config.timings.status_refresh_interval;

        match result {
            Ok(()) => {
                self.session.consecutive_poll_failures = 0;
                self.session.last_status_refresh_at = Some(now);
                Ok(true)
            }
            Err(e) => {
                self.session.consecutive_poll_failures += 1;
                let attempts = self.session.consecutive_poll_failures;
                let budget = self.config.timings.max_consecutive_poll_failures.max(1);
                tracing::warn!(
                    target: "capture",
                    "[ORCHESTRATOR] Status refresh failed ({}/{}): {}",
                    attempts,
                    budget,
                    e
                );
                if attempts >= budget || !e.is_transient() {
                    return Err(CaptureError::Connectivity { attempts, source: e }.into());
                }
                Ok(false)
            }
        }
    }

    async fn refresh_if_due(&mut self) -> Flow<()> {
        if Instant::now() >= self.next_refresh {
            self.refresh().await?;
        }
        Ok(())
    }

    async fn read_frame(&self, stream: &mut F::Stream) -> Flow<Option<DynamicImage>> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupt::Stop),
            result = stream.read_frame() => result.map_err(Interrupt::Fatal),
        }
    }

    async fn sleep(&self, duration: Duration) -> Flow<()> {
        self.sleep_until(Instant::now() + duration).await
    }

    async fn sleep_until(&self, deadline: Instant) -> Flow<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupt::Stop),
            _ = tokio::time::sleep_until(deadline) => Ok(()),
        }
    }
}
