//! Integration tests for the capture orchestrator.
//!
//! All tests run on a paused tokio clock: sleeps complete instantly and
//! `Instant::now()` only moves when every task is waiting on a timer.

mod common;

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{ScriptedPrinter, SinkStats, StubCamera, StubSink};
use dremel3d_lib::capture::{
    take_snapshot, CaptureConfig, CaptureError, CaptureOrchestrator, CaptureReport,
    FrameProcessor, StopReason,
};
use dremel3d_lib::core::shutdown::RuntimeCap;
use dremel3d_lib::printer::JobState;

const URL: &str = "http://printer:10123/?action=stream";

fn config() -> CaptureConfig {
    let mut config = CaptureConfig::new("timelapse.gif");
    config.silent = true;
    config
}

async fn run(
    printer: ScriptedPrinter,
    camera: StubCamera,
    config: CaptureConfig,
    sink: StubSink,
    cancel: CancellationToken,
) -> Result<CaptureReport, CaptureError> {
    CaptureOrchestrator::new(printer, camera, URL, config, cancel)
        .run(move || Ok(sink))
        .await
}

fn cancel_after(cancel: &CancellationToken, secs: u64) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(secs)).await;
        cancel.cancel();
    });
}

// =============================================================================
// Output size cap
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_size_cap_stops_before_exceeding_limit() {
    let sinks = SinkStats::default();
    let mut config = config();
    config.max_output_size_mb = 1.0;

    let report = run(
        ScriptedPrinter::always_building().with_times(1000, 1000),
        StubCamera::new(),
        config,
        StubSink::new(&sinks, 100_000),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, StopReason::SizeCapReached);
    assert_eq!(report.frames_written, 10);
    assert_eq!(report.bytes_written, 1_000_000);
    assert_eq!(sinks.finishes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_size_cap_never_exceeded() {
    let cases = [(0.5, 70_000), (2.0, 300_000), (1.0, 1_048_576), (0.25, 1_000)];

    for (max_mb, bytes_per_frame) in cases {
        let sinks = SinkStats::default();
        let mut config = config();
        config.max_output_size_mb = max_mb;
        config.target_length_secs = Some(1000);
        let cap = config.max_output_bytes();

        let report = run(
            ScriptedPrinter::always_building(),
            StubCamera::new(),
            config,
            StubSink::new(&sinks, bytes_per_frame),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(
            report.bytes_written <= cap,
            "{} bytes written with a cap of {}",
            report.bytes_written,
            cap
        );
        assert_eq!(report.stop_reason, StopReason::SizeCapReached);
        assert_eq!(report.frames_written, cap / bytes_per_frame);
    }
}

#[tokio::test(start_paused = true)]
async fn test_size_cap_rejects_frame_larger_than_earlier_ones() {
    let sinks = SinkStats::default();
    let mut config = config();
    config.max_output_size_mb = 0.5;

    let report = run(
        ScriptedPrinter::always_building().with_times(1000, 1000),
        StubCamera::new(),
        config,
        StubSink::with_sizes(&sinks, vec![100_000, 900_000]),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, StopReason::SizeCapReached);
    assert_eq!(report.frames_written, 1);
    assert_eq!(report.bytes_written, 100_000);
    assert_eq!(sinks.appended(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_size_cap_holds_for_varying_frame_sizes() {
    let sequences: [Vec<u64>; 4] = [
        vec![10_000, 50_000, 200_000, 400_000],
        vec![300_000, 1_000, 1_000, 600_000],
        vec![1, 2, 3, 524_289],
        vec![524_288],
    ];

    for sizes in sequences {
        let sinks = SinkStats::default();
        let mut config = config();
        config.max_output_size_mb = 0.5;
        config.target_length_secs = Some(1000);
        let cap = config.max_output_bytes();

        let report = run(
            ScriptedPrinter::always_building(),
            StubCamera::new(),
            config,
            StubSink::with_sizes(&sinks, sizes.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(
            report.bytes_written <= cap,
            "{:?}: {} bytes written with a cap of {}",
            sizes,
            report.bytes_written,
            cap
        );
        assert_eq!(report.stop_reason, StopReason::SizeCapReached);
    }
}

// =============================================================================
// Job state handling
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_frames_only_while_building_or_completed_grace() {
    let start = Instant::now();
    let printer = ScriptedPrinter::new(vec![
        (0, "ready", ""),
        (5, "busy", "preparing"),
        (20, "busy", "building"),
        (100, "busy", "paused"),
        (150, "busy", "building"),
        (250, "ready", "completed"),
    ])
    .with_times(1000, 1000);

    let sinks = SinkStats::default();
    let mut config = config();
    config.timings.startup_grace = Duration::from_secs(10);
    config.timings.status_refresh_interval = Duration::from_secs(1);

    let report = run(
        printer,
        StubCamera::new(),
        config,
        StubSink::new(&sinks, 100),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let offsets: Vec<Duration> = sinks
        .append_times()
        .into_iter()
        .map(|t| t - start)
        .collect();

    let secs = Duration::from_secs;
    let in_window = |from: u64, to: u64| {
        offsets
            .iter()
            .filter(|o| **o >= secs(from) && **o < secs(to))
            .count()
    };

    assert!(offsets
        .iter()
        .all(|o| (*o >= secs(20) && *o < secs(100)) || (*o >= secs(150) && *o < secs(260))));
    assert_eq!(in_window(20, 100), 8);
    assert_eq!(in_window(100, 150), 0);
    assert_eq!(in_window(150, 250), 10);
    assert_eq!(in_window(250, 260), 100);

    assert_eq!(report.frames_written, 118);
    assert_eq!(report.stop_reason, StopReason::JobFinished);
    assert_eq!(report.last_job_state, JobState::Completed);
    assert_eq!(sinks.finishes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_one_hour_print_with_100_frames() {
    let printer = ScriptedPrinter::new(vec![(0, "busy", "building"), (3595, "ready", "")])
        .with_times(3600, 3600);
    let sinks = SinkStats::default();

    let report = run(
        printer,
        StubCamera::new(),
        config(),
        StubSink::new(&sinks, 100),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.pacing_interval, Some(Duration::from_secs(36)));
    assert!(!report.degraded_timing);
    assert_eq!(report.frames_written, 100);
    assert_eq!(report.stop_reason, StopReason::JobFinished);

    let times = sinks.append_times();
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(36));
    }
}

#[tokio::test(start_paused = true)]
async fn test_unknown_print_time_falls_back_to_one_hour() {
    let cancel = CancellationToken::new();
    cancel_after(&cancel, 200);

    let report = run(
        ScriptedPrinter::always_building(),
        StubCamera::new(),
        config(),
        StubSink::new(&SinkStats::default(), 100),
        cancel,
    )
    .await
    .unwrap();

    assert!(report.degraded_timing);
    assert_eq!(report.pacing_interval, Some(Duration::from_secs(36)));
}

#[tokio::test(start_paused = true)]
async fn test_not_printing_fails_without_opening_stream() {
    let camera = StubCamera::new();
    let stats = camera.stats.clone();
    let sinks = SinkStats::default();
    let sink_stats = sinks.clone();

    let result = CaptureOrchestrator::new(
        ScriptedPrinter::idle(),
        camera,
        URL,
        config(),
        CancellationToken::new(),
    )
    .run(move || Ok(StubSink::new(&sink_stats, 100)))
    .await;

    assert!(matches!(result, Err(CaptureError::NotPrinting)));
    assert_eq!(stats.opens(), 0);
    assert_eq!(sinks.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_record_while_idle_captures_idle_printer() {
    let sinks = SinkStats::default();
    let mut config = config();
    config.record_while_idle = true;
    config.fps = 5;
    config.target_length_secs = Some(1);

    let report = run(
        ScriptedPrinter::idle(),
        StubCamera::new(),
        config,
        StubSink::new(&sinks, 100),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.frames_written, 5);
    assert_eq!(report.stop_reason, StopReason::TargetReached);
    assert_eq!(report.last_job_state, JobState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_length_mode_stops_at_target_frames() {
    let sinks = SinkStats::default();
    let mut config = config();
    config.fps = 10;
    config.target_length_secs = Some(2);

    let report = run(
        ScriptedPrinter::always_building(),
        StubCamera::new(),
        config,
        StubSink::new(&sinks, 100),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.frames_written, 20);
    assert_eq!(report.stop_reason, StopReason::TargetReached);
    assert_eq!(report.pacing_interval, Some(Duration::from_millis(100)));

    let times = sinks.append_times();
    assert_eq!(times[19] - times[0], Duration::from_millis(1900));
}

// =============================================================================
// Cancellation and failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_capture_finalizes_once() {
    let camera = StubCamera::new();
    let stats = camera.stats.clone();
    let sinks = SinkStats::default();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, 100);

    let report = run(
        ScriptedPrinter::always_building().with_times(1000, 1000),
        camera,
        config(),
        StubSink::new(&sinks, 100),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert!(report.frames_written > 0);
    assert_eq!(sinks.finishes(), 1);
    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_runtime_cap_reported_apart_from_stop() {
    let sinks = SinkStats::default();
    let cancel = CancellationToken::new();
    let cap = RuntimeCap::spawn(cancel.clone(), Duration::from_secs(100));

    let report = CaptureOrchestrator::new(
        ScriptedPrinter::always_building().with_times(1000, 1000),
        StubCamera::new(),
        URL,
        config(),
        cancel,
    )
    .with_runtime_cap(cap.reached())
    .run({
        let sinks = sinks.clone();
        move || Ok(StubSink::new(&sinks, 100))
    })
    .await
    .unwrap();

    assert!(cap.is_reached());
    assert_eq!(report.stop_reason, StopReason::RuntimeCapReached);
    assert!(report.frames_written > 0);
    assert_eq!(sinks.finishes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_signal_stop_is_not_runtime_cap() {
    let cancel = CancellationToken::new();
    let cap = RuntimeCap::spawn(cancel.clone(), Duration::from_secs(3600));
    cancel_after(&cancel, 100);

    let report = CaptureOrchestrator::new(
        ScriptedPrinter::always_building().with_times(1000, 1000),
        StubCamera::new(),
        URL,
        config(),
        cancel,
    )
    .with_runtime_cap(cap.reached())
    .run(|| Ok(StubSink::new(&SinkStats::default(), 100)))
    .await
    .unwrap();

    assert!(!cap.is_reached());
    assert_eq!(report.stop_reason, StopReason::StopRequested);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_startup_grace() {
    let camera = StubCamera::new();
    let stats = camera.stats.clone();
    let cancel = CancellationToken::new();
    cancel_after(&cancel, 1);

    let report = run(
        ScriptedPrinter::always_building(),
        camera,
        config(),
        StubSink::new(&SinkStats::default(), 100),
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, StopReason::StopRequested);
    assert_eq!(report.frames_written, 0);
    assert_eq!(stats.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_loss_finalizes_and_fails() {
    let camera = StubCamera::failing_after(5);
    let stats = camera.stats.clone();
    let sinks = SinkStats::default();

    let result = run(
        ScriptedPrinter::always_building().with_times(100, 100),
        camera,
        config(),
        StubSink::new(&sinks, 100),
        CancellationToken::new(),
    )
    .await;

    assert!(matches!(result, Err(CaptureError::StreamUnavailable(_))));
    assert_eq!(sinks.appended(), 5);
    assert_eq!(sinks.finishes(), 1);
    assert_eq!(stats.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_encode_failures_drop_frames_but_continue() {
    let printer = ScriptedPrinter::new(vec![(0, "busy", "building"), (25, "ready", "")])
        .with_times(100, 100);
    let sinks = SinkStats::default();
    let mut config = config();
    config.timings.status_refresh_interval = Duration::from_secs(1);

    let report = run(
        printer,
        StubCamera::new(),
        config,
        StubSink::new(&sinks, 100).failing_every(3),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    // Ticks every second from 5s to 24s: 20 attempts, every third one fails.
    assert_eq!(report.frames_dropped, 6);
    assert_eq!(report.frames_written, 14);
    assert_eq!(report.stop_reason, StopReason::JobFinished);
}

#[tokio::test(start_paused = true)]
async fn test_poll_failure_budget_ends_session() {
    let printer = ScriptedPrinter::always_building()
        .with_times(100, 100)
        .failing_between(30, 10_000);
    let sinks = SinkStats::default();
    let mut config = config();
    config.timings.max_consecutive_poll_failures = 3;
    config.timings.status_refresh_interval = Duration::from_secs(1);

    let result = run(
        printer,
        StubCamera::new(),
        config,
        StubSink::new(&sinks, 100),
        CancellationToken::new(),
    )
    .await;

    match result {
        Err(CaptureError::Connectivity { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected connectivity error, got {:?}", other.map(|r| r.stop_reason)),
    }
    assert_eq!(sinks.finishes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failures_are_retried() {
    let printer = ScriptedPrinter::new(vec![(0, "busy", "building"), (60, "ready", "")])
        .with_times(100, 100)
        .failing_between(20, 23);
    let mut config = config();
    config.timings.status_refresh_interval = Duration::from_secs(1);

    let report = run(
        printer,
        StubCamera::new(),
        config,
        StubSink::new(&SinkStats::default(), 100),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.stop_reason, StopReason::JobFinished);
    assert!(report.frames_written > 50);
}

// =============================================================================
// Snapshot
// =============================================================================

#[tokio::test]
async fn test_snapshot_reads_once_and_writes_file() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("snap.png");
    let camera = StubCamera::new();

    let path = take_snapshot(
        &camera,
        URL,
        &output,
        &FrameProcessor::new(2.0, true),
        None,
        5,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(path.as_deref(), Some(output.as_path()));
    assert_eq!(camera.stats.reads(), 1);
    assert_eq!(camera.stats.closes(), 1);

    let saved = image::open(&output).unwrap();
    assert_eq!((saved.width(), saved.height()), (16, 16));
}
