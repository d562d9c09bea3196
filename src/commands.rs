use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::capture::types::{
    DEFAULT_GIF_OUTPUT, DEFAULT_LIVE_OUTPUT, DEFAULT_SNAPSHOT_OUTPUT, DEFAULT_VIDEO_OUTPUT,
};
use crate::capture::{
    check_ffmpeg, require_camera_model, take_snapshot, CaptureConfig, CaptureOrchestrator,
    FrameProcessor, GifSink, LiveFileDisplay, LiveStream, MjpegCamera, Overlay, VideoSink,
};
use crate::cli::{CaptureArgs, Cli, Commands, SnapshotArgs, StreamArgs};
use crate::core::settings::AppSettings;
use crate::core::shutdown::RuntimeCap;
use crate::printer::{Dremel3DPrinter, PrinterStatusSource};
use crate::shared::errors::AppError;

#[derive(Debug, Clone, Copy)]
enum OutputFormat {
    Gif,
    Video,
}

#[derive(Serialize)]
struct SnapshotResult {
    output_path: Option<PathBuf>,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run the selected command against the printer.
pub async fn execute(
    cli: Cli,
    settings: &AppSettings,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    let host = cli
        .host
        .or_else(|| settings.host.clone())
        .ok_or(AppError::MissingHost)?;
    let mut printer = Dremel3DPrinter::new(host)?;

    match cli.command {
        Commands::Info => print_json(printer.printer_info().await?),
        Commands::Job => {
            printer.refresh().await?;
            print_json(printer.job_status())
        }
        Commands::Pause => print_json(&printer.pause_print().await?),
        Commands::Resume => print_json(&printer.resume_print().await?),
        Commands::Stop => print_json(&printer.stop_print().await?),
        Commands::Print(args) => {
            let response = match (args.source.file, args.source.url) {
                (Some(file), _) => printer.start_print_from_file(&file).await?,
                (None, Some(url)) => printer.start_print_from_url(&url).await?,
                (None, None) => return Err(AppError::MissingPrintSource),
            };
            print_json(&response)?;

            match args.timelapse {
                Some(output) => {
                    let capture = CaptureArgs {
                        output: Some(output),
                        ..CaptureArgs::default()
                    };
                    let config = capture.into_config(settings, DEFAULT_GIF_OUTPUT, false);
                    run_timelapse(printer, config, cancel, OutputFormat::Gif).await
                }
                None => Ok(()),
            }
        }
        Commands::Gif(args) => {
            let config = args.into_config(settings, DEFAULT_GIF_OUTPUT, false);
            run_timelapse(printer, config, cancel, OutputFormat::Gif).await
        }
        Commands::Record(args) => {
            check_ffmpeg()?;
            let config = args.into_config(settings, DEFAULT_VIDEO_OUTPUT, true);
            run_timelapse(printer, config, cancel, OutputFormat::Video).await
        }
        Commands::Stream(args) => run_stream(printer, args, settings, cancel).await,
        Commands::Snapshot(args) => run_snapshot(printer, args, settings, cancel).await,
    }
}

async fn require_camera(printer: &mut Dremel3DPrinter) -> Result<(), AppError> {
    let model = printer.model().await?;
    require_camera_model(&model)?;
    Ok(())
}

async fn run_timelapse(
    mut printer: Dremel3DPrinter,
    config: CaptureConfig,
    cancel: CancellationToken,
    format: OutputFormat,
) -> Result<(), AppError> {
    config.validate()?;
    require_camera(&mut printer).await?;

    let cap = config
        .runtime_cap_secs
        .map(|secs| RuntimeCap::spawn(cancel.clone(), Duration::from_secs(secs)));

    let camera = MjpegCamera::new()?;
    let url = printer.stream_url();
    let output = config.output_path.clone();
    let fps = config.fps;

    let mut orchestrator = CaptureOrchestrator::new(printer, camera, url, config, cancel);
    if let Some(cap) = &cap {
        orchestrator = orchestrator.with_runtime_cap(cap.reached());
    }
    let result = match format {
        OutputFormat::Gif => orchestrator.run(|| GifSink::create(&output, fps)).await,
        OutputFormat::Video => orchestrator.run(|| VideoSink::create(&output, fps)).await,
    };

    if let Some(cap) = cap {
        cap.abort();
    }

    print_json(&result?)
}

async fn run_stream(
    mut printer: Dremel3DPrinter,
    args: StreamArgs,
    settings: &AppSettings,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    require_camera(&mut printer).await?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LIVE_OUTPUT));
    let scale = args.scale.unwrap_or(settings.scale);
    let mut config = CaptureConfig::new(&output);
    config.rescale_factor = scale;
    config.fps = args.fps.unwrap_or(settings.fps);
    config.validate()?;

    let cap = args
        .runtime
        .map(|secs| RuntimeCap::spawn(cancel.clone(), Duration::from_secs(secs)));

    let camera = MjpegCamera::new()?;
    let url = printer.stream_url();
    let mut display = LiveFileDisplay::new(&output)?;

    let mut report = LiveStream {
        printer: &mut printer,
        source: &camera,
        url: &url,
        display: &mut display,
        processor: FrameProcessor::new(scale, args.original),
        fps: config.fps,
        timings: settings.timings(),
    }
    .run(&cancel)
    .await;

    if let Some(cap) = cap {
        cap.abort();
    }

    if report.frames_shown > 0 {
        report.output_path = Some(output);
    }
    print_json(&report)
}

async fn run_snapshot(
    mut printer: Dremel3DPrinter,
    args: SnapshotArgs,
    settings: &AppSettings,
    cancel: CancellationToken,
) -> Result<(), AppError> {
    require_camera(&mut printer).await?;

    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_OUTPUT));
    let mut config = CaptureConfig::new(&output);
    config.rescale_factor = args.scale.unwrap_or(settings.scale);
    config.validate()?;

    // The overlay is cosmetic; a failed status refresh only drops it.
    let overlay = match printer.refresh().await {
        Ok(()) => Some(Overlay {
            progress: printer.progress(),
            state: printer.job_state(),
        }),
        Err(e) => {
            tracing::warn!(target: "capture", "[SNAPSHOT] No job status for overlay: {}", e);
            None
        }
    };

    let camera = MjpegCamera::new()?;
    let processor = FrameProcessor::new(config.rescale_factor, args.original);
    let output_path = take_snapshot(
        &camera,
        &printer.stream_url(),
        &output,
        &processor,
        overlay,
        settings.timings().snapshot_max_attempts,
        &cancel,
    )
    .await?;

    print_json(&SnapshotResult { output_path })
}
