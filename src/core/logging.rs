use std::collections::HashMap;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::shared::paths::{ensure_dir, get_log_dir};

/// Targets with their own daily log file. Everything else goes to `system.log`.
const FILE_TARGETS: [&str; 2] = ["capture", "printer"];

pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Console verbosity picked on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, debug: bool) -> Self {
        match (verbose, debug) {
            (_, true) => Verbosity::Debug,
            (true, false) => Verbosity::Verbose,
            _ => Verbosity::Quiet,
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

/// Routes each event to the file of its target.
struct TargetWriter {
    writers: HashMap<String, NonBlocking>,
    system_writer: NonBlocking,
}

impl TargetWriter {
    fn writer_for(&self, target: &str) -> &NonBlocking {
        self.writers
            .iter()
            .find(|(name, _)| target == name.as_str() || target.starts_with(&format!("{}::", name)))
            .map(|(_, writer)| writer)
            .unwrap_or(&self.system_writer)
    }
}

impl<'a> MakeWriter<'a> for TargetWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.system_writer.clone()
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        self.writer_for(meta.target()).clone()
    }
}

fn env_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()))
}

/// Install the global subscriber: stderr at the requested verbosity, plus
/// daily rolling files under the data directory at info level.
///
/// If the log directory cannot be created only stderr logging is set up.
pub fn init_logging(verbosity: Verbosity) -> LoggingGuards {
    let log_dir = get_log_dir();
    let mut guards = Vec::new();

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter(verbosity));

    let file_layer = match ensure_dir(&log_dir) {
        Ok(()) => {
            let mut writers = HashMap::new();
            for target in FILE_TARGETS {
                let appender =
                    RollingFileAppender::new(Rotation::DAILY, &log_dir, format!("{}.log", target));
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                writers.insert(target.to_string(), non_blocking);
                guards.push(guard);
            }

            let system_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "system.log");
            let (system_writer, system_guard) = tracing_appender::non_blocking(system_appender);
            guards.push(system_guard);

            let file_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Verbosity::Verbose.directive()));

            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(TargetWriter {
                        writers,
                        system_writer,
                    })
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_filter(file_filter),
            )
        }
        Err(e) => {
            eprintln!("Failed to create log directory {:?}: {}", log_dir, e);
            None
        }
    };

    let subscriber = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer);

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Global tracing subscriber already set");
    }

    tracing::info!(target: "system", "Logging initialized at {:?}", log_dir);

    LoggingGuards { _guards: guards }
}
