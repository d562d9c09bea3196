pub mod capture;
pub mod cli;
pub mod commands;
pub mod core;
pub mod printer;
pub mod shared;

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::cli::Cli;
use crate::core::logging::{init_logging, Verbosity};
use crate::core::settings::load_settings;
use crate::core::shutdown::spawn_signal_listener;
use crate::shared::errors::AppError;

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Held until exit so buffered log lines are flushed.
    let _logging_guards = init_logging(Verbosity::from_flags(cli.verbose, cli.debug));
    let settings = load_settings();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| AppError::Runtime(e.to_string()))
        .and_then(|runtime| {
            runtime.block_on(async {
                let cancel = CancellationToken::new();
                let listener = spawn_signal_listener(cancel.clone());
                let result = commands::execute(cli, &settings, cancel.clone()).await;
                cancel.cancel();
                let _ = listener.await;
                result
            })
        });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(target: "system", "{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
