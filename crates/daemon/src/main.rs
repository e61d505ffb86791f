// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hostmond` — host-monitoring daemon entry point.
//!
//! Usage: `hostmond [config.toml]`. Stdio belongs to the orchestrator;
//! logs go to the configured file or stderr.

use std::path::Path;
use std::process::ExitCode;

use hm_core::{LogConfig, MonitorConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match std::env::args().nth(1) {
        Some(path) => MonitorConfig::from_file(Path::new(&path)),
        None => Ok(MonitorConfig::default()),
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("hostmond: {e}");
            return ExitCode::FAILURE;
        }
    };

    // The guard keeps the non-blocking file writer flushing until exit
    let _log_guard = match init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("hostmond: failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = hm_daemon::run(config).await {
        error!(error = %e, "monitor daemon failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>, std::io::Error> {
    let filter = match &config.level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    match &config.file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file = path.file_name().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "log path has no file name")
            })?;

            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();

            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();

            Ok(None)
        }
    }
}
