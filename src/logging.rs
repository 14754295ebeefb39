//! Tracing subscriber setup: stdout plus an append-only log file.
//!
//! The log file is also the input of `summary::tally_log`, so every line
//! starts with an RFC 3339 timestamp.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{Config, LogFormat};

pub fn init(config: &Config) -> anyhow::Result<()> {
    let log_file = config.log_file();
    if let Some(dir) = log_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("Invalid LOG_LEVEL '{}'", config.log_level))?;
    let detailed = config.log_format == LogFormat::Detailed;

    let stdout_layer = fmt::layer()
        .with_target(detailed)
        .with_file(detailed)
        .with_line_number(detailed);
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(detailed)
        .with_file(detailed)
        .with_line_number(detailed)
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!("Logging to {}", log_file.display());
    Ok(())
}
