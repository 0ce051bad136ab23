//! Diagnostics setup.
//!
//! The terminal UI owns the screen, so diagnostics go to a log file or are
//! discarded; the summary mode writes them to stderr.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "DRBD_CONSOLE_LOG";

pub enum LogTarget<'a> {
    File(&'a Path),
    Stderr,
    Discard,
}

pub fn init_logging(level: &str, target: LogTarget<'_>) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(level));
    let (make_writer, ansi) = match target {
        LogTarget::File(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        LogTarget::Stderr => (BoxMakeWriter::new(io::stderr), true),
        LogTarget::Discard => (BoxMakeWriter::new(io::sink), false),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .with_ansi(ansi)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install log subscriber")?;
    Ok(())
}
