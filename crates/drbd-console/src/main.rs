//! drbd-console: live DRBD resource monitor and command queue.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use drbd_model::{DispatchOutcome, EventDispatcher};
use tracing::{debug, info};

mod cli;
mod config;
mod logging;
mod source;
mod summary;
mod ui;

use cli::{Cli, Command};
use config::ConsoleConfig;
use logging::LogTarget;
use source::{EventSource, SourceEvent};

/// Upper bound on the wait for the initial state in summary mode.
const INITIAL_STATE_TIMEOUT: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(Command::Completions { shell }) = cli.command {
        cli::write_completions(shell);
        return Ok(());
    }

    let (config, config_path) = load_config(cli.config.as_deref())?;
    let log_file = cli.log_file.clone().or_else(|| config.log.file.clone());
    let target = match (&log_file, cli.no_ui) {
        (Some(path), _) => LogTarget::File(path),
        (None, true) => LogTarget::Stderr,
        (None, false) => LogTarget::Discard,
    };
    logging::init_logging(&config.log.level, target)?;
    debug!(config = ?config_path, "configuration loaded");

    if cli.no_ui {
        return print_summary(&config, cli.events_file.as_deref());
    }
    ui::run_ui(config, config_path, cli.events_file)
}

/// An explicit `--config` must exist; the per-user default is optional.
fn load_config(explicit: Option<&Path>) -> Result<(ConsoleConfig, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = ConsoleConfig::load(path, true)
            .with_context(|| format!("load config {}", path.display()))?;
        return Ok((config, Some(path.to_path_buf())));
    }
    match config::default_config_path() {
        Some(path) => {
            let config = ConsoleConfig::load(&path, false)
                .with_context(|| format!("load config {}", path.display()))?;
            Ok((config, Some(path)))
        }
        None => Ok((ConsoleConfig::default(), None)),
    }
}

/// Replays a file completely, or reads the live source up to the end of its
/// initial state, then prints the directory.
fn print_summary(config: &ConsoleConfig, events_file: Option<&Path>) -> Result<()> {
    let (tx, rx) = unbounded();
    let mut source = match events_file {
        Some(path) => EventSource::from_file(path, tx)?,
        None => EventSource::spawn(&config.events.command, tx)?,
    };
    let replay = events_file.is_some();
    let mut dispatcher = EventDispatcher::new();
    loop {
        let event = rx
            .recv_timeout(INITIAL_STATE_TIMEOUT)
            .context("timed out waiting for events")?;
        match event {
            SourceEvent::Line(line) => {
                let outcome = dispatcher.process_line(&line);
                if !replay && outcome == Ok(DispatchOutcome::InitialStateComplete) {
                    break;
                }
            }
            SourceEvent::Ended => break,
            SourceEvent::Failed(kind) => {
                if replay {
                    bail!("reading events failed: {kind}");
                }
                bail!("events source stopped before the initial state was complete: {kind}");
            }
        }
    }
    source.stop();
    info!(resources = dispatcher.directory().len(), "initial state loaded");

    let color = io::stdout().is_terminal();
    let text = summary::render_summary(&dispatcher, config.display.problem_mode, color);
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
