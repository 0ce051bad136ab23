//! Event line producers: the `drbdsetup events2` process or a replay file.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};
use crossbeam_channel::Sender;
use drbd_model::FailureKind;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Line(String),
    /// The stream broke; the source has to be respawned.
    Failed(FailureKind),
    /// A replay file was read completely.
    Ended,
}

/// Running producer. Dropping it stops the reader and the child process.
pub struct EventSource {
    child: Arc<Mutex<Option<Child>>>,
    stopping: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl EventSource {
    pub fn spawn(command: &[String], events: Sender<SourceEvent>) -> Result<Self> {
        let Some((program, args)) = command.split_first() else {
            bail!("events command is empty");
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("start events source '{program}'"))?;
        let stdout = child
            .stdout
            .take()
            .context("events source has no stdout pipe")?;
        info!(pid = child.id(), program = %program, "events source started");

        let stopping = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(stdout, events, Arc::clone(&stopping), false)?;
        Ok(Self {
            child: Arc::new(Mutex::new(Some(child))),
            stopping,
            reader: Some(reader),
        })
    }

    pub fn from_file(path: &Path, events: Sender<SourceEvent>) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open events file {}", path.display()))?;
        let stopping = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(file, events, Arc::clone(&stopping), true)?;
        Ok(Self {
            child: Arc::new(Mutex::new(None)),
            stopping,
            reader: Some(reader),
        })
    }

    pub fn stop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().take() {
            if let Err(err) = child.kill() {
                debug!(error = %err, "events source already ended");
            }
            if let Err(err) = child.wait() {
                warn!(error = %err, "failed to reap events source");
            }
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("events reader thread panicked");
            }
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_reader(
    input: impl Read + Send + 'static,
    events: Sender<SourceEvent>,
    stopping: Arc<AtomicBool>,
    replay: bool,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("drbd-events".into())
        .spawn(move || {
            let end = read_lines(BufReader::new(input), &events);
            if stopping.load(Ordering::SeqCst) {
                return;
            }
            let last = match end {
                Ok(()) if replay => SourceEvent::Ended,
                Ok(()) => {
                    warn!("events source closed its output");
                    SourceEvent::Failed(FailureKind::EventsSource)
                }
                Err(err) => {
                    warn!(error = %err, "events source read failed");
                    SourceEvent::Failed(FailureKind::EventsIo)
                }
            };
            let _ = events.send(last);
        })
        .context("spawn events reader thread")
}

/// Forwards complete lines. A line that is not UTF-8 is dropped on its own;
/// only a failing read ends the stream.
fn read_lines(mut input: impl BufRead, events: &Sender<SourceEvent>) -> io::Result<()> {
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if input.read_until(b'\n', &mut raw)? == 0 {
            return Ok(());
        }
        while matches!(raw.last(), Some(b'\n' | b'\r')) {
            raw.pop();
        }
        let text = match String::from_utf8(std::mem::take(&mut raw)) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    line = %String::from_utf8_lossy(err.as_bytes()),
                    "skipped event line that is not valid UTF-8"
                );
                continue;
            }
        };
        if events.send(SourceEvent::Line(text)).is_err() {
            // receiver gone
            return Ok(());
        }
    }
}
