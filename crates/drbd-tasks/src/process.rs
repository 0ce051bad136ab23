//! Process handles used by the task workers.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cmdline::CmdLine;

/// Exit status before the process has ended.
pub const EXIT_STATUS_NONE: i32 = -1;
/// Exit status of a process that did not exit normally.
pub const EXIT_STATUS_FAILED: i32 = -2;

/// Retained bytes per output stream; further output is drained and dropped.
pub const OUTPUT_MAX_SIZE: usize = 1 << 18;
const READ_BUFFER_SIZE: usize = 1 << 13;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("command line is empty")]
    EmptyCommand,
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: SmolStr,
        #[source]
        source: io::Error,
    },
    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
    /// No process handle could be created.
    #[error("process handle unavailable: {0}")]
    Unavailable(SmolStr),
}

/// One external process run.
///
/// `execute` blocks until the process has ended. `terminate` is called
/// from other threads while `execute` is still blocked.
pub trait SubProcess: Send + Sync {
    fn execute(&self, cmd: &CmdLine) -> Result<(), ProcessError>;

    /// [`EXIT_STATUS_NONE`] while running, [`EXIT_STATUS_FAILED`] after an
    /// abnormal end.
    fn exit_status(&self) -> i32;

    /// Asks the process to end; `force` kills it outright.
    fn terminate(&self, force: bool);

    fn pid(&self) -> Option<u32>;

    fn stdout_output(&self) -> String {
        String::new()
    }

    fn stderr_output(&self) -> String {
        String::new()
    }
}

/// Creates a fresh handle for every task run.
pub trait ProcessFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn SubProcess>, ProcessError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessFactory;

impl ProcessFactory for SystemProcessFactory {
    fn create(&self) -> Result<Arc<dyn SubProcess>, ProcessError> {
        Ok(Arc::new(SystemProcess::new()))
    }
}

/// [`SubProcess`] backed by `std::process`.
///
/// The child is reaped under the same lock that `terminate` takes, so a
/// signal never reaches a recycled pid. A terminate request that arrives
/// before the child is spawned is kept, and the command is then never started.
#[derive(Debug)]
pub struct SystemProcess {
    child: Mutex<ChildSlot>,
    pid: Mutex<Option<u32>>,
    exit_status: AtomicI32,
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

#[derive(Debug, Default)]
struct ChildSlot {
    child: Option<Child>,
    cancelled: bool,
}

impl Default for SystemProcess {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcess {
    #[must_use]
    pub fn new() -> Self {
        Self {
            child: Mutex::new(ChildSlot::default()),
            pid: Mutex::new(None),
            exit_status: AtomicI32::new(EXIT_STATUS_NONE),
            stdout: Mutex::new(String::new()),
            stderr: Mutex::new(String::new()),
        }
    }

    fn wait_for_exit(&self, pid: u32) -> Result<ExitStatus, ProcessError> {
        loop {
            {
                let mut guard = self.child.lock();
                let Some(child) = guard.child.as_mut() else {
                    return Err(ProcessError::Wait {
                        pid,
                        source: io::Error::new(io::ErrorKind::NotFound, "child handle lost"),
                    });
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        guard.child.take();
                        return Ok(status);
                    }
                    Ok(None) => {}
                    Err(source) => {
                        guard.child.take();
                        return Err(ProcessError::Wait { pid, source });
                    }
                }
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl SubProcess for SystemProcess {
    fn execute(&self, cmd: &CmdLine) -> Result<(), ProcessError> {
        let (program, args) = cmd
            .arguments()
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;
        let mut slot = self.child.lock();
        if slot.cancelled {
            debug!(command = %cmd, "process terminated before it was started");
            self.exit_status.store(EXIT_STATUS_FAILED, Ordering::SeqCst);
            return Ok(());
        }
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                self.exit_status.store(EXIT_STATUS_FAILED, Ordering::SeqCst);
                ProcessError::Spawn {
                    program: SmolStr::new(program),
                    source,
                }
            })?;
        let pid = child.id();
        debug!(pid, command = %cmd, "process started");
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        slot.child = Some(child);
        *self.pid.lock() = Some(pid);
        drop(slot);

        let status = thread::scope(|scope| {
            if let Some(pipe) = stdout {
                scope.spawn(|| capture_output(pipe, &self.stdout));
            }
            if let Some(pipe) = stderr {
                scope.spawn(|| capture_output(pipe, &self.stderr));
            }
            self.wait_for_exit(pid)
        });
        let code = match status {
            Ok(status) => status.code().unwrap_or(EXIT_STATUS_FAILED),
            Err(err) => {
                self.exit_status.store(EXIT_STATUS_FAILED, Ordering::SeqCst);
                return Err(err);
            }
        };
        debug!(pid, code, "process ended");
        self.exit_status.store(code, Ordering::SeqCst);
        Ok(())
    }

    fn exit_status(&self) -> i32 {
        self.exit_status.load(Ordering::SeqCst)
    }

    fn terminate(&self, force: bool) {
        let mut guard = self.child.lock();
        let Some(child) = guard.child.as_mut() else {
            guard.cancelled = true;
            return;
        };
        let result = if force {
            child.kill()
        } else {
            send_sigterm(child.id())
        };
        if let Err(err) = result {
            warn!(pid = child.id(), force, error = %err, "failed to signal process");
        }
    }

    fn pid(&self) -> Option<u32> {
        *self.pid.lock()
    }

    fn stdout_output(&self) -> String {
        self.stdout.lock().clone()
    }

    fn stderr_output(&self) -> String {
        self.stderr.lock().clone()
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // The caller holds the child lock and the child has not been reaped.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "graceful termination requires a unix platform",
    ))
}

fn capture_output(mut pipe: impl Read, sink: &Mutex<String>) {
    let mut buffer = [0_u8; READ_BUFFER_SIZE];
    let mut retained = Vec::new();
    loop {
        match pipe.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => {
                let room = OUTPUT_MAX_SIZE.saturating_sub(retained.len());
                retained.extend_from_slice(&buffer[..count.min(room)]);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    *sink.lock() = String::from_utf8_lossy(&retained).into_owned();
}
