//! Routing of event records to the resource directory.
//!
//! The dispatcher owns the directory and the operator message log. Every
//! error raised while applying a record is mirrored into the log and into
//! `tracing`, then handed back so the caller can decide whether the event
//! stream has to be reinitialized.

use std::fmt;

use tracing::{debug, error, warn};

use crate::directory::ResourceDirectory;
use crate::error::EventError;
use crate::event::{EventMode, EventRecord, ObjectType};
use crate::message_log::{LogLevel, MessageLog};

/// Cause of the last interruption of status tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    OutOfMemory,
    EventsIo,
    EventsSource,
    Generic,
}

impl FailureKind {
    /// Notice logged once the state replay after the failure has completed.
    #[must_use]
    pub fn recovery_notice(self) -> &'static str {
        match self {
            Self::OutOfMemory => "Status tracking reestablished after out-of-memory condition",
            Self::EventsIo => "Events source I/O reestablished",
            Self::EventsSource => "Events source process respawned",
            Self::Generic => "Status tracking reestablished",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OutOfMemory => "out of memory",
            Self::EventsIo => "events I/O error",
            Self::EventsSource => "events source exited",
            Self::Generic => "generic failure",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The record changed the directory.
    Applied,
    /// The `exists -` marker ended the initial state replay.
    InitialStateComplete,
    /// Blank line or vocabulary the model does not track.
    Ignored,
}

#[derive(Debug, Default)]
pub struct EventDispatcher {
    directory: ResourceDirectory,
    log: MessageLog,
    have_initial_state: bool,
    failure: Option<FailureKind>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            log: MessageLog::new(capacity),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn directory(&self) -> &ResourceDirectory {
        &self.directory
    }

    #[must_use]
    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    #[must_use]
    pub fn has_initial_state(&self) -> bool {
        self.have_initial_state
    }

    /// Remembers why tracking was interrupted. A later failure replaces an
    /// earlier one that was not yet reported.
    pub fn record_failure(&mut self, kind: FailureKind) {
        self.failure = Some(kind);
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<FailureKind> {
        self.failure
    }

    /// Drops the model ahead of a fresh state replay. The failure memory
    /// and the message log are kept.
    pub fn reset(&mut self) {
        self.directory.clear();
        self.have_initial_state = false;
    }

    /// Decodes and applies one event line.
    pub fn process_line(&mut self, line: &str) -> Result<DispatchOutcome, EventError> {
        let record = match EventRecord::parse(line) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(DispatchOutcome::Ignored),
            Err(err) => return Err(self.report(err)),
        };
        for key in &record.dropped_keys {
            self.log.add_entry(
                LogLevel::Warn,
                format!("Duplicate event property '{key}' dropped"),
            );
        }
        self.dispatch(&record)
    }

    /// Applies one decoded record.
    pub fn dispatch(&mut self, record: &EventRecord) -> Result<DispatchOutcome, EventError> {
        debug!(mode = %record.mode, object = %record.object, "dispatching event");
        self.apply(record).map_err(|err| self.report(err))
    }

    fn apply(&mut self, record: &EventRecord) -> Result<DispatchOutcome, EventError> {
        let props = &record.props;
        if record.object == ObjectType::None {
            return if record.mode == EventMode::Exists {
                self.complete_initial_state()
            } else {
                Err(EventError::malformed(format!(
                    "'{} -' carries no object",
                    record.mode
                )))
            };
        }
        match record.mode {
            EventMode::Exists if self.have_initial_state => {
                return Err(EventError::out_of_sync(format!(
                    "'exists {}' after the initial state",
                    record.object
                )));
            }
            EventMode::Exists => {}
            mode if !self.have_initial_state => {
                return Err(EventError::out_of_sync(format!(
                    "'{mode} {}' before the initial state",
                    record.object
                )));
            }
            _ => {}
        }

        let directory = &mut self.directory;
        match (record.mode, record.object) {
            (EventMode::Exists | EventMode::Create, ObjectType::Resource) => {
                directory.create_resource(props)
            }
            (EventMode::Exists | EventMode::Create, ObjectType::Connection) => {
                directory.create_connection(props)
            }
            (EventMode::Exists | EventMode::Create, ObjectType::Device) => {
                directory.create_device(props)
            }
            (EventMode::Exists | EventMode::Create, ObjectType::PeerDevice) => {
                directory.create_peer_device(props)
            }
            (EventMode::Change, ObjectType::Resource) => directory.update_resource(props),
            (EventMode::Change, ObjectType::Connection) => directory.update_connection(props),
            (EventMode::Change, ObjectType::Device) => directory.update_device(props),
            (EventMode::Change, ObjectType::PeerDevice) => directory.update_peer_device(props),
            (EventMode::Rename, ObjectType::Resource) => directory.rename_resource(props),
            (EventMode::Rename, object) => Err(EventError::malformed(format!(
                "rename is not supported for {object}"
            ))),
            (EventMode::Destroy, ObjectType::Resource) => directory.destroy_resource(props),
            (EventMode::Destroy, ObjectType::Connection) => directory.destroy_connection(props),
            (EventMode::Destroy, ObjectType::Device) => directory.destroy_device(props),
            (EventMode::Destroy, ObjectType::PeerDevice) => directory.destroy_peer_device(props),
            (_, ObjectType::None) => unreachable!("marker handled above"),
        }?;
        Ok(DispatchOutcome::Applied)
    }

    fn complete_initial_state(&mut self) -> Result<DispatchOutcome, EventError> {
        if self.have_initial_state {
            return Err(EventError::out_of_sync("repeated end of initial state"));
        }
        self.have_initial_state = true;
        if let Some(kind) = self.failure.take() {
            self.log.add_entry(LogLevel::Info, kind.recovery_notice());
        }
        Ok(DispatchOutcome::InitialStateComplete)
    }

    fn report(&mut self, err: EventError) -> EventError {
        let level = err.log_level();
        match level {
            LogLevel::Alert => error!(error = %err, "event discarded"),
            _ => warn!(error = %err, "event discarded"),
        }
        self.log.add_entry(level, capitalize(&err.to_string()));
        err
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
