//! Errors raised while applying a single event to the model.

#![allow(missing_docs)]

use std::fmt;

use smol_str::SmolStr;
use thiserror::Error;

use crate::message_log::LogLevel;

/// Kind of object an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Resource,
    Connection,
    Volume,
    PeerVolume,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Resource => "resource",
            Self::Connection => "connection",
            Self::Volume => "volume",
            Self::PeerVolume => "peer volume",
        };
        f.write_str(text)
    }
}

/// Failure attributable to exactly one event line.
///
/// None of these conditions is fatal to the event stream: the dispatcher
/// discards the offending event, logs it and carries on with the next line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// Bad enum label, bad number, missing required property or an
    /// invalid mode/type combination.
    #[error("malformed event: {0}")]
    Malformed(SmolStr),
    /// The event arrived in a phase where it cannot occur, for example a
    /// `change` before the initial state replay completed.
    #[error("event out of sync: {0}")]
    OutOfSync(SmolStr),
    /// The event references a resource, connection or volume that the
    /// directory does not contain.
    #[error("event references nonexistent {kind} '{name}'")]
    MissingObject { kind: ObjectKind, name: SmolStr },
    /// A create event for an object that already exists.
    #[error("duplicate {kind} creation '{name}'")]
    Duplicate { kind: ObjectKind, name: SmolStr },
}

impl EventError {
    pub fn malformed(message: impl Into<SmolStr>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn out_of_sync(message: impl Into<SmolStr>) -> Self {
        Self::OutOfSync(message.into())
    }

    pub fn missing(kind: ObjectKind, name: impl Into<SmolStr>) -> Self {
        Self::MissingObject {
            kind,
            name: name.into(),
        }
    }

    pub fn duplicate(kind: ObjectKind, name: impl Into<SmolStr>) -> Self {
        Self::Duplicate {
            kind,
            name: name.into(),
        }
    }

    /// Severity used when the error is surfaced in the operator log.
    #[must_use]
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Malformed(_) | Self::Duplicate { .. } => LogLevel::Warn,
            Self::OutOfSync(_) | Self::MissingObject { .. } => LogLevel::Alert,
        }
    }

    /// Out-of-sync events mean the model no longer mirrors the event
    /// source and must be rebuilt from a fresh replay.
    #[must_use]
    pub fn requires_resync(&self) -> bool {
        matches!(self, Self::OutOfSync(_))
    }
}
