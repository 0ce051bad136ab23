//! Event-driven state model for DRBD resources.
//!
//! The model is fed one `drbdsetup events2` record at a time through
//! [`EventDispatcher`], which keeps a [`ResourceDirectory`] of resources,
//! their connections and volumes, and a secondary index of the resources
//! that currently show a problem.

pub mod connection;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod message_log;
pub mod numparse;
pub mod ordered_map;
pub mod resource;
pub mod role;
pub mod state_flags;
pub mod volume;

pub use connection::{ConnectionState, Connection};
pub use directory::ResourceDirectory;
pub use dispatch::{DispatchOutcome, EventDispatcher, FailureKind};
pub use error::{EventError, ObjectKind};
pub use event::{EventMode, EventRecord, ObjectType, PropsMap};
pub use message_log::{LogEntry, LogLevel, MessageLog};
pub use ordered_map::{NodeId, OrderedMap};
pub use resource::Resource;
pub use role::Role;
pub use state_flags::{FlagState, StateFlagged, StateFlags};
pub use volume::{ClientMode, DiskState, ReplicationState, Volume};
