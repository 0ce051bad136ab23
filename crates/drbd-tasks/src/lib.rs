//! Execution queue for external DRBD management commands.
//!
//! Tasks move through four queues (waiting, ready, active, finished). A small
//! pool of worker threads takes ready tasks, runs their command line through
//! a [`SubProcess`] and files them as finished.

pub mod cmdline;
pub mod commands;
pub mod process;
pub mod queue;

pub use cmdline::CmdLine;
pub use commands::{
    ConnectionAction, DrbdAdm, PeerVolumeAction, ResourceAction, VolumeAction, DEFAULT_DRBDADM,
};
pub use process::{
    ProcessError, ProcessFactory, SubProcess, SystemProcess, SystemProcessFactory,
    EXIT_STATUS_FAILED, EXIT_STATUS_NONE,
};
pub use queue::{
    QueueError, QueueKind, QueueLimits, QueueObserver, TaskId, TaskQueue, TaskSnapshot, TaskState,
    TaskView, TaskViews, MAX_ACTIVE_COUNT, MAX_ENTRY_COUNT,
};
