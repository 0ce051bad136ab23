//! `drbdadm` command lines for the actions offered by the console.

use crate::cmdline::CmdLine;

pub const DEFAULT_DRBDADM: &str = "/usr/sbin/drbdadm";

const ARG_FORCE: &str = "--force";
const ARG_DISCARD: &str = "--discard-my-data";
const ARG_ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceAction {
    Up,
    Down,
    Adjust,
    Primary,
    ForcePrimary,
    Secondary,
    Verify,
    PauseSync,
    ResumeSync,
    Invalidate,
    InvalidateRemote,
    Connect,
    ConnectDiscard,
    Disconnect,
    Attach,
    Detach,
    Resize,
}

impl ResourceAction {
    pub const ALL: [Self; 17] = [
        Self::Up,
        Self::Down,
        Self::Adjust,
        Self::Primary,
        Self::ForcePrimary,
        Self::Secondary,
        Self::Verify,
        Self::PauseSync,
        Self::ResumeSync,
        Self::Invalidate,
        Self::InvalidateRemote,
        Self::Connect,
        Self::ConnectDiscard,
        Self::Disconnect,
        Self::Attach,
        Self::Detach,
        Self::Resize,
    ];

    fn arguments(self) -> &'static [&'static str] {
        match self {
            Self::Up => &["up"],
            Self::Down => &["down"],
            Self::Adjust => &["adjust"],
            Self::Primary => &["primary"],
            Self::ForcePrimary => &["primary", ARG_FORCE],
            Self::Secondary => &["secondary"],
            Self::Verify => &["verify"],
            Self::PauseSync => &["pause-sync"],
            Self::ResumeSync => &["resume-sync"],
            Self::Invalidate => &["invalidate"],
            Self::InvalidateRemote => &["invalidate-remote"],
            Self::Connect => &["connect"],
            Self::ConnectDiscard => &["connect", ARG_DISCARD],
            Self::Disconnect => &["disconnect"],
            Self::Attach => &["attach"],
            Self::Detach => &["detach"],
            Self::Resize => &["resize"],
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Up => "Start resource",
            Self::Down => "Stop resource",
            Self::Adjust => "Adjust resource",
            Self::Primary => "Switch to primary",
            Self::ForcePrimary => "Force switch to primary",
            Self::Secondary => "Switch to secondary",
            Self::Verify => "Start online verification",
            Self::PauseSync => "Pause resync",
            Self::ResumeSync => "Resume resync",
            Self::Invalidate => "Invalidate",
            Self::InvalidateRemote => "Invalidate peers",
            Self::Connect => "Connect",
            Self::ConnectDiscard => "Discard data and connect",
            Self::Disconnect => "Disconnect",
            Self::Attach => "Attach",
            Self::Detach => "Detach",
            Self::Resize => "Resize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VolumeAction {
    Attach,
    Detach,
    Verify,
    PauseSync,
    ResumeSync,
    Invalidate,
    InvalidateRemote,
    Resize,
}

impl VolumeAction {
    pub const ALL: [Self; 8] = [
        Self::Attach,
        Self::Detach,
        Self::Verify,
        Self::PauseSync,
        Self::ResumeSync,
        Self::Invalidate,
        Self::InvalidateRemote,
        Self::Resize,
    ];

    fn argument(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::Verify => "verify",
            Self::PauseSync => "pause-sync",
            Self::ResumeSync => "resume-sync",
            Self::Invalidate => "invalidate",
            Self::InvalidateRemote => "invalidate-remote",
            Self::Resize => "resize",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Attach => "Attach",
            Self::Detach => "Detach",
            Self::Verify => "Start online verification",
            Self::PauseSync => "Pause resync",
            Self::ResumeSync => "Resume resync",
            Self::Invalidate => "Invalidate",
            Self::InvalidateRemote => "Invalidate peer",
            Self::Resize => "Resize",
        }
    }
}

/// Actions on one volume as replicated to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerVolumeAction {
    PauseSync,
    ResumeSync,
    Verify,
    InvalidateRemote,
}

impl PeerVolumeAction {
    pub const ALL: [Self; 4] = [
        Self::PauseSync,
        Self::ResumeSync,
        Self::Verify,
        Self::InvalidateRemote,
    ];

    fn argument(self) -> &'static str {
        match self {
            Self::PauseSync => "pause-sync",
            Self::ResumeSync => "resume-sync",
            Self::Verify => "verify",
            Self::InvalidateRemote => "invalidate-remote",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::PauseSync => "Pause resync",
            Self::ResumeSync => "Resume resync",
            Self::Verify => "Start online verification",
            Self::InvalidateRemote => "Invalidate peer volume",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionAction {
    Connect,
    ConnectDiscard,
    Disconnect,
    PauseSync,
    ResumeSync,
    Verify,
    InvalidateRemote,
}

impl ConnectionAction {
    pub const ALL: [Self; 7] = [
        Self::Connect,
        Self::ConnectDiscard,
        Self::Disconnect,
        Self::PauseSync,
        Self::ResumeSync,
        Self::Verify,
        Self::InvalidateRemote,
    ];

    fn arguments(self) -> &'static [&'static str] {
        match self {
            Self::Connect => &["connect"],
            Self::ConnectDiscard => &["connect", ARG_DISCARD],
            Self::Disconnect => &["disconnect"],
            Self::PauseSync => &["pause-sync"],
            Self::ResumeSync => &["resume-sync"],
            Self::Verify => &["verify"],
            Self::InvalidateRemote => &["invalidate-remote"],
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Connect => "Connect",
            Self::ConnectDiscard => "Discard data, connect",
            Self::Disconnect => "Disconnect",
            Self::PauseSync => "Pause resync",
            Self::ResumeSync => "Resume resync",
            Self::Verify => "Start online verification",
            Self::InvalidateRemote => "Invalidate peer",
        }
    }
}

/// Builds `drbdadm` invocations against a configurable binary path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrbdAdm {
    path: String,
}

impl Default for DrbdAdm {
    fn default() -> Self {
        Self::new(DEFAULT_DRBDADM)
    }
}

impl DrbdAdm {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn resource(&self, action: ResourceAction, resource: &str) -> CmdLine {
        CmdLine::new(format!("{}, resource {resource}", action.label()))
            .arg(self.path.as_str())
            .args(action.arguments().iter().copied())
            .arg(resource)
    }

    #[must_use]
    pub fn volume(&self, action: VolumeAction, resource: &str, volume: u16) -> CmdLine {
        CmdLine::new(format!(
            "{}, resource {resource} volume {volume}",
            action.label()
        ))
        .arg(self.path.as_str())
        .arg(action.argument())
        .arg(format!("{resource}/{volume}"))
    }

    /// Targets `<resource>:<peer>/<volume>`, so only that peer is affected.
    #[must_use]
    pub fn peer_volume(
        &self,
        action: PeerVolumeAction,
        resource: &str,
        peer: &str,
        volume: u16,
    ) -> CmdLine {
        CmdLine::new(format!(
            "{}, resource {resource} connection {peer} volume {volume}",
            action.label()
        ))
        .arg(self.path.as_str())
        .arg(action.argument())
        .arg(format!("{resource}:{peer}/{volume}"))
    }

    #[must_use]
    pub fn connection(&self, action: ConnectionAction, resource: &str, peer: &str) -> CmdLine {
        CmdLine::new(format!(
            "{}, resource {resource} connection to {peer}",
            action.label()
        ))
        .arg(self.path.as_str())
        .args(action.arguments().iter().copied())
        .arg(format!("{resource}:{peer}"))
    }

    #[must_use]
    pub fn adjust_all(&self) -> CmdLine {
        CmdLine::new("Adjust all resources")
            .arg(self.path.as_str())
            .arg("adjust")
            .arg(ARG_ALL)
    }
}
