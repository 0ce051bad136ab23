//! Local and peer volumes.

use std::fmt;

use smol_str::SmolStr;

use crate::error::EventError;
use crate::event::PropsMap;
use crate::numparse::{parse_sync_perc, parse_unsigned, MAX_SYNC_PERC};
use crate::state_flags::{FlagState, StateFlagged, StateFlags};

pub const PROP_KEY_VOLUME: &str = "volume";
pub const PROP_KEY_MINOR: &str = "minor";
pub const PROP_KEY_DISK: &str = "disk";
pub const PROP_KEY_PEER_DISK: &str = "peer-disk";
pub const PROP_KEY_REPLICATION: &str = "replication";
pub const PROP_KEY_CLIENT: &str = "client";
pub const PROP_KEY_PEER_CLIENT: &str = "peer-client";
pub const PROP_KEY_QUORUM: &str = "quorum";
pub const PROP_KEY_SYNC_PERC: &str = "done";

/// Minor number reported for volumes that have none.
pub const MINOR_UNKNOWN: i32 = -1;

macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($variant:ident => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn parse(label: &str) -> Result<Self, EventError> {
                match label {
                    $($label => Ok(Self::$variant),)+
                    other => Err(EventError::malformed(format!(
                        concat!("invalid ", $what, " '{}'"),
                        other
                    ))),
                }
            }

            #[must_use]
            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

labelled_enum! {
    /// Disk state of a local or peer volume.
    DiskState, "disk state" {
        Diskless => "Diskless",
        Attaching => "Attaching",
        Detaching => "Detaching",
        Failed => "Failed",
        Negotiating => "Negotiating",
        Inconsistent => "Inconsistent",
        Outdated => "Outdated",
        Unknown => "DUnknown",
        Consistent => "Consistent",
        UpToDate => "UpToDate",
    }
}

labelled_enum! {
    /// Replication state of a peer volume.
    ReplicationState, "replication state" {
        Off => "Off",
        Established => "Established",
        StartingSyncSource => "StartingSyncS",
        StartingSyncTarget => "StartingSyncT",
        WfBitmapSource => "WFBitMapS",
        WfBitmapTarget => "WFBitMapT",
        WfSyncUuid => "WFSyncUUID",
        SyncSource => "SyncSource",
        SyncTarget => "SyncTarget",
        PausedSyncSource => "PausedSyncS",
        PausedSyncTarget => "PausedSyncT",
        VerifySource => "VerifyS",
        VerifyTarget => "VerifyT",
        Ahead => "Ahead",
        Behind => "Behind",
        Unknown => "Unknown",
    }
}

labelled_enum! {
    /// Whether a volume is configured as a diskless client.
    ClientMode, "client mode" {
        Enabled => "yes",
        Disabled => "no",
        Unknown => "unknown",
    }
}

impl ReplicationState {
    /// States in which this node receives resync data and the event source
    /// reports a meaningful `done` percentage.
    #[must_use]
    pub fn is_resync_target(self) -> bool {
        matches!(
            self,
            Self::Off
                | Self::Behind
                | Self::StartingSyncTarget
                | Self::SyncTarget
                | Self::PausedSyncTarget
                | Self::VerifyTarget
        )
    }
}

fn parse_quorum(label: &str) -> Result<bool, EventError> {
    match label {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(EventError::malformed(format!("invalid quorum state '{other}'"))),
    }
}

/// Reads the mandatory `volume` property of a device or peer-device event.
pub fn volume_number(props: &PropsMap) -> Result<u16, EventError> {
    let text = props
        .get(PROP_KEY_VOLUME)
        .ok_or_else(|| EventError::malformed("missing volume number"))?;
    parse_unsigned(text)
        .ok_or_else(|| EventError::malformed(format!("invalid volume number '{text}'")))
}

/// Non-owning link from a peer volume to the connection that owns it.
///
/// `degraded` mirrors the connection's warn state as last published by the
/// connection; it suppresses alerts that only repeat a broken link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLink {
    connection: SmolStr,
    degraded: bool,
}

impl PeerLink {
    #[must_use]
    pub fn connection(&self) -> &SmolStr {
        &self.connection
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }
}

#[derive(Debug, Clone)]
pub struct Volume {
    number: u16,
    minor: i32,
    disk: DiskState,
    replication: ReplicationState,
    client: ClientMode,
    quorum_alert: bool,
    sync_perc: u16,
    disk_alert: bool,
    repl_warn: bool,
    repl_alert: bool,
    link: Option<PeerLink>,
    flags: StateFlags,
}

impl Volume {
    /// A volume of the local node.
    #[must_use]
    pub fn new(number: u16) -> Self {
        Self {
            number,
            minor: MINOR_UNKNOWN,
            disk: DiskState::Unknown,
            replication: ReplicationState::Unknown,
            client: ClientMode::Unknown,
            quorum_alert: false,
            sync_perc: MAX_SYNC_PERC,
            disk_alert: false,
            repl_warn: false,
            repl_alert: false,
            link: None,
            flags: StateFlags::new(),
        }
    }

    /// The peer's view of a volume, owned by the connection `connection`.
    #[must_use]
    pub fn new_peer(number: u16, connection: impl Into<SmolStr>) -> Self {
        let mut volume = Self::new(number);
        volume.link = Some(PeerLink {
            connection: connection.into(),
            degraded: false,
        });
        volume
    }

    /// Applies the properties present in `props`, leaving the others untouched.
    ///
    /// Every property is validated before any field changes, so a failed
    /// update leaves the volume as it was.
    pub fn update(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let disk = props
            .get(PROP_KEY_DISK)
            .or_else(|| props.get(PROP_KEY_PEER_DISK))
            .map(|label| DiskState::parse(label))
            .transpose()?;
        let replication = props
            .get(PROP_KEY_REPLICATION)
            .map(|label| ReplicationState::parse(label))
            .transpose()?;
        let minor = props
            .get(PROP_KEY_MINOR)
            .map(|text| {
                parse_unsigned::<i32>(text)
                    .ok_or_else(|| EventError::malformed(format!("invalid minor number '{text}'")))
            })
            .transpose()?;
        let client = props
            .get(PROP_KEY_CLIENT)
            .or_else(|| props.get(PROP_KEY_PEER_CLIENT))
            .map(|label| ClientMode::parse(label))
            .transpose()?;
        let quorum = props
            .get(PROP_KEY_QUORUM)
            .map(|label| parse_quorum(label))
            .transpose()?;

        // The event source commonly skips the final 100 % report.
        let replication_now = replication.unwrap_or(self.replication);
        let sync_perc = if replication_now == ReplicationState::Established {
            Some(MAX_SYNC_PERC)
        } else if replication_now.is_resync_target() {
            props
                .get(PROP_KEY_SYNC_PERC)
                .map(|text| {
                    parse_sync_perc(text).ok_or_else(|| {
                        EventError::malformed(format!("invalid sync percentage '{text}'"))
                    })
                })
                .transpose()?
        } else {
            None
        };

        if let Some(disk) = disk {
            self.disk = disk;
        }
        self.replication = replication_now;
        if let Some(minor) = minor {
            self.minor = minor;
        }
        if let Some(client) = client {
            self.client = client;
        }
        if let Some(quorum) = quorum {
            self.quorum_alert = !quorum;
        }
        if let Some(sync_perc) = sync_perc {
            self.sync_perc = sync_perc;
        }
        Ok(())
    }

    /// Records the owning connection's warn state. Returns whether it changed.
    pub fn set_link_degraded(&mut self, degraded: bool) -> bool {
        match self.link.as_mut() {
            Some(link) if link.degraded != degraded => {
                link.degraded = degraded;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn number(&self) -> u16 {
        self.number
    }

    #[must_use]
    pub fn minor(&self) -> i32 {
        self.minor
    }

    #[must_use]
    pub fn disk_state(&self) -> DiskState {
        self.disk
    }

    #[must_use]
    pub fn replication_state(&self) -> ReplicationState {
        self.replication
    }

    #[must_use]
    pub fn client_mode(&self) -> ClientMode {
        self.client
    }

    /// Sync progress in hundredths of a percent.
    #[must_use]
    pub fn sync_perc(&self) -> u16 {
        self.sync_perc
    }

    #[must_use]
    pub fn is_peer(&self) -> bool {
        self.link.is_some()
    }

    #[must_use]
    pub fn peer_link(&self) -> Option<&PeerLink> {
        self.link.as_ref()
    }

    #[must_use]
    pub fn has_quorum_alert(&self) -> bool {
        self.quorum_alert
    }

    #[must_use]
    pub fn has_disk_alert(&self) -> bool {
        self.disk_alert
    }

    #[must_use]
    pub fn has_replication_warning(&self) -> bool {
        self.repl_warn
    }

    #[must_use]
    pub fn has_replication_alert(&self) -> bool {
        self.repl_alert
    }

    fn link_degraded(&self) -> Option<bool> {
        self.link.as_ref().map(|link| link.degraded)
    }
}

impl StateFlagged for Volume {
    fn state_flags(&self) -> &StateFlags {
        &self.flags
    }

    fn update_state_flags(&mut self) -> FlagState {
        self.clear_state_flags();

        match self.disk {
            DiskState::UpToDate => {}
            DiskState::Diskless => {
                if self.client != ClientMode::Enabled {
                    self.disk_alert = true;
                }
            }
            // Peers behind a broken link report an unknown disk anyway.
            DiskState::Unknown => {
                if self.link_degraded() != Some(true) {
                    self.disk_alert = true;
                }
            }
            _ => self.disk_alert = true,
        }

        match self.replication {
            ReplicationState::Established => {}
            ReplicationState::PausedSyncSource
            | ReplicationState::PausedSyncTarget
            | ReplicationState::StartingSyncSource
            | ReplicationState::StartingSyncTarget
            | ReplicationState::SyncSource
            | ReplicationState::SyncTarget
            | ReplicationState::VerifySource
            | ReplicationState::VerifyTarget
            | ReplicationState::WfBitmapSource
            | ReplicationState::WfBitmapTarget
            | ReplicationState::WfSyncUuid => self.repl_warn = true,
            // Local volumes never carry a replication state.
            ReplicationState::Unknown | ReplicationState::Off => {
                if self.link_degraded() == Some(false) {
                    self.repl_alert = true;
                }
            }
            ReplicationState::Ahead | ReplicationState::Behind => self.repl_alert = true,
        }

        if self.repl_warn {
            self.flags.set_warn();
        }
        if self.disk_alert || self.repl_alert || self.quorum_alert {
            self.flags.set_alert();
        }
        self.flags.state()
    }

    fn child_state_flags_changed(&mut self) -> FlagState {
        FlagState::Norm
    }

    fn clear_state_flags(&mut self) {
        self.disk_alert = false;
        self.repl_warn = false;
        self.repl_alert = false;
        self.flags.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> PropsMap {
        pairs
            .iter()
            .map(|(key, value)| (SmolStr::new(key), SmolStr::new(value)))
            .collect()
    }

    #[test]
    fn local_volume_up_to_date_is_norm() {
        let mut volume = Volume::new(0);
        volume
            .update(&props(&[("disk", "UpToDate"), ("minor", "7")]))
            .expect("valid update");
        assert_eq!(volume.minor(), 7);
        assert_eq!(volume.update_state_flags(), FlagState::Norm);
        assert_eq!(volume.update_state_flags(), FlagState::Norm);
    }

    #[test]
    fn diskless_client_is_not_alerted() {
        let mut volume = Volume::new(1);
        volume
            .update(&props(&[("disk", "Diskless"), ("client", "yes")]))
            .expect("valid update");
        assert_eq!(volume.update_state_flags(), FlagState::Norm);

        volume
            .update(&props(&[("client", "no")]))
            .expect("valid update");
        assert_eq!(volume.update_state_flags(), FlagState::Alert);
        assert!(volume.has_disk_alert());
    }

    #[test]
    fn resync_states_warn_and_recover() {
        let mut volume = Volume::new_peer(0, "peerA");
        volume
            .update(&props(&[
                ("peer-disk", "UpToDate"),
                ("replication", "SyncTarget"),
                ("done", "45.07"),
            ]))
            .expect("valid update");
        assert_eq!(volume.sync_perc(), 4507);
        assert_eq!(volume.update_state_flags(), FlagState::Warn);
        assert!(volume.has_replication_warning());

        volume
            .update(&props(&[("replication", "Established"), ("done", "12.34")]))
            .expect("valid update");
        assert_eq!(volume.sync_perc(), MAX_SYNC_PERC);
        assert_eq!(volume.update_state_flags(), FlagState::Norm);
        assert!(!volume.has_replication_warning());
    }

    #[test]
    fn sync_source_ignores_done_field() {
        let mut volume = Volume::new_peer(0, "peerA");
        volume
            .update(&props(&[("replication", "SyncSource"), ("done", "10.00")]))
            .expect("valid update");
        assert_eq!(volume.sync_perc(), MAX_SYNC_PERC);
    }

    #[test]
    fn degraded_link_suppresses_peer_alerts() {
        let mut volume = Volume::new_peer(0, "peerA");
        volume
            .update(&props(&[("peer-disk", "DUnknown"), ("replication", "Off")]))
            .expect("valid update");
        assert_eq!(volume.update_state_flags(), FlagState::Alert);
        assert!(volume.has_disk_alert());
        assert!(volume.has_replication_alert());

        assert!(volume.set_link_degraded(true));
        assert!(!volume.set_link_degraded(true));
        assert_eq!(volume.update_state_flags(), FlagState::Norm);
    }

    #[test]
    fn local_replication_unknown_is_not_alerted() {
        let mut volume = Volume::new(0);
        volume
            .update(&props(&[("disk", "UpToDate"), ("replication", "Off")]))
            .expect("valid update");
        assert_eq!(volume.update_state_flags(), FlagState::Norm);
        assert!(!volume.set_link_degraded(true));
    }

    #[test]
    fn lost_quorum_forces_alert() {
        let mut volume = Volume::new(0);
        volume
            .update(&props(&[("disk", "UpToDate"), ("quorum", "no")]))
            .expect("valid update");
        assert!(volume.has_quorum_alert());
        assert_eq!(volume.update_state_flags(), FlagState::Alert);
        volume
            .update(&props(&[("quorum", "yes")]))
            .expect("valid update");
        assert_eq!(volume.update_state_flags(), FlagState::Norm);
    }

    #[test]
    fn malformed_labels_and_numbers_fail() {
        let mut volume = Volume::new(0);
        for (key, value) in [
            ("disk", "uptodate"),
            ("replication", "Syncing"),
            ("client", "maybe"),
            ("quorum", "lost"),
            ("minor", "-3"),
            ("minor", "4294967296"),
        ] {
            let err = volume
                .update(&props(&[(key, value)]))
                .expect_err("malformed property must fail");
            assert!(matches!(err, EventError::Malformed(_)), "{key}:{value}");
        }
        let err = volume
            .update(&props(&[("replication", "SyncTarget"), ("done", "7.5")]))
            .expect_err("malformed sync percentage");
        assert_eq!(
            err.to_string(),
            "malformed event: invalid sync percentage '7.5'"
        );
    }

    #[test]
    fn failed_update_changes_nothing() {
        let mut volume = Volume::new(0);
        volume
            .update(&props(&[("disk", "UpToDate")]))
            .expect("valid update");
        assert!(volume
            .update(&props(&[("disk", "Outdated"), ("replication", "Bogus")]))
            .is_err());
        assert_eq!(volume.disk_state(), DiskState::UpToDate);
        assert_eq!(volume.replication_state(), ReplicationState::Unknown);
    }

    #[test]
    fn volume_number_is_required_and_strict() {
        assert_eq!(volume_number(&props(&[("volume", "3")])), Ok(3));
        assert!(volume_number(&props(&[])).is_err());
        assert!(volume_number(&props(&[("volume", "65536")])).is_err());
    }
}
