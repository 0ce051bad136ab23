//! Replication links to peer nodes.

use std::fmt;

use smol_str::SmolStr;

use crate::error::EventError;
use crate::event::PropsMap;
use crate::numparse::parse_unsigned;
use crate::ordered_map::OrderedMap;
use crate::role::{Role, PROP_KEY_ROLE};
use crate::state_flags::{FlagState, StateFlagged, StateFlags};
use crate::volume::Volume;

pub const PROP_KEY_CONNECTION: &str = "connection";
pub const PROP_KEY_CONN_NAME: &str = "conn-name";
pub const PROP_KEY_PEER_NODE_ID: &str = "peer-node-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    StandAlone,
    Disconnecting,
    Unconnected,
    Timeout,
    BrokenPipe,
    NetworkFailure,
    ProtocolError,
    Connecting,
    TearDown,
    Connected,
    Unknown,
}

impl ConnectionState {
    pub fn parse(label: &str) -> Result<Self, EventError> {
        let state = match label {
            "StandAlone" => Self::StandAlone,
            "Disconnecting" => Self::Disconnecting,
            "Unconnected" => Self::Unconnected,
            "Timeout" => Self::Timeout,
            "BrokenPipe" => Self::BrokenPipe,
            "NetworkFailure" => Self::NetworkFailure,
            "ProtocolError" => Self::ProtocolError,
            "Connecting" => Self::Connecting,
            "TearDown" => Self::TearDown,
            "Connected" => Self::Connected,
            "Unknown" => Self::Unknown,
            other => {
                return Err(EventError::malformed(format!(
                    "invalid connection state '{other}'"
                )))
            }
        };
        Ok(state)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::StandAlone => "StandAlone",
            Self::Disconnecting => "Disconnecting",
            Self::Unconnected => "Unconnected",
            Self::Timeout => "Timeout",
            Self::BrokenPipe => "BrokenPipe",
            Self::NetworkFailure => "NetworkFailure",
            Self::ProtocolError => "ProtocolError",
            Self::Connecting => "Connecting",
            Self::TearDown => "TearDown",
            Self::Connected => "Connected",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Reads the mandatory `conn-name` property of connection and peer-device events.
pub fn connection_name(props: &PropsMap) -> Result<&SmolStr, EventError> {
    props
        .get(PROP_KEY_CONN_NAME)
        .ok_or_else(|| EventError::malformed("missing connection name"))
}

#[derive(Debug, Clone)]
pub struct Connection {
    name: SmolStr,
    node_id: Option<u8>,
    state: ConnectionState,
    role: Role,
    conn_alert: bool,
    role_alert: bool,
    volumes: OrderedMap<u16, Volume>,
    flags: StateFlags,
}

impl Connection {
    #[must_use]
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            node_id: None,
            state: ConnectionState::Unknown,
            role: Role::Unknown,
            conn_alert: false,
            role_alert: false,
            volumes: OrderedMap::new(),
            flags: StateFlags::new(),
        }
    }

    /// Applies the properties present in `props`; nothing changes on error.
    pub fn update(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let state = props
            .get(PROP_KEY_CONNECTION)
            .map(|label| ConnectionState::parse(label))
            .transpose()?;
        let role = props
            .get(PROP_KEY_ROLE)
            .map(|label| Role::parse(label))
            .transpose()?;
        let node_id = props
            .get(PROP_KEY_PEER_NODE_ID)
            .map(|text| {
                parse_unsigned::<u8>(text)
                    .ok_or_else(|| EventError::malformed(format!("invalid peer node id '{text}'")))
            })
            .transpose()?;

        if let Some(state) = state {
            self.state = state;
        }
        if let Some(role) = role {
            self.role = role;
        }
        if node_id.is_some() {
            self.node_id = node_id;
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    #[must_use]
    pub fn node_id(&self) -> Option<u8> {
        self.node_id
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn has_connection_alert(&self) -> bool {
        self.conn_alert
    }

    #[must_use]
    pub fn has_role_alert(&self) -> bool {
        self.role_alert
    }

    #[must_use]
    pub fn volumes(&self) -> &OrderedMap<u16, Volume> {
        &self.volumes
    }

    #[must_use]
    pub fn volume(&self, number: u16) -> Option<&Volume> {
        self.volumes.get(&number)
    }

    pub fn volume_mut(&mut self, number: u16) -> Option<&mut Volume> {
        self.volumes.get_mut(&number)
    }

    /// Adopts a peer volume, binding its link to this connection's state.
    pub fn add_volume(&mut self, mut volume: Volume) {
        volume.set_link_degraded(self.has_warn_state());
        volume.update_state_flags();
        self.volumes.insert(volume.number(), volume);
    }

    pub fn remove_volume(&mut self, number: u16) -> Option<Volume> {
        self.volumes.remove(&number)
    }

    /// Pushes this connection's warn state into its peer volumes and
    /// re-evaluates the ones whose link status changed.
    fn publish_link_state(&mut self) {
        let degraded = self.has_warn_state();
        self.volumes.for_each_mut(|_, volume| {
            if volume.set_link_degraded(degraded) {
                volume.update_state_flags();
            }
        });
    }
}

impl StateFlagged for Connection {
    fn state_flags(&self) -> &StateFlags {
        &self.flags
    }

    fn update_state_flags(&mut self) -> FlagState {
        self.clear_state_flags();

        if self.state != ConnectionState::Connected {
            self.conn_alert = true;
            self.flags.set_alert();
        }
        // A lost link also loses the peer role; only report the role when
        // it is the actual problem.
        if self.role == Role::Unknown {
            if !self.conn_alert {
                self.role_alert = true;
            }
            self.flags.set_alert();
        }

        self.publish_link_state();
        self.child_state_flags_changed()
    }

    fn child_state_flags_changed(&mut self) -> FlagState {
        if !self.conn_alert && !self.role_alert {
            self.flags.clear();
            if self.volumes.values().any(|volume| volume.has_mark_state()) {
                self.flags.set_mark();
            }
        }
        self.flags.state()
    }

    fn clear_state_flags(&mut self) {
        self.conn_alert = false;
        self.role_alert = false;
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

    fn healthy(name: &str) -> Connection {
        let mut conn = Connection::new(name);
        conn.update(&props(&[
            ("connection", "Connected"),
            ("role", "Secondary"),
            ("peer-node-id", "1"),
        ]))
        .expect("valid update");
        conn
    }

    #[test]
    fn connected_peer_is_norm() {
        let mut conn = healthy("peerA");
        assert_eq!(conn.node_id(), Some(1));
        assert_eq!(conn.update_state_flags(), FlagState::Norm);
        assert_eq!(conn.update_state_flags(), FlagState::Norm);
    }

    #[test]
    fn unknown_role_alert_only_without_connection_alert() {
        let mut conn = Connection::new("peerA");
        conn.update(&props(&[("connection", "Connecting"), ("role", "Unknown")]))
            .expect("valid update");
        assert_eq!(conn.update_state_flags(), FlagState::Alert);
        assert!(conn.has_connection_alert());
        assert!(!conn.has_role_alert());

        conn.update(&props(&[("connection", "Connected")]))
            .expect("valid update");
        assert_eq!(conn.update_state_flags(), FlagState::Alert);
        assert!(!conn.has_connection_alert());
        assert!(conn.has_role_alert());
    }

    #[test]
    fn problem_peer_volume_marks_connection() {
        let mut conn = healthy("peerA");
        conn.update_state_flags();
        let mut volume = Volume::new_peer(0, "peerA");
        volume
            .update(&props(&[("peer-disk", "Outdated"), ("replication", "Established")]))
            .expect("valid update");
        conn.add_volume(volume);
        assert_eq!(conn.child_state_flags_changed(), FlagState::Mark);
        assert!(conn.has_mark_state());
        assert!(!conn.has_warn_state());
    }

    #[test]
    fn broken_link_is_published_to_peer_volumes() {
        let mut conn = healthy("peerA");
        conn.update_state_flags();
        let mut volume = Volume::new_peer(0, "peerA");
        volume
            .update(&props(&[("peer-disk", "DUnknown"), ("replication", "Off")]))
            .expect("valid update");
        conn.add_volume(volume);
        let peer = conn.volume(0).expect("peer volume");
        assert_eq!(peer.state(), FlagState::Alert);

        conn.update(&props(&[("connection", "NetworkFailure")]))
            .expect("valid update");
        assert_eq!(conn.update_state_flags(), FlagState::Alert);
        let peer = conn.volume(0).expect("peer volume");
        assert_eq!(peer.state(), FlagState::Norm);
        assert!(peer.peer_link().expect("peer link").is_degraded());
    }

    #[test]
    fn bad_labels_fail() {
        let mut conn = Connection::new("peerA");
        assert!(conn.update(&props(&[("connection", "connected")])).is_err());
        assert!(conn.update(&props(&[("role", "Leader")])).is_err());
        assert!(conn.update(&props(&[("peer-node-id", "256")])).is_err());
        assert_eq!(conn.connection_state(), ConnectionState::Unknown);
    }
}
