//! DRBD resources and their owned connections and local volumes.

use smol_str::SmolStr;

use crate::connection::Connection;
use crate::error::EventError;
use crate::event::PropsMap;
use crate::ordered_map::OrderedMap;
use crate::role::{Role, PROP_KEY_ROLE};
use crate::state_flags::{FlagState, StateFlagged, StateFlags};
use crate::volume::Volume;

pub const PROP_KEY_RES_NAME: &str = "name";
pub const PROP_KEY_NEW_NAME: &str = "new_name";

/// Reads the mandatory `name` property present on every object event.
pub fn resource_name(props: &PropsMap) -> Result<&SmolStr, EventError> {
    props
        .get(PROP_KEY_RES_NAME)
        .ok_or_else(|| EventError::malformed("missing resource name"))
}

#[derive(Debug, Clone)]
pub struct Resource {
    name: SmolStr,
    role: Role,
    role_alert: bool,
    quorum_alert: bool,
    connections: OrderedMap<SmolStr, Connection>,
    volumes: OrderedMap<u16, Volume>,
    flags: StateFlags,
}

impl Resource {
    #[must_use]
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            role: Role::Unknown,
            role_alert: false,
            quorum_alert: false,
            connections: OrderedMap::new(),
            volumes: OrderedMap::new(),
            flags: StateFlags::new(),
        }
    }

    pub fn update(&mut self, props: &PropsMap) -> Result<(), EventError> {
        if let Some(label) = props.get(PROP_KEY_ROLE) {
            self.role = Role::parse(label)?;
        }
        Ok(())
    }

    pub(crate) fn rename(&mut self, name: SmolStr) {
        self.name = name;
    }

    #[must_use]
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn has_role_alert(&self) -> bool {
        self.role_alert
    }

    #[must_use]
    pub fn has_quorum_alert(&self) -> bool {
        self.quorum_alert
    }

    #[must_use]
    pub fn connections(&self) -> &OrderedMap<SmolStr, Connection> {
        &self.connections
    }

    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&Connection> {
        self.connections.get(name)
    }

    pub fn connection_mut(&mut self, name: &str) -> Option<&mut Connection> {
        self.connections.get_mut(name)
    }

    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.insert(connection.name().clone(), connection);
    }

    pub fn remove_connection(&mut self, name: &str) -> Option<Connection> {
        self.connections.remove(name)
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

    pub fn add_volume(&mut self, volume: Volume) {
        self.volumes.insert(volume.number(), volume);
    }

    pub fn remove_volume(&mut self, number: u16) -> Option<Volume> {
        self.volumes.remove(&number)
    }
}

impl StateFlagged for Resource {
    fn state_flags(&self) -> &StateFlags {
        &self.flags
    }

    fn update_state_flags(&mut self) -> FlagState {
        self.role_alert = self.role == Role::Unknown;
        self.child_state_flags_changed()
    }

    /// Rebuilds the state from the resource's own alerts and its children.
    ///
    /// Local alerts come from the fine-grained flags, so a role or quorum
    /// alert survives while the mark is recomputed from the children.
    fn child_state_flags_changed(&mut self) -> FlagState {
        self.flags.clear();
        self.quorum_alert = self.volumes.values().any(Volume::has_quorum_alert);
        if self.role_alert || self.quorum_alert {
            self.flags.set_alert();
        }
        if self.volumes.values().any(|volume| volume.has_mark_state())
            || self
                .connections
                .values()
                .any(|connection| connection.has_mark_state())
        {
            self.flags.set_mark();
        }
        self.flags.state()
    }

    fn clear_state_flags(&mut self) {
        self.role_alert = false;
        self.quorum_alert = false;
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
    fn unknown_role_is_alert() {
        let mut resource = Resource::new("r0");
        assert_eq!(resource.update_state_flags(), FlagState::Alert);
        assert!(resource.has_role_alert());
        resource
            .update(&props(&[("role", "Primary")]))
            .expect("valid role");
        assert_eq!(resource.update_state_flags(), FlagState::Norm);
    }

    #[test]
    fn child_problem_marks_without_hiding_local_alert() {
        let mut resource = Resource::new("r0");
        let mut volume = Volume::new(0);
        volume
            .update(&props(&[("disk", "Inconsistent")]))
            .expect("valid update");
        volume.update_state_flags();
        resource.add_volume(volume);

        assert_eq!(resource.update_state_flags(), FlagState::Alert);
        assert!(resource.state_flags().is_marked());

        resource
            .update(&props(&[("role", "Secondary")]))
            .expect("valid role");
        assert_eq!(resource.update_state_flags(), FlagState::Mark);
        assert!(!resource.has_alert_state());
    }

    #[test]
    fn quorum_loss_on_a_volume_alerts_the_resource() {
        let mut resource = Resource::new("r0");
        resource
            .update(&props(&[("role", "Primary")]))
            .expect("valid role");
        let mut volume = Volume::new(0);
        volume
            .update(&props(&[("disk", "UpToDate"), ("quorum", "no")]))
            .expect("valid update");
        volume.update_state_flags();
        resource.add_volume(volume);
        assert_eq!(resource.update_state_flags(), FlagState::Alert);
        assert!(resource.has_quorum_alert());
        assert!(!resource.has_role_alert());
    }
}
