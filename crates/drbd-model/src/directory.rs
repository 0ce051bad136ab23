//! Resource directory: ownership of all resources plus the problem index.
//!
//! Every mutating operation recomputes the status flags of the object it
//! touched and walks upwards only while the NORM boundary keeps moving. The
//! problem index changes only when a resource enters or leaves NORM.

use smol_str::SmolStr;

use crate::connection::{connection_name, Connection};
use crate::error::{EventError, ObjectKind};
use crate::event::PropsMap;
use crate::ordered_map::OrderedMap;
use crate::resource::{resource_name, Resource, PROP_KEY_NEW_NAME};
use crate::state_flags::{FlagState, StateFlagged};
use crate::volume::{volume_number, Volume};

/// Whether the state moved into or out of NORM.
fn crossed_norm(before: FlagState, after: FlagState) -> bool {
    before.is_norm() != after.is_norm()
}

#[derive(Debug, Default, Clone)]
pub struct ResourceDirectory {
    resources: OrderedMap<SmolStr, Resource>,
    problems: OrderedMap<SmolStr, ()>,
}

impl ResourceDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn resources(&self) -> &OrderedMap<SmolStr, Resource> {
        &self.resources
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// Names of the resources that are not NORM, in name order.
    #[must_use]
    pub fn problem_names(&self) -> &OrderedMap<SmolStr, ()> {
        &self.problems
    }

    /// Resources that are not NORM, in name order.
    pub fn problem_resources(&self) -> impl DoubleEndedIterator<Item = &Resource> + '_ {
        self.problems
            .keys()
            .filter_map(|name| self.resources.get(name))
    }

    #[must_use]
    pub fn is_problem(&self, name: &str) -> bool {
        self.problems.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Drops all resources, for example before a fresh state replay.
    pub fn clear(&mut self) {
        self.problems.clear();
        self.resources.clear();
    }

    pub fn create_resource(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        if self.resources.contains_key(name) {
            return Err(EventError::duplicate(ObjectKind::Resource, name.clone()));
        }
        let mut resource = Resource::new(name.clone());
        resource.update(props)?;
        let state = resource.update_state_flags();
        self.track_problem(name, FlagState::Norm, state);
        self.resources.insert(name.clone(), resource);
        Ok(())
    }

    pub fn update_resource(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let resource = self.resource_mut(name)?;
        let before = resource.state();
        resource.update(props)?;
        let after = resource.update_state_flags();
        self.track_problem(name, before, after);
        Ok(())
    }

    pub fn rename_resource(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let new_name = props
            .get(PROP_KEY_NEW_NAME)
            .ok_or_else(|| EventError::malformed("missing new resource name"))?;
        if name == new_name {
            return self.resource_mut(name).map(|_| ());
        }
        if self.resources.contains_key(new_name) {
            return Err(EventError::duplicate(ObjectKind::Resource, new_name.clone()));
        }
        let (_, mut resource) = self
            .resources
            .remove_entry(name)
            .ok_or_else(|| EventError::missing(ObjectKind::Resource, name.clone()))?;
        let was_problem = self.problems.remove(name).is_some();
        resource.rename(new_name.clone());
        self.resources.insert(new_name.clone(), resource);
        if was_problem {
            self.problems.insert(new_name.clone(), ());
        }
        Ok(())
    }

    pub fn destroy_resource(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        self.resources
            .remove(name)
            .ok_or_else(|| EventError::missing(ObjectKind::Resource, name.clone()))?;
        self.problems.remove(name);
        Ok(())
    }

    pub fn create_connection(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let conn_name = connection_name(props)?;
        let resource = self.resource_mut(name)?;
        if resource.connection(conn_name).is_some() {
            return Err(EventError::duplicate(
                ObjectKind::Connection,
                format!("{name}:{conn_name}"),
            ));
        }
        let mut connection = Connection::new(conn_name.clone());
        connection.update(props)?;
        let marked = !connection.update_state_flags().is_norm();
        resource.add_connection(connection);
        if marked {
            self.propagate_to_resource(name)?;
        }
        Ok(())
    }

    pub fn update_connection(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let conn_name = connection_name(props)?;
        let connection = self.connection_mut(name, conn_name)?;
        let before = connection.state();
        connection.update(props)?;
        let after = connection.update_state_flags();
        if crossed_norm(before, after) {
            self.propagate_to_resource(name)?;
        }
        Ok(())
    }

    pub fn destroy_connection(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let conn_name = connection_name(props)?;
        let connection = self
            .resource_mut(name)?
            .remove_connection(conn_name)
            .ok_or_else(|| {
                EventError::missing(ObjectKind::Connection, format!("{name}:{conn_name}"))
            })?;
        if connection.has_mark_state() {
            self.propagate_to_resource(name)?;
        }
        Ok(())
    }

    pub fn create_device(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let number = volume_number(props)?;
        let resource = self.resource_mut(name)?;
        if resource.volume(number).is_some() {
            return Err(EventError::duplicate(
                ObjectKind::Volume,
                format!("{name}/{number}"),
            ));
        }
        let mut volume = Volume::new(number);
        volume.update(props)?;
        volume.update_state_flags();
        resource.add_volume(volume);
        self.propagate_to_resource(name)
    }

    /// Local volumes always propagate: a quorum change can turn the resource
    /// from MARK into ALERT without the volume crossing NORM.
    pub fn update_device(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let number = volume_number(props)?;
        let volume = self
            .resource_mut(name)?
            .volume_mut(number)
            .ok_or_else(|| EventError::missing(ObjectKind::Volume, format!("{name}/{number}")))?;
        volume.update(props)?;
        volume.update_state_flags();
        self.propagate_to_resource(name)
    }

    pub fn destroy_device(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let number = volume_number(props)?;
        let volume = self
            .resource_mut(name)?
            .remove_volume(number)
            .ok_or_else(|| EventError::missing(ObjectKind::Volume, format!("{name}/{number}")))?;
        if volume.has_mark_state() {
            self.propagate_to_resource(name)?;
        }
        Ok(())
    }

    pub fn create_peer_device(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let conn_name = connection_name(props)?;
        let number = volume_number(props)?;
        let connection = self.connection_mut(name, conn_name)?;
        if connection.volume(number).is_some() {
            return Err(EventError::duplicate(
                ObjectKind::PeerVolume,
                format!("{name}:{conn_name}/{number}"),
            ));
        }
        let mut volume = Volume::new_peer(number, conn_name.clone());
        volume.update(props)?;
        connection.add_volume(volume);
        let marked = connection
            .volume(number)
            .is_some_and(|volume| volume.has_mark_state());
        if marked {
            self.propagate_to_connection(name, conn_name)?;
        }
        Ok(())
    }

    pub fn update_peer_device(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let conn_name = connection_name(props)?;
        let number = volume_number(props)?;
        let volume = self
            .connection_mut(name, conn_name)?
            .volume_mut(number)
            .ok_or_else(|| {
                EventError::missing(
                    ObjectKind::PeerVolume,
                    format!("{name}:{conn_name}/{number}"),
                )
            })?;
        let before = volume.state();
        volume.update(props)?;
        let after = volume.update_state_flags();
        if crossed_norm(before, after) {
            self.propagate_to_connection(name, conn_name)?;
        }
        Ok(())
    }

    pub fn destroy_peer_device(&mut self, props: &PropsMap) -> Result<(), EventError> {
        let name = resource_name(props)?;
        let conn_name = connection_name(props)?;
        let number = volume_number(props)?;
        let volume = self
            .connection_mut(name, conn_name)?
            .remove_volume(number)
            .ok_or_else(|| {
                EventError::missing(
                    ObjectKind::PeerVolume,
                    format!("{name}:{conn_name}/{number}"),
                )
            })?;
        if volume.has_mark_state() {
            self.propagate_to_connection(name, conn_name)?;
        }
        Ok(())
    }

    fn resource_mut(&mut self, name: &SmolStr) -> Result<&mut Resource, EventError> {
        self.resources
            .get_mut(name)
            .ok_or_else(|| EventError::missing(ObjectKind::Resource, name.clone()))
    }

    fn connection_mut(
        &mut self,
        name: &SmolStr,
        conn_name: &SmolStr,
    ) -> Result<&mut Connection, EventError> {
        self.resource_mut(name)?
            .connection_mut(conn_name)
            .ok_or_else(|| EventError::missing(ObjectKind::Connection, format!("{name}:{conn_name}")))
    }

    /// A peer volume crossed NORM: let the connection re-derive its mark
    /// and continue upwards only if the connection crossed as well.
    fn propagate_to_connection(
        &mut self,
        name: &SmolStr,
        conn_name: &SmolStr,
    ) -> Result<(), EventError> {
        let connection = self.connection_mut(name, conn_name)?;
        let before = connection.state();
        let after = connection.child_state_flags_changed();
        if crossed_norm(before, after) {
            self.propagate_to_resource(name)?;
        }
        Ok(())
    }

    fn propagate_to_resource(&mut self, name: &SmolStr) -> Result<(), EventError> {
        let resource = self.resource_mut(name)?;
        let before = resource.state();
        let after = resource.child_state_flags_changed();
        self.track_problem(name, before, after);
        Ok(())
    }

    fn track_problem(&mut self, name: &SmolStr, before: FlagState, after: FlagState) {
        if !crossed_norm(before, after) {
            return;
        }
        if after.is_norm() {
            self.problems.remove(name);
        } else {
            self.problems.insert(name.clone(), ());
        }
    }
}
