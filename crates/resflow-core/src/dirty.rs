use crate::id::{ConnectionId, ResourceType};
use std::collections::BTreeSet;

/// Structural changes to the network since the last optimization pass.
///
/// The registry marks entries here on every mutation and hands the whole
/// tracker over through `NetworkRegistry::drain_changes` at the start of a
/// pass. The optimizer treats connections added or changed since the
/// previous pass as cold, and zeroes the rates of touched resource types
/// that no longer have a handler.
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    dirty_connections: BTreeSet<ConnectionId>,
    dirty_resources: BTreeSet<ResourceType>,
}

impl DirtyTracker {
    /// Create a new tracker with nothing dirty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark resource types whose handlers changed.
    pub fn mark_resources<'a>(&mut self, resources: impl IntoIterator<Item = &'a ResourceType>) {
        self.dirty_resources.extend(resources.into_iter().copied());
    }

    /// Mark a connection as added or changed.
    pub fn mark_connection(&mut self, connection: ConnectionId, resource: ResourceType) {
        self.dirty_connections.insert(connection);
        self.dirty_resources.insert(resource);
    }

    /// Mark a connection as removed.
    pub fn mark_connection_removed(&mut self, connection: ConnectionId, resource: ResourceType) {
        self.dirty_connections.remove(&connection);
        self.dirty_resources.insert(resource);
    }

    pub fn is_connection_dirty(&self, connection: ConnectionId) -> bool {
        self.dirty_connections.contains(&connection)
    }

    /// Resource types touched by any change.
    pub fn dirty_resources(&self) -> &BTreeSet<ResourceType> {
        &self.dirty_resources
    }
}
