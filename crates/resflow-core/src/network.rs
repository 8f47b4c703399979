//! The network registry: nodes (producers, consumers, storage, converters)
//! and the directed connections between them.
//!
//! Nodes and connections live in `SlotMap` arenas keyed by internal slots,
//! with caller ids mapped to slots through an index. Adjacency is a
//! `SecondaryMap` keyed by node slot, so cycles in the flow network are just
//! edges, never reference cycles. Every mutation validates structure first
//! and records itself in a [`DirtyTracker`] that the optimizer drains at the
//! start of each pass.

use crate::dirty::DirtyTracker;
use crate::error::{FlowError, NotFoundError, ValidationError};
use crate::fixed::{Fixed64, fixed64_to_f64};
use crate::id::*;
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::{BTreeSet, HashMap, VecDeque};

// ---------------------------------------------------------------------------
// Node types
// ---------------------------------------------------------------------------

/// Plain discriminant of a node's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Producer,
    Consumer,
    Storage,
    Converter,
}

/// Converter-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConverterSpec {
    /// Multiplier applied to outbound connection rates, in `[0, 1]`.
    pub efficiency: Fixed64,
    /// Recipes this converter can run.
    pub recipes: Vec<RecipeId>,
}

/// What a node does in the network, with role-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeRole {
    Producer,
    Consumer,
    Storage,
    Converter(ConverterSpec),
}

impl NodeRole {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRole::Producer => NodeKind::Producer,
            NodeRole::Consumer => NodeKind::Consumer,
            NodeRole::Storage => NodeKind::Storage,
            NodeRole::Converter(_) => NodeKind::Converter,
        }
    }
}

/// A participant in the flow network.
///
/// `capacity` is interpreted per role: production rate for producers,
/// requested rate for consumers, storage size for storage nodes, maximum
/// throughput for converters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    pub role: NodeRole,
    pub resource_types: BTreeSet<ResourceType>,
    /// Inactive nodes are skipped by the optimizer but stay queryable.
    pub active: bool,
    pub capacity: Fixed64,
    /// Higher values are served first under scarcity.
    pub priority: i32,
}

impl FlowNode {
    /// An active node with priority 0.
    pub fn new(
        id: NodeId,
        role: NodeRole,
        resource_types: impl IntoIterator<Item = ResourceType>,
        capacity: Fixed64,
    ) -> Self {
        Self {
            id,
            role,
            resource_types: resource_types.into_iter().collect(),
            active: true,
            capacity,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.role.kind()
    }

    pub fn handles(&self, resource: ResourceType) -> bool {
        self.resource_types.contains(&resource)
    }

    /// Converter efficiency, or 1 for every other role.
    pub fn efficiency(&self) -> Fixed64 {
        match &self.role {
            NodeRole::Converter(spec) => spec.efficiency,
            _ => Fixed64::ONE,
        }
    }
}

/// A directed flow of one resource type between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConnection {
    pub id: ConnectionId,
    pub source: NodeId,
    pub target: NodeId,
    pub resource_type: ResourceType,
    pub max_rate: Fixed64,
    /// Only the optimizer writes this; registration resets it to zero.
    current_rate: Fixed64,
}

impl FlowConnection {
    pub fn new(
        id: ConnectionId,
        source: NodeId,
        target: NodeId,
        resource_type: ResourceType,
        max_rate: Fixed64,
    ) -> Self {
        Self {
            id,
            source,
            target,
            resource_type,
            max_rate,
            current_rate: Fixed64::ZERO,
        }
    }

    pub fn current_rate(&self) -> Fixed64 {
        self.current_rate
    }
}

/// What was removed by [`NetworkRegistry::unregister_node`].
#[derive(Debug, Clone)]
pub struct RemovedNode {
    pub node: FlowNode,
    /// Connections cascaded away with the node, in id order.
    pub connections: Vec<FlowConnection>,
}

#[derive(Debug, Clone, Default)]
struct NodeAdjacency {
    /// Connections whose target is this node.
    inputs: Vec<ConnectionSlot>,
    /// Connections whose source is this node.
    outputs: Vec<ConnectionSlot>,
}

// ---------------------------------------------------------------------------
// NetworkRegistry
// ---------------------------------------------------------------------------

/// Owns every node and connection of the flow network.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    nodes: SlotMap<NodeSlot, FlowNode>,
    node_index: HashMap<NodeId, NodeSlot>,
    connections: SlotMap<ConnectionSlot, FlowConnection>,
    connection_index: HashMap<ConnectionId, ConnectionSlot>,
    adjacency: SecondaryMap<NodeSlot, NodeAdjacency>,

    /// Changes since the optimizer last drained them.
    changes: DirtyTracker,

    /// Cached feedback-tolerant topological order of node ids.
    order_cache: Vec<NodeId>,
    order_dirty: bool,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self {
            order_dirty: true,
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Add a node. Rejects duplicate ids, empty resource sets, negative
    /// capacity and converter efficiency outside `[0, 1]`.
    pub fn register_node(&mut self, node: FlowNode) -> Result<(), ValidationError> {
        if self.node_index.contains_key(&node.id) {
            return Err(ValidationError::DuplicateNode(node.id));
        }
        validate_node(&node)?;

        let id = node.id;
        self.changes.mark_resources(&node.resource_types);
        let slot = self.nodes.insert(node);
        self.node_index.insert(id, slot);
        self.adjacency.insert(slot, NodeAdjacency::default());
        self.order_dirty = true;
        Ok(())
    }

    /// Remove a node and every connection touching it. Absent ids are a no-op.
    pub fn unregister_node(&mut self, id: NodeId) -> Option<RemovedNode> {
        let slot = self.node_index.remove(&id)?;

        let connection_slots: Vec<ConnectionSlot> = self
            .adjacency
            .get(slot)
            .map(|adj| adj.inputs.iter().chain(adj.outputs.iter()).copied().collect())
            .unwrap_or_default();

        let mut connections: Vec<FlowConnection> = Vec::new();
        for conn_slot in connection_slots {
            // A self-loop appears in both lists; the second removal is a no-op.
            if let Some(conn) = self.remove_connection_slot(conn_slot) {
                connections.push(conn);
            }
        }
        connections.sort_by_key(|c| c.id);

        self.adjacency.remove(slot);
        let node = self.nodes.remove(slot)?;
        self.changes.mark_resources(&node.resource_types);
        self.order_dirty = true;
        Some(RemovedNode { node, connections })
    }

    /// Add a connection. Both endpoints must exist and handle the resource.
    pub fn register_connection(&mut self, connection: FlowConnection) -> Result<(), ValidationError> {
        if self.connection_index.contains_key(&connection.id) {
            return Err(ValidationError::DuplicateConnection(connection.id));
        }
        if connection.max_rate < Fixed64::ZERO {
            return Err(ValidationError::NegativeRate {
                connection: connection.id,
                max_rate: fixed64_to_f64(connection.max_rate),
            });
        }
        let mut slots = [NodeSlot::default(); 2];
        for (i, endpoint) in [connection.source, connection.target].into_iter().enumerate() {
            let slot = *self.node_index.get(&endpoint).ok_or(
                ValidationError::MissingEndpoint {
                    connection: connection.id,
                    node: endpoint,
                },
            )?;
            if !self.nodes[slot].handles(connection.resource_type) {
                return Err(ValidationError::UnsupportedResourceType {
                    connection: connection.id,
                    node: endpoint,
                    resource: connection.resource_type,
                });
            }
            slots[i] = slot;
        }

        let [source_slot, target_slot] = slots;
        let id = connection.id;
        let resource = connection.resource_type;
        let conn_slot = self.connections.insert(FlowConnection {
            current_rate: Fixed64::ZERO,
            ..connection
        });
        self.connection_index.insert(id, conn_slot);
        if let Some(adj) = self.adjacency.get_mut(source_slot) {
            adj.outputs.push(conn_slot);
        }
        if let Some(adj) = self.adjacency.get_mut(target_slot) {
            adj.inputs.push(conn_slot);
        }
        self.changes.mark_connection(id, resource);
        self.order_dirty = true;
        Ok(())
    }

    /// Remove a connection. Absent ids are a no-op.
    pub fn unregister_connection(&mut self, id: ConnectionId) -> Option<FlowConnection> {
        let slot = *self.connection_index.get(&id)?;
        self.remove_connection_slot(slot)
    }

    fn remove_connection_slot(&mut self, slot: ConnectionSlot) -> Option<FlowConnection> {
        let conn = self.connections.remove(slot)?;
        self.connection_index.remove(&conn.id);
        for endpoint in [conn.source, conn.target] {
            if let Some(&node_slot) = self.node_index.get(&endpoint)
                && let Some(adj) = self.adjacency.get_mut(node_slot)
            {
                adj.inputs.retain(|&s| s != slot);
                adj.outputs.retain(|&s| s != slot);
            }
        }
        self.changes
            .mark_connection_removed(conn.id, conn.resource_type);
        self.order_dirty = true;
        Some(conn)
    }

    // -----------------------------------------------------------------------
    // Node updates
    // -----------------------------------------------------------------------

    /// Apply `update` to a node and re-validate it. On validation failure the
    /// node is left untouched. Returns every resource type the node handled
    /// before or after the update.
    fn update_node(
        &mut self,
        id: NodeId,
        update: impl FnOnce(&mut FlowNode),
    ) -> Result<BTreeSet<ResourceType>, FlowError> {
        let slot = *self.node_index.get(&id).ok_or(NotFoundError::Node(id))?;
        let mut updated = self.nodes[slot].clone();
        update(&mut updated);
        validate_node(&updated)?;

        let mut affected = self.nodes[slot].resource_types.clone();
        affected.extend(updated.resource_types.iter().copied());
        self.changes.mark_resources(&affected);
        self.nodes[slot] = updated;
        Ok(affected)
    }

    pub fn set_node_active(
        &mut self,
        id: NodeId,
        active: bool,
    ) -> Result<BTreeSet<ResourceType>, FlowError> {
        self.update_node(id, |n| n.active = active)
    }

    pub fn set_node_capacity(
        &mut self,
        id: NodeId,
        capacity: Fixed64,
    ) -> Result<BTreeSet<ResourceType>, FlowError> {
        self.update_node(id, |n| n.capacity = capacity)
    }

    pub fn set_node_priority(
        &mut self,
        id: NodeId,
        priority: i32,
    ) -> Result<BTreeSet<ResourceType>, FlowError> {
        self.update_node(id, |n| n.priority = priority)
    }

    /// Replace the resource types a node handles. Connections are not
    /// cascaded; ones left dangling are reported by the next pass.
    pub fn set_node_resource_types(
        &mut self,
        id: NodeId,
        resource_types: BTreeSet<ResourceType>,
    ) -> Result<BTreeSet<ResourceType>, FlowError> {
        self.update_node(id, |n| n.resource_types = resource_types)
    }

    // -----------------------------------------------------------------------
    // Optimizer hooks
    // -----------------------------------------------------------------------

    /// Write an optimized rate. Clamped into `[0, max_rate]`.
    pub(crate) fn set_current_rate(&mut self, id: ConnectionId, rate: Fixed64) {
        if let Some(&slot) = self.connection_index.get(&id)
            && let Some(conn) = self.connections.get_mut(slot)
        {
            conn.current_rate = rate.max(Fixed64::ZERO).min(conn.max_rate.max(Fixed64::ZERO));
        }
    }

    /// Take the changes recorded since the last call.
    pub(crate) fn drain_changes(&mut self) -> DirtyTracker {
        std::mem::take(&mut self.changes)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_node(&self, id: NodeId) -> Option<&FlowNode> {
        self.node_index.get(&id).and_then(|&slot| self.nodes.get(slot))
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<&FlowConnection> {
        self.connection_index
            .get(&id)
            .and_then(|&slot| self.connections.get(slot))
    }

    /// All nodes in ascending id order.
    pub fn nodes(&self) -> Vec<&FlowNode> {
        let mut nodes: Vec<&FlowNode> = self.nodes.values().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// Nodes of one kind in ascending id order.
    pub fn nodes_by_kind(&self, kind: NodeKind) -> Vec<&FlowNode> {
        let mut nodes: Vec<&FlowNode> = self.nodes.values().filter(|n| n.kind() == kind).collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// All connections in ascending id order.
    pub fn connections(&self) -> Vec<&FlowConnection> {
        let mut conns: Vec<&FlowConnection> = self.connections.values().collect();
        conns.sort_by_key(|c| c.id);
        conns
    }

    /// Connections whose target is `node`.
    pub fn inbound(&self, node: NodeId) -> Vec<&FlowConnection> {
        self.adjacent(node, |adj| &adj.inputs)
    }

    /// Connections whose source is `node`.
    pub fn outbound(&self, node: NodeId) -> Vec<&FlowConnection> {
        self.adjacent(node, |adj| &adj.outputs)
    }

    fn adjacent(
        &self,
        node: NodeId,
        side: impl Fn(&NodeAdjacency) -> &Vec<ConnectionSlot>,
    ) -> Vec<&FlowConnection> {
        let Some(adj) = self
            .node_index
            .get(&node)
            .and_then(|&slot| self.adjacency.get(slot))
        else {
            return Vec::new();
        };
        let mut conns: Vec<&FlowConnection> = side(adj)
            .iter()
            .filter_map(|&slot| self.connections.get(slot))
            .collect();
        conns.sort_by_key(|c| c.id);
        conns
    }

    // -----------------------------------------------------------------------
    // Ordering (Kahn's algorithm, cycle tolerant)
    // -----------------------------------------------------------------------

    /// Node ids in topological order, tolerating cycles.
    ///
    /// Runs Kahn's algorithm seeded in id order. Nodes left over (they sit on
    /// cycles) are appended in id order. Cached until the next structural
    /// mutation.
    pub fn flow_order(&mut self) -> &[NodeId] {
        if self.order_dirty {
            self.order_cache = self.compute_flow_order();
            self.order_dirty = false;
        }
        &self.order_cache
    }

    fn compute_flow_order(&self) -> Vec<NodeId> {
        let mut in_degree: SecondaryMap<NodeSlot, usize> = SecondaryMap::new();
        for slot in self.nodes.keys() {
            in_degree.insert(slot, 0);
        }
        for conn in self.connections.values() {
            if let Some(&slot) = self.node_index.get(&conn.target)
                && let Some(deg) = in_degree.get_mut(slot)
            {
                *deg += 1;
            }
        }

        let mut seeds: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(slot, _)| in_degree.get(*slot).copied() == Some(0))
            .map(|(_, n)| n.id)
            .collect();
        seeds.sort();
        let mut queue: VecDeque<NodeId> = seeds.into();

        let mut order: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let mut targets: Vec<NodeId> = self.outbound(id).iter().map(|c| c.target).collect();
            targets.sort();
            for target in targets {
                if let Some(&slot) = self.node_index.get(&target)
                    && let Some(deg) = in_degree.get_mut(slot)
                {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(target);
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let placed: BTreeSet<NodeId> = order.iter().copied().collect();
            let mut cyclic: Vec<NodeId> = self
                .nodes
                .values()
                .map(|n| n.id)
                .filter(|id| !placed.contains(id))
                .collect();
            cyclic.sort();
            order.extend(cyclic);
        }
        order
    }
}

fn validate_node(node: &FlowNode) -> Result<(), ValidationError> {
    if node.resource_types.is_empty() {
        return Err(ValidationError::EmptyResourceTypes(node.id));
    }
    if node.capacity < Fixed64::ZERO {
        return Err(ValidationError::NegativeCapacity {
            node: node.id,
            capacity: fixed64_to_f64(node.capacity),
        });
    }
    if let NodeRole::Converter(spec) = &node.role
        && (spec.efficiency < Fixed64::ZERO || spec.efficiency > Fixed64::ONE)
    {
        return Err(ValidationError::InvalidEfficiency {
            node: node.id,
            efficiency: fixed64_to_f64(spec.efficiency),
        });
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
