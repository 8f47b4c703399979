//! Error taxonomy for the flow engine.
//!
//! Structural and control-plane failures are returned to the caller. Per-item
//! failures inside an optimization pass never surface here; they are recorded
//! as [`crate::optimizer::PassDiagnostic`] values on the pass result.

use crate::id::{ChainExecutionId, ConnectionId, NodeId, ProcessId, RecipeId, ResourceType};

/// Malformed input at a registration or write site.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(NodeId),
    #[error("duplicate connection id: {0}")]
    DuplicateConnection(ConnectionId),
    #[error("node {0} handles no resource types")]
    EmptyResourceTypes(NodeId),
    #[error("node {node} has negative capacity {capacity}")]
    NegativeCapacity { node: NodeId, capacity: f64 },
    #[error("converter {node} has efficiency {efficiency} outside [0, 1]")]
    InvalidEfficiency { node: NodeId, efficiency: f64 },
    #[error("connection {connection} references missing endpoint {node}")]
    MissingEndpoint {
        connection: ConnectionId,
        node: NodeId,
    },
    #[error("endpoint {node} of connection {connection} does not handle {resource:?}")]
    UnsupportedResourceType {
        connection: ConnectionId,
        node: NodeId,
        resource: ResourceType,
    },
    #[error("connection {connection} has negative max rate {max_rate}")]
    NegativeRate {
        connection: ConnectionId,
        max_rate: f64,
    },
    #[error("negative {field} for {resource:?}: {value}")]
    NegativeResourceValue {
        resource: ResourceType,
        field: &'static str,
        value: f64,
    },
    #[error("chain has no steps")]
    EmptyChain,
    #[error("unknown recipe {0:?}")]
    UnknownRecipe(RecipeId),
    #[error("converter {converter} rejects recipe {recipe:?}: {reason}")]
    RecipeRejected {
        converter: NodeId,
        recipe: RecipeId,
        reason: &'static str,
    },
    #[error("insufficient {resource:?} for recipe {recipe:?}: need {needed}, have {available}")]
    InsufficientResources {
        recipe: RecipeId,
        resource: ResourceType,
        needed: f64,
        available: f64,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// An operation referenced an id the engine does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("node not found: {0}")]
    Node(NodeId),
    #[error("connection not found: {0}")]
    Connection(ConnectionId),
    #[error("process not found: {0:?}")]
    Process(ProcessId),
    #[error("chain execution not found: {0:?}")]
    ChainExecution(ChainExecutionId),
}

/// A control operation was attempted from a state that does not allow it.
/// No state is mutated when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {action} {entity} in state {from}")]
pub struct IllegalStateTransition {
    pub entity: &'static str,
    pub action: &'static str,
    pub from: &'static str,
}

/// Top-level error for control-plane operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    IllegalTransition(#[from] IllegalStateTransition),
}
