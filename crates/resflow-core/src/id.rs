use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Arena slot for a node inside the network registry.
    pub struct NodeSlot;

    /// Arena slot for a connection inside the network registry.
    pub struct ConnectionSlot;

    /// Identifies a converter process. Generated by the conversion engine.
    pub struct ProcessId;

    /// Identifies a running (or finished) chain execution.
    pub struct ChainExecutionId;
}

/// Opaque resource type key. The engine only compares these for equality;
/// names and display metadata live outside the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ResourceType(pub u32);

/// Caller-supplied node identifier. Unique within a registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

/// Caller-supplied connection identifier. Unique within a registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ConnectionId(pub u64);

/// Identifies a recipe in the recipe book.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RecipeId(pub u32);

/// Caller label for a conversion chain definition. Several executions may
/// share the same chain id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ChainId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
