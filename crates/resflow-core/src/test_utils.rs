//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::clock::ManualClock;
use crate::config::{BatchSizes, EngineConfig};
use crate::engine::FlowEngine;
use crate::event::FlowEvent;
use crate::fixed::Fixed64;
use crate::id::*;
use crate::network::{ConverterSpec, FlowConnection, FlowNode, NodeRole};
use crate::recipe::RecipeBook;
use crate::state::ResourceState;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

// ===========================================================================
// Resource types
// ===========================================================================

pub fn minerals() -> ResourceType {
    ResourceType(0)
}
pub fn energy() -> ResourceType {
    ResourceType(1)
}
pub fn alloy() -> ResourceType {
    ResourceType(2)
}

// ===========================================================================
// Node and connection constructors
// ===========================================================================

pub fn producer(id: u64, resource: ResourceType, rate: f64) -> FlowNode {
    FlowNode::new(NodeId(id), NodeRole::Producer, [resource], fixed(rate))
}

pub fn consumer(id: u64, resource: ResourceType, demand: f64, priority: i32) -> FlowNode {
    FlowNode::new(NodeId(id), NodeRole::Consumer, [resource], fixed(demand)).with_priority(priority)
}

pub fn storage(id: u64, resource: ResourceType, size: f64) -> FlowNode {
    FlowNode::new(NodeId(id), NodeRole::Storage, [resource], fixed(size))
}

pub fn converter(
    id: u64,
    resources: &[ResourceType],
    throughput: f64,
    efficiency: f64,
    recipes: Vec<RecipeId>,
) -> FlowNode {
    FlowNode::new(
        NodeId(id),
        NodeRole::Converter(ConverterSpec {
            efficiency: fixed(efficiency),
            recipes,
        }),
        resources.iter().copied(),
        fixed(throughput),
    )
}

pub fn connection(id: u64, source: u64, target: u64, resource: ResourceType, max_rate: f64) -> FlowConnection {
    FlowConnection::new(
        ConnectionId(id),
        NodeId(source),
        NodeId(target),
        resource,
        fixed(max_rate),
    )
}

// ===========================================================================
// Engine builders
// ===========================================================================

/// An engine recording events into a `Vec`, driven by a manual clock at 0.
pub fn test_engine(config: EngineConfig, recipes: RecipeBook) -> (FlowEngine<Vec<FlowEvent>>, ManualClock) {
    let clock = ManualClock::new(0);
    let engine = FlowEngine::with_parts(config, recipes, Vec::new(), clock.clone())
        .expect("test config must be valid");
    (engine, clock)
}

/// [`test_engine`] with default config and no recipes.
pub fn default_engine() -> (FlowEngine<Vec<FlowEvent>>, ManualClock) {
    test_engine(EngineConfig::default(), RecipeBook::default())
}

/// Config with every phase using `batch_size`.
pub fn config_with_batch(batch_size: usize) -> EngineConfig {
    EngineConfig {
        batch_sizes: BatchSizes::uniform(batch_size),
        ..EngineConfig::default()
    }
}

/// Give `resource` a stock of `current` out of `max`.
pub fn seed_stock<P: crate::event::EventPublisher>(
    engine: &mut FlowEngine<P>,
    resource: ResourceType,
    current: f64,
    max: f64,
) {
    engine
        .set_resource_state(
            resource,
            ResourceState::with_stock(resource, fixed(current), fixed(max)),
        )
        .expect("stock must be non-negative");
}

/// A network of `pairs` producer/consumer pairs on minerals. Producer `i`
/// feeds consumer `i` and consumer `i + 1`, and priorities cycle through 0..3,
/// so the network is under-supplied and every allocation rule is exercised.
pub fn build_ring_network<P: crate::event::EventPublisher>(engine: &mut FlowEngine<P>, pairs: u64) {
    let r = minerals();
    for i in 0..pairs {
        engine
            .register_node(producer(i, r, 3.0 + (i % 5) as f64))
            .expect("unique producer id");
        engine
            .register_node(consumer(pairs + i, r, 4.0 + (i % 7) as f64, (i % 3) as i32))
            .expect("unique consumer id");
    }
    for i in 0..pairs {
        engine
            .register_connection(connection(2 * i, i, pairs + i, r, 6.0))
            .expect("valid connection");
        engine
            .register_connection(connection(2 * i + 1, i, pairs + (i + 1) % pairs, r, 2.5))
            .expect("valid connection");
    }
}
