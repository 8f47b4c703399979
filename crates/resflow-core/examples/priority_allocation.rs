//! Priority allocation example: one producer, two competing consumers.
//!
//! A producer offers 20 minerals per second to a high-priority consumer
//! wanting 12 and a low-priority consumer wanting 18. The optimizer serves
//! the high-priority consumer in full and gives the rest to the other. The
//! second pass raises the producer's capacity and the bottleneck clears.
//!
//! Run with: `RUST_LOG=debug cargo run -p resflow-core --example priority_allocation`

use resflow_core::config::EngineConfig;
use resflow_core::engine::FlowEngine;
use resflow_core::fixed::Fixed64;
use resflow_core::id::*;
use resflow_core::network::{FlowConnection, FlowNode, NodeRole};
use resflow_core::optimizer::OptimizationResult;

fn print_pass(label: &str, engine: &FlowEngine, result: &OptimizationResult) {
    println!("--- {label} ---");
    for conn in engine.get_connections() {
        println!(
            "  {} ({} -> {}): {} / {}",
            conn.id,
            conn.source,
            conn.target,
            conn.current_rate(),
            conn.max_rate
        );
    }
    for b in &result.bottlenecks {
        println!(
            "  bottleneck on {:?}: available {}, demanded {}",
            b.resource_type, b.availability, b.demand
        );
    }
    for u in &result.underutilized {
        println!("  underutilized {:?}: available {}", u.resource_type, u.availability);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let minerals = ResourceType(0);
    let mut engine = FlowEngine::new(EngineConfig::default())?;

    // --- Step 1: Nodes ---
    engine.register_node(FlowNode::new(
        NodeId(1),
        NodeRole::Producer,
        [minerals],
        Fixed64::from_num(20),
    ))?;
    engine.register_node(
        FlowNode::new(NodeId(2), NodeRole::Consumer, [minerals], Fixed64::from_num(12))
            .with_priority(2),
    )?;
    engine.register_node(
        FlowNode::new(NodeId(3), NodeRole::Consumer, [minerals], Fixed64::from_num(18))
            .with_priority(1),
    )?;

    // --- Step 2: Connections ---
    for (id, target) in [(10, 2), (11, 3)] {
        engine.register_connection(FlowConnection::new(
            ConnectionId(id),
            NodeId(1),
            NodeId(target),
            minerals,
            Fixed64::from_num(30),
        ))?;
    }

    // --- Step 3: Optimize ---
    let result = engine.optimize_flows();
    print_pass("scarce supply", &engine, &result);

    // --- Step 4: Raise supply and re-optimize ---
    engine.set_node_capacity(NodeId(1), Fixed64::from_num(100))?;
    let result = engine.optimize_flows();
    print_pass("ample supply", &engine, &result);

    Ok(())
}
