//! Conversion chain example: three recipes run back to back on one converter.
//!
//! Registers a recipe book (crush 5s, refine 10s, polish 5s), starts a chain
//! and drives it with a manual clock, printing the chain state at each step.
//! The estimated completion time is 20s after the start.
//!
//! Run with: `cargo run -p resflow-core --example conversion_chain`

use resflow_core::clock::ManualClock;
use resflow_core::config::EngineConfig;
use resflow_core::conversion::ChainStep;
use resflow_core::engine::FlowEngine;
use resflow_core::event::FlowEvent;
use resflow_core::fixed::Fixed64;
use resflow_core::id::*;
use resflow_core::network::{ConverterSpec, FlowNode, NodeRole};
use resflow_core::recipe::RecipeBookBuilder;
use resflow_core::state::ResourceState;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let ore = ResourceType(0);
    let dust = ResourceType(1);
    let ingot = ResourceType(2);
    let one = Fixed64::from_num(1);

    // --- Step 1: Recipes ---
    let mut builder = RecipeBookBuilder::new();
    let crush = builder.register("crush", vec![(ore, Fixed64::from_num(2))], vec![(dust, one)], 5_000);
    let refine = builder.register("refine", vec![(dust, one)], vec![(ingot, one)], 10_000);
    let polish = builder.register("polish", vec![], vec![(ingot, one)], 5_000);
    let recipes = builder.build()?;

    // --- Step 2: Engine with a manual clock and a Vec event sink ---
    let clock = ManualClock::new(0);
    let mut engine = FlowEngine::with_parts(
        EngineConfig::default(),
        recipes,
        Vec::<FlowEvent>::new(),
        clock.clone(),
    )?;
    engine.register_node(FlowNode::new(
        NodeId(1),
        NodeRole::Converter(ConverterSpec {
            efficiency: one,
            recipes: vec![crush, refine, polish],
        }),
        [ore, dust, ingot],
        Fixed64::from_num(10),
    ))?;
    for resource in [ore, dust, ingot] {
        engine.set_resource_state(
            resource,
            ResourceState::with_stock(resource, Fixed64::from_num(10), Fixed64::from_num(100)),
        )?;
    }

    // --- Step 3: Run the chain ---
    let steps = [crush, refine, polish]
        .into_iter()
        .map(|recipe| ChainStep {
            converter: NodeId(1),
            recipe,
        })
        .collect();
    let execution = engine.start_conversion_chain(ChainId(1), steps)?;

    for _ in 0..5 {
        clock.advance(5_000);
        engine.tick();
        if let Some(chain) = engine.get_chain_execution(execution) {
            println!(
                "t={:>6}ms step={} status={} (estimated end {}ms)",
                engine.now(),
                chain.current_step_index,
                chain.status.name(),
                chain.estimated_end_time
            );
        }
    }

    println!("ingots: {}", engine.get_resource_state(ingot).current);
    println!("events:");
    for event in engine.publisher() {
        println!("  {:?}", event.kind());
    }
    Ok(())
}
