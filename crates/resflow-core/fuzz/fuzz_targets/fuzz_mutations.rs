#![no_main]
use arbitrary::Arbitrary;
use resflow_core::id::*;
use resflow_core::recipe::RecipeBookBuilder;
use resflow_core::test_utils::*;
use libfuzzer_sys::fuzz_target;

/// A structured engine operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    AddNode { role: u8, capacity: u8, priority: i8 },
    RemoveNode { index: u8 },
    Connect { from: u8, to: u8, max_rate: u8 },
    Disconnect { index: u8 },
    SetCapacity { index: u8, capacity: u8 },
    Toggle { index: u8 },
    StartProcess { index: u8 },
    CancelProcess { index: u8 },
    Optimize,
    Advance { dt: u16 },
}

/// Top-level fuzz input: a sequence of operations.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    ops: Vec<FuzzOp>,
}

fuzz_target!(|input: FuzzInput| {
    let mut builder = RecipeBookBuilder::new();
    let recipe = builder.register("press", vec![(minerals(), fixed(1.0))], vec![(alloy(), fixed(1.0))], 100);
    let Ok(recipes) = builder.build() else {
        return;
    };
    let (mut engine, _clock) = test_engine(config_with_batch(7), recipes);
    let mut node_ids: Vec<u64> = Vec::new();
    let mut conn_ids: Vec<u64> = Vec::new();
    let mut processes: Vec<ProcessId> = Vec::new();
    let mut next_id = 0u64;

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(200);

    for op in &input.ops[..max_ops] {
        match op {
            FuzzOp::AddNode { role, capacity, priority } => {
                let c = f64::from(*capacity);
                let node = match role % 4 {
                    0 => producer(next_id, minerals(), c),
                    1 => consumer(next_id, minerals(), c, i32::from(*priority)),
                    2 => storage(next_id, minerals(), c),
                    _ => converter(next_id, &[minerals(), alloy()], c, 0.75, vec![recipe]),
                };
                if engine.register_node(node).is_ok() {
                    node_ids.push(next_id);
                }
                next_id += 1;
            }
            FuzzOp::RemoveNode { index } => {
                if !node_ids.is_empty() {
                    let idx = (*index as usize) % node_ids.len();
                    engine.unregister_node(NodeId(node_ids.remove(idx)));
                }
            }
            FuzzOp::Connect { from, to, max_rate } => {
                if !node_ids.is_empty() {
                    let from = node_ids[(*from as usize) % node_ids.len()];
                    let to = node_ids[(*to as usize) % node_ids.len()];
                    let conn = connection(next_id, from, to, minerals(), f64::from(*max_rate));
                    if engine.register_connection(conn).is_ok() {
                        conn_ids.push(next_id);
                    }
                    next_id += 1;
                }
            }
            FuzzOp::Disconnect { index } => {
                if !conn_ids.is_empty() {
                    let idx = (*index as usize) % conn_ids.len();
                    engine.unregister_connection(ConnectionId(conn_ids.remove(idx)));
                }
            }
            FuzzOp::SetCapacity { index, capacity } => {
                if !node_ids.is_empty() {
                    let id = NodeId(node_ids[(*index as usize) % node_ids.len()]);
                    let _ = engine.set_node_capacity(id, fixed(f64::from(*capacity)));
                }
            }
            FuzzOp::Toggle { index } => {
                if !node_ids.is_empty() {
                    let id = NodeId(node_ids[(*index as usize) % node_ids.len()]);
                    let active = engine.get_node(id).is_some_and(|n| n.active);
                    let _ = engine.set_node_active(id, !active);
                }
            }
            FuzzOp::StartProcess { index } => {
                if !node_ids.is_empty() {
                    let id = NodeId(node_ids[(*index as usize) % node_ids.len()]);
                    if let Ok(process) = engine.start_conversion_process(id, recipe) {
                        processes.push(process);
                    }
                }
            }
            FuzzOp::CancelProcess { index } => {
                if !processes.is_empty() {
                    let idx = (*index as usize) % processes.len();
                    let _ = engine.cancel_conversion_process(processes[idx]);
                }
            }
            FuzzOp::Optimize => {
                engine.optimize_flows();
            }
            FuzzOp::Advance { dt } => {
                engine.advance(u64::from(*dt));
            }
        }
        engine.publisher_mut().clear();
    }

    for conn in engine.get_connections() {
        assert!(conn.current_rate() <= conn.max_rate);
    }
});
