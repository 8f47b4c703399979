//! Property-based tests for the resflow core engine.
//!
//! Uses proptest to generate random networks and mutation sequences,
//! then verify the allocation invariants hold.

use resflow_core::config::EngineConfig;
use resflow_core::engine::FlowEngine;
use resflow_core::event::FlowEvent;
use resflow_core::fixed::Fixed64;
use resflow_core::history::{HistoryFilter, TransferRecord};
use resflow_core::id::*;
use resflow_core::network::NodeKind;
use resflow_core::recipe::RecipeBook;
use resflow_core::state::ResourceState;
use resflow_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
struct NodeSpec {
    role: u8,
    capacity: u32,
    priority: i32,
}

#[derive(Debug, Clone)]
struct NetworkSpec {
    nodes: Vec<NodeSpec>,
    links: Vec<(usize, usize, u32)>,
    stock: u32,
}

/// Random network of up to `max_nodes` nodes on minerals, with arbitrary
/// links between them.
fn arb_network(max_nodes: usize) -> impl Strategy<Value = NetworkSpec> {
    (1..=max_nodes).prop_flat_map(|n| {
        let nodes = proptest::collection::vec(
            (0..4u8, 0..50u32, 0..4i32).prop_map(|(role, capacity, priority)| NodeSpec {
                role,
                capacity,
                priority,
            }),
            n,
        );
        let links = proptest::collection::vec((0..n, 0..n, 0..30u32), 0..=n * 2);
        (nodes, links, 0..40u32).prop_map(|(nodes, links, stock)| NetworkSpec {
            nodes,
            links,
            stock,
        })
    })
}

fn build(spec: &NetworkSpec, config: EngineConfig) -> FlowEngine<Vec<FlowEvent>> {
    let (mut engine, _clock) = test_engine(config, RecipeBook::default());
    let r = minerals();
    seed_stock(&mut engine, r, f64::from(spec.stock), 100.0);
    for (i, node) in spec.nodes.iter().enumerate() {
        let id = i as u64;
        let capacity = f64::from(node.capacity);
        let flow_node = match node.role {
            0 => producer(id, r, capacity),
            1 => consumer(id, r, capacity, node.priority),
            2 => storage(id, r, capacity),
            _ => converter(id, &[r], capacity, 0.5, vec![]),
        };
        engine.register_node(flow_node).unwrap();
    }
    for (i, &(from, to, max)) in spec.links.iter().enumerate() {
        engine
            .register_connection(connection(i as u64, from as u64, to as u64, r, f64::from(max)))
            .unwrap();
    }
    engine
}

#[derive(Debug, Clone)]
enum MutOp {
    AddProducer(u32),
    AddConsumer(u32, i32),
    RemoveNode(usize),
    Connect(usize, usize, u32),
    Disconnect(usize),
    SetCapacity(usize, u32),
    Toggle(usize),
    Optimize,
}

fn arb_mutation_sequence(max_ops: usize) -> impl Strategy<Value = Vec<MutOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0..40u32).prop_map(MutOp::AddProducer),
            (0..40u32, 0..3i32).prop_map(|(c, p)| MutOp::AddConsumer(c, p)),
            (0..50usize).prop_map(MutOp::RemoveNode),
            (0..50usize, 0..50usize, 0..20u32).prop_map(|(a, b, m)| MutOp::Connect(a, b, m)),
            (0..50usize).prop_map(MutOp::Disconnect),
            (0..50usize, 0..40u32).prop_map(|(i, c)| MutOp::SetCapacity(i, c)),
            (0..50usize).prop_map(MutOp::Toggle),
            Just(MutOp::Optimize),
        ],
        1..=max_ops,
    )
}

fn assert_rates_bounded(engine: &FlowEngine<Vec<FlowEvent>>) -> Result<(), TestCaseError> {
    for conn in engine.get_connections() {
        prop_assert!(conn.current_rate() >= Fixed64::ZERO);
        prop_assert!(
            conn.current_rate() <= conn.max_rate,
            "connection {} runs at {} over its max {}",
            conn.id,
            conn.current_rate(),
            conn.max_rate
        );
    }
    Ok(())
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every assigned rate lies in [0, max_rate].
    #[test]
    fn rates_within_bounds(spec in arb_network(40)) {
        let mut engine = build(&spec, EngineConfig::default());
        engine.optimize_flows();
        assert_rates_bounded(&engine)?;
    }

    /// Batch size is a performance knob only.
    #[test]
    fn batch_size_invariance(spec in arb_network(40)) {
        let all = spec.nodes.len().max(spec.links.len()).max(1);
        let mut reference = build(&spec, config_with_batch(all));
        let expected = reference.optimize_flows();
        for batch in [1, 10] {
            let mut engine = build(&spec, config_with_batch(batch));
            let actual = engine.optimize_flows();
            prop_assert_eq!(&actual, &expected, "batch size {} diverged", batch);
            prop_assert_eq!(engine.get_connections(), reference.get_connections());
        }
    }

    /// Under a bottleneck, consumers never receive more than is available.
    #[test]
    fn scarce_allocation_never_exceeds_availability(spec in arb_network(40)) {
        let mut engine = build(&spec, EngineConfig::default());
        let result = engine.optimize_flows();
        for balance in &result.bottlenecks {
            let delivered = engine
                .get_connections()
                .iter()
                .filter(|c| c.resource_type == balance.resource_type)
                .filter(|c| {
                    engine
                        .get_node(c.target)
                        .is_some_and(|n| n.kind() == NodeKind::Consumer)
                })
                .fold(Fixed64::ZERO, |acc, c| acc + c.current_rate());
            prop_assert!(
                delivered <= balance.availability,
                "delivered {} exceeds availability {}",
                delivered,
                balance.availability
            );
        }
    }

    /// The ledger never holds more than its configured maximum.
    #[test]
    fn history_is_bounded(max in 1..50usize, count in 0..200u64) {
        let config = EngineConfig { history_max_size: max, ..EngineConfig::default() };
        let (mut engine, _clock) = test_engine(config, RecipeBook::default());
        for t in 0..count {
            engine.record_transfer(TransferRecord {
                timestamp: t,
                source: NodeId(0),
                target: NodeId(1),
                resource_type: minerals(),
                amount: fixed(1.0),
            });
        }
        let kept = engine.query_history(&HistoryFilter::default());
        prop_assert_eq!(kept.len(), (count as usize).min(max));
        if let Some(last) = kept.last() {
            prop_assert_eq!(last.timestamp, count - 1);
        }
    }

    /// Writing one resource type never disturbs another's cached state.
    #[test]
    fn cache_isolation(a in 0..100u32, b in 0..100u32, write in 0..100u32) {
        let (mut engine, _clock) = default_engine();
        seed_stock(&mut engine, minerals(), f64::from(a), 100.0);
        seed_stock(&mut engine, energy(), f64::from(b), 100.0);
        let before = engine.get_resource_state(energy());

        engine
            .set_resource_state(
                minerals(),
                ResourceState::with_stock(minerals(), fixed(f64::from(write)), fixed(100.0)),
            )
            .unwrap();

        prop_assert_eq!(engine.get_resource_state(minerals()).current, fixed(f64::from(write)));
        prop_assert_eq!(engine.get_resource_state(energy()), before);
    }

    /// Any sequence of mutations leaves a consistent, bounded network.
    #[test]
    fn mutation_safety(ops in arb_mutation_sequence(80)) {
        let (mut engine, _clock) = default_engine();
        let r = minerals();
        let mut node_ids: Vec<u64> = Vec::new();
        let mut conn_ids: Vec<u64> = Vec::new();
        let mut next_id = 0u64;

        for op in ops {
            match op {
                MutOp::AddProducer(c) => {
                    engine.register_node(producer(next_id, r, f64::from(c))).unwrap();
                    node_ids.push(next_id);
                    next_id += 1;
                }
                MutOp::AddConsumer(c, p) => {
                    engine.register_node(consumer(next_id, r, f64::from(c), p)).unwrap();
                    node_ids.push(next_id);
                    next_id += 1;
                }
                MutOp::RemoveNode(idx) => {
                    if !node_ids.is_empty() {
                        let id = node_ids.remove(idx % node_ids.len());
                        prop_assert!(engine.unregister_node(NodeId(id)));
                        conn_ids.retain(|&c| engine.get_connection(ConnectionId(c)).is_some());
                    }
                }
                MutOp::Connect(a, b, m) => {
                    if !node_ids.is_empty() {
                        let from = node_ids[a % node_ids.len()];
                        let to = node_ids[b % node_ids.len()];
                        engine
                            .register_connection(connection(next_id, from, to, r, f64::from(m)))
                            .unwrap();
                        conn_ids.push(next_id);
                        next_id += 1;
                    }
                }
                MutOp::Disconnect(idx) => {
                    if !conn_ids.is_empty() {
                        let id = conn_ids.remove(idx % conn_ids.len());
                        prop_assert!(engine.unregister_connection(ConnectionId(id)));
                    }
                }
                MutOp::SetCapacity(idx, c) => {
                    if !node_ids.is_empty() {
                        let id = node_ids[idx % node_ids.len()];
                        engine.set_node_capacity(NodeId(id), fixed(f64::from(c))).unwrap();
                    }
                }
                MutOp::Toggle(idx) => {
                    if !node_ids.is_empty() {
                        let id = NodeId(node_ids[idx % node_ids.len()]);
                        let active = engine.get_node(id).is_some_and(|n| n.active);
                        engine.set_node_active(id, !active).unwrap();
                    }
                }
                MutOp::Optimize => {
                    engine.optimize_flows();
                }
            }
        }

        engine.optimize_flows();
        assert_rates_bounded(&engine)?;
        prop_assert_eq!(engine.get_nodes().len(), node_ids.len());
        prop_assert_eq!(engine.get_connections().len(), conn_ids.len());
        for conn in engine.get_connections() {
            prop_assert!(engine.get_node(conn.source).is_some());
            prop_assert!(engine.get_node(conn.target).is_some());
        }
    }
}
