//! The flow optimizer.
//!
//! One call to [`FlowOptimizer::optimize`] is a single-shot, greedy
//! allocation over the current snapshot of the network:
//!
//! 1. **Converters**, in cycle-tolerant topological order: throughput is
//!    `efficiency * min(capacity, inbound supply)` and is spread over
//!    outbound connections in id order, each capped at `max_rate * efficiency`.
//! 2. **Availability**: clamped stock for every type held by an active
//!    producer, storage or converter, plus producer capacity, plus converter
//!    output.
//! 3. **Demand**: the summed capacity of active consumers.
//! 4. **Rate assignment**: without a bottleneck every live connection runs at
//!    its effective cap. Under a bottleneck, consumers are served by
//!    descending priority, the first group that cannot be fully served splits
//!    the remainder proportionally, and whatever is left goes to non-consumer
//!    targets in connection id order.
//!
//! Feedback loops are not iterated to a fixed point: a converter fed by a
//! converter that sorts after it sees zero supply from that edge in this pass.
//!
//! Every phase walks its items in ascending id order through the
//! [`BatchScheduler`], so the result does not depend on batch sizes.

use crate::batch::{BatchHook, BatchScheduler, Phase};
use crate::config::{BatchSizes, EngineConfig};
use crate::fixed::{Fixed64, Millis, clamp_stock, mul_div};
use crate::history::TransferRecord;
use crate::id::*;
use crate::network::{FlowConnection, FlowNode, NetworkRegistry, NodeKind};
use crate::state::ResourceStateStore;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ---------------------------------------------------------------------------
// Pass results
// ---------------------------------------------------------------------------

/// A connection whose rate differs from the previous pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateChange {
    pub connection: ConnectionId,
    pub previous: Fixed64,
    pub current: Fixed64,
}

/// Supply and demand totals for one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBalance {
    pub resource_type: ResourceType,
    pub availability: Fixed64,
    pub demand: Fixed64,
}

/// A malformed item skipped during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassDiagnostic {
    MissingEndpoint {
        connection: ConnectionId,
        node: NodeId,
    },
    UnsupportedResourceType {
        connection: ConnectionId,
        node: NodeId,
        resource: ResourceType,
    },
}

impl std::fmt::Display for PassDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PassDiagnostic::MissingEndpoint { connection, node } => {
                write!(f, "{connection} references missing node {node}")
            }
            PassDiagnostic::UnsupportedResourceType {
                connection,
                node,
                resource,
            } => write!(f, "{node} no longer handles {resource:?} carried by {connection}"),
        }
    }
}

/// What an optimization pass changed and found.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizationResult {
    /// Only connections whose rate changed, in id order.
    pub changed_connections: Vec<RateChange>,
    pub transfers: Vec<TransferRecord>,
    pub bottlenecks: Vec<ResourceBalance>,
    pub underutilized: Vec<ResourceBalance>,
    pub diagnostics: Vec<PassDiagnostic>,
}

impl OptimizationResult {
    pub fn is_empty(&self) -> bool {
        self.changed_connections.is_empty()
            && self.transfers.is_empty()
            && self.bottlenecks.is_empty()
            && self.underutilized.is_empty()
            && self.diagnostics.is_empty()
    }

    pub fn is_bottleneck(&self, resource: ResourceType) -> bool {
        self.bottlenecks.iter().any(|b| b.resource_type == resource)
    }

    pub fn is_underutilized(&self, resource: ResourceType) -> bool {
        self.underutilized.iter().any(|b| b.resource_type == resource)
    }
}

// ---------------------------------------------------------------------------
// Internal pass state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Classified {
    Live,
    /// An endpoint is inactive.
    Idle,
    Malformed(PassDiagnostic),
}

#[derive(Debug, Clone, Copy, Default)]
struct Balance {
    stock: Fixed64,
    /// Producer capacity plus converter output.
    production: Fixed64,
    demand: Fixed64,
    consumption: Fixed64,
}

impl Balance {
    fn availability(&self) -> Fixed64 {
        self.stock.saturating_add(self.production)
    }

    fn is_bottleneck(&self) -> bool {
        self.demand > self.availability()
    }
}

/// Per-type budgets under a bottleneck.
#[derive(Debug, Default)]
struct ScarceBudget {
    consumers: HashMap<NodeId, Fixed64>,
    leftover: Fixed64,
}

#[derive(Debug)]
struct PlannedRate {
    connection: ConnectionId,
    source: NodeId,
    target: NodeId,
    resource: ResourceType,
    rate: Fixed64,
}

#[derive(Debug, Default)]
struct Plan {
    rates: Vec<PlannedRate>,
    balances: BTreeMap<ResourceType, Balance>,
    diagnostics: Vec<PassDiagnostic>,
}

// ---------------------------------------------------------------------------
// FlowOptimizer
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct FlowOptimizer {
    batch_sizes: BatchSizes,
    slack: Fixed64,
    scheduler: BatchScheduler,
    passes: u64,
}

impl FlowOptimizer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            batch_sizes: config.batch_sizes,
            slack: config.slack(),
            scheduler: BatchScheduler::new(),
            passes: 0,
        }
    }

    /// Install a hook called at every batch boundary.
    pub fn set_batch_hook(&mut self, hook: Option<BatchHook>) {
        self.scheduler.set_hook(hook);
    }

    /// Run one pass: assign connection rates, update resource states and
    /// report what changed.
    pub fn optimize(
        &mut self,
        registry: &mut NetworkRegistry,
        store: &mut ResourceStateStore,
        now: Millis,
    ) -> OptimizationResult {
        let changes = registry.drain_changes();
        let cold_pass = self.passes == 0;
        let order = registry.flow_order().to_vec();

        let plan = self.plan(registry, store, &order, now);

        let mut result = OptimizationResult {
            diagnostics: plan.diagnostics,
            ..OptimizationResult::default()
        };

        for planned in plan.rates {
            let previous = registry
                .get_connection(planned.connection)
                .map(FlowConnection::current_rate)
                .unwrap_or(Fixed64::ZERO);
            registry.set_current_rate(planned.connection, planned.rate);

            if previous != planned.rate {
                result.changed_connections.push(RateChange {
                    connection: planned.connection,
                    previous,
                    current: planned.rate,
                });
            }
            let cold = cold_pass || changes.is_connection_dirty(planned.connection);
            if planned.rate > Fixed64::ZERO && (previous != planned.rate || cold) {
                result.transfers.push(TransferRecord {
                    timestamp: now,
                    source: planned.source,
                    target: planned.target,
                    resource_type: planned.resource,
                    amount: planned.rate,
                });
            }
        }

        for (&resource, balance) in &plan.balances {
            let summary = ResourceBalance {
                resource_type: resource,
                availability: balance.availability(),
                demand: balance.demand,
            };
            if balance.is_bottleneck() {
                result.bottlenecks.push(summary);
            } else if self.is_underutilized(balance) {
                result.underutilized.push(summary);
            }
            store.apply_pass(resource, balance.production, balance.consumption, now);
        }
        // Types whose last handler went away: zero their rates.
        for &resource in changes.dirty_resources() {
            if !plan.balances.contains_key(&resource) {
                store.apply_pass(resource, Fixed64::ZERO, Fixed64::ZERO, now);
            }
        }

        self.passes += 1;
        tracing::debug!(
            pass = self.passes,
            changed = result.changed_connections.len(),
            transfers = result.transfers.len(),
            bottlenecks = result.bottlenecks.len(),
            underutilized = result.underutilized.len(),
            skipped = result.diagnostics.len(),
            "flow pass complete"
        );
        result
    }

    fn is_underutilized(&self, balance: &Balance) -> bool {
        let availability = balance.availability();
        availability > Fixed64::ZERO
            && availability.saturating_sub(balance.demand) > self.slack.saturating_mul(availability)
    }

    fn plan(
        &mut self,
        registry: &NetworkRegistry,
        store: &mut ResourceStateStore,
        order: &[NodeId],
        now: Millis,
    ) -> Plan {
        let sizes = self.batch_sizes;
        let mut plan = Plan::default();

        // -- Connection validity --
        let connections = registry.connections();
        let classes = self.scheduler.map_in_batches(
            Phase::Connections,
            &connections,
            sizes.connections,
            |conn| classify(registry, conn),
        );

        let mut live: HashSet<ConnectionId> = HashSet::new();
        let mut caps: HashMap<ConnectionId, Fixed64> = HashMap::new();
        for (conn, class) in connections.iter().zip(&classes) {
            match class {
                Classified::Live => {
                    live.insert(conn.id);
                    let from_converter = registry
                        .get_node(conn.source)
                        .is_some_and(|n| n.kind() == NodeKind::Converter);
                    if !from_converter {
                        caps.insert(conn.id, conn.max_rate);
                    }
                }
                Classified::Idle => {}
                Classified::Malformed(diagnostic) => {
                    tracing::warn!(%diagnostic, "skipping malformed connection");
                    plan.diagnostics.push(diagnostic.clone());
                }
            }
        }

        // -- Converters --
        let converters: Vec<&FlowNode> = order
            .iter()
            .filter_map(|&id| registry.get_node(id))
            .filter(|n| n.active && n.kind() == NodeKind::Converter)
            .collect();
        let mut converter_output: BTreeMap<ResourceType, Fixed64> = BTreeMap::new();
        self.scheduler.process_in_batches(
            Phase::Converters,
            &converters,
            sizes.converters,
            |node| {
                let supply = registry
                    .inbound(node.id)
                    .iter()
                    .filter(|c| live.contains(&c.id))
                    .map(|c| caps.get(&c.id).copied().unwrap_or(Fixed64::ZERO))
                    .fold(Fixed64::ZERO, Fixed64::saturating_add);
                let efficiency = node.efficiency();
                let mut remaining = node.capacity.min(supply).saturating_mul(efficiency);
                for conn in registry.outbound(node.id) {
                    if !live.contains(&conn.id) {
                        continue;
                    }
                    let cap = conn.max_rate.saturating_mul(efficiency).min(remaining);
                    remaining = remaining.saturating_sub(cap);
                    caps.insert(conn.id, cap);
                    let out = converter_output
                        .entry(conn.resource_type)
                        .or_insert(Fixed64::ZERO);
                    *out = out.saturating_add(cap);
                }
            },
        );

        // -- Availability --
        let nodes = registry.nodes();
        let mut stocked: BTreeSet<ResourceType> = BTreeSet::new();
        let balances = &mut plan.balances;
        self.scheduler
            .process_in_batches(Phase::Nodes, &nodes, sizes.nodes, |node| {
                if !node.active {
                    return;
                }
                for &resource in &node.resource_types {
                    let balance = balances.entry(resource).or_default();
                    match node.kind() {
                        NodeKind::Producer => {
                            balance.production = balance.production.saturating_add(node.capacity);
                            stocked.insert(resource);
                        }
                        NodeKind::Storage | NodeKind::Converter => {
                            stocked.insert(resource);
                        }
                        NodeKind::Consumer => {}
                    }
                }
            });
        for (resource, output) in converter_output {
            let balance = plan.balances.entry(resource).or_default();
            balance.production = balance.production.saturating_add(output);
        }
        for resource in stocked {
            let state = store.get_resource_state(resource, now);
            plan.balances.entry(resource).or_default().stock = clamp_stock(state.current, state.max);
        }

        // -- Demand --
        let balances = &mut plan.balances;
        self.scheduler
            .process_in_batches(Phase::Nodes, &nodes, sizes.nodes, |node| {
                if !node.active || node.kind() != NodeKind::Consumer {
                    return;
                }
                for &resource in &node.resource_types {
                    let balance = balances.entry(resource).or_default();
                    balance.demand = balance.demand.saturating_add(node.capacity);
                }
            });

        // -- Rate assignment --
        let mut inbound_caps: HashMap<(NodeId, ResourceType), Fixed64> = HashMap::new();
        for conn in connections.iter().filter(|c| live.contains(&c.id)) {
            let cap = caps.get(&conn.id).copied().unwrap_or(Fixed64::ZERO);
            let total = inbound_caps
                .entry((conn.target, conn.resource_type))
                .or_insert(Fixed64::ZERO);
            *total = total.saturating_add(cap);
        }
        let mut budgets: HashMap<ResourceType, ScarceBudget> = plan
            .balances
            .iter()
            .filter(|(_, b)| b.is_bottleneck())
            .map(|(&resource, balance)| {
                let budget = allocate_scarce(&nodes, resource, balance.availability(), &inbound_caps);
                (resource, budget)
            })
            .collect();

        let balances = &mut plan.balances;
        let rates = &mut plan.rates;
        self.scheduler.process_in_batches(
            Phase::Connections,
            &connections,
            sizes.connections,
            |conn| {
                let rate = if live.contains(&conn.id) {
                    let cap = caps.get(&conn.id).copied().unwrap_or(Fixed64::ZERO);
                    let target = registry.get_node(conn.target).map(FlowNode::kind);
                    let rate = match budgets.get_mut(&conn.resource_type) {
                        None => cap,
                        Some(budget) => {
                            let pool = if target == Some(NodeKind::Consumer) {
                                budget.consumers.entry(conn.target).or_insert(Fixed64::ZERO)
                            } else {
                                &mut budget.leftover
                            };
                            let rate = cap.min(*pool);
                            *pool = pool.saturating_sub(rate);
                            rate
                        }
                    };
                    if matches!(target, Some(NodeKind::Consumer | NodeKind::Converter)) {
                        let balance = balances.entry(conn.resource_type).or_default();
                        balance.consumption = balance.consumption.saturating_add(rate);
                    }
                    rate
                } else {
                    Fixed64::ZERO
                };
                rates.push(PlannedRate {
                    connection: conn.id,
                    source: conn.source,
                    target: conn.target,
                    resource: conn.resource_type,
                    rate,
                });
            },
        );

        plan
    }
}

fn classify(registry: &NetworkRegistry, conn: &FlowConnection) -> Classified {
    let mut active = true;
    for endpoint in [conn.source, conn.target] {
        let Some(node) = registry.get_node(endpoint) else {
            return Classified::Malformed(PassDiagnostic::MissingEndpoint {
                connection: conn.id,
                node: endpoint,
            });
        };
        if !node.handles(conn.resource_type) {
            return Classified::Malformed(PassDiagnostic::UnsupportedResourceType {
                connection: conn.id,
                node: endpoint,
                resource: conn.resource_type,
            });
        }
        active &= node.active;
    }
    if active {
        Classified::Live
    } else {
        Classified::Idle
    }
}

/// Split `availability` of a scarce type among its consumers.
///
/// A consumer's request is its capacity, limited by what its live inbound
/// connections can carry. Groups of equal priority are served in descending
/// priority order; the first group that cannot be fully served shares the
/// remainder in proportion to requests and every lower group gets nothing.
fn allocate_scarce(
    nodes: &[&FlowNode],
    resource: ResourceType,
    availability: Fixed64,
    inbound_caps: &HashMap<(NodeId, ResourceType), Fixed64>,
) -> ScarceBudget {
    let mut consumers: Vec<(i32, NodeId, Fixed64)> = nodes
        .iter()
        .filter(|n| n.active && n.kind() == NodeKind::Consumer && n.handles(resource))
        .map(|n| {
            let carry = inbound_caps
                .get(&(n.id, resource))
                .copied()
                .unwrap_or(Fixed64::ZERO);
            (n.priority, n.id, n.capacity.min(carry))
        })
        .collect();
    consumers.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut budget = ScarceBudget::default();
    let mut remaining = availability;
    for group in consumers.chunk_by(|a, b| a.0 == b.0) {
        let requested = group
            .iter()
            .fold(Fixed64::ZERO, |acc, c| acc.saturating_add(c.2));
        if requested <= remaining {
            for &(_, id, request) in group {
                budget.consumers.insert(id, request);
            }
            remaining = remaining.saturating_sub(requested);
        } else {
            for &(_, id, request) in group {
                budget.consumers.insert(id, mul_div(request, remaining, requested));
            }
            remaining = Fixed64::ZERO;
        }
    }
    budget.leftover = remaining;
    budget
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64 as fixed;
    use crate::network::{ConverterSpec, NodeRole};
    use crate::state::ResourceState;

    const MINERALS: ResourceType = ResourceType(0);
    const ALLOY: ResourceType = ResourceType(1);

    struct Harness {
        registry: NetworkRegistry,
        store: ResourceStateStore,
        optimizer: FlowOptimizer,
        now: Millis,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(EngineConfig::default())
        }

        fn with_config(config: EngineConfig) -> Self {
            let mut store = ResourceStateStore::new(config.cache_ttl_ms);
            for r in [MINERALS, ALLOY] {
                store
                    .set_resource_state(r, ResourceState::with_stock(r, Fixed64::ZERO, fixed(1000.0)))
                    .unwrap();
            }
            Self {
                registry: NetworkRegistry::new(),
                store,
                optimizer: FlowOptimizer::new(&config),
                now: 0,
            }
        }

        fn node(&mut self, id: u64, role: NodeRole, resource: ResourceType, capacity: f64, priority: i32) {
            self.registry
                .register_node(
                    FlowNode::new(NodeId(id), role, [resource], fixed(capacity)).with_priority(priority),
                )
                .unwrap();
        }

        fn link(&mut self, id: u64, from: u64, to: u64, resource: ResourceType, max: f64) {
            self.registry
                .register_connection(FlowConnection::new(
                    ConnectionId(id),
                    NodeId(from),
                    NodeId(to),
                    resource,
                    fixed(max),
                ))
                .unwrap();
        }

        fn run(&mut self) -> OptimizationResult {
            self.now += 1000;
            self.optimizer.optimize(&mut self.registry, &mut self.store, self.now)
        }

        fn rate(&self, id: u64) -> Fixed64 {
            self.registry.get_connection(ConnectionId(id)).unwrap().current_rate()
        }
    }

    #[test]
    fn empty_network_is_a_noop() {
        let mut h = Harness::new();
        let result = h.run();
        assert!(result.is_empty());
    }

    #[test]
    fn availability_limited_single_consumer() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 15.0, 1);
        h.link(1, 1, 2, MINERALS, 20.0);

        let result = h.run();
        assert_eq!(h.rate(1), fixed(10.0));
        assert!(result.is_bottleneck(MINERALS));
        assert_eq!(result.changed_connections.len(), 1);
        assert_eq!(result.transfers.len(), 1);
        assert_eq!(result.transfers[0].amount, fixed(10.0));
    }

    #[test]
    fn higher_priority_served_first() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 20.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 12.0, 2);
        h.node(3, NodeRole::Consumer, MINERALS, 18.0, 1);
        h.link(1, 1, 2, MINERALS, 50.0);
        h.link(2, 1, 3, MINERALS, 50.0);

        h.run();
        assert_eq!(h.rate(1), fixed(12.0));
        assert_eq!(h.rate(2), fixed(8.0));
    }

    #[test]
    fn equal_priority_split_proportionally() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 10.0, 1);
        h.node(3, NodeRole::Consumer, MINERALS, 10.0, 1);
        h.link(1, 1, 2, MINERALS, 50.0);
        h.link(2, 1, 3, MINERALS, 50.0);

        h.run();
        assert_eq!(h.rate(1), fixed(5.0));
        assert_eq!(h.rate(2), fixed(5.0));
    }

    #[test]
    fn no_bottleneck_runs_at_max_rate() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 100.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 5.0, 0);
        h.link(1, 1, 2, MINERALS, 20.0);

        let result = h.run();
        assert_eq!(h.rate(1), fixed(20.0));
        assert!(result.bottlenecks.is_empty());
        assert!(result.is_underutilized(MINERALS));
    }

    #[test]
    fn converter_efficiency_scales_output() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 100.0, 0);
        h.registry
            .register_node(FlowNode::new(
                NodeId(2),
                NodeRole::Converter(ConverterSpec {
                    efficiency: fixed(0.5),
                    recipes: vec![],
                }),
                [MINERALS, ALLOY],
                fixed(40.0),
            ))
            .unwrap();
        h.node(3, NodeRole::Consumer, ALLOY, 100.0, 0);
        h.link(1, 1, 2, MINERALS, 30.0);
        h.link(2, 2, 3, ALLOY, 50.0);

        let result = h.run();
        // throughput = 0.5 * min(40, 30) = 15
        assert_eq!(h.rate(2), fixed(15.0));
        assert!(result.is_bottleneck(ALLOY));
    }

    #[test]
    fn inactive_endpoint_gets_zero_rate() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 5.0, 0);
        h.link(1, 1, 2, MINERALS, 20.0);
        h.run();
        assert!(h.rate(1) > Fixed64::ZERO);

        h.registry.set_node_active(NodeId(2), false).unwrap();
        let result = h.run();
        assert_eq!(h.rate(1), Fixed64::ZERO);
        assert_eq!(result.changed_connections[0].current, Fixed64::ZERO);
        assert!(result.transfers.is_empty());
    }

    #[test]
    fn malformed_connection_skipped_with_diagnostic() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 5.0, 0);
        h.node(3, NodeRole::Consumer, MINERALS, 5.0, 0);
        h.link(1, 1, 2, MINERALS, 20.0);
        h.link(2, 1, 3, MINERALS, 20.0);
        h.registry
            .set_node_resource_types(NodeId(3), [ALLOY].into_iter().collect())
            .unwrap();

        let result = h.run();
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(h.rate(2), Fixed64::ZERO);
        assert!(h.rate(1) > Fixed64::ZERO);
    }

    #[test]
    fn steady_state_pass_reports_nothing_changed() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 15.0, 0);
        h.link(1, 1, 2, MINERALS, 20.0);
        h.run();

        let second = h.run();
        assert!(second.changed_connections.is_empty());
        assert!(second.transfers.is_empty());
        assert!(second.is_bottleneck(MINERALS));
    }

    #[test]
    fn new_connection_is_cold_on_later_pass() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Storage, MINERALS, 100.0, 0);
        h.run();

        h.link(1, 1, 2, MINERALS, 5.0);
        let result = h.run();
        assert_eq!(result.transfers.len(), 1);
        assert_eq!(result.transfers[0].target, NodeId(2));
    }

    #[test]
    fn state_updated_after_pass() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 4.0, 0);
        h.link(1, 1, 2, MINERALS, 4.0);
        h.run();

        let state = h.store.get_resource_state(MINERALS, h.now);
        assert_eq!(state.production_rate, fixed(10.0));
        assert_eq!(state.consumption_rate, fixed(4.0));
        assert_eq!(state.current, fixed(6.0));
        assert_eq!(state.last_updated, h.now);
    }

    #[test]
    fn leftover_flows_to_storage_under_bottleneck() {
        let mut h = Harness::new();
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, NodeRole::Consumer, MINERALS, 20.0, 0);
        h.node(3, NodeRole::Storage, MINERALS, 100.0, 0);
        // consumer can only carry 6 through its connection
        h.link(1, 1, 2, MINERALS, 6.0);
        h.link(2, 1, 3, MINERALS, 50.0);

        h.run();
        assert_eq!(h.rate(1), fixed(6.0));
        assert_eq!(h.rate(2), fixed(4.0));
    }

    #[test]
    fn cycle_through_converters_does_not_hang() {
        let mut h = Harness::new();
        let spec = || {
            NodeRole::Converter(ConverterSpec {
                efficiency: Fixed64::ONE,
                recipes: vec![],
            })
        };
        h.node(1, NodeRole::Producer, MINERALS, 10.0, 0);
        h.node(2, spec(), MINERALS, 10.0, 0);
        h.node(3, spec(), MINERALS, 10.0, 0);
        h.link(1, 1, 2, MINERALS, 10.0);
        h.link(2, 2, 3, MINERALS, 10.0);
        h.link(3, 3, 2, MINERALS, 10.0);

        h.run();
        for id in 1..=3 {
            let conn = h.registry.get_connection(ConnectionId(id)).unwrap();
            assert!(conn.current_rate() <= conn.max_rate);
        }
    }

    #[test]
    fn batch_size_does_not_change_result() {
        let build = |size: usize| {
            let mut h = Harness::with_config(EngineConfig {
                batch_sizes: BatchSizes::uniform(size),
                ..EngineConfig::default()
            });
            for i in 0..20 {
                h.node(i, NodeRole::Producer, MINERALS, 3.0, 0);
                h.node(100 + i, NodeRole::Consumer, MINERALS, 5.0, (i % 3) as i32);
            }
            for i in 0..20 {
                h.link(i, i, 100 + i, MINERALS, 10.0);
                h.link(100 + i, i, 100 + (i + 1) % 20, MINERALS, 10.0);
            }
            let result = h.run();
            let rates: Vec<FlowConnection> =
                h.registry.connections().into_iter().cloned().collect();
            (result, rates)
        };
        let (reference, reference_rates) = build(1000);
        assert!(!reference.changed_connections.is_empty());
        for size in [1, 7] {
            let (result, rates) = build(size);
            assert_eq!(result, reference, "batch size {size}");
            assert_eq!(rates, reference_rates, "batch size {size}");
        }
    }
}
