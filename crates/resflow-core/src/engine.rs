//! The flow engine: one owned instance per network.
//!
//! # Architecture
//!
//! A [`FlowEngine`] owns every component and wires them together by id:
//! - a [`NetworkRegistry`] (nodes and connections)
//! - a [`ResourceStateStore`] with its TTL cache
//! - a [`FlowOptimizer`] (with its batch scheduler)
//! - a [`ConversionEngine`] (processes and chain executions)
//! - a [`HistoryLedger`] of transfers
//! - an injected [`EventPublisher`] and [`Clock`]
//!
//! Structural mutations invalidate the cache entries of the resource types
//! they touch and publish an event. Every public operation ends with
//! [`EventPublisher::flush`], so listeners observe events in batches that
//! never split an operation.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conversion::{
    ChainExecution, ChainStep, ConversionContext, ConversionEngine, ProcessStatusReport,
};
use crate::batch::BatchHook;
use crate::error::{FlowError, ValidationError};
use crate::event::{EventBus, EventPublisher, FlowEvent};
use crate::fixed::{Fixed64, Millis};
use crate::history::{HistoryFilter, HistoryLedger, TransferRecord};
use crate::id::*;
use crate::network::{FlowConnection, FlowNode, NetworkRegistry, NodeKind};
use crate::optimizer::{FlowOptimizer, OptimizationResult};
use crate::recipe::RecipeBook;
use crate::state::{ResourceState, ResourceStateStore};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct FlowEngine<P: EventPublisher = EventBus> {
    config: EngineConfig,
    registry: NetworkRegistry,
    store: ResourceStateStore,
    recipes: RecipeBook,
    optimizer: FlowOptimizer,
    conversion: ConversionEngine,
    history: HistoryLedger,
    publisher: P,
    clock: Box<dyn Clock>,
    /// Clock reading at the last `tick`.
    last_tick: Millis,
}

impl FlowEngine<EventBus> {
    /// An engine with the bundled event bus, the system clock and no recipes.
    pub fn new(config: EngineConfig) -> Result<Self, ValidationError> {
        Self::with_parts(config, RecipeBook::default(), EventBus::default(), SystemClock::new())
    }
}

impl<P: EventPublisher> FlowEngine<P> {
    /// Assemble an engine from its injected collaborators.
    pub fn with_parts(
        config: EngineConfig,
        recipes: RecipeBook,
        publisher: P,
        clock: impl Clock + 'static,
    ) -> Result<Self, ValidationError> {
        config.validate()?;
        let last_tick = clock.now_ms();
        Ok(Self {
            registry: NetworkRegistry::new(),
            store: ResourceStateStore::new(config.cache_ttl_ms),
            recipes,
            optimizer: FlowOptimizer::new(&config),
            conversion: ConversionEngine::with_retention(config.retained_executions),
            history: HistoryLedger::new(config.history_max_size),
            publisher,
            clock: Box::new(clock),
            last_tick,
            config,
        })
    }

    /// Replace the recipe book. Running processes keep the durations they
    /// started with.
    pub fn set_recipes(&mut self, recipes: RecipeBook) {
        self.recipes = recipes;
    }

    pub fn now(&self) -> Millis {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recipes(&self) -> &RecipeBook {
        &self.recipes
    }

    /// Read-only view of the network.
    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    /// Install a hook called at every optimizer batch boundary.
    pub fn set_batch_hook(&mut self, hook: Option<BatchHook>) {
        self.optimizer.set_batch_hook(hook);
    }

    fn invalidate_all<'a>(&mut self, resources: impl IntoIterator<Item = &'a ResourceType>) {
        for &resource in resources {
            self.store.invalidate(resource);
        }
    }

    fn publish(&mut self, event: FlowEvent) {
        self.publisher.publish(event);
    }

    fn finish<T>(&mut self, value: T) -> T {
        self.publisher.flush();
        value
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register_node(&mut self, node: FlowNode) -> Result<(), ValidationError> {
        let id = node.id;
        let resources = node.resource_types.clone();
        self.registry.register_node(node)?;
        self.invalidate_all(&resources);
        let at = self.now();
        self.publish(FlowEvent::NodeAdded { node: id, at });
        tracing::debug!(node = %id, "node registered");
        Ok(self.finish(()))
    }

    /// Remove a node and its connections. Returns `false` if the id was
    /// unknown.
    pub fn unregister_node(&mut self, id: NodeId) -> bool {
        let Some(removed) = self.registry.unregister_node(id) else {
            return false;
        };
        let at = self.now();
        let mut resources = removed.node.resource_types;
        for conn in &removed.connections {
            resources.insert(conn.resource_type);
            self.publish(FlowEvent::ConnectionRemoved {
                connection: conn.id,
                at,
            });
        }
        self.invalidate_all(&resources);
        self.publish(FlowEvent::NodeRemoved { node: id, at });
        tracing::debug!(node = %id, cascaded = removed.connections.len(), "node unregistered");
        self.finish(true)
    }

    pub fn register_connection(&mut self, connection: FlowConnection) -> Result<(), ValidationError> {
        let (id, source, target, resource) = (
            connection.id,
            connection.source,
            connection.target,
            connection.resource_type,
        );
        self.registry.register_connection(connection)?;
        self.store.invalidate(resource);
        let at = self.now();
        self.publish(FlowEvent::ConnectionAdded {
            connection: id,
            source,
            target,
            at,
        });
        Ok(self.finish(()))
    }

    /// Returns `false` if the id was unknown.
    pub fn unregister_connection(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.registry.unregister_connection(id) else {
            return false;
        };
        self.store.invalidate(conn.resource_type);
        let at = self.now();
        self.publish(FlowEvent::ConnectionRemoved { connection: id, at });
        self.finish(true)
    }

    fn node_updated(&mut self, id: NodeId, affected: BTreeSet<ResourceType>) {
        self.invalidate_all(&affected);
        let at = self.now();
        self.publish(FlowEvent::NodeUpdated { node: id, at });
        self.publisher.flush();
    }

    pub fn set_node_active(&mut self, id: NodeId, active: bool) -> Result<(), FlowError> {
        let affected = self.registry.set_node_active(id, active)?;
        self.node_updated(id, affected);
        Ok(())
    }

    pub fn set_node_capacity(&mut self, id: NodeId, capacity: Fixed64) -> Result<(), FlowError> {
        let affected = self.registry.set_node_capacity(id, capacity)?;
        self.node_updated(id, affected);
        Ok(())
    }

    pub fn set_node_priority(&mut self, id: NodeId, priority: i32) -> Result<(), FlowError> {
        let affected = self.registry.set_node_priority(id, priority)?;
        self.node_updated(id, affected);
        Ok(())
    }

    pub fn set_node_resource_types(
        &mut self,
        id: NodeId,
        resource_types: BTreeSet<ResourceType>,
    ) -> Result<(), FlowError> {
        let affected = self.registry.set_node_resource_types(id, resource_types)?;
        self.node_updated(id, affected);
        Ok(())
    }

    pub fn get_node(&self, id: NodeId) -> Option<FlowNode> {
        self.registry.get_node(id).cloned()
    }

    pub fn get_nodes(&self) -> Vec<FlowNode> {
        self.registry.nodes().into_iter().cloned().collect()
    }

    pub fn get_nodes_by_type(&self, kind: NodeKind) -> Vec<FlowNode> {
        self.registry.nodes_by_kind(kind).into_iter().cloned().collect()
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<FlowConnection> {
        self.registry.get_connection(id).cloned()
    }

    pub fn get_connections(&self) -> Vec<FlowConnection> {
        self.registry.connections().into_iter().cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Resource state
    // -----------------------------------------------------------------------

    /// An owned snapshot, served from cache while fresh.
    pub fn get_resource_state(&mut self, resource: ResourceType) -> ResourceState {
        let now = self.now();
        self.store.get_resource_state(resource, now)
    }

    pub fn set_resource_state(
        &mut self,
        resource: ResourceType,
        state: ResourceState,
    ) -> Result<(), ValidationError> {
        self.store.set_resource_state(resource, state)
    }

    pub fn invalidate_resource(&mut self, resource: ResourceType) {
        self.store.invalidate(resource);
    }

    pub fn record_production(
        &mut self,
        resource: ResourceType,
        amount: Fixed64,
    ) -> Result<(), ValidationError> {
        let now = self.now();
        self.store.record_production(resource, amount, now)
    }

    pub fn record_consumption(
        &mut self,
        resource: ResourceType,
        amount: Fixed64,
    ) -> Result<(), ValidationError> {
        let now = self.now();
        self.store.record_consumption(resource, amount, now)
    }

    // -----------------------------------------------------------------------
    // Optimization
    // -----------------------------------------------------------------------

    /// Run one optimization pass. Transfers are appended to the history
    /// ledger.
    pub fn optimize_flows(&mut self) -> OptimizationResult {
        let now = self.now();
        let result = self.optimizer.optimize(&mut self.registry, &mut self.store, now);
        for transfer in &result.transfers {
            self.history.record_transfer(transfer.clone());
        }
        self.publish(FlowEvent::FlowsOptimized {
            changed: result.changed_connections.len(),
            bottlenecks: result.bottlenecks.len(),
            at: now,
        });
        self.finish(result)
    }

    // -----------------------------------------------------------------------
    // Conversion
    // -----------------------------------------------------------------------

    fn conversion_parts(&mut self) -> (ConversionContext<'_>, &mut ConversionEngine, &mut P) {
        let now = self.clock.now_ms();
        (
            ConversionContext {
                registry: &self.registry,
                recipes: &self.recipes,
                store: &mut self.store,
                now,
            },
            &mut self.conversion,
            &mut self.publisher,
        )
    }

    pub fn start_conversion_process(
        &mut self,
        converter: NodeId,
        recipe: RecipeId,
    ) -> Result<ProcessId, FlowError> {
        let (mut ctx, conversion, publisher) = self.conversion_parts();
        let result = conversion.start_conversion_process(&mut ctx, converter, recipe, publisher);
        self.finish(result)
    }

    pub fn start_conversion_chain(
        &mut self,
        chain_id: ChainId,
        steps: Vec<ChainStep>,
    ) -> Result<ChainExecutionId, FlowError> {
        let (mut ctx, conversion, publisher) = self.conversion_parts();
        let result = conversion.start_conversion_chain(&mut ctx, chain_id, steps, publisher);
        self.finish(result)
    }

    pub fn pause_conversion_process(&mut self, id: ProcessId) -> Result<(), FlowError> {
        let now = self.now();
        let result = self
            .conversion
            .pause_conversion_process(id, now, &mut self.publisher);
        self.finish(result)
    }

    pub fn resume_conversion_process(&mut self, id: ProcessId) -> Result<(), FlowError> {
        let now = self.now();
        let result = self
            .conversion
            .resume_conversion_process(id, now, &mut self.publisher);
        self.finish(result)
    }

    pub fn cancel_conversion_process(&mut self, id: ProcessId) -> Result<(), FlowError> {
        let now = self.now();
        let result = self
            .conversion
            .cancel_conversion_process(id, now, &mut self.publisher);
        self.finish(result)
    }

    pub fn pause_chain_execution(&mut self, id: ChainExecutionId) -> Result<(), FlowError> {
        let now = self.now();
        let result = self
            .conversion
            .pause_chain_execution(id, now, &mut self.publisher);
        self.finish(result)
    }

    pub fn resume_chain_execution(&mut self, id: ChainExecutionId) -> Result<(), FlowError> {
        let now = self.now();
        let result = self
            .conversion
            .resume_chain_execution(id, now, &mut self.publisher);
        self.finish(result)
    }

    pub fn cancel_chain_execution(&mut self, id: ChainExecutionId) -> Result<(), FlowError> {
        let now = self.now();
        let result = self
            .conversion
            .cancel_chain_execution(id, now, &mut self.publisher);
        self.finish(result)
    }

    /// Advance every active process by `dt` milliseconds.
    pub fn advance(&mut self, dt: Millis) {
        let (mut ctx, conversion, publisher) = self.conversion_parts();
        conversion.advance(&mut ctx, dt, publisher);
        self.last_tick = self.last_tick.saturating_add(dt);
        self.finish(())
    }

    /// Advance processes by the clock time elapsed since the previous tick.
    pub fn tick(&mut self) {
        let now = self.now();
        let dt = now.saturating_sub(self.last_tick);
        let (mut ctx, conversion, publisher) = self.conversion_parts();
        conversion.advance(&mut ctx, dt, publisher);
        self.last_tick = now;
        self.finish(())
    }

    pub fn get_process_status(&self, id: ProcessId) -> Option<ProcessStatusReport> {
        self.conversion.get_process_status(id)
    }

    pub fn get_chain_execution(&self, id: ChainExecutionId) -> Option<ChainExecution> {
        self.conversion.get_chain_execution(id).cloned()
    }

    pub fn get_chain_executions(&self) -> Vec<ChainExecution> {
        self.conversion.get_chain_executions()
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    pub fn record_transfer(&mut self, record: TransferRecord) {
        self.history.record_transfer(record);
    }

    pub fn query_history(&self, filter: &HistoryFilter) -> Vec<TransferRecord> {
        self.history.query(filter)
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::EventKind;
    use crate::fixed::f64_to_fixed64 as fixed;
    use crate::network::NodeRole;

    const MINERALS: ResourceType = ResourceType(0);

    fn engine() -> (FlowEngine<Vec<FlowEvent>>, ManualClock) {
        let clock = ManualClock::new(0);
        let engine = FlowEngine::with_parts(
            EngineConfig::default(),
            RecipeBook::default(),
            Vec::new(),
            clock.clone(),
        )
        .unwrap();
        (engine, clock)
    }

    fn producer(id: u64) -> FlowNode {
        FlowNode::new(NodeId(id), NodeRole::Producer, [MINERALS], fixed(10.0))
    }

    fn kinds(engine: &FlowEngine<Vec<FlowEvent>>) -> Vec<EventKind> {
        engine.publisher().iter().map(FlowEvent::kind).collect()
    }

    #[test]
    fn invalid_config_rejected() {
        let config = EngineConfig {
            history_max_size: 0,
            ..EngineConfig::default()
        };
        assert!(FlowEngine::new(config).is_err());
    }

    #[test]
    fn structural_changes_publish_events() {
        let (mut engine, _) = engine();
        engine.register_node(producer(1)).unwrap();
        engine.register_node(producer(2)).unwrap();
        engine
            .register_connection(FlowConnection::new(
                ConnectionId(1),
                NodeId(1),
                NodeId(2),
                MINERALS,
                fixed(5.0),
            ))
            .unwrap();
        assert!(engine.unregister_node(NodeId(2)));
        assert!(!engine.unregister_node(NodeId(2)));

        assert_eq!(
            kinds(&engine),
            vec![
                EventKind::NodeAdded,
                EventKind::NodeAdded,
                EventKind::ConnectionAdded,
                EventKind::ConnectionRemoved,
                EventKind::NodeRemoved,
            ]
        );
        assert!(engine.get_connections().is_empty());
    }

    #[test]
    fn rejected_registration_publishes_nothing() {
        let (mut engine, _) = engine();
        engine.register_node(producer(1)).unwrap();
        assert!(engine.register_node(producer(1)).is_err());
        assert_eq!(engine.publisher().len(), 1);
    }

    #[test]
    fn node_registration_invalidates_its_resource_types() {
        let (mut engine, _) = engine();
        engine
            .set_resource_state(
                MINERALS,
                ResourceState::with_stock(MINERALS, fixed(5.0), fixed(100.0)),
            )
            .unwrap();
        engine.get_resource_state(MINERALS);
        assert!(engine.store.is_cached(MINERALS, 0));

        engine.register_node(producer(1)).unwrap();
        assert!(!engine.store.is_cached(MINERALS, 0));
    }

    #[test]
    fn cache_served_until_ttl_expires() {
        let (mut engine, clock) = engine();
        engine.get_resource_state(MINERALS);
        clock.advance(249);
        assert!(engine.store.is_cached(MINERALS, engine.now()));
        clock.advance(1);
        assert!(!engine.store.is_cached(MINERALS, engine.now()));
    }

    #[test]
    fn optimize_records_history_and_event() {
        let (mut engine, clock) = engine();
        engine.register_node(producer(1)).unwrap();
        engine
            .register_node(FlowNode::new(
                NodeId(2),
                NodeRole::Consumer,
                [MINERALS],
                fixed(4.0),
            ))
            .unwrap();
        engine
            .register_connection(FlowConnection::new(
                ConnectionId(1),
                NodeId(1),
                NodeId(2),
                MINERALS,
                fixed(4.0),
            ))
            .unwrap();
        clock.set(100);
        let result = engine.optimize_flows();
        assert_eq!(result.transfers.len(), 1);

        let history = engine.query_history(&HistoryFilter::default().node(NodeId(2)));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].timestamp, 100);
        assert_eq!(kinds(&engine).last(), Some(&EventKind::FlowsOptimized));
    }

    #[test]
    fn node_update_on_unknown_id_is_not_found() {
        let (mut engine, _) = engine();
        assert!(matches!(
            engine.set_node_capacity(NodeId(9), fixed(1.0)),
            Err(FlowError::NotFound(_))
        ));
    }

    #[test]
    fn tick_uses_clock_time() {
        let (mut engine, clock) = engine();
        clock.advance(30);
        engine.tick();
        assert_eq!(engine.last_tick, 30);
        engine.advance(5);
        assert_eq!(engine.last_tick, 35);
    }
}
