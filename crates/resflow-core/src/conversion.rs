//! Converter processes and multi-step conversion chains.
//!
//! A [`ConverterProcess`] runs one recipe on one converter: its inputs are
//! taken from the resource store when it starts, its outputs are added when
//! it completes. A [`ChainExecution`] runs an ordered list of steps, one
//! process at a time. Both follow the same lifecycle:
//!
//! ```text
//! Active <-> Paused -> { Cancelled, Completed, Failed }
//! ```
//!
//! Terminal states are absorbing. A chain is never left `Active` or `Paused`
//! once its current process is cancelled or failed.
//!
//! Terminal processes and chains stay queryable until more than
//! `retained_executions` others have finished after them; the oldest are
//! then dropped. Only Active processes are visited when time advances.

use crate::error::{FlowError, IllegalStateTransition, NotFoundError, ValidationError};
use crate::event::{EventPublisher, FlowEvent};
use crate::fixed::{Fixed64, Millis};
use crate::id::*;
use crate::network::NetworkRegistry;
use crate::recipe::RecipeBook;
use crate::state::ResourceStateStore;
use fixed::types::I64F64;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use std::collections::{BTreeSet, VecDeque};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle state shared by processes and chain executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Active,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Cancelled | ExecutionStatus::Completed | ExecutionStatus::Failed
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecutionStatus::Active => "Active",
            ExecutionStatus::Paused => "Paused",
            ExecutionStatus::Cancelled => "Cancelled",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
        }
    }
}

/// One recipe running on one converter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConverterProcess {
    pub id: ProcessId,
    pub converter: NodeId,
    pub recipe: RecipeId,
    /// Fraction complete, in `[0, 1]`.
    pub progress: Fixed64,
    pub status: ExecutionStatus,
    pub started_at: Millis,
    pub duration: Millis,
    /// Active time accumulated so far.
    pub elapsed: Millis,
    /// The chain execution this process is a step of, if any.
    pub chain: Option<ChainExecutionId>,
}

/// What [`ConversionEngine::get_process_status`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatusReport {
    pub recipe: RecipeId,
    pub progress: Fixed64,
    pub status: ExecutionStatus,
}

/// A chain step: which converter runs which recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub converter: NodeId,
    pub recipe: RecipeId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainExecution {
    pub id: ChainExecutionId,
    pub chain_id: ChainId,
    pub steps: Vec<ChainStep>,
    pub current_step_index: usize,
    pub status: ExecutionStatus,
    pub started_at: Millis,
    /// `started_at` plus the sum of every step's duration.
    pub estimated_end_time: Millis,
    pub error_message: Option<String>,
    /// Process running the current step.
    pub current_process: Option<ProcessId>,
}

/// Read access to the network and recipes, and write access to stock,
/// for the duration of one conversion call.
pub struct ConversionContext<'a> {
    pub registry: &'a NetworkRegistry,
    pub recipes: &'a RecipeBook,
    pub store: &'a mut ResourceStateStore,
    pub now: Millis,
}

// ---------------------------------------------------------------------------
// ConversionEngine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ConversionEngine {
    processes: SlotMap<ProcessId, ConverterProcess>,
    chains: SlotMap<ChainExecutionId, ChainExecution>,
    /// Processes whose status is Active.
    running: BTreeSet<ProcessId>,
    /// Terminal entries, oldest first.
    finished_processes: VecDeque<ProcessId>,
    finished_chains: VecDeque<ChainExecutionId>,
    retained: usize,
}

impl Default for ConversionEngine {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_EXECUTIONS)
    }
}

/// Terminal processes (and, separately, chains) kept by default.
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 1024;

impl ConversionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` terminal processes and `retained` terminal
    /// chain executions.
    pub fn with_retention(retained: usize) -> Self {
        Self {
            processes: SlotMap::with_key(),
            chains: SlotMap::with_key(),
            running: BTreeSet::new(),
            finished_processes: VecDeque::new(),
            finished_chains: VecDeque::new(),
            retained,
        }
    }

    /// Drop the oldest terminal entries beyond the retention limit.
    fn evict_finished(&mut self) {
        while self.finished_processes.len() > self.retained {
            if let Some(id) = self.finished_processes.pop_front() {
                self.processes.remove(id);
            }
        }
        while self.finished_chains.len() > self.retained {
            if let Some(id) = self.finished_chains.pop_front() {
                self.chains.remove(id);
            }
        }
    }

    /// Validate the recipe against the converter, take its inputs from
    /// stock and create an Active process. Publishes nothing.
    fn spawn_process(
        &mut self,
        ctx: &mut ConversionContext<'_>,
        converter: NodeId,
        recipe: RecipeId,
        chain: Option<ChainExecutionId>,
    ) -> Result<ProcessId, ValidationError> {
        let recipes = ctx.recipes;
        let def = recipes.accept(converter, ctx.registry.get_node(converter), recipe)?;
        ctx.store.consume_inputs(recipe, &def.inputs, ctx.now)?;
        let now = ctx.now;
        let id = self.processes.insert_with_key(|id| ConverterProcess {
            id,
            converter,
            recipe,
            progress: Fixed64::ZERO,
            status: ExecutionStatus::Active,
            started_at: now,
            duration: def.duration,
            elapsed: 0,
            chain,
        });
        self.running.insert(id);
        Ok(id)
    }

    /// Start a standalone process.
    pub fn start_conversion_process(
        &mut self,
        ctx: &mut ConversionContext<'_>,
        converter: NodeId,
        recipe: RecipeId,
        events: &mut impl EventPublisher,
    ) -> Result<ProcessId, FlowError> {
        let process = self.spawn_process(ctx, converter, recipe, None)?;
        events.publish(FlowEvent::ProcessStarted {
            process,
            converter,
            recipe,
            at: ctx.now,
        });
        tracing::debug!(?process, %converter, ?recipe, "process started");
        Ok(process)
    }

    /// Start a chain. Every step must be accepted by its converter now; the
    /// first step's process starts immediately.
    pub fn start_conversion_chain(
        &mut self,
        ctx: &mut ConversionContext<'_>,
        chain_id: ChainId,
        steps: Vec<ChainStep>,
        events: &mut impl EventPublisher,
    ) -> Result<ChainExecutionId, FlowError> {
        let Some(&first) = steps.first() else {
            return Err(ValidationError::EmptyChain.into());
        };
        let mut total: Millis = 0;
        for step in &steps {
            let def = ctx
                .recipes
                .accept(step.converter, ctx.registry.get_node(step.converter), step.recipe)?;
            total = total.saturating_add(def.duration);
        }

        let now = ctx.now;
        let execution = self.chains.insert_with_key(|id| ChainExecution {
            id,
            chain_id,
            steps,
            current_step_index: 0,
            status: ExecutionStatus::Active,
            started_at: now,
            estimated_end_time: now.saturating_add(total),
            error_message: None,
            current_process: None,
        });
        let process = match self.spawn_process(ctx, first.converter, first.recipe, Some(execution)) {
            Ok(process) => process,
            Err(e) => {
                self.chains.remove(execution);
                return Err(e.into());
            }
        };
        if let Some(chain) = self.chains.get_mut(execution) {
            chain.current_process = Some(process);
        }

        events.publish(FlowEvent::ChainExecutionStarted {
            execution,
            chain: chain_id,
            at: now,
        });
        events.publish(FlowEvent::ProcessStarted {
            process,
            converter: first.converter,
            recipe: first.recipe,
            at: now,
        });
        tracing::debug!(?execution, ?chain_id, "chain execution started");
        Ok(execution)
    }

    // -----------------------------------------------------------------------
    // Pause / resume
    // -----------------------------------------------------------------------

    pub fn pause_conversion_process(
        &mut self,
        id: ProcessId,
        now: Millis,
        events: &mut impl EventPublisher,
    ) -> Result<(), FlowError> {
        let process = self.processes.get_mut(id).ok_or(NotFoundError::Process(id))?;
        expect_status(process.status, ExecutionStatus::Active, "process", "pause")?;
        process.status = ExecutionStatus::Paused;
        self.running.remove(&id);
        events.publish(FlowEvent::ProcessPaused { process: id, at: now });

        if let Some(chain) = process.chain.and_then(|c| self.chains.get_mut(c))
            && chain.status == ExecutionStatus::Active
        {
            chain.status = ExecutionStatus::Paused;
            events.publish(FlowEvent::ChainExecutionPaused {
                execution: chain.id,
                at: now,
            });
        }
        Ok(())
    }

    pub fn resume_conversion_process(
        &mut self,
        id: ProcessId,
        now: Millis,
        events: &mut impl EventPublisher,
    ) -> Result<(), FlowError> {
        let process = self.processes.get_mut(id).ok_or(NotFoundError::Process(id))?;
        expect_status(process.status, ExecutionStatus::Paused, "process", "resume")?;
        process.status = ExecutionStatus::Active;
        self.running.insert(id);
        events.publish(FlowEvent::ProcessResumed { process: id, at: now });

        if let Some(chain) = process.chain.and_then(|c| self.chains.get_mut(c))
            && chain.status == ExecutionStatus::Paused
        {
            chain.status = ExecutionStatus::Active;
            events.publish(FlowEvent::ChainExecutionResumed {
                execution: chain.id,
                at: now,
            });
        }
        Ok(())
    }

    pub fn pause_chain_execution(
        &mut self,
        id: ChainExecutionId,
        now: Millis,
        events: &mut impl EventPublisher,
    ) -> Result<(), FlowError> {
        let chain = self
            .chains
            .get_mut(id)
            .ok_or(NotFoundError::ChainExecution(id))?;
        expect_status(chain.status, ExecutionStatus::Active, "chain execution", "pause")?;
        chain.status = ExecutionStatus::Paused;

        if let Some(process) = chain.current_process.and_then(|p| self.processes.get_mut(p))
            && process.status == ExecutionStatus::Active
        {
            process.status = ExecutionStatus::Paused;
            self.running.remove(&process.id);
            events.publish(FlowEvent::ProcessPaused {
                process: process.id,
                at: now,
            });
        }
        events.publish(FlowEvent::ChainExecutionPaused { execution: id, at: now });
        Ok(())
    }

    pub fn resume_chain_execution(
        &mut self,
        id: ChainExecutionId,
        now: Millis,
        events: &mut impl EventPublisher,
    ) -> Result<(), FlowError> {
        let chain = self
            .chains
            .get_mut(id)
            .ok_or(NotFoundError::ChainExecution(id))?;
        expect_status(chain.status, ExecutionStatus::Paused, "chain execution", "resume")?;
        chain.status = ExecutionStatus::Active;

        if let Some(process) = chain.current_process.and_then(|p| self.processes.get_mut(p))
            && process.status == ExecutionStatus::Paused
        {
            process.status = ExecutionStatus::Active;
            self.running.insert(process.id);
            events.publish(FlowEvent::ProcessResumed {
                process: process.id,
                at: now,
            });
        }
        events.publish(FlowEvent::ChainExecutionResumed { execution: id, at: now });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel a process. Terminal processes are left as they are, so a
    /// process that already completed stays `Completed`. Cancelling a chain
    /// step fails the chain.
    pub fn cancel_conversion_process(
        &mut self,
        id: ProcessId,
        now: Millis,
        events: &mut impl EventPublisher,
    ) -> Result<(), FlowError> {
        let process = self.processes.get_mut(id).ok_or(NotFoundError::Process(id))?;
        if process.status.is_terminal() {
            return Ok(());
        }
        process.status = ExecutionStatus::Cancelled;
        self.running.remove(&id);
        self.finished_processes.push_back(id);
        events.publish(FlowEvent::ProcessCancelled { process: id, at: now });

        if let Some(chain) = process.chain.and_then(|c| self.chains.get_mut(c))
            && !chain.status.is_terminal()
        {
            let error = format!(
                "step {} process was cancelled",
                chain.current_step_index + 1
            );
            fail_chain(chain, error, now, events);
            self.finished_chains.push_back(chain.id);
        }
        self.evict_finished();
        Ok(())
    }

    /// Cancel a chain and its running process. Terminal chains are left as
    /// they are.
    pub fn cancel_chain_execution(
        &mut self,
        id: ChainExecutionId,
        now: Millis,
        events: &mut impl EventPublisher,
    ) -> Result<(), FlowError> {
        let chain = self
            .chains
            .get_mut(id)
            .ok_or(NotFoundError::ChainExecution(id))?;
        if chain.status.is_terminal() {
            return Ok(());
        }
        chain.status = ExecutionStatus::Cancelled;
        self.finished_chains.push_back(id);

        if let Some(process) = chain.current_process.and_then(|p| self.processes.get_mut(p))
            && !process.status.is_terminal()
        {
            process.status = ExecutionStatus::Cancelled;
            self.running.remove(&process.id);
            self.finished_processes.push_back(process.id);
            events.publish(FlowEvent::ProcessCancelled {
                process: process.id,
                at: now,
            });
        }
        events.publish(FlowEvent::ChainExecutionCancelled { execution: id, at: now });
        self.evict_finished();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// Advance every Active process by `dt`. Time left over when a chain
    /// step completes carries into the next step.
    pub fn advance(
        &mut self,
        ctx: &mut ConversionContext<'_>,
        dt: Millis,
        events: &mut impl EventPublisher,
    ) {
        let active: Vec<ProcessId> = self.running.iter().copied().collect();
        for id in active {
            self.advance_process(ctx, id, dt, events);
        }
        self.evict_finished();
    }

    fn advance_process(
        &mut self,
        ctx: &mut ConversionContext<'_>,
        id: ProcessId,
        dt: Millis,
        events: &mut impl EventPublisher,
    ) {
        let now = ctx.now;
        let mut current = id;
        let mut budget = dt;
        loop {
            let Some(process) = self.processes.get_mut(current) else {
                return;
            };
            if process.status != ExecutionStatus::Active {
                return;
            }
            let converter_up = ctx
                .registry
                .get_node(process.converter)
                .is_some_and(|n| n.active);
            if !converter_up {
                let error = format!("converter {} is unavailable", process.converter);
                tracing::warn!(process = ?current, %error, "failing process");
                self.fail_process(current, error, now, events);
                return;
            }

            process.elapsed = process.elapsed.saturating_add(budget);
            if process.elapsed < process.duration {
                process.progress = progress_ratio(process.elapsed, process.duration);
                return;
            }
            let carry = process.elapsed - process.duration;
            process.elapsed = process.duration;
            process.progress = Fixed64::ONE;
            process.status = ExecutionStatus::Completed;
            self.running.remove(&current);
            self.finished_processes.push_back(current);
            let (recipe, chain) = (process.recipe, process.chain);

            if let Some(def) = ctx.recipes.get(recipe) {
                ctx.store.add_outputs(&def.outputs, now);
            }
            events.publish(FlowEvent::ProcessCompleted {
                process: current,
                at: now,
            });

            let Some(chain) = chain else {
                return;
            };
            match self.next_chain_step(ctx, chain, events) {
                Some(next) => {
                    current = next;
                    budget = carry;
                }
                None => return,
            }
        }
    }

    /// Move a chain past its completed step: finish it, start the next
    /// step's process, or fail it if the next step cannot start.
    fn next_chain_step(
        &mut self,
        ctx: &mut ConversionContext<'_>,
        id: ChainExecutionId,
        events: &mut impl EventPublisher,
    ) -> Option<ProcessId> {
        let now = ctx.now;
        let chain = self.chains.get_mut(id)?;
        if chain.status.is_terminal() {
            return None;
        }
        chain.current_step_index += 1;
        let index = chain.current_step_index;
        let Some(&step) = chain.steps.get(index) else {
            chain.status = ExecutionStatus::Completed;
            chain.current_process = None;
            self.finished_chains.push_back(id);
            events.publish(FlowEvent::ChainExecutionCompleted { execution: id, at: now });
            tracing::debug!(execution = ?id, "chain execution completed");
            return None;
        };

        let spawned = self.spawn_process(ctx, step.converter, step.recipe, Some(id));
        let chain = self.chains.get_mut(id)?;
        match spawned {
            Ok(process) => {
                chain.current_process = Some(process);
                events.publish(FlowEvent::ProcessStarted {
                    process,
                    converter: step.converter,
                    recipe: step.recipe,
                    at: now,
                });
                Some(process)
            }
            Err(e) => {
                chain.current_process = None;
                fail_chain(chain, format!("step {} failed to start: {e}", index + 1), now, events);
                self.finished_chains.push_back(id);
                None
            }
        }
    }

    fn fail_process(
        &mut self,
        id: ProcessId,
        error: String,
        now: Millis,
        events: &mut impl EventPublisher,
    ) {
        let Some(process) = self.processes.get_mut(id) else {
            return;
        };
        process.status = ExecutionStatus::Failed;
        self.running.remove(&id);
        self.finished_processes.push_back(id);
        events.publish(FlowEvent::ProcessFailed { process: id, at: now });
        if let Some(chain) = process.chain.and_then(|c| self.chains.get_mut(c))
            && !chain.status.is_terminal()
        {
            fail_chain(chain, error, now, events);
            self.finished_chains.push_back(chain.id);
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_process_status(&self, id: ProcessId) -> Option<ProcessStatusReport> {
        self.processes.get(id).map(|p| ProcessStatusReport {
            recipe: p.recipe,
            progress: p.progress,
            status: p.status,
        })
    }

    pub fn get_chain_execution(&self, id: ChainExecutionId) -> Option<&ChainExecution> {
        self.chains.get(id)
    }

    /// All chain executions, oldest first.
    pub fn get_chain_executions(&self) -> Vec<ChainExecution> {
        let mut chains: Vec<ChainExecution> = self.chains.values().cloned().collect();
        chains.sort_by_key(|c| (c.started_at, c.id));
        chains
    }

}

fn fail_chain(
    chain: &mut ChainExecution,
    error: String,
    now: Millis,
    events: &mut impl EventPublisher,
) {
    tracing::debug!(execution = ?chain.id, %error, "chain execution failed");
    chain.status = ExecutionStatus::Failed;
    chain.error_message = Some(error.clone());
    events.publish(FlowEvent::ChainExecutionFailed {
        execution: chain.id,
        error,
        at: now,
    });
}

fn expect_status(
    actual: ExecutionStatus,
    required: ExecutionStatus,
    entity: &'static str,
    action: &'static str,
) -> Result<(), IllegalStateTransition> {
    if actual == required {
        Ok(())
    } else {
        Err(IllegalStateTransition {
            entity,
            action,
            from: actual.name(),
        })
    }
}

fn progress_ratio(elapsed: Millis, duration: Millis) -> Fixed64 {
    if duration == 0 {
        return Fixed64::ONE;
    }
    let ratio = I64F64::saturating_from_num(elapsed) / I64F64::saturating_from_num(duration);
    Fixed64::saturating_from_num(ratio).min(Fixed64::ONE)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::fixed::f64_to_fixed64 as fixed;
    use crate::network::{ConverterSpec, FlowNode, NodeRole};
    use crate::recipe::RecipeBookBuilder;
    use crate::state::ResourceState;

    const ORE: ResourceType = ResourceType(0);
    const PLATE: ResourceType = ResourceType(1);
    const CONVERTER: NodeId = NodeId(1);

    struct World {
        registry: NetworkRegistry,
        recipes: RecipeBook,
        store: ResourceStateStore,
        engine: ConversionEngine,
        events: Vec<FlowEvent>,
        now: Millis,
    }

    impl World {
        /// Recipes 0, 1, 2 take 5, 10 and 5 ms. Recipe 0 needs 2 ore.
        fn new() -> Self {
            let mut b = RecipeBookBuilder::new();
            b.register("smelt", vec![(ORE, fixed(2.0))], vec![(PLATE, fixed(1.0))], 5);
            b.register("roll", vec![], vec![(PLATE, fixed(2.0))], 10);
            b.register("cut", vec![], vec![], 5);
            let recipes = b.build().unwrap();

            let mut registry = NetworkRegistry::new();
            registry
                .register_node(FlowNode::new(
                    CONVERTER,
                    NodeRole::Converter(ConverterSpec {
                        efficiency: Fixed64::ONE,
                        recipes: vec![RecipeId(0), RecipeId(1), RecipeId(2)],
                    }),
                    [ORE, PLATE],
                    fixed(10.0),
                ))
                .unwrap();

            let mut store = ResourceStateStore::new(0);
            store
                .set_resource_state(ORE, ResourceState::with_stock(ORE, fixed(10.0), fixed(100.0)))
                .unwrap();
            store
                .set_resource_state(PLATE, ResourceState::with_stock(PLATE, Fixed64::ZERO, fixed(100.0)))
                .unwrap();

            Self {
                registry,
                recipes,
                store,
                engine: ConversionEngine::new(),
                events: Vec::new(),
                now: 0,
            }
        }

        fn ctx(&mut self) -> (ConversionContext<'_>, &mut ConversionEngine, &mut Vec<FlowEvent>) {
            (
                ConversionContext {
                    registry: &self.registry,
                    recipes: &self.recipes,
                    store: &mut self.store,
                    now: self.now,
                },
                &mut self.engine,
                &mut self.events,
            )
        }

        fn chain(&mut self, recipes: &[u32]) -> Result<ChainExecutionId, FlowError> {
            let steps = recipes
                .iter()
                .map(|&r| ChainStep {
                    converter: CONVERTER,
                    recipe: RecipeId(r),
                })
                .collect();
            let (mut ctx, engine, events) = self.ctx();
            engine.start_conversion_chain(&mut ctx, ChainId(7), steps, events)
        }

        fn advance(&mut self, dt: Millis) {
            self.now += dt;
            let (mut ctx, engine, events) = self.ctx();
            engine.advance(&mut ctx, dt, events);
        }

        fn chain_state(&self, id: ChainExecutionId) -> &ChainExecution {
            self.engine.get_chain_execution(id).unwrap()
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.events.iter().map(FlowEvent::kind).collect()
        }
    }

    #[test]
    fn chain_estimates_end_time_from_durations() {
        let mut w = World::new();
        let id = w.chain(&[0, 1, 2]).unwrap();
        let chain = w.chain_state(id);
        assert_eq!(chain.estimated_end_time, 20);
        assert_eq!(chain.status, ExecutionStatus::Active);
        assert!(chain.current_process.is_some());
        assert_eq!(
            w.kinds(),
            vec![EventKind::ChainExecutionStarted, EventKind::ProcessStarted]
        );
    }

    #[test]
    fn starting_consumes_inputs() {
        let mut w = World::new();
        w.chain(&[0]).unwrap();
        assert_eq!(w.store.get_resource_state(ORE, 0).current, fixed(8.0));
    }

    #[test]
    fn empty_chain_rejected() {
        let mut w = World::new();
        assert_eq!(
            w.chain(&[]),
            Err(FlowError::Validation(ValidationError::EmptyChain))
        );
    }

    #[test]
    fn unsupported_step_rejects_whole_chain() {
        let mut w = World::new();
        let err = w.chain(&[0, 9]).unwrap_err();
        assert!(matches!(
            err,
            FlowError::Validation(ValidationError::RecipeRejected { .. })
        ));
        assert!(w.engine.get_chain_executions().is_empty());
        assert_eq!(w.store.get_resource_state(ORE, 0).current, fixed(10.0));
    }

    #[test]
    fn insufficient_inputs_leave_no_chain() {
        let mut w = World::new();
        w.store
            .set_resource_state(ORE, ResourceState::with_stock(ORE, fixed(1.0), fixed(100.0)))
            .unwrap();
        assert!(matches!(
            w.chain(&[0]),
            Err(FlowError::Validation(ValidationError::InsufficientResources { .. }))
        ));
        assert!(w.engine.get_chain_executions().is_empty());
        assert!(w.events.is_empty());
    }

    #[test]
    fn chain_runs_to_completion_with_carry_over() {
        let mut w = World::new();
        let id = w.chain(&[0, 1, 2]).unwrap();
        w.advance(7);
        assert_eq!(w.chain_state(id).current_step_index, 1);
        let process = w.chain_state(id).current_process.unwrap();
        assert_eq!(w.engine.processes[process].elapsed, 2);

        w.advance(13);
        let chain = w.chain_state(id);
        assert_eq!(chain.status, ExecutionStatus::Completed);
        assert_eq!(w.now, chain.estimated_end_time);
        // 1 plate from smelt, 2 from roll
        assert_eq!(w.store.get_resource_state(PLATE, w.now).current, fixed(3.0));
    }

    #[test]
    fn progress_tracks_elapsed_time() {
        let mut w = World::new();
        let id = w.chain(&[1]).unwrap();
        w.advance(4);
        let process = w.chain_state(id).current_process.unwrap();
        let report = w.engine.get_process_status(process).unwrap();
        assert_eq!(report.progress, fixed(0.4));
        assert_eq!(report.status, ExecutionStatus::Active);
        assert_eq!(report.recipe, RecipeId(1));
    }

    #[test]
    fn cancelling_step_process_fails_chain() {
        let mut w = World::new();
        let id = w.chain(&[0, 1, 2]).unwrap();
        w.advance(5);
        let step_two = w.chain_state(id).current_process.unwrap();

        let now = w.now;
        w.engine
            .cancel_conversion_process(step_two, now, &mut w.events)
            .unwrap();
        let chain = w.chain_state(id);
        assert_eq!(chain.status, ExecutionStatus::Failed);
        assert!(chain.error_message.is_some());
        assert_eq!(
            w.engine.get_process_status(step_two).unwrap().status,
            ExecutionStatus::Cancelled
        );
    }

    #[test]
    fn cancel_after_completion_keeps_completed() {
        let mut w = World::new();
        let id = w.chain(&[2]).unwrap();
        let process = w.chain_state(id).current_process.unwrap();
        w.advance(5);

        w.engine.cancel_conversion_process(process, 5, &mut w.events).unwrap();
        assert_eq!(
            w.engine.get_process_status(process).unwrap().status,
            ExecutionStatus::Completed
        );
        assert_eq!(w.chain_state(id).status, ExecutionStatus::Completed);
    }

    #[test]
    fn pause_and_resume_chain() {
        let mut w = World::new();
        let id = w.chain(&[1]).unwrap();
        w.engine.pause_chain_execution(id, 0, &mut w.events).unwrap();
        let process = w.chain_state(id).current_process.unwrap();
        assert_eq!(
            w.engine.get_process_status(process).unwrap().status,
            ExecutionStatus::Paused
        );

        w.advance(50);
        assert_eq!(w.engine.processes[process].elapsed, 0);

        w.engine.resume_chain_execution(id, 50, &mut w.events).unwrap();
        w.advance(10);
        assert_eq!(w.chain_state(id).status, ExecutionStatus::Completed);
    }

    #[test]
    fn illegal_transitions_are_reported_without_mutation() {
        let mut w = World::new();
        let id = w.chain(&[1]).unwrap();
        let err = w.engine.resume_chain_execution(id, 0, &mut w.events).unwrap_err();
        assert_eq!(
            err,
            FlowError::IllegalTransition(IllegalStateTransition {
                entity: "chain execution",
                action: "resume",
                from: "Active",
            })
        );
        assert_eq!(w.chain_state(id).status, ExecutionStatus::Active);
    }

    #[test]
    fn pausing_chain_process_pauses_chain() {
        let mut w = World::new();
        let id = w.chain(&[1]).unwrap();
        let process = w.chain_state(id).current_process.unwrap();
        w.engine.pause_conversion_process(process, 0, &mut w.events).unwrap();
        assert_eq!(w.chain_state(id).status, ExecutionStatus::Paused);
        w.engine.resume_conversion_process(process, 0, &mut w.events).unwrap();
        assert_eq!(w.chain_state(id).status, ExecutionStatus::Active);
    }

    #[test]
    fn cancel_chain_is_idempotent() {
        let mut w = World::new();
        let id = w.chain(&[1]).unwrap();
        w.engine.cancel_chain_execution(id, 0, &mut w.events).unwrap();
        let emitted = w.events.len();
        w.engine.cancel_chain_execution(id, 0, &mut w.events).unwrap();
        assert_eq!(w.events.len(), emitted);
        assert_eq!(w.chain_state(id).status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let mut w = World::new();
        let id = w.chain(&[1]).unwrap();
        w.engine.cancel_chain_execution(id, 0, &mut w.events).unwrap();

        let mut other = ConversionEngine::new();
        assert!(matches!(
            other.cancel_chain_execution(id, 0, &mut w.events),
            Err(FlowError::NotFound(NotFoundError::ChainExecution(_)))
        ));
        let process = w.chain_state(id).current_process.unwrap();
        assert!(other.pause_conversion_process(process, 0, &mut w.events).is_err());
    }

    #[test]
    fn converter_going_inactive_fails_chain() {
        let mut w = World::new();
        let id = w.chain(&[1, 2]).unwrap();
        w.registry.set_node_active(CONVERTER, false).unwrap();
        w.advance(1);
        let chain = w.chain_state(id);
        assert_eq!(chain.status, ExecutionStatus::Failed);
        assert!(chain.error_message.as_deref().unwrap().contains("unavailable"));
        assert!(w.kinds().contains(&EventKind::ProcessFailed));
    }

    #[test]
    fn next_step_failing_to_start_fails_chain() {
        let mut w = World::new();
        w.store
            .set_resource_state(ORE, ResourceState::with_stock(ORE, fixed(2.0), fixed(100.0)))
            .unwrap();
        // second smelt has no ore left
        let id = w.chain(&[0, 0]).unwrap();
        w.advance(5);
        let chain = w.chain_state(id);
        assert_eq!(chain.status, ExecutionStatus::Failed);
        assert_eq!(chain.current_step_index, 1);
        assert!(chain.current_process.is_none());
    }

    #[test]
    fn standalone_process_completes() {
        let mut w = World::new();
        let (mut ctx, engine, events) = w.ctx();
        let process = engine
            .start_conversion_process(&mut ctx, CONVERTER, RecipeId(1), events)
            .unwrap();
        w.advance(10);
        assert_eq!(
            w.engine.get_process_status(process).unwrap().status,
            ExecutionStatus::Completed
        );
        assert!(w.engine.running.is_empty());
    }

    #[test]
    fn only_recent_terminal_entries_are_retained() {
        let mut w = World::new();
        w.engine = ConversionEngine::with_retention(4);
        let ids: Vec<ChainExecutionId> = (0..10).map(|_| w.chain(&[2]).unwrap()).collect();
        w.advance(5);

        let kept = w.engine.get_chain_executions();
        assert_eq!(kept.len(), 4);
        assert!(kept.iter().all(|c| c.status == ExecutionStatus::Completed));
        assert!(w.engine.get_chain_execution(ids[5]).is_none());
        assert!(w.engine.get_chain_execution(ids[9]).is_some());
        assert_eq!(w.engine.processes.len(), 4);
        assert!(w.engine.running.is_empty());
    }

    #[test]
    fn unfinished_entries_are_never_evicted() {
        let mut w = World::new();
        w.engine = ConversionEngine::with_retention(0);
        let running = w.chain(&[1]).unwrap();
        let paused = w.chain(&[1]).unwrap();
        w.engine.pause_chain_execution(paused, 0, &mut w.events).unwrap();
        let done = w.chain(&[2]).unwrap();
        w.advance(5);

        assert!(w.engine.get_chain_execution(done).is_none());
        assert_eq!(w.chain_state(running).status, ExecutionStatus::Active);
        assert_eq!(w.chain_state(paused).status, ExecutionStatus::Paused);
        assert_eq!(w.engine.running.len(), 1);
        assert_eq!(w.engine.processes.len(), 2);
    }
}
