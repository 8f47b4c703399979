//! Resflow Core -- a resource flow optimization engine.
//!
//! This crate models a network of resource producers, consumers, storage
//! pools and converters, and periodically recomputes the flow rates between
//! them so that production and consumption stay balanced under changing
//! priorities and capacities.
//!
//! # Optimization Pass
//!
//! Each call to [`engine::FlowEngine::optimize_flows`] runs one single-shot
//! pass over a snapshot of the network:
//!
//! 1. **Converters** -- apply efficiency to converter output, in topological
//!    order so chained converters compound.
//! 2. **Availability** -- stock plus production per resource type.
//! 3. **Demand** -- requested consumption per resource type.
//! 4. **Assignment** -- connection rates; scarce resources are allocated by
//!    consumer priority, then proportionally.
//! 5. **Bookkeeping** -- resource states updated, transfers recorded in the
//!    history ledger, a `FlowsOptimized` event published.
//!
//! Every phase runs through the [`batch::BatchScheduler`], so large networks
//! are processed in bounded slices without changing the result.
//!
//! # Ownership
//!
//! Components reference each other by id only:
//!
//! ```rust,ignore
//! let (mut engine, clock) = test_utils::default_engine();
//! engine.register_node(producer(1, minerals(), 10.0))?;
//! engine.register_node(consumer(2, minerals(), 15.0, 1))?;
//! engine.register_connection(connection(1, 1, 2, minerals(), 20.0))?;
//! let result = engine.optimize_flows();
//! ```
//!
//! # Key Types
//!
//! - [`engine::FlowEngine`] -- Owns every component; the public API.
//! - [`network::NetworkRegistry`] -- Nodes and connections in slotmap arenas.
//! - [`state::ResourceStateStore`] -- Per-type stock and rates with a TTL cache.
//! - [`optimizer::FlowOptimizer`] -- The greedy, priority-ordered allocator.
//! - [`conversion::ConversionEngine`] -- Recipe processes and multi-step chains.
//! - [`history::HistoryLedger`] -- Bounded record of transfers.
//! - [`event::EventPublisher`] -- Injected event sink; [`event::EventBus`]
//!   is the bundled implementation.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod batch;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod dirty;
pub mod engine;
pub mod error;
pub mod event;
pub mod fixed;
pub mod history;
pub mod id;
pub mod network;
pub mod optimizer;
pub mod recipe;
pub mod state;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
