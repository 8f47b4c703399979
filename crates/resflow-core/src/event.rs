//! Typed engine events and the publisher seam.
//!
//! The engine publishes every structural change and every process/chain
//! lifecycle transition through an injected [`EventPublisher`]. Payloads
//! carry ids and the new status only; observers re-query the engine for
//! detail.
//!
//! [`EventBus`] is the bundled publisher: a queue of pending events,
//! passive listeners with priorities and filters, and batch delivery on
//! [`EventPublisher::flush`] in the order events were published.

use crate::fixed::Millis;
use crate::id::*;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// An engine event. All events carry the engine time at which they occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    // -- Structure --
    NodeAdded {
        node: NodeId,
        at: Millis,
    },
    NodeRemoved {
        node: NodeId,
        at: Millis,
    },
    NodeUpdated {
        node: NodeId,
        at: Millis,
    },
    ConnectionAdded {
        connection: ConnectionId,
        source: NodeId,
        target: NodeId,
        at: Millis,
    },
    ConnectionRemoved {
        connection: ConnectionId,
        at: Millis,
    },

    // -- Optimization --
    FlowsOptimized {
        changed: usize,
        bottlenecks: usize,
        at: Millis,
    },

    // -- Process lifecycle --
    ProcessStarted {
        process: ProcessId,
        converter: NodeId,
        recipe: RecipeId,
        at: Millis,
    },
    ProcessPaused {
        process: ProcessId,
        at: Millis,
    },
    ProcessResumed {
        process: ProcessId,
        at: Millis,
    },
    ProcessCancelled {
        process: ProcessId,
        at: Millis,
    },
    ProcessCompleted {
        process: ProcessId,
        at: Millis,
    },
    ProcessFailed {
        process: ProcessId,
        at: Millis,
    },

    // -- Chain lifecycle --
    ChainExecutionStarted {
        execution: ChainExecutionId,
        chain: ChainId,
        at: Millis,
    },
    ChainExecutionPaused {
        execution: ChainExecutionId,
        at: Millis,
    },
    ChainExecutionResumed {
        execution: ChainExecutionId,
        at: Millis,
    },
    ChainExecutionCancelled {
        execution: ChainExecutionId,
        at: Millis,
    },
    ChainExecutionCompleted {
        execution: ChainExecutionId,
        at: Millis,
    },
    ChainExecutionFailed {
        execution: ChainExecutionId,
        error: String,
        at: Millis,
    },
}

/// Discriminant tag for event types, used for suppression and buffering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    NodeUpdated,
    ConnectionAdded,
    ConnectionRemoved,
    FlowsOptimized,
    ProcessStarted,
    ProcessPaused,
    ProcessResumed,
    ProcessCancelled,
    ProcessCompleted,
    ProcessFailed,
    ChainExecutionStarted,
    ChainExecutionPaused,
    ChainExecutionResumed,
    ChainExecutionCancelled,
    ChainExecutionCompleted,
    ChainExecutionFailed,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 18;

impl FlowEvent {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            FlowEvent::NodeAdded { .. } => EventKind::NodeAdded,
            FlowEvent::NodeRemoved { .. } => EventKind::NodeRemoved,
            FlowEvent::NodeUpdated { .. } => EventKind::NodeUpdated,
            FlowEvent::ConnectionAdded { .. } => EventKind::ConnectionAdded,
            FlowEvent::ConnectionRemoved { .. } => EventKind::ConnectionRemoved,
            FlowEvent::FlowsOptimized { .. } => EventKind::FlowsOptimized,
            FlowEvent::ProcessStarted { .. } => EventKind::ProcessStarted,
            FlowEvent::ProcessPaused { .. } => EventKind::ProcessPaused,
            FlowEvent::ProcessResumed { .. } => EventKind::ProcessResumed,
            FlowEvent::ProcessCancelled { .. } => EventKind::ProcessCancelled,
            FlowEvent::ProcessCompleted { .. } => EventKind::ProcessCompleted,
            FlowEvent::ProcessFailed { .. } => EventKind::ProcessFailed,
            FlowEvent::ChainExecutionStarted { .. } => EventKind::ChainExecutionStarted,
            FlowEvent::ChainExecutionPaused { .. } => EventKind::ChainExecutionPaused,
            FlowEvent::ChainExecutionResumed { .. } => EventKind::ChainExecutionResumed,
            FlowEvent::ChainExecutionCancelled { .. } => EventKind::ChainExecutionCancelled,
            FlowEvent::ChainExecutionCompleted { .. } => EventKind::ChainExecutionCompleted,
            FlowEvent::ChainExecutionFailed { .. } => EventKind::ChainExecutionFailed,
        }
    }
}

impl EventKind {
    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// Publisher seam
// ---------------------------------------------------------------------------

/// Where the engine sends its events. Implemented by [`EventBus`]; hosts can
/// plug in their own bus or channel.
pub trait EventPublisher {
    /// Accept one event. Must not call back into the engine.
    fn publish(&mut self, event: FlowEvent);

    /// Called by the engine at the end of every public operation. Buffered
    /// publishers deliver here.
    fn flush(&mut self) {}
}

impl EventPublisher for Vec<FlowEvent> {
    fn publish(&mut self, event: FlowEvent) {
        self.push(event);
    }
}

// ---------------------------------------------------------------------------
// EventBuffer: pre-allocated ring buffer
// ---------------------------------------------------------------------------

/// A pre-allocated ring buffer for events. Fixed capacity; when full, the
/// oldest events are dropped.
#[derive(Debug)]
pub struct EventBuffer {
    events: Vec<Option<FlowEvent>>,
    /// Write position (wraps around).
    head: usize,
    len: usize,
}

impl EventBuffer {
    /// Create a new ring buffer with the given capacity.
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    /// Push an event into the ring buffer. If full, the oldest event is dropped.
    pub fn push(&mut self, event: FlowEvent) {
        self.events[self.head] = Some(event);
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    pub fn capacity(&self) -> usize {
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over events in order from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &FlowEvent> + '_ {
        let start = if self.len < self.capacity() {
            0
        } else {
            self.head
        };
        let capacity = self.capacity();
        (0..self.len).filter_map(move |i| self.events[(start + i) % capacity].as_ref())
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&FlowEvent) + Send>;

/// Optional predicate that filters events for a listener.
pub type EventFilter = Box<dyn Fn(&FlowEvent) -> bool + Send>;

/// Priority level for listeners. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListenerPriority {
    Pre = 0,
    Normal = 1,
    Post = 2,
}

struct ListenerEntry {
    listener: PassiveListener,
    priority: ListenerPriority,
    filter: Option<EventFilter>,
    insertion_order: u64,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("priority", &self.priority)
            .field("filtered", &self.filter.is_some())
            .field("insertion_order", &self.insertion_order)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Buffered publisher: pending events in publish order, listener lists and
/// suppression flags. On `flush`/`deliver` each pending event goes to the
/// listeners of its kind, oldest event first.
pub struct EventBus {
    pending: Vec<FlowEvent>,
    suppressed: [bool; EVENT_KIND_COUNT],
    /// Events accepted per kind since creation.
    emitted: [u64; EVENT_KIND_COUNT],
    listeners: [Vec<ListenerEntry>; EVENT_KIND_COUNT],
    /// Events delivered so far, kept for observers that poll instead of
    /// subscribing. Bounded by the capacity given to [`EventBus::new`].
    delivered: EventBuffer,
    next_insertion_order: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("pending", &self.pending.len())
            .field("suppressed", &self.suppressed)
            .field("emitted", &self.emitted)
            .field("delivered_capacity", &self.delivered.capacity())
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Create a new event bus that remembers up to `delivered_capacity`
    /// delivered events.
    pub fn new(delivered_capacity: usize) -> Self {
        Self {
            pending: Vec::new(),
            suppressed: [false; EVENT_KIND_COUNT],
            emitted: [0; EVENT_KIND_COUNT],
            listeners: std::array::from_fn(|_| Vec::new()),
            delivered: EventBuffer::new(delivered_capacity),
            next_insertion_order: 0,
        }
    }

    /// Suppress an event kind. Suppressed events are never queued, and any
    /// already pending are discarded.
    pub fn suppress(&mut self, kind: EventKind) {
        self.suppressed[kind.index()] = true;
        self.pending.retain(|event| event.kind() != kind);
    }

    pub fn is_suppressed(&self, kind: EventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Queue an event. No-ops if the kind is suppressed.
    pub fn emit(&mut self, event: FlowEvent) {
        let idx = event.kind().index();
        if self.suppressed[idx] {
            return;
        }
        self.emitted[idx] += 1;
        self.pending.push(event);
    }

    /// Register a listener for an event kind with Normal priority and no filter.
    pub fn on(&mut self, kind: EventKind, listener: PassiveListener) {
        self.on_filtered(kind, ListenerPriority::Normal, None, listener);
    }

    /// Register a listener with explicit priority and optional filter.
    pub fn on_filtered(
        &mut self,
        kind: EventKind,
        priority: ListenerPriority,
        filter: Option<EventFilter>,
        listener: PassiveListener,
    ) {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let list = &mut self.listeners[kind.index()];
        list.push(ListenerEntry {
            listener,
            priority,
            filter,
            insertion_order: order,
        });
        list.sort_by_key(|entry| (entry.priority, entry.insertion_order));
    }

    /// Deliver all pending events to listeners in publish order, then clear
    /// the queue.
    pub fn deliver(&mut self) {
        for event in std::mem::take(&mut self.pending) {
            for entry in &mut self.listeners[event.kind().index()] {
                if let Some(ref filter) = entry.filter
                    && !filter(&event)
                {
                    continue;
                }
                (entry.listener)(&event);
            }
            self.delivered.push(event);
        }
    }

    /// Events queued but not yet delivered.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Total events ever emitted for a kind (including delivered ones).
    pub fn total_emitted(&self, kind: EventKind) -> u64 {
        self.emitted[kind.index()]
    }

    /// Recently delivered events, oldest first.
    pub fn delivered(&self) -> impl Iterator<Item = &FlowEvent> + '_ {
        self.delivered.iter()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventPublisher for EventBus {
    fn publish(&mut self, event: FlowEvent) {
        self.emit(event);
    }

    fn flush(&mut self) {
        self.deliver();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
