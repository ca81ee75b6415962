//! Flow observers: the notification sink for node activity
//!
//! The engine reports every state change to its observers. Observers are
//! purely passive; nothing they do feeds back into execution. The
//! [`EventLog`] keeps an ordered record that can be queried or replayed,
//! the [`TracingObserver`] forwards events to `tracing`.

use flowsim_types::{EntityId, ExecutorId, FlowId, SimTime};
use serde::{Deserialize, Serialize};

/// Something that happened at a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowEventKind {
    /// Live arrival accepted, node work begins
    Started,
    /// Node work done, continuation dispatched
    Finished,
    /// Entry guard rejected a live token
    Cancelled,
    /// Dead token passed through
    Skipped,
    /// Token re-arrived at a node on its dead path and was dropped
    Revisited,
    /// Executor parked (delay, resource wait or signal wait)
    Suspended,
    /// Arrival consumed by a merge without continuing
    Absorbed,
    /// Merge fired a continuation
    Fired { live: bool },
    EntityStarted,
    EntityFinished,
}

impl std::fmt::Display for FlowEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Finished => write!(f, "finished"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Skipped => write!(f, "skipped"),
            Self::Revisited => write!(f, "revisited"),
            Self::Suspended => write!(f, "suspended"),
            Self::Absorbed => write!(f, "absorbed"),
            Self::Fired { live: true } => write!(f, "fired live"),
            Self::Fired { live: false } => write!(f, "fired dead"),
            Self::EntityStarted => write!(f, "entity started"),
            Self::EntityFinished => write!(f, "entity finished"),
        }
    }
}

/// A notification emitted by the engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowEvent {
    pub time: SimTime,
    pub entity: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<FlowId>,
    pub kind: FlowEventKind,
}

/// Receives engine notifications
pub trait FlowObserver {
    fn on_event(&mut self, event: &FlowEvent);
}

// ── Tracing ──────────────────────────────────────────────────────────

/// Forwards every event to `tracing` at debug level
#[derive(Clone, Debug, Default)]
pub struct TracingObserver;

impl FlowObserver for TracingObserver {
    fn on_event(&mut self, event: &FlowEvent) {
        tracing::debug!(
            time = event.time,
            entity = %event.entity,
            executor = ?event.executor,
            node = ?event.node,
            event = %event.kind,
            "Flow event"
        );
    }
}

// ── Event log ────────────────────────────────────────────────────────

/// Ordered in-memory record of flow events
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Vec<FlowEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: FlowEvent) {
        tracing::trace!(entity = %event.entity, event = %event.kind, "Flow event recorded");
        self.events.push(event);
    }

    pub fn events(&self) -> &[FlowEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Events of one entity, in order
    pub fn for_entity(&self, entity: EntityId) -> Vec<&FlowEvent> {
        self.events.iter().filter(|e| e.entity == entity).collect()
    }

    /// Events at one node, in order
    pub fn for_node(&self, node: FlowId) -> Vec<&FlowEvent> {
        self.events.iter().filter(|e| e.node == Some(node)).collect()
    }

    /// How many times `kind` happened at `node`
    pub fn count(&self, node: FlowId, kind: &FlowEventKind) -> usize {
        self.events
            .iter()
            .filter(|e| e.node == Some(node) && &e.kind == kind)
            .count()
    }

    /// How many times `kind` happened at `node` for `entity`
    pub fn count_for(&self, entity: EntityId, node: FlowId, kind: &FlowEventKind) -> usize {
        self.events
            .iter()
            .filter(|e| e.entity == entity && e.node == Some(node) && &e.kind == kind)
            .count()
    }

    /// Times at which `kind` happened at `node`
    pub fn times(&self, node: FlowId, kind: &FlowEventKind) -> Vec<SimTime> {
        self.events
            .iter()
            .filter(|e| e.node == Some(node) && &e.kind == kind)
            .map(|e| e.time)
            .collect()
    }
}

impl FlowObserver for EventLog {
    fn on_event(&mut self, event: &FlowEvent) {
        self.record(event.clone());
    }
}
