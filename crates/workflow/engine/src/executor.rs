//! Executors: logical threads of control and the arena that owns them
//!
//! Parent/child links are handles into the arena. A parent only counts its
//! children for completion; it never owns them.

use flowsim_types::{EntityId, ExecutorId, FlowError, FlowId, FlowResult, SimTime, WorkToken};
use std::collections::{BTreeMap, BTreeSet};

/// One continuation advancing an entity through the graph
#[derive(Clone, Debug)]
pub struct Executor {
    pub id: ExecutorId,
    pub entity: EntityId,
    /// Executor parked on the structured flow whose body this one runs in
    pub parent: Option<ExecutorId>,
    /// Live children, counted for structured completion
    pub children: BTreeSet<ExecutorId>,
    pub token: WorkToken,
    /// Node being requested, or the structured flow this executor waits on
    pub current: Option<FlowId>,
    /// Node that dispatched this executor to `current`
    pub last: Option<FlowId>,
    /// Global order in which arrivals happened
    pub arrival_order: u64,
    pub arrival_time: SimTime,
    /// Remaining duration of a pending delay
    pub time_left: SimTime,
    /// Whether a live child reached the exit of the structured flow
    pub exit_live: bool,
}

impl Executor {
    fn new(id: ExecutorId, entity: EntityId, parent: Option<ExecutorId>, token: WorkToken) -> Self {
        Self {
            id,
            entity,
            parent,
            children: BTreeSet::new(),
            token,
            current: None,
            last: None,
            arrival_order: 0,
            arrival_time: 0.0,
            time_left: 0.0,
            exit_live: false,
        }
    }

    pub fn is_live(&self) -> bool {
        self.token.is_executable()
    }
}

/// Arena of executors addressed by [`ExecutorId`].
///
/// Handles are handed out from a counter and never reused, so a stale
/// handle reports `ExecutorNotFound` instead of aliasing a newer executor.
/// Retired executors are dropped.
#[derive(Debug, Default)]
pub struct ExecutorArena {
    executors: BTreeMap<ExecutorId, Executor>,
    next: u32,
}

impl ExecutorArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an executor and register it with its parent
    pub fn spawn(
        &mut self,
        entity: EntityId,
        parent: Option<ExecutorId>,
        token: WorkToken,
    ) -> FlowResult<ExecutorId> {
        let id = ExecutorId(self.next);
        let next = self.next.checked_add(1).ok_or(FlowError::ExecutorsExhausted)?;
        if let Some(parent) = parent {
            self.get_mut(parent)?.children.insert(id);
        }
        self.executors.insert(id, Executor::new(id, entity, parent, token));
        self.next = next;
        Ok(id)
    }

    pub fn get(&self, id: ExecutorId) -> FlowResult<&Executor> {
        self.executors.get(&id).ok_or(FlowError::ExecutorNotFound(id))
    }

    pub fn get_mut(&mut self, id: ExecutorId) -> FlowResult<&mut Executor> {
        self.executors
            .get_mut(&id)
            .ok_or(FlowError::ExecutorNotFound(id))
    }

    /// Remove an executor and detach it from its parent.
    ///
    /// Returns the retired executor and whether its parent now has no
    /// children left.
    pub fn retire(&mut self, id: ExecutorId) -> FlowResult<(Executor, bool)> {
        let executor = self
            .executors
            .remove(&id)
            .ok_or(FlowError::ExecutorNotFound(id))?;

        let mut parent_idle = false;
        if let Some(parent) = executor.parent {
            let parent = self.get_mut(parent)?;
            parent.children.remove(&id);
            parent_idle = parent.children.is_empty();
        }
        Ok((executor, parent_idle))
    }

    pub fn contains(&self, id: ExecutorId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of executors not yet retired
    pub fn live_count(&self) -> usize {
        self.executors.len()
    }

    /// Executors not yet retired, in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Executor> {
        self.executors.values()
    }
}
