//! Flow Engine: drives entities through a flow graph on a discrete clock
//!
//! The engine owns all run-time state of a simulation run:
//! 1. The executor arena and the entity registry
//! 2. Merge-control records keyed by merge node and entity
//! 3. Loop counters, resource waiters and signal waiters
//! 4. The scheduler every continuation is handed back to
//!
//! Nodes never call each other. An arrival is dispatched, the node does
//! its work, and its continuations are scheduled as new arrivals at the
//! current instant (or later, for delays). Events sharing a timestamp run
//! in the order they were scheduled.

use crate::leaf::{ActionLeaf, LeafContext, LeafOutcome};
use crate::merge::{InstantEquivalence, Merger};
use crate::merge_control::{MergeArrival, MergeControl, MergeControlTable};
use crate::resources::{select_workgroup, CapacityPool, ResourcePool, ResourceRequest};
use crate::scheduler::{EventKind, EventQueue, Scheduler};
use crate::split::Splitter;
use crate::variates::{SeededVariates, VariateSource};
use crate::{EngineConfig, EventLog, ExecutorArena, FlowEvent, FlowEventKind, FlowObserver};
use flowsim_types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Counters describing a finished (or paused) run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub events_processed: u64,
    pub final_time: SimTime,
    pub entities_started: usize,
    pub entities_finished: usize,
    pub pending_events: usize,
    pub live_executors: usize,
}

#[derive(Debug)]
struct EntityState {
    entity: Entity,
    /// Root executors (no parent) not yet retired
    roots: usize,
}

#[derive(Clone, Copy, Debug)]
struct ResourceWaiter {
    node: FlowId,
    executor: ExecutorId,
}

/// Interprets a [`FlowGraph`] for any number of entities
pub struct FlowEngine {
    graph: Arc<FlowGraph>,
    config: EngineConfig,
    scheduler: Box<dyn Scheduler>,
    pool: Box<dyn ResourcePool>,
    variates: Box<dyn VariateSource>,
    observers: Vec<Box<dyn FlowObserver>>,
    log: EventLog,
    same_instant: Arc<InstantEquivalence>,
    executors: ExecutorArena,
    entities: BTreeMap<EntityId, EntityState>,
    merges: MergeControlTable,
    /// Remaining iterations of each running for-loop
    loop_counters: BTreeMap<(FlowId, ExecutorId), i64>,
    resource_waiters: VecDeque<ResourceWaiter>,
    signal_waiters: BTreeMap<(FlowId, EntityId), Vec<ExecutorId>>,
    now: SimTime,
    arrivals: u64,
    events_processed: u64,
    entities_finished: usize,
}

impl FlowEngine {
    /// Create an engine with the reference event queue, an empty capacity
    /// pool and seeded variates
    pub fn new(graph: Arc<FlowGraph>, config: EngineConfig) -> Self {
        let tolerance = config.instant_tolerance;
        let variates = SeededVariates::new(config.seed);
        Self {
            graph,
            config,
            scheduler: Box::new(EventQueue::new()),
            pool: Box::new(CapacityPool::new()),
            variates: Box::new(variates),
            observers: Vec::new(),
            log: EventLog::new(),
            same_instant: Arc::new(move |a: SimTime, b: SimTime| (a - b).abs() <= tolerance),
            executors: ExecutorArena::new(),
            entities: BTreeMap::new(),
            merges: MergeControlTable::new(),
            loop_counters: BTreeMap::new(),
            resource_waiters: VecDeque::new(),
            signal_waiters: BTreeMap::new(),
            now: 0.0,
            arrivals: 0,
            events_processed: 0,
            entities_finished: 0,
        }
    }

    pub fn with_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Box::new(scheduler);
        self
    }

    pub fn with_resource_pool(mut self, pool: impl ResourcePool + 'static) -> Self {
        self.pool = Box::new(pool);
        self
    }

    pub fn with_variates(mut self, variates: impl VariateSource + 'static) -> Self {
        self.variates = Box::new(variates);
        self
    }

    pub fn with_observer(mut self, observer: impl FlowObserver + 'static) -> Self {
        self.observers.push(Box::new(observer));
        self
    }

    /// Replace the predicate deciding whether two simple-merge passes
    /// happen at the same instant
    pub fn with_instant_equivalence<F>(mut self, same_instant: F) -> Self
    where
        F: Fn(SimTime, SimTime) -> bool + Send + Sync + 'static,
    {
        self.same_instant = Arc::new(same_instant);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn entity(&self, id: EntityId) -> FlowResult<&Entity> {
        self.entities
            .get(&id)
            .map(|state| &state.entity)
            .ok_or(FlowError::EntityNotFound(id))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().map(|state| &state.entity)
    }

    pub fn is_finished(&self, id: EntityId) -> bool {
        self.entity(id).is_ok_and(Entity::is_finished)
    }

    pub fn event_log(&self) -> &EventLog {
        &self.log
    }

    pub fn executors(&self) -> &ExecutorArena {
        &self.executors
    }

    pub fn live_executors(&self) -> usize {
        self.executors.live_count()
    }

    /// Merge-control records still held for in-flight entities
    pub fn merge_records(&self) -> &MergeControlTable {
        &self.merges
    }

    /// Executors waiting for a resource grant
    pub fn waiting_on_resources(&self) -> usize {
        self.resource_waiters.len()
    }

    /// Executors of `entity` parked at a wait-for-signal node
    pub fn waiting_for_signal(&self, node: FlowId, entity: EntityId) -> usize {
        self.signal_waiters.get(&(node, entity)).map_or(0, Vec::len)
    }

    pub fn resource_pool_mut(&mut self) -> &mut dyn ResourcePool {
        self.pool.as_mut()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            events_processed: self.events_processed,
            final_time: self.now,
            entities_started: self.entities.len(),
            entities_finished: self.entities_finished,
            pending_events: self.scheduler.len(),
            live_executors: self.executors.live_count(),
        }
    }

    // ── Driving the run ──────────────────────────────────────────────

    /// Create an entity whose root executor arrives at `initial` at `at`
    pub fn start_entity(
        &mut self,
        initial: FlowId,
        attributes: BTreeMap<String, f64>,
        at: SimTime,
    ) -> FlowResult<EntityId> {
        if self.graph.node(initial)?.as_merge().is_some() {
            return Err(FlowError::StartAtMerge(initial));
        }
        let id = EntityId(self.entities.len() as u32);
        let mut entity = Entity::new(id, at);
        entity.attributes = attributes;
        self.entities.insert(id, EntityState { entity, roots: 0 });

        let executor = self.spawn_executor(id, None, WorkToken::live(), None)?;
        let at = at.max(self.now);
        self.scheduler.schedule(
            at,
            EventKind::Arrival {
                node: initial,
                executor,
            },
        );
        debug!(entity = %id, node = %initial, time = at, "Entity started");
        self.notify(id, Some(executor), Some(initial), FlowEventKind::EntityStarted);
        Ok(id)
    }

    /// Dispatch the next event. Returns `false` when the queue is empty.
    pub fn step(&mut self) -> FlowResult<bool> {
        if let Some(max) = self.config.max_events {
            if self.events_processed >= max && !self.scheduler.is_empty() {
                return Err(FlowError::EventBudgetExceeded(max));
            }
        }
        let Some(event) = self.scheduler.pop_next() else {
            return Ok(false);
        };
        self.now = self.now.max(event.time);
        self.events_processed += 1;

        match event.kind {
            EventKind::Arrival { node, executor } => self.request(node, executor)?,
            EventKind::Resume { node, executor } => self.resume(node, executor)?,
            EventKind::Generate {
                node,
                source,
                remaining,
            } => self.generate(node, source, remaining)?,
        }
        Ok(true)
    }

    /// Run until no events are left
    pub fn run(&mut self) -> FlowResult<RunSummary> {
        while self.step()? {}
        let summary = self.summary();
        info!(
            events = summary.events_processed,
            time = summary.final_time,
            finished = summary.entities_finished,
            "Flow run completed"
        );
        Ok(summary)
    }

    /// Run every event due at or before `until`, then advance the clock
    pub fn run_until(&mut self, until: SimTime) -> FlowResult<RunSummary> {
        while self.scheduler.peek_time().is_some_and(|t| t <= until) {
            self.step()?;
        }
        self.now = self.now.max(until);
        Ok(self.summary())
    }

    /// Wake every executor of `entity` parked at `node`. Returns how many
    /// were resumed.
    pub fn signal(&mut self, node: FlowId, entity: EntityId) -> FlowResult<usize> {
        let waiting = self.signal_waiters.remove(&(node, entity)).unwrap_or_default();
        for executor in &waiting {
            self.scheduler
                .schedule(self.now, EventKind::Resume { node, executor: *executor });
        }
        debug!(node = %node, entity = %entity, resumed = waiting.len(), "Signal delivered");
        Ok(waiting.len())
    }

    /// Wake one specific executor parked at `node`
    pub fn signal_executor(&mut self, node: FlowId, executor: ExecutorId) -> FlowResult<bool> {
        let entity = self.executors.get(executor)?.entity;
        let Some(waiting) = self.signal_waiters.get_mut(&(node, entity)) else {
            return Ok(false);
        };
        let Some(position) = waiting.iter().position(|e| *e == executor) else {
            return Ok(false);
        };
        waiting.remove(position);
        if waiting.is_empty() {
            self.signal_waiters.remove(&(node, entity));
        }
        self.scheduler
            .schedule(self.now, EventKind::Resume { node, executor });
        Ok(true)
    }

    /// Retry every deferred resource request, e.g. after the pool grew.
    /// Returns how many were granted.
    pub fn notify_resources_available(&mut self) -> FlowResult<usize> {
        self.retry_resource_waiters()
    }

    // ── Notifications ────────────────────────────────────────────────

    fn notify(
        &mut self,
        entity: EntityId,
        executor: Option<ExecutorId>,
        node: Option<FlowId>,
        kind: FlowEventKind,
    ) {
        let event = FlowEvent {
            time: self.now,
            entity,
            executor,
            node,
            kind,
        };
        for observer in &mut self.observers {
            observer.on_event(&event);
        }
        if self.config.record_events {
            self.log.record(event);
        }
    }

    // ── Executor lifecycle ───────────────────────────────────────────

    fn spawn_executor(
        &mut self,
        entity: EntityId,
        parent: Option<ExecutorId>,
        token: WorkToken,
        last: Option<FlowId>,
    ) -> FlowResult<ExecutorId> {
        let id = self.executors.spawn(entity, parent, token)?;
        self.executors.get_mut(id)?.last = last;
        if parent.is_none() {
            self.entities
                .get_mut(&entity)
                .ok_or(FlowError::EntityNotFound(entity))?
                .roots += 1;
        }
        Ok(id)
    }

    /// Retire an executor and propagate completion upward
    fn notify_end(&mut self, id: ExecutorId) -> FlowResult<()> {
        let (executor, parent_idle) = self.executors.retire(id)?;
        trace!(executor = %id, entity = %executor.entity, "Executor retired");

        match executor.parent {
            Some(parent) if parent_idle => self.children_done(parent),
            Some(_) => Ok(()),
            None => {
                let state = self
                    .entities
                    .get_mut(&executor.entity)
                    .ok_or(FlowError::EntityNotFound(executor.entity))?;
                state.roots = state.roots.saturating_sub(1);
                if state.roots == 0 {
                    self.finish_entity(executor.entity)?;
                }
                Ok(())
            }
        }
    }

    /// The last child of `parent` retired: its structured flow completes
    /// an iteration
    fn children_done(&mut self, parent: ExecutorId) -> FlowResult<()> {
        let graph = Arc::clone(&self.graph);
        let current = self.executors.get(parent)?.current;
        match current.map(|id| graph.node(id)).transpose()? {
            Some(node) if node.is_structured() => self.finish_structured(node, parent),
            _ => {
                warn!(executor = %parent, "Children finished but parent is not on a structured flow");
                Ok(())
            }
        }
    }

    fn finish_entity(&mut self, id: EntityId) -> FlowResult<()> {
        let now = self.now;
        let state = self
            .entities
            .get_mut(&id)
            .ok_or(FlowError::EntityNotFound(id))?;
        state.entity.finished_at = Some(now);
        if !state.entity.acquisitions.is_empty() {
            warn!(
                entity = %id,
                held = state.entity.acquisitions.len(),
                "Entity finished while holding resources"
            );
        }
        self.entities_finished += 1;
        let cleared = self.merges.clear_entity(id);
        debug!(entity = %id, time = now, merge_records = cleared, "Entity finished");
        self.notify(id, None, None, FlowEventKind::EntityFinished);
        Ok(())
    }

    // ── Callbacks ────────────────────────────────────────────────────

    fn entity_of(&self, executor: ExecutorId) -> FlowResult<&Entity> {
        let id = self.executors.get(executor)?.entity;
        self.entity(id)
    }

    fn eval_condition(
        &self,
        condition: &Condition,
        executor: ExecutorId,
        node: FlowId,
    ) -> FlowResult<bool> {
        condition.evaluate(&EvalContext {
            entity: self.entity_of(executor)?,
            executor,
            node,
            now: self.now,
        })
    }

    fn eval_expression(
        &self,
        expression: &Expression,
        executor: ExecutorId,
        node: FlowId,
    ) -> FlowResult<f64> {
        expression.evaluate(&EvalContext {
            entity: self.entity_of(executor)?,
            executor,
            node,
            now: self.now,
        })
    }

    fn run_action(&mut self, action: &Action, executor: ExecutorId, node: FlowId) -> FlowResult<()> {
        let entity = self.executors.get(executor)?.entity;
        let now = self.now;
        let state = self
            .entities
            .get_mut(&entity)
            .ok_or(FlowError::EntityNotFound(entity))?;
        action.run(&mut ActionContext {
            entity: &mut state.entity,
            executor,
            node,
            now,
        })
    }

    // ── Request / next ───────────────────────────────────────────────

    /// An executor arrives at a node
    fn request(&mut self, node_id: FlowId, id: ExecutorId) -> FlowResult<()> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(node_id)?;
        let order = self.arrivals;
        self.arrivals += 1;

        let now = self.now;
        let executor = self.executors.get_mut(id)?;
        executor.current = Some(node_id);
        executor.arrival_order = order;
        executor.arrival_time = now;
        let entity = executor.entity;

        // loop safety: a dead path never crosses the same node twice
        if executor.token.was_visited(node_id) {
            trace!(node = %node_id, executor = %id, "Dead path revisited node");
            self.notify(entity, Some(id), Some(node_id), FlowEventKind::Revisited);
            return self.notify_end(id);
        }

        let live = self.before_request(node, id)?;
        match &node.kind {
            NodeKind::Merge(spec) => self.request_merge(node, spec, id, live),
            NodeKind::Split(kind) => {
                if live {
                    self.notify(entity, Some(id), Some(node_id), FlowEventKind::Started);
                }
                self.request_split(node, kind, id)
            }
            _ if !live => self.next(node, id),
            NodeKind::Structured(spec) => {
                self.notify(entity, Some(id), Some(node_id), FlowEventKind::Started);
                self.request_structured(node, spec, id)
            }
            NodeKind::Resources(step) => {
                self.notify(entity, Some(id), Some(node_id), FlowEventKind::Started);
                self.request_resources(node, step, id)
            }
            NodeKind::Leaf(leaf) => {
                self.notify(entity, Some(id), Some(node_id), FlowEventKind::Started);
                self.request_leaf(node, leaf, id)
            }
        }
    }

    /// Apply the entry guard. Returns whether the executor continues live.
    fn before_request(&mut self, node: &FlowNode, id: ExecutorId) -> FlowResult<bool> {
        let executor = self.executors.get(id)?;
        let entity = executor.entity;

        if !executor.is_live() {
            self.executors.get_mut(id)?.token.visit(node.id);
            self.notify(entity, Some(id), Some(node.id), FlowEventKind::Skipped);
            return Ok(false);
        }

        let passes = match &node.entry_guard {
            Some(guard) => self.eval_condition(guard, id, node.id)?,
            None => true,
        };
        if !passes {
            self.executors.get_mut(id)?.token.cancel(node.id);
            trace!(node = %node.id, executor = %id, "Entry guard cancelled token");
            self.notify(entity, Some(id), Some(node.id), FlowEventKind::Cancelled);
        }
        Ok(passes)
    }

    /// Dispatch the single continuation of a non-split node, or end the
    /// executor when the node has no successor
    fn next(&mut self, node: &FlowNode, id: ExecutorId) -> FlowResult<()> {
        let executor = self.executors.get_mut(id)?;
        executor.last = Some(node.id);
        let live = executor.is_live();
        let parent = executor.parent;
        let entity = executor.entity;

        if live {
            self.notify(entity, Some(id), Some(node.id), FlowEventKind::Finished);
        }

        if let Some(target) = node.successor() {
            self.scheduler.schedule(
                self.now,
                EventKind::Arrival {
                    node: target,
                    executor: id,
                },
            );
            return Ok(());
        }

        if let (true, Some(parent)) = (live, parent) {
            self.mark_exit(node.id, parent)?;
        }
        self.notify_end(id)
    }

    /// Record a live arrival at the exit of the parent's structured flow
    fn mark_exit(&mut self, node: FlowId, parent: ExecutorId) -> FlowResult<()> {
        let graph = Arc::clone(&self.graph);
        let parent_executor = self.executors.get_mut(parent)?;
        let exit = parent_executor
            .current
            .and_then(|current| graph.node(current).ok())
            .and_then(FlowNode::as_structured)
            .and_then(|spec| spec.exit);
        if exit == Some(node) {
            parent_executor.exit_live = true;
        }
        Ok(())
    }

    // ── Splits ───────────────────────────────────────────────────────

    fn request_split(&mut self, node: &FlowNode, kind: &SplitKind, id: ExecutorId) -> FlowResult<()> {
        let executor = self.executors.get(id)?;
        let (entity_id, parent, live) = (executor.entity, executor.parent, executor.is_live());
        let incoming = executor.token.clone();

        let branches = {
            let entity = &self
                .entities
                .get(&entity_id)
                .ok_or(FlowError::EntityNotFound(entity_id))?
                .entity;
            let ctx = EvalContext {
                entity,
                executor: id,
                node: node.id,
                now: self.now,
            };
            kind.branches(&node.successors, live, &ctx, self.variates.as_mut())?
        };

        self.executors.get_mut(id)?.last = Some(node.id);
        for branch in &branches {
            let token = if branch.live {
                WorkToken::live()
            } else if live {
                WorkToken::cancelled_at(node.id)
            } else {
                incoming.clone()
            };
            let child = self.spawn_executor(entity_id, parent, token, Some(node.id))?;
            self.scheduler.schedule(
                self.now,
                EventKind::Arrival {
                    node: branch.target,
                    executor: child,
                },
            );
        }
        trace!(
            node = %node.id,
            entity = %entity_id,
            live = branches.iter().filter(|b| b.live).count(),
            dead = branches.iter().filter(|b| !b.live).count(),
            "Split dispatched"
        );

        if live {
            self.notify(entity_id, Some(id), Some(node.id), FlowEventKind::Finished);
        }
        self.notify_end(id)
    }

    // ── Merges ───────────────────────────────────────────────────────

    fn request_merge(
        &mut self,
        node: &FlowNode,
        spec: &MergeSpec,
        id: ExecutorId,
        live: bool,
    ) -> FlowResult<()> {
        let executor = self.executors.get(id)?;
        let (entity, parent) = (executor.entity, executor.parent);
        let predecessor = executor.last.ok_or_else(|| FlowError::MergeLedger {
            node: node.id,
            entity,
            reason: format!("{} arrived without a predecessor", id),
        })?;

        let same_instant = Arc::clone(&self.same_instant);
        let per_predecessor = spec.kind.arrivals_per_predecessor();
        let control = self.merges.get_or_insert_with(node.id, entity, || {
            MergeControl::new(node.id, entity, &node.predecessors, per_predecessor, spec.strategy)
        });
        let continuations = spec.kind.on_arrival(
            control,
            MergeArrival { predecessor, live },
            self.now,
            same_instant.as_ref(),
        )?;

        // every continuation exists before any is routed: routing one may
        // retire the last child of the parent or the last root of the entity
        let mut arriving = Some(id);
        let mut routed = Vec::with_capacity(continuations.len());
        for continuation in continuations {
            debug!(node = %node.id, entity = %entity, live = continuation.live, "Merge fired");
            self.notify(
                entity,
                Some(id),
                Some(node.id),
                FlowEventKind::Fired {
                    live: continuation.live,
                },
            );
            let executor = match arriving.take() {
                Some(executor) => {
                    let token = &mut self.executors.get_mut(executor)?.token;
                    if continuation.live {
                        token.revive();
                    } else if token.is_executable() {
                        token.cancel(node.id);
                    }
                    executor
                }
                None => {
                    let token = if continuation.live {
                        WorkToken::live()
                    } else {
                        WorkToken::cancelled_at(node.id)
                    };
                    self.spawn_executor(entity, parent, token, Some(node.id))?
                }
            };
            routed.push(executor);
        }
        for executor in routed {
            self.next(node, executor)?;
        }

        if let Some(absorbed) = arriving {
            self.notify(entity, Some(absorbed), Some(node.id), FlowEventKind::Absorbed);
            self.notify_end(absorbed)?;
        }
        Ok(())
    }

    // ── Structured flows ─────────────────────────────────────────────

    fn request_structured(
        &mut self,
        node: &FlowNode,
        spec: &StructuredSpec,
        id: ExecutorId,
    ) -> FlowResult<()> {
        match &spec.kind {
            StructuredKind::WhileDo(condition) => {
                if !self.eval_condition(condition, id, node.id)? {
                    return self.complete_structured(node, spec, id);
                }
            }
            StructuredKind::For(iterations) => {
                let rounds = self.eval_expression(iterations, id, node.id)?.round();
                if rounds <= 0.0 {
                    return self.complete_structured(node, spec, id);
                }
                self.loop_counters.insert((node.id, id), rounds as i64);
            }
            _ => {}
        }
        self.enter_body(node, spec, id)
    }

    /// Spawn a child at the body entry; the parent waits on the wrapper
    fn enter_body(&mut self, node: &FlowNode, spec: &StructuredSpec, id: ExecutorId) -> FlowResult<()> {
        let (entry, _) = spec.branch().ok_or(FlowError::MissingBranch(node.id))?;
        let parent = self.executors.get_mut(id)?;
        parent.exit_live = false;
        let entity = parent.entity;

        let child = self.spawn_executor(entity, Some(id), WorkToken::live(), Some(node.id))?;
        trace!(node = %node.id, parent = %id, child = %child, "Entering structured body");
        self.scheduler.schedule(
            self.now,
            EventKind::Arrival {
                node: entry,
                executor: child,
            },
        );
        Ok(())
    }

    /// The body ran to completion: loop again, or continue the parent
    fn finish_structured(&mut self, node: &FlowNode, id: ExecutorId) -> FlowResult<()> {
        let spec = node.as_structured().ok_or(FlowError::WrongNodeKind {
            node: node.id,
            expected: "structured",
        })?;

        if !self.executors.get(id)?.exit_live {
            // no live token reached the exit
            self.loop_counters.remove(&(node.id, id));
            let entity = self.executors.get(id)?.entity;
            self.executors.get_mut(id)?.token.cancel(node.id);
            self.notify(entity, Some(id), Some(node.id), FlowEventKind::Cancelled);
            return self.next(node, id);
        }

        let again = match &spec.kind {
            StructuredKind::Block | StructuredKind::StaticMultiInstance { .. } => false,
            StructuredKind::WhileDo(condition) | StructuredKind::DoWhile(condition) => {
                self.eval_condition(condition, id, node.id)?
            }
            StructuredKind::For(_) => match self.loop_counters.get_mut(&(node.id, id)) {
                Some(remaining) => {
                    *remaining -= 1;
                    *remaining > 0
                }
                None => false,
            },
        };

        if again {
            return self.enter_body(node, spec, id);
        }
        self.loop_counters.remove(&(node.id, id));
        self.complete_structured(node, spec, id)
    }

    fn complete_structured(
        &mut self,
        node: &FlowNode,
        spec: &StructuredSpec,
        id: ExecutorId,
    ) -> FlowResult<()> {
        if let Some(post) = &spec.post {
            self.run_action(post, id, node.id)?;
        }
        self.next(node, id)
    }

    // ── Resources ────────────────────────────────────────────────────

    fn request_resources(
        &mut self,
        node: &FlowNode,
        step: &ResourceStep,
        id: ExecutorId,
    ) -> FlowResult<()> {
        match step {
            ResourceStep::Request {
                resources_id,
                workgroups,
            } => {
                if self.try_grant(node.id, *resources_id, workgroups, id)? {
                    return self.next(node, id);
                }
                let entity = self.executors.get(id)?.entity;
                debug!(node = %node.id, entity = %entity, "Resource request deferred");
                self.resource_waiters.push_back(ResourceWaiter {
                    node: node.id,
                    executor: id,
                });
                self.notify(entity, Some(id), Some(node.id), FlowEventKind::Suspended);
                Ok(())
            }
            ResourceStep::Release { resources_id } => {
                self.release(*resources_id, id)?;
                self.next(node, id)?;
                self.retry_resource_waiters()?;
                Ok(())
            }
        }
    }

    /// Try to satisfy a request; on success the acquisition is recorded
    /// on the entity
    fn try_grant(
        &mut self,
        node: FlowId,
        resources_id: ResourcesId,
        workgroups: &[WorkGroup],
        id: ExecutorId,
    ) -> FlowResult<bool> {
        let entity_id = self.executors.get(id)?.entity;
        let chosen = {
            let entity = &self
                .entities
                .get(&entity_id)
                .ok_or(FlowError::EntityNotFound(entity_id))?
                .entity;
            let ctx = EvalContext {
                entity,
                executor: id,
                node,
                now: self.now,
            };
            select_workgroup(workgroups, resources_id, &ctx, self.pool.as_mut())?
        };
        let Some(workgroup) = chosen else {
            return Ok(false);
        };

        let duration = self.variates.sample(entity_id, &workgroup.duration)?;
        let now = self.now;
        let state = self
            .entities
            .get_mut(&entity_id)
            .ok_or(FlowError::EntityNotFound(entity_id))?;
        state.entity.acquisitions.insert(
            resources_id,
            Acquisition {
                resources_id,
                workgroup: workgroup.id,
                duration,
                acquired_at: now,
            },
        );
        debug!(
            entity = %entity_id,
            resources = %resources_id,
            workgroup = %workgroup.name,
            duration,
            "Resources acquired"
        );
        Ok(true)
    }

    fn release(&mut self, resources_id: ResourcesId, id: ExecutorId) -> FlowResult<()> {
        let entity = self.executors.get(id)?.entity;
        let acquisition = self
            .entities
            .get_mut(&entity)
            .ok_or(FlowError::EntityNotFound(entity))?
            .entity
            .acquisitions
            .remove(&resources_id)
            .ok_or(FlowError::ResourcesNotHeld {
                entity,
                resources: resources_id,
            })?;

        let graph = Arc::clone(&self.graph);
        if let Some(workgroup) = graph.workgroup(resources_id, acquisition.workgroup) {
            self.pool.release(&ResourceRequest {
                entity,
                resources_id,
                workgroup: workgroup.id,
                needs: &workgroup.needs,
            });
        }
        debug!(entity = %entity, resources = %resources_id, "Resources released");
        Ok(())
    }

    /// Retry deferred requests in FIFO order
    fn retry_resource_waiters(&mut self) -> FlowResult<usize> {
        let graph = Arc::clone(&self.graph);
        let mut still_waiting = VecDeque::new();
        let mut granted = 0;

        while let Some(waiter) = self.resource_waiters.pop_front() {
            if !self.executors.contains(waiter.executor) {
                continue;
            }
            let node = graph.node(waiter.node)?;
            let NodeKind::Resources(ResourceStep::Request {
                resources_id,
                workgroups,
            }) = &node.kind
            else {
                continue;
            };
            if self.try_grant(node.id, *resources_id, workgroups, waiter.executor)? {
                granted += 1;
                self.scheduler.schedule(
                    self.now,
                    EventKind::Resume {
                        node: waiter.node,
                        executor: waiter.executor,
                    },
                );
            } else {
                still_waiting.push_back(waiter);
            }
        }

        self.resource_waiters = still_waiting;
        Ok(granted)
    }

    // ── Leaves ───────────────────────────────────────────────────────

    fn request_leaf(&mut self, node: &FlowNode, leaf: &LeafKind, id: ExecutorId) -> FlowResult<()> {
        let entity_id = self.executors.get(id)?.entity;
        let outcome = {
            let state = self
                .entities
                .get_mut(&entity_id)
                .ok_or(FlowError::EntityNotFound(entity_id))?;
            leaf.perform(&mut LeafContext {
                entity: &mut state.entity,
                executor: id,
                node: node.id,
                now: self.now,
                variates: self.variates.as_mut(),
            })?
        };

        match outcome {
            LeafOutcome::Continue => self.next(node, id),
            LeafOutcome::SuspendFor(duration) => {
                self.executors.get_mut(id)?.time_left = duration;
                self.scheduler.schedule(
                    self.now + duration,
                    EventKind::Resume {
                        node: node.id,
                        executor: id,
                    },
                );
                self.notify(entity_id, Some(id), Some(node.id), FlowEventKind::Suspended);
                Ok(())
            }
            LeafOutcome::AwaitSignal => {
                self.signal_waiters
                    .entry((node.id, entity_id))
                    .or_default()
                    .push(id);
                self.notify(entity_id, Some(id), Some(node.id), FlowEventKind::Suspended);
                Ok(())
            }
            LeafOutcome::Generate(spec) => {
                if spec.iterations > 0 {
                    self.scheduler.schedule(
                        self.now + spec.offset,
                        EventKind::Generate {
                            node: node.id,
                            source: entity_id,
                            remaining: spec.iterations,
                        },
                    );
                }
                self.next(node, id)
            }
        }
    }

    /// A suspended executor continues past its node
    fn resume(&mut self, node_id: FlowId, id: ExecutorId) -> FlowResult<()> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(node_id)?;
        self.executors.get_mut(id)?.time_left = 0.0;
        self.next(node, id)
    }

    fn generate(&mut self, node_id: FlowId, source: EntityId, remaining: u32) -> FlowResult<()> {
        let graph = Arc::clone(&self.graph);
        let node = graph.node(node_id)?;
        let NodeKind::Leaf(LeafKind::Generator(spec)) = &node.kind else {
            return Err(FlowError::WrongNodeKind {
                node: node_id,
                expected: "generator",
            });
        };

        for _ in 0..spec.batch {
            self.start_entity(spec.target, spec.attributes.clone(), self.now)?;
        }
        debug!(node = %node_id, source = %source, batch = spec.batch, remaining, "Generator fired");

        if remaining > 1 {
            self.scheduler.schedule(
                self.now + spec.period,
                EventKind::Generate {
                    node: node_id,
                    source,
                    remaining: remaining - 1,
                },
            );
        }
        Ok(())
    }
}
