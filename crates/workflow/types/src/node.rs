//! Flow nodes: the vertices of a flow graph
//!
//! Node behaviour is a closed set of variants. Each variant carries only
//! the data its runtime semantics need; the engine dispatches on the
//! variant through small per-family traits.

use crate::{
    Action, Condition, Distribution, Edge, Expression, FlowId, ResourcesId, SimTime, WorkGroupId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Splits ───────────────────────────────────────────────────────────

/// Fan-out patterns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitKind {
    /// Every successor receives a live continuation
    Parallel,
    /// The first successor whose guard holds wins, in link order
    ExclusiveChoice,
    /// Each successor's guard decides independently
    MultiChoice,
    /// One successor is drawn at random, proportionally to edge weights
    ProbabilitySelection,
    /// `instances` continuations along the single successor
    ThreadSplit { instances: u32 },
}

// ── Merges ───────────────────────────────────────────────────────────

/// How a merge keeps track of arrivals between resets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlStrategy {
    /// A single counter. Each predecessor may raise at most one arrival
    /// per cycle; a second one is a ledger error.
    #[default]
    Safe,
    /// One queue per incoming edge. Extra arrivals from the same
    /// predecessor wait for the following cycles.
    Generalized,
}

/// Fan-in patterns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeKind {
    /// AND-join waiting for every predecessor
    Synchronization,
    /// AND-join passing on the first live arrival
    Discriminator,
    /// AND-join passing once `accept` arrivals are live
    PartialJoin { accept: u32 },
    /// OR-join passing live arrivals at most once per instant
    SimpleMerge,
    /// OR-join passing every live arrival
    MultiMerge,
    /// AND-join over `instances` arrivals from a single predecessor
    ThreadMerge { instances: u32, accept: u32 },
}

impl MergeKind {
    pub fn is_and_join(&self) -> bool {
        !matches!(self, Self::SimpleMerge | Self::MultiMerge)
    }

    /// Live arrivals needed before firing, given the arrivals expected
    /// per cycle
    pub fn accept_threshold(&self, expected: u32) -> u32 {
        match *self {
            Self::Synchronization => expected,
            Self::Discriminator | Self::SimpleMerge | Self::MultiMerge => 1,
            Self::PartialJoin { accept } => accept,
            Self::ThreadMerge { accept, .. } => accept,
        }
    }

    /// How many arrivals each predecessor contributes per cycle
    pub fn arrivals_per_predecessor(&self) -> u32 {
        match *self {
            Self::ThreadMerge { instances, .. } => instances,
            _ => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSpec {
    pub kind: MergeKind,
    pub strategy: ControlStrategy,
}

// ── Structured flows ─────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum StructuredKind {
    /// Runs the body once
    Block,
    /// Checks the condition before every iteration
    WhileDo(Condition),
    /// Checks the condition after every iteration
    DoWhile(Condition),
    /// Runs the body `round(expression)` times
    For(Expression),
    /// Thread-split into `instances` copies, thread-merge accepting `accept`
    StaticMultiInstance { instances: u32, accept: u32 },
}

/// A single-entry/single-exit wrapper around an embedded sub-graph
#[derive(Clone, Debug)]
pub struct StructuredSpec {
    pub kind: StructuredKind,
    /// First node of the body. Set by `add_branch`.
    pub entry: Option<FlowId>,
    /// Last node of the body. Set by `add_branch`.
    pub exit: Option<FlowId>,
    /// Logic run on the entity when the wrapper completes
    pub post: Option<Action>,
}

impl StructuredSpec {
    pub fn new(kind: StructuredKind) -> Self {
        Self {
            kind,
            entry: None,
            exit: None,
            post: None,
        }
    }

    /// Entry and exit, once a branch has been added
    pub fn branch(&self) -> Option<(FlowId, FlowId)> {
        self.entry.zip(self.exit)
    }
}

// ── Resources ────────────────────────────────────────────────────────

/// Amount of one resource type a workgroup needs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNeed {
    pub resource_type: String,
    pub amount: u32,
}

impl ResourceNeed {
    pub fn new(resource_type: impl Into<String>, amount: u32) -> Self {
        Self {
            resource_type: resource_type.into(),
            amount,
        }
    }
}

/// One way of satisfying a resource request
#[derive(Clone, Debug)]
pub struct WorkGroup {
    /// Assigned by the graph builder when the workgroup is added
    pub id: WorkGroupId,
    pub name: String,
    /// Lower values are tried first; ties keep declaration order
    pub priority: i32,
    /// Filter deciding whether this workgroup applies to the entity
    pub condition: Option<Condition>,
    /// Duration used while the acquisition is held
    pub duration: Distribution,
    pub needs: Vec<ResourceNeed>,
}

impl WorkGroup {
    pub fn new(name: impl Into<String>, duration: Distribution) -> Self {
        Self {
            id: WorkGroupId(0),
            name: name.into(),
            priority: 0,
            condition: None,
            duration,
            needs: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_need(mut self, resource_type: impl Into<String>, amount: u32) -> Self {
        self.needs.push(ResourceNeed::new(resource_type, amount));
        self
    }
}

#[derive(Clone, Debug)]
pub enum ResourceStep {
    Request {
        resources_id: ResourcesId,
        workgroups: Vec<WorkGroup>,
    },
    Release {
        resources_id: ResourcesId,
    },
}

impl ResourceStep {
    pub fn resources_id(&self) -> ResourcesId {
        match self {
            Self::Request { resources_id, .. } | Self::Release { resources_id } => *resources_id,
        }
    }
}

// ── Leaves ───────────────────────────────────────────────────────────

/// Cycle of entity creation driven by a generator node
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    /// Node where generated entities start
    pub target: FlowId,
    /// Entities created per iteration
    pub batch: u32,
    /// Time between iterations
    pub period: SimTime,
    pub iterations: u32,
    /// Delay before the first iteration
    #[serde(default)]
    pub offset: SimTime,
    /// Attributes every generated entity starts with
    #[serde(default)]
    pub attributes: BTreeMap<String, f64>,
}

impl GeneratorSpec {
    pub fn new(target: FlowId, batch: u32, period: SimTime, iterations: u32) -> Self {
        Self {
            target,
            batch,
            period,
            iterations,
            offset: 0.0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_offset(mut self, offset: SimTime) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: f64) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

#[derive(Clone, Debug)]
pub enum LeafKind {
    /// Suspend for a sampled duration
    Delay(Distribution),
    /// Create new entities on a cycle, then continue immediately
    Generator(GeneratorSpec),
    /// Run injected logic synchronously
    UserAction(Action),
    /// Suspend until signalled from outside
    WaitForSignal,
}

// ── Nodes ────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum NodeKind {
    Split(SplitKind),
    Merge(MergeSpec),
    Structured(StructuredSpec),
    Resources(ResourceStep),
    Leaf(LeafKind),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Split(SplitKind::Parallel) => "parallel",
            Self::Split(SplitKind::ExclusiveChoice) => "exclusive choice",
            Self::Split(SplitKind::MultiChoice) => "multi choice",
            Self::Split(SplitKind::ProbabilitySelection) => "probability selection",
            Self::Split(SplitKind::ThreadSplit { .. }) => "thread split",
            Self::Merge(spec) => match spec.kind {
                MergeKind::Synchronization => "synchronization",
                MergeKind::Discriminator => "discriminator",
                MergeKind::PartialJoin { .. } => "partial join",
                MergeKind::SimpleMerge => "simple merge",
                MergeKind::MultiMerge => "multi merge",
                MergeKind::ThreadMerge { .. } => "thread merge",
            },
            Self::Structured(spec) => match spec.kind {
                StructuredKind::Block => "block",
                StructuredKind::WhileDo(_) => "while-do",
                StructuredKind::DoWhile(_) => "do-while",
                StructuredKind::For(_) => "for",
                StructuredKind::StaticMultiInstance { .. } => "static multi-instance",
            },
            Self::Resources(ResourceStep::Request { .. }) => "request resources",
            Self::Resources(ResourceStep::Release { .. }) => "release resources",
            Self::Leaf(LeafKind::Delay(_)) => "delay",
            Self::Leaf(LeafKind::Generator(_)) => "generator",
            Self::Leaf(LeafKind::UserAction(_)) => "user action",
            Self::Leaf(LeafKind::WaitForSignal) => "wait for signal",
        }
    }

    /// Splits fan out to any number of successors, except the thread
    /// split which replicates along a single one
    pub fn allows_many_successors(&self) -> bool {
        matches!(self, Self::Split(kind) if !matches!(kind, SplitKind::ThreadSplit { .. }))
    }

    pub fn accepts_guards(&self) -> bool {
        matches!(
            self,
            Self::Split(SplitKind::ExclusiveChoice | SplitKind::MultiChoice)
        )
    }

    pub fn accepts_weights(&self) -> bool {
        matches!(self, Self::Split(SplitKind::ProbabilitySelection))
    }
}

/// A vertex of the flow graph
#[derive(Clone, Debug)]
pub struct FlowNode {
    pub id: FlowId,
    pub name: String,
    pub kind: NodeKind,
    /// Outgoing links in link order
    pub successors: Vec<Edge>,
    /// Distinct nodes linking here, in link order
    pub predecessors: Vec<FlowId>,
    /// Structured flow whose body contains this node
    pub parent: Option<FlowId>,
    /// Checked on every live arrival; false cancels the token
    pub entry_guard: Option<Condition>,
}

impl FlowNode {
    pub fn new(id: FlowId, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            successors: Vec::new(),
            predecessors: Vec::new(),
            parent: None,
            entry_guard: None,
        }
    }

    /// The single successor of a non-split node
    pub fn successor(&self) -> Option<FlowId> {
        self.successors.first().map(|edge| edge.target)
    }

    pub fn as_merge(&self) -> Option<&MergeSpec> {
        match &self.kind {
            NodeKind::Merge(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredSpec> {
        match &self.kind {
            NodeKind::Structured(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self.kind, NodeKind::Structured(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_thresholds() {
        assert_eq!(MergeKind::Synchronization.accept_threshold(3), 3);
        assert_eq!(MergeKind::Discriminator.accept_threshold(3), 1);
        assert_eq!(MergeKind::PartialJoin { accept: 2 }.accept_threshold(4), 2);
        assert_eq!(
            MergeKind::ThreadMerge {
                instances: 5,
                accept: 3
            }
            .accept_threshold(5),
            3
        );
        assert!(MergeKind::Discriminator.is_and_join());
        assert!(!MergeKind::SimpleMerge.is_and_join());
    }

    #[test]
    fn test_arrivals_per_predecessor() {
        assert_eq!(MergeKind::Synchronization.arrivals_per_predecessor(), 1);
        assert_eq!(
            MergeKind::ThreadMerge {
                instances: 4,
                accept: 4
            }
            .arrivals_per_predecessor(),
            4
        );
    }

    #[test]
    fn test_successor_rules() {
        assert!(NodeKind::Split(SplitKind::Parallel).allows_many_successors());
        assert!(!NodeKind::Split(SplitKind::ThreadSplit { instances: 3 }).allows_many_successors());
        assert!(!NodeKind::Leaf(LeafKind::WaitForSignal).allows_many_successors());
        assert!(NodeKind::Split(SplitKind::MultiChoice).accepts_guards());
        assert!(!NodeKind::Split(SplitKind::Parallel).accepts_guards());
        assert!(NodeKind::Split(SplitKind::ProbabilitySelection).accepts_weights());
    }

    #[test]
    fn test_structured_branch() {
        let mut spec = StructuredSpec::new(StructuredKind::Block);
        assert!(spec.branch().is_none());
        spec.entry = Some(FlowId(1));
        spec.exit = Some(FlowId(2));
        assert_eq!(spec.branch(), Some((FlowId(1), FlowId(2))));
    }

    #[test]
    fn test_workgroup_builder() {
        let wg = WorkGroup::new("nurse", Distribution::constant(2.0))
            .with_priority(-1)
            .with_need("nurse", 1);
        assert_eq!(wg.priority, -1);
        assert_eq!(wg.needs, vec![ResourceNeed::new("nurse", 1)]);
    }
}
