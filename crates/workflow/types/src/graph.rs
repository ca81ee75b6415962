//! Flow graphs and the builder that assembles them
//!
//! A graph is put together with [`FlowGraphBuilder`]: nodes are created,
//! linked, and structured flows receive their branches. `build()` then
//! validates the whole graph, labels every node inside a structured body
//! with its enclosing wrapper, and freezes the result. A [`FlowGraph`] is
//! immutable and can be shared by any number of engines.

use crate::{
    Action, Condition, ControlStrategy, Distribution, Edge, Expression, FlowError, FlowId,
    FlowNode, FlowResult, GeneratorSpec, LeafKind, MergeKind, MergeSpec, NodeKind, ResourceStep,
    ResourcesId, SplitKind, StructuredKind, StructuredSpec, WorkGroup, WorkGroupId,
};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// ── Flow Graph ───────────────────────────────────────────────────────

/// A validated, immutable flow graph
#[derive(Clone, Debug)]
pub struct FlowGraph {
    nodes: Vec<FlowNode>,
    /// Request node for each resources identifier
    requests: BTreeMap<ResourcesId, FlowId>,
}

impl FlowGraph {
    pub fn node(&self, id: FlowId) -> FlowResult<&FlowNode> {
        self.nodes.get(id.index()).ok_or(FlowError::NodeNotFound(id))
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look a node up by name
    pub fn find(&self, name: &str) -> Option<FlowId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn request_node(&self, resources_id: ResourcesId) -> Option<FlowId> {
        self.requests.get(&resources_id).copied()
    }

    /// The workgroups declared on the request node for `resources_id`
    pub fn workgroups(&self, resources_id: ResourcesId) -> &[WorkGroup] {
        let node = self
            .request_node(resources_id)
            .and_then(|id| self.nodes.get(id.index()));
        match node.map(|n| &n.kind) {
            Some(NodeKind::Resources(ResourceStep::Request { workgroups, .. })) => workgroups,
            _ => &[],
        }
    }

    pub fn workgroup(&self, resources_id: ResourcesId, id: WorkGroupId) -> Option<&WorkGroup> {
        self.workgroups(resources_id).iter().find(|wg| wg.id == id)
    }
}

// ── Builder ──────────────────────────────────────────────────────────

/// Assembles a [`FlowGraph`]
#[derive(Debug, Default)]
pub struct FlowGraphBuilder {
    nodes: Vec<FlowNode>,
    next_workgroup: u32,
}

impl FlowGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node of any kind
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> FlowId {
        let id = FlowId(self.nodes.len() as u32);
        self.nodes.push(FlowNode::new(id, name, kind));
        id
    }

    fn node_mut(&mut self, id: FlowId) -> FlowResult<&mut FlowNode> {
        self.nodes
            .get_mut(id.index())
            .ok_or(FlowError::NodeNotFound(id))
    }

    // ── Splits ───────────────────────────────────────────────────────

    pub fn parallel(&mut self, name: impl Into<String>) -> FlowId {
        self.add_node(name, NodeKind::Split(SplitKind::Parallel))
    }

    pub fn exclusive_choice(&mut self, name: impl Into<String>) -> FlowId {
        self.add_node(name, NodeKind::Split(SplitKind::ExclusiveChoice))
    }

    pub fn multi_choice(&mut self, name: impl Into<String>) -> FlowId {
        self.add_node(name, NodeKind::Split(SplitKind::MultiChoice))
    }

    pub fn probability_selection(&mut self, name: impl Into<String>) -> FlowId {
        self.add_node(name, NodeKind::Split(SplitKind::ProbabilitySelection))
    }

    pub fn thread_split(&mut self, name: impl Into<String>, instances: u32) -> FlowId {
        self.add_node(name, NodeKind::Split(SplitKind::ThreadSplit { instances }))
    }

    // ── Merges ───────────────────────────────────────────────────────

    pub fn merge(
        &mut self,
        name: impl Into<String>,
        kind: MergeKind,
        strategy: ControlStrategy,
    ) -> FlowId {
        self.add_node(name, NodeKind::Merge(MergeSpec { kind, strategy }))
    }

    pub fn synchronization(&mut self, name: impl Into<String>, strategy: ControlStrategy) -> FlowId {
        self.merge(name, MergeKind::Synchronization, strategy)
    }

    pub fn discriminator(&mut self, name: impl Into<String>, strategy: ControlStrategy) -> FlowId {
        self.merge(name, MergeKind::Discriminator, strategy)
    }

    pub fn partial_join(
        &mut self,
        name: impl Into<String>,
        accept: u32,
        strategy: ControlStrategy,
    ) -> FlowId {
        self.merge(name, MergeKind::PartialJoin { accept }, strategy)
    }

    pub fn simple_merge(&mut self, name: impl Into<String>, strategy: ControlStrategy) -> FlowId {
        self.merge(name, MergeKind::SimpleMerge, strategy)
    }

    pub fn multi_merge(&mut self, name: impl Into<String>, strategy: ControlStrategy) -> FlowId {
        self.merge(name, MergeKind::MultiMerge, strategy)
    }

    pub fn thread_merge(
        &mut self,
        name: impl Into<String>,
        instances: u32,
        accept: u32,
        strategy: ControlStrategy,
    ) -> FlowId {
        self.merge(name, MergeKind::ThreadMerge { instances, accept }, strategy)
    }

    // ── Structured flows ─────────────────────────────────────────────

    fn structured(&mut self, name: impl Into<String>, kind: StructuredKind) -> FlowId {
        self.add_node(name, NodeKind::Structured(StructuredSpec::new(kind)))
    }

    pub fn block(&mut self, name: impl Into<String>) -> FlowId {
        self.structured(name, StructuredKind::Block)
    }

    pub fn while_do(&mut self, name: impl Into<String>, condition: Condition) -> FlowId {
        self.structured(name, StructuredKind::WhileDo(condition))
    }

    pub fn do_while(&mut self, name: impl Into<String>, condition: Condition) -> FlowId {
        self.structured(name, StructuredKind::DoWhile(condition))
    }

    pub fn for_loop(&mut self, name: impl Into<String>, iterations: Expression) -> FlowId {
        self.structured(name, StructuredKind::For(iterations))
    }

    /// Multiple-instance wrapper. The thread split and thread merge that
    /// bracket the body are created here; `add_branch` wires the body
    /// between them.
    pub fn static_multi_instance(
        &mut self,
        name: impl Into<String>,
        instances: u32,
        accept: u32,
    ) -> FlowId {
        let name = name.into();
        let split = self.thread_split(format!("{}: split", name), instances);
        let merge = self.thread_merge(
            format!("{}: merge", name),
            instances,
            accept,
            ControlStrategy::Safe,
        );
        let mut spec = StructuredSpec::new(StructuredKind::StaticMultiInstance { instances, accept });
        spec.entry = Some(split);
        spec.exit = Some(merge);
        let wrapper = self.add_node(name, NodeKind::Structured(spec));
        // the wrapper hands its child to the thread split
        self.nodes[split.index()].predecessors.push(wrapper);
        wrapper
    }

    // ── Resources and leaves ─────────────────────────────────────────

    pub fn request_resources(&mut self, name: impl Into<String>, resources_id: ResourcesId) -> FlowId {
        self.add_node(
            name,
            NodeKind::Resources(ResourceStep::Request {
                resources_id,
                workgroups: Vec::new(),
            }),
        )
    }

    pub fn release_resources(&mut self, name: impl Into<String>, resources_id: ResourcesId) -> FlowId {
        self.add_node(name, NodeKind::Resources(ResourceStep::Release { resources_id }))
    }

    pub fn delay(&mut self, name: impl Into<String>, duration: Distribution) -> FlowId {
        self.add_node(name, NodeKind::Leaf(LeafKind::Delay(duration)))
    }

    pub fn generator(&mut self, name: impl Into<String>, spec: GeneratorSpec) -> FlowId {
        self.add_node(name, NodeKind::Leaf(LeafKind::Generator(spec)))
    }

    pub fn user_action(&mut self, name: impl Into<String>, action: Action) -> FlowId {
        self.add_node(name, NodeKind::Leaf(LeafKind::UserAction(action)))
    }

    pub fn wait_for_signal(&mut self, name: impl Into<String>) -> FlowId {
        self.add_node(name, NodeKind::Leaf(LeafKind::WaitForSignal))
    }

    // ── Decoration ───────────────────────────────────────────────────

    /// Guard checked on every live arrival at `node`
    pub fn with_entry_guard(&mut self, node: FlowId, guard: Condition) -> FlowResult<()> {
        self.node_mut(node)?.entry_guard = Some(guard);
        Ok(())
    }

    /// Logic run when a structured flow completes
    pub fn with_post_action(&mut self, node: FlowId, action: Action) -> FlowResult<()> {
        match &mut self.node_mut(node)?.kind {
            NodeKind::Structured(spec) => {
                spec.post = Some(action);
                Ok(())
            }
            _ => Err(FlowError::WrongNodeKind {
                node,
                expected: "structured",
            }),
        }
    }

    // ── Linking ──────────────────────────────────────────────────────

    pub fn link(&mut self, from: FlowId, to: FlowId) -> FlowResult<()> {
        self.push_edge(from, Edge::new(to))
    }

    /// Guarded link out of an exclusive or multi choice
    pub fn link_when(&mut self, from: FlowId, to: FlowId, condition: Condition) -> FlowResult<()> {
        let kind = &self.node_mut(from)?.kind;
        if !kind.accepts_guards() {
            return Err(FlowError::LinkNotAllowed {
                node: from,
                kind: kind.name(),
                what: "guarded",
            });
        }
        self.push_edge(from, Edge::guarded(to, condition))
    }

    /// Weighted link out of a probability selection
    pub fn link_weighted(&mut self, from: FlowId, to: FlowId, weight: f64) -> FlowResult<()> {
        let kind = &self.node_mut(from)?.kind;
        if !kind.accepts_weights() {
            return Err(FlowError::LinkNotAllowed {
                node: from,
                kind: kind.name(),
                what: "weighted",
            });
        }
        self.push_edge(from, Edge::weighted(to, weight))
    }

    fn push_edge(&mut self, from: FlowId, edge: Edge) -> FlowResult<()> {
        let to = edge.target;
        if from == to {
            return Err(FlowError::SelfLink(from));
        }
        self.node_mut(to)?;
        let source = self.node_mut(from)?;
        if source.successors.iter().any(|e| e.target == to) {
            return Err(FlowError::DuplicateLink { from, to });
        }
        if !source.kind.allows_many_successors() && !source.successors.is_empty() {
            return Err(FlowError::TooManySuccessors(from));
        }
        source.successors.push(edge);

        let target = self.node_mut(to)?;
        if !target.predecessors.contains(&from) {
            target.predecessors.push(from);
        }
        Ok(())
    }

    /// Set the body of a structured flow
    pub fn add_branch(&mut self, structured: FlowId, entry: FlowId, exit: FlowId) -> FlowResult<()> {
        self.node_mut(entry)?;
        self.node_mut(exit)?;
        let spec = match &mut self.node_mut(structured)?.kind {
            NodeKind::Structured(spec) => spec,
            _ => {
                return Err(FlowError::WrongNodeKind {
                    node: structured,
                    expected: "structured",
                })
            }
        };

        if let StructuredKind::StaticMultiInstance { .. } = spec.kind {
            let (split, merge) = spec
                .branch()
                .ok_or(FlowError::MissingBranch(structured))?;
            self.link(split, entry)?;
            return self.link(exit, merge);
        }

        if let Some(existing) = spec.entry {
            return Err(FlowError::DuplicateLink {
                from: structured,
                to: existing,
            });
        }
        spec.entry = Some(entry);
        spec.exit = Some(exit);

        // children start at the entry with the wrapper as their last node
        let entry_node = self.node_mut(entry)?;
        if !entry_node.predecessors.contains(&structured) {
            entry_node.predecessors.push(structured);
        }
        Ok(())
    }

    /// Add a way of satisfying a resource request
    pub fn add_workgroup(&mut self, request: FlowId, mut workgroup: WorkGroup) -> FlowResult<WorkGroupId> {
        let id = WorkGroupId(self.next_workgroup);
        match &mut self.node_mut(request)?.kind {
            NodeKind::Resources(ResourceStep::Request { workgroups, .. }) => {
                workgroup.id = id;
                workgroups.push(workgroup);
            }
            _ => {
                return Err(FlowError::WrongNodeKind {
                    node: request,
                    expected: "request resources",
                })
            }
        }
        self.next_workgroup += 1;
        Ok(id)
    }

    /// A complete activity: request, selection of the granted workgroup,
    /// a delay for the workgroup's duration, then release.
    ///
    /// Returns the request (entry) and release (exit) nodes.
    pub fn activity(
        &mut self,
        name: &str,
        resources_id: ResourcesId,
        workgroups: Vec<WorkGroup>,
    ) -> FlowResult<(FlowId, FlowId)> {
        let request = self.request_resources(format!("{}: request", name), resources_id);
        if workgroups.is_empty() {
            return Err(FlowError::NoWorkGroups(request));
        }
        let select = self.exclusive_choice(format!("{}: select", name));
        let merge = self.simple_merge(format!("{}: merge", name), ControlStrategy::Safe);
        let release = self.release_resources(format!("{}: release", name), resources_id);
        self.link(request, select)?;

        for workgroup in workgroups {
            let delay = self.delay(
                format!("{}: {}", name, workgroup.name),
                Distribution::WorkGroupDuration { resources_id },
            );
            let id = self.add_workgroup(request, workgroup)?;
            self.link_when(select, delay, Condition::workgroup_selected(resources_id, id))?;
            self.link(delay, merge)?;
        }

        self.link(merge, release)?;
        Ok((request, release))
    }

    // ── Build ────────────────────────────────────────────────────────

    /// Validate, assign structured parents and freeze the graph
    pub fn build(mut self) -> FlowResult<FlowGraph> {
        let requests = self.validate()?;
        self.assign_parents()?;
        Ok(FlowGraph {
            nodes: self.nodes,
            requests,
        })
    }

    fn validate(&self) -> FlowResult<BTreeMap<ResourcesId, FlowId>> {
        let mut requests = BTreeMap::new();
        for node in &self.nodes {
            if let NodeKind::Resources(ResourceStep::Request { resources_id, workgroups }) = &node.kind {
                if requests.insert(*resources_id, node.id).is_some() {
                    return Err(FlowError::DuplicateRequest(*resources_id));
                }
                if workgroups.is_empty() {
                    return Err(FlowError::NoWorkGroups(node.id));
                }
                for workgroup in workgroups {
                    workgroup.duration.validate()?;
                }
            }
        }

        for node in &self.nodes {
            match &node.kind {
                NodeKind::Split(kind) => self.validate_split(node, kind)?,
                NodeKind::Merge(spec) => validate_merge(node, &spec.kind)?,
                NodeKind::Structured(spec) => self.validate_structured(node, spec)?,
                NodeKind::Resources(ResourceStep::Release { resources_id }) => {
                    if !requests.contains_key(resources_id) {
                        return Err(FlowError::UnmatchedRelease {
                            release: node.id,
                            resources: *resources_id,
                        });
                    }
                }
                NodeKind::Resources(ResourceStep::Request { .. }) => {}
                NodeKind::Leaf(LeafKind::Delay(duration)) => duration.validate()?,
                NodeKind::Leaf(LeafKind::Generator(spec)) => {
                    match self.nodes.get(spec.target.index()) {
                        None => return Err(FlowError::NodeNotFound(spec.target)),
                        Some(target) if target.as_merge().is_some() => {
                            return Err(FlowError::StartAtMerge(spec.target));
                        }
                        Some(_) => {}
                    }
                    if !(spec.period.is_finite() && spec.period >= 0.0)
                        || !(spec.offset.is_finite() && spec.offset >= 0.0)
                    {
                        return Err(FlowError::InvalidDistribution(format!(
                            "generator {} has a negative or non-finite period",
                            node.id
                        )));
                    }
                }
                NodeKind::Leaf(_) => {}
            }
        }
        Ok(requests)
    }

    fn validate_split(&self, node: &FlowNode, kind: &SplitKind) -> FlowResult<()> {
        if node.successors.is_empty() {
            return Err(FlowError::SplitWithoutSuccessors(node.id));
        }
        match *kind {
            SplitKind::ThreadSplit { instances } if instances == 0 => {
                Err(FlowError::InvalidInstances {
                    node: node.id,
                    instances,
                })
            }
            SplitKind::ProbabilitySelection => {
                let valid = node
                    .successors
                    .iter()
                    .all(|e| e.weight.is_finite() && e.weight >= 0.0);
                let total: f64 = node.successors.iter().map(|e| e.weight).sum();
                if valid && total > 0.0 {
                    Ok(())
                } else {
                    Err(FlowError::InvalidWeights(node.id))
                }
            }
            _ => Ok(()),
        }
    }

    fn validate_structured(&self, node: &FlowNode, spec: &StructuredSpec) -> FlowResult<()> {
        if let StructuredKind::StaticMultiInstance { instances, accept } = spec.kind {
            if instances == 0 {
                return Err(FlowError::InvalidInstances {
                    node: node.id,
                    instances,
                });
            }
            if accept == 0 || accept > instances {
                return Err(FlowError::InvalidThreshold {
                    node: node.id,
                    accept,
                    predecessors: instances as usize,
                });
            }
        }

        let (entry, exit) = spec.branch().ok_or(FlowError::MissingBranch(node.id))?;
        let exit_node = self
            .nodes
            .get(exit.index())
            .ok_or(FlowError::NodeNotFound(exit))?;
        if !exit_node.successors.is_empty() {
            return Err(FlowError::ExitHasSuccessors {
                node: node.id,
                exit,
            });
        }
        if self.nodes.get(entry.index()).is_none() {
            return Err(FlowError::NodeNotFound(entry));
        }
        Ok(())
    }

    /// Label every node of each structured body with its wrapper.
    ///
    /// One breadth-first walk per wrapper, from its entry, stopping at its
    /// exit. Nested wrappers are labelled as nodes of the outer body; their
    /// own bodies are reached only through their own walk.
    fn assign_parents(&mut self) -> FlowResult<()> {
        let wrappers: Vec<(FlowId, FlowId, FlowId)> = self
            .nodes
            .iter()
            .filter_map(|n| {
                n.as_structured()
                    .and_then(|spec| spec.branch())
                    .map(|(entry, exit)| (n.id, entry, exit))
            })
            .collect();

        for (wrapper, entry, exit) in wrappers {
            let mut visited = BTreeSet::new();
            let mut queue = VecDeque::from([entry]);
            let mut exit_reached = false;

            while let Some(current) = queue.pop_front() {
                if !visited.insert(current) {
                    continue;
                }
                let node = self.node_mut(current)?;
                match node.parent {
                    Some(first) if first != wrapper => {
                        return Err(FlowError::ConflictingParent {
                            node: current,
                            first,
                            second: wrapper,
                        })
                    }
                    _ if current == wrapper => {
                        return Err(FlowError::ConflictingParent {
                            node: current,
                            first: wrapper,
                            second: wrapper,
                        })
                    }
                    _ => node.parent = Some(wrapper),
                }
                if current == exit {
                    exit_reached = true;
                    continue;
                }
                queue.extend(node.successors.iter().map(|e| e.target));
            }

            if !exit_reached {
                return Err(FlowError::ExitNotReachable {
                    node: wrapper,
                    entry,
                    exit,
                });
            }
        }
        Ok(())
    }
}

fn validate_merge(node: &FlowNode, kind: &MergeKind) -> FlowResult<()> {
    let predecessors = node.predecessors.len();
    if predecessors == 0 {
        return Err(FlowError::MergeWithoutPredecessors(node.id));
    }
    match *kind {
        MergeKind::PartialJoin { accept } => {
            if accept <= 1 || accept as usize >= predecessors {
                return Err(FlowError::InvalidThreshold {
                    node: node.id,
                    accept,
                    predecessors,
                });
            }
        }
        MergeKind::ThreadMerge { instances, accept } => {
            if instances == 0 {
                return Err(FlowError::InvalidInstances {
                    node: node.id,
                    instances,
                });
            }
            if accept == 0 || accept > instances {
                return Err(FlowError::InvalidThreshold {
                    node: node.id,
                    accept,
                    predecessors: instances as usize,
                });
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass_through(builder: &mut FlowGraphBuilder, name: &str) -> FlowId {
        builder.delay(name, Distribution::constant(0.0))
    }

    #[test]
    fn test_build_parallel_synchronization() {
        let mut b = FlowGraphBuilder::new();
        let split = b.parallel("split");
        let join = b.synchronization("join", ControlStrategy::Safe);
        for name in ["a", "b", "c"] {
            let step = pass_through(&mut b, name);
            b.link(split, step).unwrap();
            b.link(step, join).unwrap();
        }
        let graph = b.build().unwrap();

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.node(split).unwrap().successors.len(), 3);
        assert_eq!(graph.node(join).unwrap().predecessors.len(), 3);
        assert_eq!(graph.find("b"), Some(FlowId(3)));
        assert!(graph.node(FlowId(99)).is_err());
    }

    #[test]
    fn test_link_errors() {
        let mut b = FlowGraphBuilder::new();
        let a = pass_through(&mut b, "a");
        let c = pass_through(&mut b, "c");
        let d = pass_through(&mut b, "d");

        assert!(matches!(b.link(a, a), Err(FlowError::SelfLink(_))));
        b.link(a, c).unwrap();
        assert!(matches!(b.link(a, c), Err(FlowError::DuplicateLink { .. })));
        assert!(matches!(b.link(a, d), Err(FlowError::TooManySuccessors(_))));
        assert!(matches!(
            b.link_when(c, d, Condition::always()),
            Err(FlowError::LinkNotAllowed { what: "guarded", .. })
        ));
        assert!(matches!(
            b.link_weighted(c, d, 2.0),
            Err(FlowError::LinkNotAllowed { what: "weighted", .. })
        ));
        assert!(matches!(
            b.link(c, FlowId(42)),
            Err(FlowError::NodeNotFound(FlowId(42)))
        ));
    }

    #[test]
    fn test_thread_split_takes_single_successor() {
        let mut b = FlowGraphBuilder::new();
        let split = b.thread_split("split", 3);
        let a = pass_through(&mut b, "a");
        let c = pass_through(&mut b, "c");
        b.link(split, a).unwrap();
        assert!(matches!(b.link(split, c), Err(FlowError::TooManySuccessors(_))));
    }

    #[test]
    fn test_partial_join_threshold_validated() {
        for (accept, ok) in [(1, false), (2, true), (3, false)] {
            let mut b = FlowGraphBuilder::new();
            let split = b.parallel("split");
            let join = b.partial_join("join", accept, ControlStrategy::Safe);
            for name in ["a", "b", "c"] {
                let step = pass_through(&mut b, name);
                b.link(split, step).unwrap();
                b.link(step, join).unwrap();
            }
            let result = b.build();
            assert_eq!(result.is_ok(), ok, "accept = {}", accept);
            if !ok {
                assert!(matches!(result, Err(FlowError::InvalidThreshold { .. })));
            }
        }
    }

    #[test]
    fn test_split_and_merge_arity_validated() {
        let mut b = FlowGraphBuilder::new();
        b.parallel("lonely split");
        assert!(matches!(b.build(), Err(FlowError::SplitWithoutSuccessors(_))));

        let mut b = FlowGraphBuilder::new();
        b.discriminator("lonely merge", ControlStrategy::Safe);
        assert!(matches!(b.build(), Err(FlowError::MergeWithoutPredecessors(_))));
    }

    #[test]
    fn test_generator_cannot_target_merge() {
        let mut b = FlowGraphBuilder::new();
        let a = b.delay("a", Distribution::constant(1.0));
        let join = b.simple_merge("join", ControlStrategy::Safe);
        b.link(a, join).unwrap();
        b.generator("arrivals", GeneratorSpec::new(join, 1, 1.0, 1));
        assert!(matches!(b.build(), Err(FlowError::StartAtMerge(target)) if target == join));

        let mut b = FlowGraphBuilder::new();
        let a = b.delay("a", Distribution::constant(1.0));
        b.generator("arrivals", GeneratorSpec::new(a, 1, 1.0, 1));
        assert!(b.build().is_ok());
    }

    #[test]
    fn test_probability_weights_validated() {
        let mut b = FlowGraphBuilder::new();
        let select = b.probability_selection("select");
        let a = pass_through(&mut b, "a");
        let c = pass_through(&mut b, "c");
        b.link_weighted(select, a, 0.0).unwrap();
        b.link_weighted(select, c, 0.0).unwrap();
        assert!(matches!(b.build(), Err(FlowError::InvalidWeights(_))));

        let mut b = FlowGraphBuilder::new();
        let select = b.probability_selection("select");
        let a = pass_through(&mut b, "a");
        let c = pass_through(&mut b, "c");
        b.link_weighted(select, a, 3.0).unwrap();
        b.link(select, c).unwrap();
        let graph = b.build().unwrap();
        let weights: Vec<f64> = graph.node(select).unwrap().successors.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![3.0, 1.0]);
    }

    #[test]
    fn test_structured_parents_assigned() {
        let mut b = FlowGraphBuilder::new();
        let outer = b.block("outer");
        let inner = b.block("inner");
        let first = pass_through(&mut b, "first");
        let last = pass_through(&mut b, "last");
        let body = pass_through(&mut b, "inner body");
        b.link(first, inner).unwrap();
        b.link(inner, last).unwrap();
        b.add_branch(outer, first, last).unwrap();
        b.add_branch(inner, body, body).unwrap();
        let graph = b.build().unwrap();

        assert_eq!(graph.node(outer).unwrap().parent, None);
        assert_eq!(graph.node(first).unwrap().parent, Some(outer));
        assert_eq!(graph.node(inner).unwrap().parent, Some(outer));
        assert_eq!(graph.node(last).unwrap().parent, Some(outer));
        assert_eq!(graph.node(body).unwrap().parent, Some(inner));
        assert!(graph.node(first).unwrap().predecessors.contains(&outer));
    }

    #[test]
    fn test_diamond_body_labelled_once() {
        let mut b = FlowGraphBuilder::new();
        let wrapper = b.block("wrapper");
        let split = b.parallel("split");
        let join = b.synchronization("join", ControlStrategy::Safe);
        for name in ["left", "right"] {
            let step = pass_through(&mut b, name);
            b.link(split, step).unwrap();
            b.link(step, join).unwrap();
        }
        b.add_branch(wrapper, split, join).unwrap();
        let graph = b.build().unwrap();
        assert!(graph
            .nodes()
            .iter()
            .filter(|n| n.id != wrapper)
            .all(|n| n.parent == Some(wrapper)));
    }

    #[test]
    fn test_exit_must_be_reachable() {
        let mut b = FlowGraphBuilder::new();
        let wrapper = b.block("wrapper");
        let entry = pass_through(&mut b, "entry");
        let exit = pass_through(&mut b, "exit");
        b.add_branch(wrapper, entry, exit).unwrap();
        assert!(matches!(b.build(), Err(FlowError::ExitNotReachable { .. })));
    }

    #[test]
    fn test_exit_must_not_have_successors() {
        let mut b = FlowGraphBuilder::new();
        let wrapper = b.block("wrapper");
        let entry = pass_through(&mut b, "entry");
        let after = pass_through(&mut b, "after");
        b.link(entry, after).unwrap();
        b.add_branch(wrapper, entry, entry).unwrap();
        assert!(matches!(b.build(), Err(FlowError::ExitHasSuccessors { .. })));
    }

    #[test]
    fn test_missing_branch() {
        let mut b = FlowGraphBuilder::new();
        b.while_do("loop", Condition::never());
        assert!(matches!(b.build(), Err(FlowError::MissingBranch(_))));

        // the internal thread split is left without a successor
        let mut b = FlowGraphBuilder::new();
        b.static_multi_instance("fan", 3, 3);
        assert!(matches!(b.build(), Err(FlowError::SplitWithoutSuccessors(_))));
    }

    #[test]
    fn test_node_in_two_scopes_rejected() {
        let mut b = FlowGraphBuilder::new();
        let first = b.block("first");
        let second = b.block("second");
        let shared = pass_through(&mut b, "shared");
        b.add_branch(first, shared, shared).unwrap();
        b.add_branch(second, shared, shared).unwrap();
        assert!(matches!(b.build(), Err(FlowError::ConflictingParent { .. })));
    }

    #[test]
    fn test_multi_instance_wiring() {
        let mut b = FlowGraphBuilder::new();
        let wrapper = b.static_multi_instance("fan", 4, 2);
        let body = pass_through(&mut b, "body");
        b.add_branch(wrapper, body, body).unwrap();
        let graph = b.build().unwrap();

        let spec = graph.node(wrapper).unwrap().as_structured().unwrap();
        let (split, merge) = spec.branch().unwrap();
        assert_eq!(graph.node(split).unwrap().successor(), Some(body));
        assert_eq!(graph.node(body).unwrap().successor(), Some(merge));
        assert_eq!(graph.node(merge).unwrap().parent, Some(wrapper));
        assert!(matches!(
            graph.node(merge).unwrap().as_merge().unwrap().kind,
            MergeKind::ThreadMerge { instances: 4, accept: 2 }
        ));
    }

    #[test]
    fn test_multi_instance_accept_validated() {
        let mut b = FlowGraphBuilder::new();
        let wrapper = b.static_multi_instance("fan", 2, 3);
        let body = pass_through(&mut b, "body");
        b.add_branch(wrapper, body, body).unwrap();
        assert!(matches!(b.build(), Err(FlowError::InvalidThreshold { .. })));
    }

    #[test]
    fn test_release_needs_request() {
        let mut b = FlowGraphBuilder::new();
        b.release_resources("release", ResourcesId(7));
        assert!(matches!(b.build(), Err(FlowError::UnmatchedRelease { .. })));
    }

    #[test]
    fn test_activity_shape() {
        let mut b = FlowGraphBuilder::new();
        let (request, release) = b
            .activity(
                "consult",
                ResourcesId(1),
                vec![
                    WorkGroup::new("doctor", Distribution::constant(10.0)).with_need("doctor", 1),
                    WorkGroup::new("nurse", Distribution::constant(20.0)).with_need("nurse", 1),
                ],
            )
            .unwrap();
        let graph = b.build().unwrap();

        assert_eq!(graph.request_node(ResourcesId(1)), Some(request));
        assert_eq!(graph.workgroups(ResourcesId(1)).len(), 2);
        let select = graph.node(request).unwrap().successor().unwrap();
        let select_node = graph.node(select).unwrap();
        assert_eq!(select_node.successors.len(), 2);
        assert!(select_node.successors.iter().all(|e| e.is_guarded()));
        assert!(graph.node(release).unwrap().successors.is_empty());
        assert_eq!(graph.workgroup(ResourcesId(1), WorkGroupId(1)).unwrap().name, "nurse");
    }

    #[test]
    fn test_activity_needs_workgroups() {
        let mut b = FlowGraphBuilder::new();
        assert!(matches!(
            b.activity("empty", ResourcesId(1), Vec::new()),
            Err(FlowError::NoWorkGroups(_))
        ));
    }

    #[test]
    fn test_post_action_only_on_structured() {
        let mut b = FlowGraphBuilder::new();
        let wrapper = b.block("wrapper");
        let leaf = pass_through(&mut b, "leaf");
        b.with_post_action(wrapper, Action::set_attribute("done", 1.0)).unwrap();
        assert!(matches!(
            b.with_post_action(leaf, Action::set_attribute("done", 1.0)),
            Err(FlowError::WrongNodeKind { .. })
        ));
    }
}
