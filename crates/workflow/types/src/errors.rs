//! Error types for the flow model and its runtime

use crate::{EntityId, ExecutorId, FlowId, ResourcesId};

/// Errors that can occur while building or running a flow graph
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    // ── Construction ─────────────────────────────────────────────────
    #[error("Flow node not found: {0}")]
    NodeNotFound(FlowId),

    #[error("Duplicate link: {from} -> {to}")]
    DuplicateLink { from: FlowId, to: FlowId },

    #[error("Node cannot link to itself: {0}")]
    SelfLink(FlowId),

    #[error("Node {0} accepts at most one successor")]
    TooManySuccessors(FlowId),

    #[error("Node {node} ({kind}) does not accept {what} links")]
    LinkNotAllowed {
        node: FlowId,
        kind: &'static str,
        what: &'static str,
    },

    #[error("Split {0} has no successors")]
    SplitWithoutSuccessors(FlowId),

    #[error("Merge {0} has no predecessors")]
    MergeWithoutPredecessors(FlowId),

    #[error("Entities cannot start at merge {0}")]
    StartAtMerge(FlowId),

    #[error("Structured flow {0} has no branch")]
    MissingBranch(FlowId),

    #[error("Structured flow {node}: exit {exit} is not reachable from entry {entry}")]
    ExitNotReachable {
        node: FlowId,
        entry: FlowId,
        exit: FlowId,
    },

    #[error("Structured flow {node}: exit {exit} must not have successors")]
    ExitHasSuccessors { node: FlowId, exit: FlowId },

    #[error("Node {node} is claimed by structured flows {first} and {second}")]
    ConflictingParent {
        node: FlowId,
        first: FlowId,
        second: FlowId,
    },

    #[error("Invalid accept threshold on merge {node}: {accept} of {predecessors}")]
    InvalidThreshold {
        node: FlowId,
        accept: u32,
        predecessors: usize,
    },

    #[error("Invalid instance count on node {node}: {instances}")]
    InvalidInstances { node: FlowId, instances: u32 },

    #[error("Invalid selection weights on node {0}")]
    InvalidWeights(FlowId),

    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    #[error("Release {release} has no matching request for {resources}")]
    UnmatchedRelease {
        release: FlowId,
        resources: ResourcesId,
    },

    #[error("Resources {0} are requested by more than one node")]
    DuplicateRequest(ResourcesId),

    #[error("Resource request {0} has no workgroups")]
    NoWorkGroups(FlowId),

    #[error("Node {node} is not a {expected} node")]
    WrongNodeKind { node: FlowId, expected: &'static str },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Executor not found: {0}")]
    ExecutorNotFound(ExecutorId),

    #[error("Executor handles exhausted")]
    ExecutorsExhausted,

    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    #[error("Merge ledger inconsistency at {node} for {entity}: {reason}")]
    MergeLedger {
        node: FlowId,
        entity: EntityId,
        reason: String,
    },

    #[error("Resources {resources} are not held by {entity}")]
    ResourcesNotHeld {
        entity: EntityId,
        resources: ResourcesId,
    },

    #[error("Event budget of {0} events exceeded")]
    EventBudgetExceeded(u64),

    // ── User callbacks ───────────────────────────────────────────────
    #[error("Condition '{label}' failed: {source}")]
    ConditionFailed {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Expression '{label}' failed: {source}")]
    ExpressionFailed {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Action '{label}' failed: {source}")]
    ActionFailed {
        label: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type alias for flow operations
pub type FlowResult<T> = Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FlowError::DuplicateLink {
            from: FlowId(1),
            to: FlowId(2),
        };
        assert_eq!(err.to_string(), "Duplicate link: flow#1 -> flow#2");

        let err = FlowError::InvalidThreshold {
            node: FlowId(4),
            accept: 3,
            predecessors: 3,
        };
        assert!(err.to_string().contains("3 of 3"));
    }

    #[test]
    fn test_callback_error_keeps_source() {
        use std::error::Error;

        let err = FlowError::ConditionFailed {
            label: "age >= 65".into(),
            source: anyhow::anyhow!("attribute 'age' missing"),
        };
        assert!(err.to_string().contains("age >= 65"));
        assert!(err.source().is_some());
    }
}
