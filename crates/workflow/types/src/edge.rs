//! Flow edges: successor links, optionally guarded or weighted
//!
//! Choice splits read the guard on each edge, probability selections read
//! the weight. Every other node ignores both, and the builder refuses to
//! attach them where they would be ignored.

use crate::{Condition, FlowId};

/// An outgoing link of a flow node
#[derive(Clone, Debug)]
pub struct Edge {
    /// Successor node
    pub target: FlowId,
    /// Guard for exclusive and multi choice. `None` means always true.
    pub condition: Option<Condition>,
    /// Relative weight for probability selection
    pub weight: f64,
}

impl Edge {
    pub fn new(target: FlowId) -> Self {
        Self {
            target,
            condition: None,
            weight: 1.0,
        }
    }

    pub fn guarded(target: FlowId, condition: Condition) -> Self {
        Self {
            condition: Some(condition),
            ..Self::new(target)
        }
    }

    pub fn weighted(target: FlowId, weight: f64) -> Self {
        Self {
            weight,
            ..Self::new(target)
        }
    }

    pub fn is_guarded(&self) -> bool {
        self.condition.is_some()
    }
}
