//! Work tokens: the liveness record carried by every executor

use crate::FlowId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether a traversal is live and, once cancelled, which nodes it crossed.
///
/// A live token never records a path. As soon as the token is cancelled the
/// cancelling node is recorded, and every node the dead traversal reaches
/// afterwards is added too. Re-arriving at a recorded node ends the
/// traversal, which keeps dead paths from spinning around loops.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkToken {
    executable: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    path: BTreeSet<FlowId>,
}

impl WorkToken {
    /// A fresh executable token
    pub fn live() -> Self {
        Self {
            executable: true,
            path: BTreeSet::new(),
        }
    }

    /// A dead token whose path starts at `node`
    pub fn cancelled_at(node: FlowId) -> Self {
        let mut path = BTreeSet::new();
        path.insert(node);
        Self {
            executable: false,
            path,
        }
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Mark the token non-executable and record the cancelling node
    pub fn cancel(&mut self, node: FlowId) {
        self.executable = false;
        self.path.insert(node);
    }

    /// Record that a dead traversal crossed `node`. No-op on live tokens.
    pub fn visit(&mut self, node: FlowId) {
        if !self.executable {
            self.path.insert(node);
        }
    }

    pub fn was_visited(&self, node: FlowId) -> bool {
        self.path.contains(&node)
    }

    pub fn path(&self) -> &BTreeSet<FlowId> {
        &self.path
    }

    /// Turn the token live again, forgetting the dead path
    pub fn revive(&mut self) {
        self.executable = true;
        self.path.clear();
    }
}

impl Default for WorkToken {
    fn default() -> Self {
        Self::live()
    }
}
