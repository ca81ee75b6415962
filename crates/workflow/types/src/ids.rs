//! Arena handles used across the model and the runtime
//!
//! Every handle is a small `Copy` integer handed out by whoever owns the
//! arena: the graph builder for flow nodes and workgroups, the engine for
//! executors and entities. Nothing is allocated from a global counter.

use serde::{Deserialize, Serialize};

/// Simulated time, in model units
pub type SimTime = f64;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(raw: u32) -> Self {
                Self(raw)
            }

            /// Position of this handle inside its owning arena
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// Handle of a flow node inside a [`crate::FlowGraph`]
    FlowId,
    "flow"
);

handle!(
    /// Handle of an executor (logical thread of control)
    ExecutorId,
    "exec"
);

handle!(
    /// Handle of a simulated entity
    EntityId,
    "entity"
);

handle!(
    /// Identifier shared by a resource request node and its matching release
    ResourcesId,
    "res"
);

handle!(
    /// Handle of one way of satisfying a resource request
    WorkGroupId,
    "wg"
);
