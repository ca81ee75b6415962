//! Flow Graph Model for Flowsim
//!
//! Entities in a simulation are driven through a directed graph of process
//! steps. This crate holds the static side of that picture: the graph, its
//! nodes and links, and the small values that travel along it.
//!
//! # Key Concepts
//!
//! - **FlowNode**: A vertex of the graph. Its [`NodeKind`] is one of the
//!   split, merge, structured, resource or leaf variants.
//! - **Edge**: A successor link. Choice splits read its guard, probability
//!   selections read its weight.
//! - **WorkToken**: Whether a traversal is live, and once cancelled, which
//!   nodes the dead traversal already crossed.
//! - **Entity**: The simulated individual. Guards read its attributes,
//!   actions write them, resource requests record acquisitions on it.
//! - **FlowGraphBuilder**: The construction phase. `build()` validates the
//!   graph and labels structured bodies before anything runs.
//!
//! # Design Principles
//!
//! 1. Graphs are immutable once built. Runtime state lives in the engine.
//! 2. Every handle is an arena index handed out by its owner.
//! 3. Malformed graphs fail at `build()`, not as stuck executors later.
//! 4. User callbacks fail loudly; their errors are never swallowed.

#![deny(unsafe_code)]

mod condition;
mod distribution;
mod edge;
mod entity;
mod errors;
mod graph;
mod ids;
mod node;
mod token;

pub use condition::*;
pub use distribution::*;
pub use edge::*;
pub use entity::*;
pub use errors::*;
pub use graph::*;
pub use ids::*;
pub use node::*;
pub use token::*;
