//! Discrete-event flow engine for Flowsim
//!
//! The engine interprets a validated [`FlowGraph`](flowsim_types::FlowGraph)
//! for a population of entities. Every entity is carried through the graph
//! by executors holding a work token; the engine advances them on a
//! discrete simulated clock.
//!
//! # Key Principle
//!
//! **Nodes never call each other.** An arrival is dispatched, the node does
//! its work, and its continuations go back to the scheduler. Branches that
//! are not taken still travel the graph as dead tokens so that joins can
//! account for every predecessor.
//!
//! # Architecture
//!
//! The [`FlowEngine`] composes specialized components:
//!
//! - [`ExecutorArena`] — Executors and their parent/child relation
//! - [`Splitter`] — Fan-out of split nodes
//! - [`Merger`] and [`MergeControlTable`] — Fan-in of merge nodes, per entity
//! - [`ActionLeaf`] — Delays, generators, user actions and signals
//! - [`ResourcePool`] — Capacity behind resource requests
//! - [`Scheduler`] — Time-ordered event queue
//! - [`FlowObserver`] and [`EventLog`] — Notifications of every step
//!
//! # Example
//!
//! ```rust
//! use flowsim_engine::{EngineConfig, FlowEngine, FlowEventKind};
//! use flowsim_types::*;
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let mut builder = FlowGraphBuilder::new();
//! let fork = builder.parallel("fork");
//! let a = builder.delay("a", Distribution::constant(2.0));
//! let b = builder.delay("b", Distribution::constant(5.0));
//! let join = builder.synchronization("join", ControlStrategy::Safe);
//! builder.link(fork, a).unwrap();
//! builder.link(fork, b).unwrap();
//! builder.link(a, join).unwrap();
//! builder.link(b, join).unwrap();
//! let graph = Arc::new(builder.build().unwrap());
//!
//! let mut engine = FlowEngine::new(graph, EngineConfig::default());
//! let entity = engine.start_entity(fork, BTreeMap::new(), 0.0).unwrap();
//! let summary = engine.run().unwrap();
//!
//! assert!(engine.is_finished(entity));
//! assert_eq!(summary.final_time, 5.0);
//! assert_eq!(engine.event_log().count(join, &FlowEventKind::Fired { live: true }), 1);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod executor;
pub mod leaf;
pub mod merge;
pub mod merge_control;
pub mod observer;
pub mod resources;
pub mod scheduler;
pub mod split;
pub mod telemetry;
pub mod variates;

// Re-export main types
pub use config::{EngineConfig, LoggingConfig};
pub use engine::{FlowEngine, RunSummary};
pub use executor::{Executor, ExecutorArena};
pub use leaf::{ActionLeaf, LeafContext, LeafOutcome};
pub use merge::{Continuation, InstantEquivalence, Merger};
pub use merge_control::{MergeArrival, MergeControl, MergeControlTable};
pub use observer::{EventLog, FlowEvent, FlowEventKind, FlowObserver, TracingObserver};
pub use resources::{Acquire, CapacityPool, ResourcePool, ResourceRequest};
pub use scheduler::{EventKind, EventQueue, ScheduledEvent, Scheduler};
pub use split::{Branch, Splitter};
pub use telemetry::init_tracing;
pub use variates::{SeededVariates, VariateSource};
