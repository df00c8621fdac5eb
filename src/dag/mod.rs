// src/dag/mod.rs

//! Sub-task graph representation and per-node state machine.
//!
//! - [`graph`] holds the validated dependency arena of one request.
//! - [`request`] is what callers submit: nodes with resolved dependency sets.
//! - [`node`] is the persisted sub-task document.
//! - [`state_machine`] contains the transition rules applied to a node.

pub mod graph;
pub mod node;
pub mod request;
pub mod state_machine;

pub use graph::DependencyGraph;
pub use node::{NodeWork, SubTaskNode, SubTaskStatus};
pub use request::{CompositionRequest, NodeSpec};
pub use state_machine::Transition;
