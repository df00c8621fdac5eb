// src/engine/mod.rs

//! Orchestration engine for compositor.
//!
//! This module ties together:
//! - the per-node state machine (through the node store)
//! - completion / failure propagation between nodes
//! - the per-request parent callback notifier
//! - the async runtime that reacts to:
//!   - node creation
//!   - dependency success / failure deliveries
//!   - provisioning results
//!   - expiration sweeps
//!   - shutdown signals
//!
//! The synchronous core lives in [`core`]; the async/IO shell is implemented
//! in [`runtime`], and [`orchestrator`] is the handle callers use to submit
//! requests to a running shell.

use chrono::{DateTime, Utc};

use crate::dag::NodeWork;
use crate::types::{FailureReason, NodeId, RequestId, ResourceLink};

/// Result reported by the provisioning adapter for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Success(Vec<ResourceLink>),
    Failure(String),
}

/// Events flowing into the runtime from the orchestrator handle, the
/// provisioner, the sweeper, and the core itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A node was persisted and should leave `Created`.
    NodeCreated { node: NodeId },
    /// `dependency` completed; `node` is one of its dependents.
    DependencySucceeded {
        node: NodeId,
        dependency: NodeId,
        links: Vec<ResourceLink>,
    },
    /// An ancestor of `node` failed.
    DependencyFailed { node: NodeId, reason: FailureReason },
    /// The provisioning adapter finished the node's unit of work.
    ExecutionFinished { node: NodeId, result: ExecutionResult },
    /// Re-dispatch a node that was `Executing` when state was reloaded.
    ExecutionRequested { node: NodeId },
    /// The sweep found `node` past its expiration.
    NodeExpired { node: NodeId, now: DateTime<Utc> },
    /// Look for expired nodes.
    SweepRequested { now: DateTime<Utc> },
    /// Graceful shutdown requested (e.g. Ctrl-C, or idle in one-shot mode).
    ShutdownRequested,
}

/// A node the core wants the provisioning adapter to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNode {
    pub node: NodeId,
    pub request: RequestId,
    pub work: NodeWork,
}

/// Runtime options used by the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Stop the runtime once every tracked request has notified its parent.
    pub exit_when_idle: bool,
    /// Run the expiration sweep periodically.
    pub sweep_interval: Option<std::time::Duration>,
    /// Capacity of the runtime event channel.
    pub channel_capacity: usize,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            exit_when_idle: false,
            sweep_interval: None,
            channel_capacity: 256,
        }
    }
}

pub mod callback;
pub mod core;
pub mod notifier;
pub mod orchestrator;
pub mod propagation;
pub mod runtime;

pub use callback::{CallbackRegistry, ChannelCallback, ParentCallback, RequestNotification};
pub use core::{CoreCommand, CoreRuntime, CoreStep};
pub use notifier::{NodeOutcome, RequestOutcome, RequestRegistry, RequestTracker};
pub use orchestrator::Orchestrator;
pub use runtime::Runtime;
