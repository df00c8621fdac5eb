// src/dag/state_machine.rs

//! Transition rules of a single sub-task node.
//!
//! Every method mutates the node in place and reports what happened as a
//! [`Transition`]. The methods are pure; the engine applies them inside a
//! compare-and-swap loop against the node store and performs the side
//! effects (execution, propagation, parent notification).

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::dag::node::{SubTaskNode, SubTaskStatus};
use crate::engine::ExecutionResult;
use crate::errors::{CompositorError, Result};
use crate::types::{FailureReason, NodeId, ResourceLink};

/// Outcome of applying one event to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The event was a duplicate, stale, or irrelevant; nothing to store.
    Unchanged,
    /// Bookkeeping changed but the node is not runnable yet.
    Updated,
    /// `Created -> Waiting`.
    Waiting,
    /// The node moved to `Executing`; its unit of work must be invoked.
    Execute,
    /// `Executing -> Completed` with the produced links.
    Completed(Vec<ResourceLink>),
    /// The node became `Failed` with this reason.
    Failed(FailureReason),
}

impl Transition {
    /// Whether the node document changed and has to be written back.
    pub fn is_persisted(&self) -> bool {
        !matches!(self, Transition::Unchanged)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::Completed(_) | Transition::Failed(_))
    }
}

impl SubTaskNode {
    /// Leave `Created`: straight to `Executing` when nothing is outstanding,
    /// otherwise `Waiting`.
    ///
    /// Dependencies may already have reported success before the start event
    /// is handled; those were counted while the node was `Created`.
    pub fn start(&mut self) -> Transition {
        if self.status != SubTaskStatus::Created {
            return Transition::Unchanged;
        }

        if self.remaining_dependencies == 0 {
            self.status = SubTaskStatus::Executing;
            Transition::Execute
        } else {
            self.status = SubTaskStatus::Waiting;
            Transition::Waiting
        }
    }

    /// Count the success of `dependency`, once per distinct prerequisite.
    pub fn dependency_succeeded(&mut self, dependency: &NodeId) -> Transition {
        match self.status {
            SubTaskStatus::Created | SubTaskStatus::Waiting => {}
            SubTaskStatus::Executing | SubTaskStatus::Completed | SubTaskStatus::Failed => {
                debug!(
                    node = %self.id,
                    dependency = %dependency,
                    status = ?self.status,
                    "dependency success ignored; node is past waiting"
                );
                return Transition::Unchanged;
            }
        }

        if !self.depends_on.contains(dependency) {
            warn!(
                node = %self.id,
                dependency = %dependency,
                "success from a node this one does not depend on; ignoring"
            );
            return Transition::Unchanged;
        }

        if !self.satisfied_dependencies.insert(dependency.clone()) {
            debug!(
                node = %self.id,
                dependency = %dependency,
                "duplicate dependency success; ignoring"
            );
            return Transition::Unchanged;
        }

        self.remaining_dependencies = self.remaining_dependencies.saturating_sub(1);

        if self.status == SubTaskStatus::Waiting && self.remaining_dependencies == 0 {
            self.status = SubTaskStatus::Executing;
            Transition::Execute
        } else {
            Transition::Updated
        }
    }

    /// Fail the node because a prerequisite (directly or transitively) failed.
    ///
    /// The first reason to reach a node wins.
    pub fn dependency_failed(&mut self, reason: &FailureReason) -> Transition {
        if self.is_terminal() {
            return Transition::Unchanged;
        }
        self.fail(reason.clone())
    }

    /// Apply the result reported by the provisioning adapter.
    ///
    /// Only valid while `Executing`; anything else is a stale or duplicate
    /// execution callback.
    pub fn execution_result(&mut self, result: &ExecutionResult) -> Result<Transition> {
        if self.status != SubTaskStatus::Executing {
            return Err(CompositorError::InvalidTransition {
                node: self.id.clone(),
                status: self.status,
                event: "execution result",
            });
        }

        Ok(match result {
            ExecutionResult::Success(links) => {
                self.status = SubTaskStatus::Completed;
                self.resource_links = links.clone();
                Transition::Completed(links.clone())
            }
            ExecutionResult::Failure(message) => {
                let reason = FailureReason::execution(self.id.clone(), message.clone());
                self.fail(reason)
            }
        })
    }

    /// Fail the node with a timeout if it is still non-terminal past its
    /// expiration.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Transition {
        if !self.is_expired_at(now) {
            return Transition::Unchanged;
        }
        self.fail(FailureReason::timeout(self.id.clone()))
    }

    fn fail(&mut self, reason: FailureReason) -> Transition {
        self.status = SubTaskStatus::Failed;
        self.resource_links.clear();
        self.failure_reason = Some(reason.clone());
        Transition::Failed(reason)
    }
}
