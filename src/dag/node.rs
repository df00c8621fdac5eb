// src/dag/node.rs

//! The persisted sub-task document.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dag::request::NodeSpec;
use crate::types::{CallbackRef, FailureReason, NodeId, RequestId, ResourceLink};

/// Lifecycle of a sub-task node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubTaskStatus {
    /// Persisted but not started yet.
    Created,
    /// Started; at least one prerequisite has not succeeded.
    Waiting,
    /// Handed to the provisioning adapter.
    Executing,
    Completed,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubTaskStatus::Completed | SubTaskStatus::Failed)
    }
}

/// The unit of work a node performs once its prerequisites succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeWork {
    /// Purely structural node; its unit of work succeeds with no links.
    DependencyOnly,
    /// Provision whatever `resource_description_ref` describes.
    Provision { resource_description_ref: String },
}

/// One vertex of a request's provisioning DAG, as stored in the node store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTaskNode {
    pub id: NodeId,
    pub request_id: RequestId,
    pub depends_on: BTreeSet<NodeId>,
    pub dependents: BTreeSet<NodeId>,
    /// Prerequisites that have not reported success yet.
    pub remaining_dependencies: usize,
    /// Prerequisites whose success has already been counted.
    #[serde(default)]
    pub satisfied_dependencies: BTreeSet<NodeId>,
    pub status: SubTaskStatus,
    pub work: NodeWork,
    /// Produced by a successful execution; empty in every other state.
    #[serde(default)]
    pub resource_links: Vec<ResourceLink>,
    pub callback_ref: CallbackRef,
    pub expiration: DateTime<Utc>,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    /// Optimistic concurrency version; bumped on every stored change.
    #[serde(default)]
    pub version: u64,
}

impl SubTaskNode {
    pub fn from_spec(spec: &NodeSpec, callback_ref: &CallbackRef) -> Self {
        Self {
            id: spec.id.clone(),
            request_id: spec.request_id.clone(),
            depends_on: spec.depends_on.clone(),
            dependents: spec.dependents.clone(),
            remaining_dependencies: spec.depends_on.len(),
            satisfied_dependencies: BTreeSet::new(),
            status: SubTaskStatus::Created,
            work: spec.work.clone(),
            resource_links: Vec::new(),
            callback_ref: callback_ref.clone(),
            expiration: spec.expiration,
            failure_reason: None,
            version: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the expiration sweep should fail this node at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.expiration <= now
    }
}
