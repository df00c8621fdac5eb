// src/dag/request.rs

//! What a caller hands to the orchestrator when it submits a provisioning
//! request: every node with its dependency sets fully resolved.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::dag::node::NodeWork;
use crate::types::{CallbackRef, NodeId, RequestId};

/// Creation-time description of one sub-task node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub id: NodeId,
    /// Must match the owning request; a mismatch is an invalid graph.
    pub request_id: RequestId,
    pub depends_on: BTreeSet<NodeId>,
    pub dependents: BTreeSet<NodeId>,
    pub work: NodeWork,
    pub expiration: DateTime<Utc>,
}

/// Every node of one provisioning request plus the parent callback handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionRequest {
    pub request_id: RequestId,
    pub callback_ref: CallbackRef,
    pub nodes: Vec<NodeSpec>,
}

impl CompositionRequest {
    pub fn new(request_id: RequestId, callback_ref: CallbackRef) -> Self {
        Self {
            request_id,
            callback_ref,
            nodes: Vec::new(),
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}
