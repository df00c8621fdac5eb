#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use compositor::dag::{CompositionRequest, NodeSpec, NodeWork};
use compositor::types::{CallbackRef, NodeId, RequestId};

/// Builder for `CompositionRequest` to simplify test setup.
///
/// Only `depends_on` needs to be given; `dependents` are mirrored on
/// [`build`](Self::build).
pub struct RequestBuilder {
    request_id: RequestId,
    callback_ref: CallbackRef,
    expiration: DateTime<Utc>,
    nodes: Vec<NodeSpecBuilder>,
}

impl RequestBuilder {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: RequestId::from(request_id),
            callback_ref: CallbackRef::new(format!("cb-{request_id}")),
            expiration: Utc::now() + Duration::hours(1),
            nodes: Vec::new(),
        }
    }

    pub fn callback(mut self, callback_ref: &str) -> Self {
        self.callback_ref = CallbackRef::from(callback_ref);
        self
    }

    /// Expiration of every node that does not set its own.
    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expiration = at;
        self
    }

    pub fn with_node(mut self, node: NodeSpecBuilder) -> Self {
        self.nodes.push(node);
        self
    }

    /// Build without mirroring `dependents`, for malformed-graph tests.
    pub fn build_raw(self) -> CompositionRequest {
        let mut request = CompositionRequest::new(self.request_id.clone(), self.callback_ref);
        request.nodes = self
            .nodes
            .into_iter()
            .map(|n| NodeSpec {
                id: NodeId::from(n.id.as_str()),
                request_id: self.request_id.clone(),
                depends_on: n.depends_on.iter().map(|d| NodeId::from(d.as_str())).collect(),
                dependents: n.dependents.iter().map(|d| NodeId::from(d.as_str())).collect(),
                work: n.work,
                expiration: n.expiration.unwrap_or(self.expiration),
            })
            .collect();
        request
    }

    pub fn build(self) -> CompositionRequest {
        let mut request = self.build_raw();

        let mut dependents: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for node in &request.nodes {
            for dep in &node.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(node.id.clone());
            }
        }
        for node in &mut request.nodes {
            if let Some(mirrored) = dependents.remove(&node.id) {
                node.dependents.extend(mirrored);
            }
        }
        request
    }
}

/// Builder for one node of a `RequestBuilder`.
#[derive(Debug, Clone)]
pub struct NodeSpecBuilder {
    id: String,
    work: NodeWork,
    depends_on: Vec<String>,
    dependents: Vec<String>,
    expiration: Option<DateTime<Utc>>,
}

impl NodeSpecBuilder {
    /// Node that provisions `resource`.
    pub fn provision(id: &str, resource: &str) -> Self {
        Self::with_work(
            id,
            NodeWork::Provision {
                resource_description_ref: resource.to_string(),
            },
        )
    }

    /// Node that provisions a resource named after itself.
    pub fn new(id: &str) -> Self {
        Self::provision(id, &format!("res-{id}"))
    }

    pub fn dependency_only(id: &str) -> Self {
        Self::with_work(id, NodeWork::DependencyOnly)
    }

    fn with_work(id: &str, work: NodeWork) -> Self {
        Self {
            id: id.to_string(),
            work,
            depends_on: vec![],
            dependents: vec![],
            expiration: None,
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.depends_on.push(dep.to_string());
        self
    }

    /// Explicit dependent, in addition to the mirrored ones.
    pub fn before(mut self, dependent: &str) -> Self {
        self.dependents.push(dependent.to_string());
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expiration = Some(at);
        self
    }
}

/// `1 -> {2, 3} -> 4`, each node provisioning `res-<id>`.
pub fn diamond(request_id: &str) -> CompositionRequest {
    RequestBuilder::new(request_id)
        .with_node(NodeSpecBuilder::new("1"))
        .with_node(NodeSpecBuilder::new("2").after("1"))
        .with_node(NodeSpecBuilder::new("3").after("1"))
        .with_node(NodeSpecBuilder::new("4").after("2").after("3"))
        .build()
}

/// `1 -> 2 -> 3`, plus `4` depending on both `1` and `2`. The `1 -> 4` edge
/// is redundant with `1 -> 2 -> 4`.
pub fn transitive_diamond(request_id: &str) -> CompositionRequest {
    RequestBuilder::new(request_id)
        .with_node(NodeSpecBuilder::new("1"))
        .with_node(NodeSpecBuilder::new("2").after("1"))
        .with_node(NodeSpecBuilder::new("3").after("2"))
        .with_node(NodeSpecBuilder::new("4").after("1").after("2"))
        .build()
}

/// `n0 -> n1 -> ... -> n{len-1}`.
pub fn chain(request_id: &str, len: usize) -> CompositionRequest {
    let mut builder = RequestBuilder::new(request_id);
    for i in 0..len {
        let mut node = NodeSpecBuilder::new(&format!("n{i}"));
        if i > 0 {
            node = node.after(&format!("n{}", i - 1));
        }
        builder = builder.with_node(node);
    }
    builder.build()
}
