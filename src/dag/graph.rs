// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::request::CompositionRequest;
use crate::errors::{CompositorError, Result};
use crate::types::NodeId;

/// Arena of the nodes of one request, indexed by position.
///
/// Dependency and dependent sets are stored as index sets so that the graph
/// never holds references between nodes. A graph can only be obtained through
/// [`DependencyGraph::build`], which rejects any request whose declarations
/// are malformed, so lookups here can assume a consistent DAG.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    ids: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    depends_on: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Validate the declarations of `request` and build the arena.
    ///
    /// Rejected with [`CompositorError::InvalidGraph`]:
    /// - a request without nodes,
    /// - a node that belongs to another request,
    /// - duplicate node ids,
    /// - self references and ids that are not part of this request,
    /// - `dependents` / `depends_on` sets that do not mirror each other,
    /// - cycles.
    pub fn build(request: &CompositionRequest) -> Result<Self> {
        if request.nodes.is_empty() {
            return Err(invalid(format!(
                "request '{}' contains no sub-task nodes",
                request.request_id
            )));
        }

        let mut ids = Vec::with_capacity(request.nodes.len());
        let mut index = HashMap::with_capacity(request.nodes.len());

        for node in &request.nodes {
            if node.request_id != request.request_id {
                return Err(invalid(format!(
                    "node '{}' belongs to request '{}', not '{}'",
                    node.id, node.request_id, request.request_id
                )));
            }
            if index.insert(node.id.clone(), ids.len()).is_some() {
                return Err(invalid(format!("duplicate node id '{}'", node.id)));
            }
            ids.push(node.id.clone());
        }

        let resolve = |owner: &NodeId, field: &str, target: &NodeId| -> Result<usize> {
            if target == owner {
                return Err(invalid(format!(
                    "node '{owner}' references itself in `{field}`"
                )));
            }
            index.get(target).copied().ok_or_else(|| {
                invalid(format!(
                    "node '{owner}' references '{target}' in `{field}`, which is not part of request '{}'",
                    request.request_id
                ))
            })
        };

        let mut depends_on = vec![BTreeSet::new(); ids.len()];
        let mut dependents = vec![BTreeSet::new(); ids.len()];

        for (idx, node) in request.nodes.iter().enumerate() {
            for dep in &node.depends_on {
                depends_on[idx].insert(resolve(&node.id, "depends_on", dep)?);
            }
            for dep in &node.dependents {
                dependents[idx].insert(resolve(&node.id, "dependents", dep)?);
            }
        }

        // Every edge must be declared on both ends.
        for idx in 0..ids.len() {
            for &up in &depends_on[idx] {
                if !dependents[up].contains(&idx) {
                    return Err(invalid(format!(
                        "node '{}' depends on '{}', but '{}' does not list it as a dependent",
                        ids[idx], ids[up], ids[up]
                    )));
                }
            }
            for &down in &dependents[idx] {
                if !depends_on[down].contains(&idx) {
                    return Err(invalid(format!(
                        "node '{}' lists '{}' as a dependent, but '{}' does not depend on it",
                        ids[idx], ids[down], ids[down]
                    )));
                }
            }
        }

        let graph = Self {
            ids,
            index,
            depends_on,
            dependents,
        };

        if let Err(cycle) = toposort(&graph.to_petgraph(), None) {
            return Err(invalid(format!(
                "cycle detected in request graph involving node '{}'",
                graph.ids[cycle.node_id()]
            )));
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Immediate prerequisites of a node (empty for unknown ids).
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<&NodeId> {
        self.lookup(id, &self.depends_on)
    }

    /// Nodes without prerequisites; these execute as soon as they are created.
    pub fn roots(&self) -> Vec<&NodeId> {
        (0..self.ids.len())
            .filter(|&idx| self.depends_on[idx].is_empty())
            .map(|idx| &self.ids[idx])
            .collect()
    }

    /// Every node reachable from `id` through `dependents`, excluding `id`.
    pub fn transitive_dependents(&self, id: &NodeId) -> BTreeSet<NodeId> {
        let mut reached = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return reached;
        };

        let mut stack: Vec<usize> = self.dependents[start].iter().copied().collect();
        let mut visited = BTreeSet::new();

        while let Some(idx) = stack.pop() {
            if !visited.insert(idx) {
                continue;
            }
            reached.insert(self.ids[idx].clone());
            stack.extend(self.dependents[idx].iter().copied());
        }

        reached
    }

    /// A dependency-respecting order of all nodes.
    pub fn topological_order(&self) -> Vec<&NodeId> {
        // `build` already rejected cycles, so the sort cannot fail here.
        toposort(&self.to_petgraph(), None)
            .map(|order| order.into_iter().map(|idx| &self.ids[idx]).collect())
            .unwrap_or_default()
    }

    fn lookup<'a>(&'a self, id: &NodeId, sets: &'a [BTreeSet<usize>]) -> Vec<&'a NodeId> {
        self.index
            .get(id)
            .map(|&idx| sets[idx].iter().map(|&i| &self.ids[i]).collect())
            .unwrap_or_default()
    }

    /// Edge direction: prerequisite -> dependent.
    fn to_petgraph(&self) -> DiGraphMap<usize, ()> {
        let mut graph = DiGraphMap::new();
        for idx in 0..self.ids.len() {
            graph.add_node(idx);
        }
        for (idx, ups) in self.depends_on.iter().enumerate() {
            for &up in ups {
                graph.add_edge(up, idx, ());
            }
        }
        graph
    }
}

fn invalid(msg: String) -> CompositorError {
    CompositorError::InvalidGraph(msg)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};

    use super::*;
    use crate::dag::node::NodeWork;
    use crate::dag::request::NodeSpec;
    use crate::types::{CallbackRef, RequestId};

    fn spec(id: &str, depends_on: &[&str], dependents: &[&str]) -> NodeSpec {
        NodeSpec {
            id: NodeId::from(id),
            request_id: RequestId::from("req"),
            depends_on: depends_on.iter().map(|s| NodeId::from(*s)).collect(),
            dependents: dependents.iter().map(|s| NodeId::from(*s)).collect(),
            work: NodeWork::DependencyOnly,
            expiration: Utc::now() + Duration::hours(1),
        }
    }

    fn request(nodes: Vec<NodeSpec>) -> CompositionRequest {
        CompositionRequest {
            request_id: RequestId::from("req"),
            callback_ref: CallbackRef::from("cb"),
            nodes,
        }
    }

    fn diamond() -> CompositionRequest {
        request(vec![
            spec("1", &[], &["2", "4"]),
            spec("2", &["1"], &["3", "4"]),
            spec("3", &["2"], &[]),
            spec("4", &["1", "2"], &[]),
        ])
    }

    fn expect_invalid(req: CompositionRequest, needle: &str) {
        match DependencyGraph::build(&req) {
            Err(CompositorError::InvalidGraph(msg)) => {
                assert!(msg.contains(needle), "message {msg:?} should mention {needle:?}")
            }
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn builds_diamond_and_answers_lookups() {
        let graph = DependencyGraph::build(&diamond()).unwrap();

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.roots(), vec![&NodeId::from("1")]);
        assert_eq!(
            graph.dependencies_of(&NodeId::from("4")),
            vec![&NodeId::from("1"), &NodeId::from("2")]
        );
        assert_eq!(
            graph.transitive_dependents(&NodeId::from("1")),
            ["2", "3", "4"].iter().map(|s| NodeId::from(*s)).collect::<BTreeSet<_>>()
        );

        let order = graph.topological_order();
        let pos = |id: &str| order.iter().position(|n| n.as_str() == id).unwrap();
        assert!(pos("1") < pos("2"));
        assert!(pos("2") < pos("3"));
        assert!(pos("2") < pos("4"));
    }

    #[test]
    fn rejects_empty_request() {
        expect_invalid(request(vec![]), "no sub-task nodes");
    }

    #[test]
    fn rejects_self_reference() {
        expect_invalid(request(vec![spec("a", &["a"], &["a"])]), "itself");
    }

    #[test]
    fn rejects_unknown_dependency() {
        expect_invalid(request(vec![spec("a", &["ghost"], &[])]), "ghost");
    }

    #[test]
    fn rejects_node_of_other_request() {
        let mut foreign = spec("b", &[], &[]);
        foreign.request_id = RequestId::from("other");
        expect_invalid(request(vec![spec("a", &[], &[]), foreign]), "belongs to request");
    }

    #[test]
    fn rejects_duplicate_ids() {
        expect_invalid(request(vec![spec("a", &[], &[]), spec("a", &[], &[])]), "duplicate");
    }

    #[test]
    fn rejects_dependent_not_mirrored() {
        // a lists b as dependent, but b does not depend on a
        expect_invalid(
            request(vec![spec("a", &[], &["b"]), spec("b", &[], &[])]),
            "does not depend on it",
        );
        // b depends on a, but a does not list b
        expect_invalid(
            request(vec![spec("a", &[], &[]), spec("b", &["a"], &[])]),
            "does not list it",
        );
    }

    #[test]
    fn rejects_cycle() {
        expect_invalid(
            request(vec![spec("a", &["b"], &["b"]), spec("b", &["a"], &["a"])]),
            "cycle detected",
        );
    }
}
