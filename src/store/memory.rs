// src/store/memory.rs

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{CasResult, NodeStore};
use crate::dag::SubTaskNode;
use crate::errors::{CompositorError, Result};
use crate::types::NodeId;

/// Node store backed by a map; state is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryNodeStore {
    nodes: RwLock<HashMap<NodeId, SubTaskNode>>,
}

fn poison_err<T>(_: PoisonError<T>) -> CompositorError {
    CompositorError::storage("node store lock poisoned")
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.nodes.read().map_err(poison_err)?.len())
    }
}

impl NodeStore for InMemoryNodeStore {
    fn create_all(&self, nodes: &[SubTaskNode]) -> Result<()> {
        let mut map = self.nodes.write().map_err(poison_err)?;

        if let Some(existing) = nodes.iter().find(|n| map.contains_key(&n.id)) {
            return Err(CompositorError::InvalidGraph(format!(
                "node '{}' already exists",
                existing.id
            )));
        }

        for node in nodes {
            map.insert(node.id.clone(), node.clone());
        }
        Ok(())
    }

    fn get(&self, id: &NodeId) -> Result<Option<SubTaskNode>> {
        Ok(self.nodes.read().map_err(poison_err)?.get(id).cloned())
    }

    fn compare_and_swap(&self, node: &SubTaskNode, expected_version: u64) -> Result<CasResult> {
        let mut map = self.nodes.write().map_err(poison_err)?;

        let Some(stored) = map.get_mut(&node.id) else {
            return Ok(CasResult::NotFound);
        };
        if stored.version != expected_version {
            return Ok(CasResult::VersionConflict {
                actual: stored.version,
            });
        }

        *stored = node.clone();
        Ok(CasResult::Success)
    }

    fn list(&self) -> Result<Vec<SubTaskNode>> {
        Ok(self
            .nodes
            .read()
            .map_err(poison_err)?
            .values()
            .cloned()
            .collect())
    }
}
