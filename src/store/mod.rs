// src/store/mod.rs

//! Persistence boundary for sub-task documents.
//!
//! Node documents are keyed by node id. Every mutation after creation goes
//! through [`NodeStore::compare_and_swap`] on the document version, which is
//! what makes concurrent handlers for the same node linearizable.
//!
//! - [`memory`] keeps documents in a map (tests, `store = "memory"`).
//! - [`file`] keeps one JSON document per node on disk, so state survives a
//!   process restart.

pub mod file;
pub mod memory;

use std::fmt::Debug;

use tracing::trace;

use crate::dag::{SubTaskNode, Transition};
use crate::errors::{CompositorError, Result};
use crate::types::{NodeId, RequestId};

pub use file::FileNodeStore;
pub use memory::InMemoryNodeStore;

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasResult {
    Success,
    NotFound,
    /// Someone else wrote the document since it was read.
    VersionConflict { actual: u64 },
}

impl CasResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CasResult::Success)
    }
}

/// Key-value store of sub-task documents with optimistic updates.
pub trait NodeStore: Send + Sync + Debug {
    /// Insert every node of a request, or none of them.
    ///
    /// Fails if any id is already present.
    fn create_all(&self, nodes: &[SubTaskNode]) -> Result<()>;

    fn get(&self, id: &NodeId) -> Result<Option<SubTaskNode>>;

    /// Replace the stored document with `node` if the stored version is still
    /// `expected_version`.
    fn compare_and_swap(&self, node: &SubTaskNode, expected_version: u64) -> Result<CasResult>;

    /// All stored nodes, in no particular order.
    fn list(&self) -> Result<Vec<SubTaskNode>>;

    fn list_request(&self, request_id: &RequestId) -> Result<Vec<SubTaskNode>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|n| &n.request_id == request_id)
            .collect())
    }
}

/// Read a node, apply `apply` to a copy, and write it back with
/// compare-and-swap, retrying from a fresh read on version conflicts.
///
/// Returns the node as it is stored afterwards together with the transition.
/// `Transition::Unchanged` skips the write; an error from `apply` aborts
/// without writing.
pub fn update_node<F>(
    store: &dyn NodeStore,
    id: &NodeId,
    mut apply: F,
) -> Result<(SubTaskNode, Transition)>
where
    F: FnMut(&mut SubTaskNode) -> Result<Transition>,
{
    loop {
        let current = store
            .get(id)?
            .ok_or_else(|| CompositorError::NodeNotFound(id.clone()))?;

        let mut next = current.clone();
        let transition = apply(&mut next)?;
        if !transition.is_persisted() {
            return Ok((current, transition));
        }

        next.version = current.version + 1;
        match store.compare_and_swap(&next, current.version)? {
            CasResult::Success => return Ok((next, transition)),
            CasResult::VersionConflict { actual } => {
                trace!(
                    node = %id,
                    expected = current.version,
                    actual,
                    "version conflict; retrying update"
                );
            }
            CasResult::NotFound => return Err(CompositorError::NodeNotFound(id.clone())),
        }
    }
}
