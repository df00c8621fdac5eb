// src/engine/notifier.rs

//! Per-request completion tracking and the exactly-once parent notification.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::dag::{SubTaskNode, SubTaskStatus};
use crate::errors::{CompositorError, Result};
use crate::types::{CallbackRef, FailureReason, NodeId, RequestId, ResourceLink};

/// Terminal outcome of a single node, as fed into its request's tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Completed(Vec<ResourceLink>),
    Failed(FailureReason),
}

/// Aggregated outcome of a whole request, delivered to the parent once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Every node completed; links are grouped per node.
    Succeeded {
        links: BTreeMap<NodeId, Vec<ResourceLink>>,
    },
    /// At least one node failed; carries the first failure observed.
    Failed { reason: FailureReason },
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Succeeded { .. })
    }
}

/// Counts the non-terminal nodes of one request and decides, exactly once,
/// what the parent is told when the last one finishes.
///
/// The counter and the "already notified" flag are the only state shared by
/// all nodes of a request. Links are merged per node without overwriting, and
/// the first failure recorded wins.
#[derive(Debug)]
pub struct RequestTracker {
    request_id: RequestId,
    callback_ref: CallbackRef,
    remaining: AtomicUsize,
    notified: AtomicBool,
    links: Mutex<BTreeMap<NodeId, Vec<ResourceLink>>>,
    first_failure: Mutex<Option<FailureReason>>,
}

impl RequestTracker {
    pub fn new(request_id: RequestId, callback_ref: CallbackRef, node_count: usize) -> Self {
        Self {
            request_id,
            callback_ref,
            remaining: AtomicUsize::new(node_count),
            notified: AtomicBool::new(false),
            links: Mutex::new(BTreeMap::new()),
            first_failure: Mutex::new(None),
        }
    }

    /// Rebuild a tracker from stored node documents (after a restart).
    ///
    /// Terminal nodes are already accounted for; the failure reason of the
    /// first failed node in id order stands in for the first observed one.
    pub fn from_nodes(
        request_id: RequestId,
        callback_ref: CallbackRef,
        nodes: &[SubTaskNode],
    ) -> Self {
        let tracker = Self::new(request_id, callback_ref, nodes.len());

        let mut sorted: Vec<&SubTaskNode> = nodes.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut terminal = 0;
        for node in sorted {
            match node.status {
                SubTaskStatus::Completed => {
                    tracker.merge_links(&node.id, node.resource_links.clone());
                    terminal += 1;
                }
                SubTaskStatus::Failed => {
                    if let Some(reason) = &node.failure_reason {
                        tracker.record_failure(reason.clone());
                    }
                    terminal += 1;
                }
                _ => {}
            }
        }
        tracker
            .remaining
            .store(nodes.len() - terminal, Ordering::Release);
        tracker
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn callback_ref(&self) -> &CallbackRef {
        &self.callback_ref
    }

    /// Nodes of this request that are not terminal yet.
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn is_notified(&self) -> bool {
        self.notified.load(Ordering::Acquire)
    }

    /// Links produced so far, per node. After a failure these are what the
    /// caller needs for cleanup; they are not part of the failure outcome.
    pub fn completed_links(&self) -> BTreeMap<NodeId, Vec<ResourceLink>> {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record that `node` reached a terminal state.
    ///
    /// Returns the request outcome for exactly one caller: the one whose
    /// record made the request complete. Every other call returns `None`,
    /// however many nodes finish concurrently.
    pub fn record_terminal(&self, node: &NodeId, outcome: NodeOutcome) -> Option<RequestOutcome> {
        // Record before decrementing so the last decrementer sees every
        // node's contribution.
        match outcome {
            NodeOutcome::Completed(links) => self.merge_links(node, links),
            NodeOutcome::Failed(reason) => self.record_failure(reason),
        }

        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        match previous {
            Ok(1) => self.try_finish(),
            Ok(left) => {
                debug!(
                    request = %self.request_id,
                    node = %node,
                    remaining = left - 1,
                    "node terminal; request still in progress"
                );
                None
            }
            Err(_) => {
                warn!(
                    request = %self.request_id,
                    node = %node,
                    "terminal transition recorded after every node was already terminal"
                );
                None
            }
        }
    }

    /// Produce the outcome if every node is terminal and nobody has claimed
    /// the notification yet.
    pub fn try_finish(&self) -> Option<RequestOutcome> {
        if self.remaining() != 0 {
            return None;
        }
        if self.notified.swap(true, Ordering::AcqRel) {
            return None;
        }

        let failure = self
            .first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let outcome = match failure {
            Some(reason) => RequestOutcome::Failed { reason },
            None => RequestOutcome::Succeeded {
                links: self.completed_links(),
            },
        };

        info!(
            request = %self.request_id,
            success = outcome.is_success(),
            "all sub-tasks terminal; notifying parent"
        );
        Some(outcome)
    }

    fn merge_links(&self, node: &NodeId, links: Vec<ResourceLink>) {
        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(node.clone())
            .or_insert(links);
    }

    fn record_failure(&self, reason: FailureReason) {
        self.first_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert(reason);
    }
}

/// Trackers of the requests that have not notified their parent yet.
///
/// A tracker is released once its request has notified, so the same request
/// id can be resumed again later in the same process.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    trackers: RwLock<HashMap<RequestId, Arc<RequestTracker>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> CompositorError {
    CompositorError::storage("request registry lock poisoned")
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tracker; a request can only be tracked once at a time.
    pub fn insert(&self, tracker: Arc<RequestTracker>) -> Result<()> {
        let mut trackers = self.trackers.write().map_err(poison_err)?;
        if trackers.contains_key(tracker.request_id()) {
            return Err(CompositorError::RequestAlreadyActive(
                tracker.request_id().clone(),
            ));
        }
        trackers.insert(tracker.request_id().clone(), tracker);
        Ok(())
    }

    pub fn remove(&self, request: &RequestId) {
        if let Ok(mut trackers) = self.trackers.write() {
            trackers.remove(request);
        }
    }

    pub fn get(&self, request: &RequestId) -> Option<Arc<RequestTracker>> {
        self.trackers.read().ok()?.get(request).cloned()
    }

    /// Requests still being tracked.
    pub fn len(&self) -> usize {
        self.trackers.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every tracked request has notified its parent.
    ///
    /// A request that notified but is not released yet counts as done.
    pub fn all_notified(&self) -> bool {
        self.trackers
            .read()
            .map(|t| t.values().all(|tracker| tracker.is_notified()))
            .unwrap_or(false)
    }
}
