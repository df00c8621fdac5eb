// src/engine/core.rs

//! Synchronous core runtime.
//!
//! The core consumes [`RuntimeEvent`]s and produces [`CoreCommand`]s
//! describing what the IO shell should do next (run a node's unit of work,
//! deliver follow-up events, notify a parent). It never awaits and never
//! talks to a provisioner or a callback itself.
//!
//! Unlike a single-threaded scheduler, the core takes `&self`: the shell
//! steps it from many Tokio tasks at once. Node state lives in the
//! [`NodeStore`] and is only changed through compare-and-swap, and the only
//! cross-node state (per-request counters and notified flags) is atomic.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::dag::{
    CompositionRequest, DependencyGraph, SubTaskNode, SubTaskStatus, Transition,
};
use crate::engine::notifier::{RequestOutcome, RequestRegistry, RequestTracker};
use crate::engine::propagation::{
    dependency_failed_events, dependency_succeeded_events, handle_dependency_failed,
    handle_dependency_succeeded, handle_execution_finished, handle_execution_requested,
    handle_node_created, handle_node_expired,
};
use crate::engine::{RuntimeEvent, ScheduledNode};
use crate::errors::{CompositorError, Result};
use crate::store::NodeStore;
use crate::types::{CallbackRef, NodeId, RequestId};

/// Command produced by the core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Invoke the unit of work of this node.
    Execute(ScheduledNode),
    /// Feed these events back into the runtime.
    Deliver(Vec<RuntimeEvent>),
    /// Tell the owner of `request` how it ended. Produced once per request.
    NotifyParent {
        request: RequestId,
        callback_ref: CallbackRef,
        outcome: RequestOutcome,
    },
}

/// Decision returned by the core after handling a single event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// What happened to the node the event was addressed to.
    pub transition: Transition,
}

impl CoreStep {
    pub fn unchanged() -> Self {
        Self {
            commands: Vec::new(),
            transition: Transition::Unchanged,
        }
    }

    fn deliver(events: Vec<RuntimeEvent>) -> Self {
        let commands = if events.is_empty() {
            Vec::new()
        } else {
            vec![CoreCommand::Deliver(events)]
        };
        Self {
            commands,
            transition: Transition::Unchanged,
        }
    }

    /// Events this step asks the shell to deliver.
    pub fn delivered_events(&self) -> impl Iterator<Item = &RuntimeEvent> {
        self.commands.iter().flat_map(|c| match c {
            CoreCommand::Deliver(events) => events.as_slice(),
            _ => &[],
        })
    }

    /// Nodes this step asks the shell to execute.
    pub fn executed_nodes(&self) -> impl Iterator<Item = &ScheduledNode> {
        self.commands.iter().filter_map(|c| match c {
            CoreCommand::Execute(node) => Some(node),
            _ => None,
        })
    }

    /// The parent notification carried by this step, if any.
    pub fn notification(&self) -> Option<&RequestOutcome> {
        self.commands.iter().find_map(|c| match c {
            CoreCommand::NotifyParent { outcome, .. } => Some(outcome),
            _ => None,
        })
    }
}

/// Core runtime state: the node store plus the trackers of active requests.
#[derive(Debug)]
pub struct CoreRuntime {
    store: Arc<dyn NodeStore>,
    requests: RequestRegistry,
}

impl CoreRuntime {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self {
            store,
            requests: RequestRegistry::new(),
        }
    }

    pub fn store(&self) -> &dyn NodeStore {
        self.store.as_ref()
    }

    pub fn tracker(&self, request: &RequestId) -> Option<Arc<RequestTracker>> {
        self.requests.get(request)
    }

    pub fn node(&self, id: &NodeId) -> Result<Option<SubTaskNode>> {
        self.store.get(id)
    }

    /// Whether every request submitted to this core has notified its parent.
    pub fn is_idle(&self) -> bool {
        self.requests.all_notified()
    }

    /// Requests created or resumed that have not notified their parent yet.
    pub fn active_requests(&self) -> usize {
        self.requests.len()
    }

    /// Drop the tracker of a request that has notified its parent.
    pub(crate) fn release_request(&self, request: &RequestId) {
        self.requests.remove(request);
        debug!(request = %request, "request released");
    }

    /// Validate and persist every node of `request`, and register its tracker.
    ///
    /// Nothing is stored when validation fails. Returns one `NodeCreated`
    /// event per node, in dependency order; delivering them starts the graph.
    pub fn create_request(&self, request: &CompositionRequest) -> Result<Vec<RuntimeEvent>> {
        let graph = DependencyGraph::build(request)?;

        let nodes: Vec<SubTaskNode> = request
            .nodes
            .iter()
            .map(|spec| SubTaskNode::from_spec(spec, &request.callback_ref))
            .collect();

        let tracker = Arc::new(RequestTracker::new(
            request.request_id.clone(),
            request.callback_ref.clone(),
            nodes.len(),
        ));
        self.requests.insert(tracker)?;

        if let Err(err) = self.store.create_all(&nodes) {
            self.requests.remove(&request.request_id);
            return Err(err);
        }

        info!(
            request = %request.request_id,
            nodes = nodes.len(),
            roots = graph.roots().len(),
            "composition request created"
        );

        Ok(graph
            .topological_order()
            .into_iter()
            .map(|id| RuntimeEvent::NodeCreated { node: id.clone() })
            .collect())
    }

    /// Pick a request back up from stored node documents, e.g. after a
    /// restart.
    ///
    /// Rebuilds the tracker and re-emits everything needed to continue:
    /// `Created` nodes are started, `Executing` nodes are dispatched again,
    /// and the outcomes of terminal nodes are re-delivered to their
    /// dependents (deliveries are idempotent, so nothing is counted twice).
    /// If every node is already terminal the parent notification is part of
    /// the returned step.
    pub fn resume_request(&self, request_id: &RequestId) -> Result<CoreStep> {
        let nodes = self.store.list_request(request_id)?;
        let Some(first) = nodes.first() else {
            return Err(CompositorError::RequestNotFound(request_id.clone()));
        };
        let callback_ref = first.callback_ref.clone();

        let tracker = Arc::new(RequestTracker::from_nodes(
            request_id.clone(),
            callback_ref.clone(),
            &nodes,
        ));
        self.requests.insert(Arc::clone(&tracker))?;

        let mut events = Vec::new();
        for node in &nodes {
            match node.status {
                SubTaskStatus::Created => {
                    events.push(RuntimeEvent::NodeCreated {
                        node: node.id.clone(),
                    });
                }
                SubTaskStatus::Waiting => {}
                SubTaskStatus::Executing => {
                    events.push(RuntimeEvent::ExecutionRequested {
                        node: node.id.clone(),
                    });
                }
                SubTaskStatus::Completed => {
                    events.extend(dependency_succeeded_events(node, &node.resource_links));
                }
                SubTaskStatus::Failed => {
                    if let Some(reason) = &node.failure_reason {
                        events.extend(dependency_failed_events(node, reason));
                    }
                }
            }
        }

        info!(
            request = %request_id,
            nodes = nodes.len(),
            remaining = tracker.remaining(),
            "composition request resumed"
        );

        let mut step = CoreStep::deliver(events);
        if let Some(outcome) = tracker.try_finish() {
            self.release_request(request_id);
            step.commands.push(CoreCommand::NotifyParent {
                request: request_id.clone(),
                callback_ref,
                outcome,
            });
        }
        Ok(step)
    }

    /// Events that fail every non-terminal node whose expiration is at or
    /// before `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<Vec<RuntimeEvent>> {
        let expired: Vec<RuntimeEvent> = self
            .store
            .list()?
            .into_iter()
            .filter(|node| node.is_expired_at(now))
            .map(|node| RuntimeEvent::NodeExpired { node: node.id, now })
            .collect();

        if !expired.is_empty() {
            warn!(count = expired.len(), "expiration sweep found abandoned sub-tasks");
        }
        Ok(expired)
    }

    /// Handle a single runtime event and return the resulting commands.
    ///
    /// Stale or duplicate events are logged and dropped. Storage errors are
    /// logged as well; the affected node stays where it is until the
    /// expiration sweep fails it.
    pub fn step(&self, event: RuntimeEvent) -> CoreStep {
        let result = match event {
            RuntimeEvent::NodeCreated { node } => handle_node_created(self, &node),
            RuntimeEvent::DependencySucceeded {
                node,
                dependency,
                links,
            } => handle_dependency_succeeded(self, &node, &dependency, &links),
            RuntimeEvent::DependencyFailed { node, reason } => {
                handle_dependency_failed(self, &node, &reason)
            }
            RuntimeEvent::ExecutionFinished { node, result } => {
                handle_execution_finished(self, &node, &result)
            }
            RuntimeEvent::ExecutionRequested { node } => handle_execution_requested(self, &node),
            RuntimeEvent::NodeExpired { node, now } => handle_node_expired(self, &node, now),
            RuntimeEvent::SweepRequested { now } => self.sweep_expired(now).map(CoreStep::deliver),
            RuntimeEvent::ShutdownRequested => Ok(CoreStep::unchanged()),
        };

        match result {
            Ok(step) => step,
            Err(err) if err.is_invalid_transition() => {
                warn!(error = %err, "dropping stale or duplicate event");
                CoreStep::unchanged()
            }
            Err(err) => {
                error!(error = %err, "failed to handle runtime event");
                CoreStep::unchanged()
            }
        }
    }
}
