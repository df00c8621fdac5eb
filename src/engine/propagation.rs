// src/engine/propagation.rs

//! Event handling logic for the core runtime.
//!
//! Every handler applies one state-machine operation to the addressed node
//! through [`update_node`], then turns the resulting [`Transition`] into
//! commands:
//!
//! - `Execute` dispatches the node's unit of work.
//! - `Completed` delivers a success (with links) to each dependent.
//! - `Failed` delivers the failure reason to each dependent, which cascades
//!   through every descendant.
//!
//! Terminal transitions are also recorded on the request tracker, which
//! yields the parent notification once the last node of the request is
//! terminal.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dag::{SubTaskNode, SubTaskStatus, Transition};
use crate::engine::core::{CoreCommand, CoreRuntime, CoreStep};
use crate::engine::notifier::NodeOutcome;
use crate::engine::{ExecutionResult, RuntimeEvent, ScheduledNode};
use crate::errors::Result;
use crate::store::update_node;
use crate::types::{FailureReason, NodeId, ResourceLink};

/// Handle a freshly persisted node.
pub fn handle_node_created(core: &CoreRuntime, node: &NodeId) -> Result<CoreStep> {
    apply(core, node, |n| Ok(n.start()))
}

/// Handle the completion of one of `node`'s dependencies.
pub fn handle_dependency_succeeded(
    core: &CoreRuntime,
    node: &NodeId,
    dependency: &NodeId,
    links: &[ResourceLink],
) -> Result<CoreStep> {
    debug!(
        node = %node,
        dependency = %dependency,
        links = links.len(),
        "dependency succeeded"
    );
    apply(core, node, |n| Ok(n.dependency_succeeded(dependency)))
}

/// Handle the failure of one of `node`'s ancestors.
pub fn handle_dependency_failed(
    core: &CoreRuntime,
    node: &NodeId,
    reason: &FailureReason,
) -> Result<CoreStep> {
    apply(core, node, |n| Ok(n.dependency_failed(reason)))
}

/// Handle the result reported by the provisioning adapter.
pub fn handle_execution_finished(
    core: &CoreRuntime,
    node: &NodeId,
    result: &ExecutionResult,
) -> Result<CoreStep> {
    apply(core, node, |n| n.execution_result(result))
}

/// Handle an expiration found by the sweep.
pub fn handle_node_expired(
    core: &CoreRuntime,
    node: &NodeId,
    now: DateTime<Utc>,
) -> Result<CoreStep> {
    apply(core, node, |n| Ok(n.expire(now)))
}

/// Dispatch a node that is already `Executing` without changing its state.
///
/// Used after reloading state: the previous process may have died while the
/// unit of work was running.
pub fn handle_execution_requested(core: &CoreRuntime, node: &NodeId) -> Result<CoreStep> {
    let Some(stored) = core.node(node)? else {
        warn!(node = %node, "execution requested for unknown node");
        return Ok(CoreStep::unchanged());
    };

    if stored.status != SubTaskStatus::Executing {
        debug!(node = %node, status = ?stored.status, "node no longer executing; not dispatching");
        return Ok(CoreStep::unchanged());
    }

    Ok(CoreStep {
        commands: vec![CoreCommand::Execute(scheduled(&stored))],
        transition: Transition::Unchanged,
    })
}

/// `DependencySucceeded` events from `node` to each of its dependents.
pub fn dependency_succeeded_events(
    node: &SubTaskNode,
    links: &[ResourceLink],
) -> Vec<RuntimeEvent> {
    node.dependents
        .iter()
        .map(|dependent| RuntimeEvent::DependencySucceeded {
            node: dependent.clone(),
            dependency: node.id.clone(),
            links: links.to_vec(),
        })
        .collect()
}

/// `DependencyFailed` events from `node` to each of its dependents.
pub fn dependency_failed_events(node: &SubTaskNode, reason: &FailureReason) -> Vec<RuntimeEvent> {
    node.dependents
        .iter()
        .map(|dependent| RuntimeEvent::DependencyFailed {
            node: dependent.clone(),
            reason: reason.clone(),
        })
        .collect()
}

fn apply<F>(core: &CoreRuntime, id: &NodeId, op: F) -> Result<CoreStep>
where
    F: FnMut(&mut SubTaskNode) -> Result<Transition>,
{
    let (node, transition) = update_node(core.store(), id, op)?;
    let commands = after_transition(core, &node, &transition);
    Ok(CoreStep {
        commands,
        transition,
    })
}

fn after_transition(
    core: &CoreRuntime,
    node: &SubTaskNode,
    transition: &Transition,
) -> Vec<CoreCommand> {
    let mut commands = Vec::new();

    match transition {
        Transition::Unchanged => {}
        Transition::Updated => {
            debug!(
                node = %node.id,
                remaining = node.remaining_dependencies,
                "dependency recorded"
            );
        }
        Transition::Waiting => {
            debug!(
                node = %node.id,
                remaining = node.remaining_dependencies,
                "waiting on dependencies"
            );
        }
        Transition::Execute => {
            debug!(node = %node.id, "dependencies satisfied; executing");
            commands.push(CoreCommand::Execute(scheduled(node)));
        }
        Transition::Completed(links) => {
            info!(node = %node.id, links = links.len(), "sub-task completed");
            let events = dependency_succeeded_events(node, links);
            if !events.is_empty() {
                commands.push(CoreCommand::Deliver(events));
            }
            commands.extend(record_terminal(core, node, NodeOutcome::Completed(links.clone())));
        }
        Transition::Failed(reason) => {
            warn!(node = %node.id, reason = %reason, "sub-task failed");
            let events = dependency_failed_events(node, reason);
            if !events.is_empty() {
                commands.push(CoreCommand::Deliver(events));
            }
            commands.extend(record_terminal(core, node, NodeOutcome::Failed(reason.clone())));
        }
    }

    commands
}

fn record_terminal(
    core: &CoreRuntime,
    node: &SubTaskNode,
    outcome: NodeOutcome,
) -> Option<CoreCommand> {
    let Some(tracker) = core.tracker(&node.request_id) else {
        warn!(
            node = %node.id,
            request = %node.request_id,
            "terminal node belongs to an untracked request"
        );
        return None;
    };

    let outcome = tracker.record_terminal(&node.id, outcome)?;
    core.release_request(&node.request_id);
    Some(CoreCommand::NotifyParent {
        request: node.request_id.clone(),
        callback_ref: tracker.callback_ref().clone(),
        outcome,
    })
}

fn scheduled(node: &SubTaskNode) -> ScheduledNode {
    ScheduledNode {
        node: node.id.clone(),
        request: node.request_id.clone(),
        work: node.work.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::dag::{CompositionRequest, NodeSpec, NodeWork};
    use crate::engine::notifier::RequestOutcome;
    use crate::store::InMemoryNodeStore;
    use crate::types::{CallbackRef, FailureKind, RequestId};

    fn spec(id: &str, deps: &[&str], dependents: &[&str], work: NodeWork) -> NodeSpec {
        NodeSpec {
            id: NodeId::from(id),
            request_id: RequestId::from("r"),
            depends_on: deps.iter().map(|d| NodeId::from(*d)).collect(),
            dependents: dependents.iter().map(|d| NodeId::from(*d)).collect(),
            work,
            expiration: Utc::now() + Duration::hours(1),
        }
    }

    fn chain_core() -> CoreRuntime {
        // a -> b
        let mut request = CompositionRequest::new(RequestId::from("r"), CallbackRef::from("cb"));
        request.nodes = vec![
            spec(
                "a",
                &[],
                &["b"],
                NodeWork::Provision {
                    resource_description_ref: "vm".into(),
                },
            ),
            spec("b", &["a"], &[], NodeWork::DependencyOnly),
        ];

        let core = CoreRuntime::new(Arc::new(InMemoryNodeStore::new()));
        core.create_request(&request).unwrap();
        core
    }

    #[test]
    fn root_start_dispatches_execution() {
        let core = chain_core();
        let step = handle_node_created(&core, &NodeId::from("a")).unwrap();
        assert_eq!(step.transition, Transition::Execute);
        let dispatched: Vec<_> = step.executed_nodes().collect();
        assert_eq!(dispatched.len(), 1);
        assert_eq!(dispatched[0].node, NodeId::from("a"));
    }

    #[test]
    fn completion_delivers_links_to_dependents() {
        let core = chain_core();
        handle_node_created(&core, &NodeId::from("a")).unwrap();
        let step = handle_execution_finished(
            &core,
            &NodeId::from("a"),
            &ExecutionResult::Success(vec!["vm://1".into()]),
        )
        .unwrap();

        let delivered: Vec<_> = step.delivered_events().cloned().collect();
        assert_eq!(
            delivered,
            vec![RuntimeEvent::DependencySucceeded {
                node: NodeId::from("b"),
                dependency: NodeId::from("a"),
                links: vec!["vm://1".into()],
            }]
        );
        assert!(step.notification().is_none());
    }

    #[test]
    fn failure_cascades_and_notifies_once_all_terminal() {
        let core = chain_core();
        handle_node_created(&core, &NodeId::from("a")).unwrap();
        handle_node_created(&core, &NodeId::from("b")).unwrap();

        let step = handle_execution_finished(
            &core,
            &NodeId::from("a"),
            &ExecutionResult::Failure("quota".into()),
        )
        .unwrap();
        assert!(step.notification().is_none());

        let cascade: Vec<_> = step.delivered_events().cloned().collect();
        assert_eq!(cascade.len(), 1);

        let RuntimeEvent::DependencyFailed { node, reason } = &cascade[0] else {
            panic!("expected a failure delivery, got {:?}", cascade[0]);
        };
        let step = handle_dependency_failed(&core, node, reason).unwrap();
        match step.notification() {
            Some(RequestOutcome::Failed { reason }) => {
                assert_eq!(reason.origin, NodeId::from("a"));
                assert_eq!(reason.kind, FailureKind::Execution);
            }
            other => panic!("expected failed outcome, got {other:?}"),
        }
    }

    #[test]
    fn execution_requested_only_dispatches_executing_nodes() {
        let core = chain_core();
        let step = handle_execution_requested(&core, &NodeId::from("a")).unwrap();
        assert!(step.commands.is_empty());

        handle_node_created(&core, &NodeId::from("a")).unwrap();
        let step = handle_execution_requested(&core, &NodeId::from("a")).unwrap();
        assert_eq!(step.executed_nodes().count(), 1);
        assert_eq!(step.transition, Transition::Unchanged);
    }
}
