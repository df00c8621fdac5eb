use std::collections::VecDeque;

use compositor::engine::{
    CoreCommand, CoreRuntime, ExecutionResult, RequestOutcome, RuntimeEvent, ScheduledNode,
};
use compositor::dag::NodeWork;
use compositor::types::{NodeId, RequestId};

/// What happened while driving the core synchronously.
#[derive(Debug, Default)]
pub struct DriveReport {
    /// Nodes handed to the provisioning function, in dispatch order.
    pub executed: Vec<NodeId>,
    /// Parent notifications, in the order the core produced them.
    pub notifications: Vec<(RequestId, RequestOutcome)>,
    /// Number of events stepped.
    pub steps: usize,
}

/// Step `core` through `events` and everything they cause, FIFO, on the
/// current thread.
///
/// Dependency-only nodes complete immediately, as in the async runtime.
/// `provision` decides the result of every other node; `None` means the
/// call never answers.
pub fn drive<F>(core: &CoreRuntime, events: Vec<RuntimeEvent>, mut provision: F) -> DriveReport
where
    F: FnMut(&ScheduledNode) -> Option<ExecutionResult>,
{
    let mut queue: VecDeque<RuntimeEvent> = events.into();
    let mut report = DriveReport::default();

    while let Some(event) = queue.pop_front() {
        report.steps += 1;
        let step = core.step(event);
        for command in step.commands {
            match command {
                CoreCommand::Execute(node) => {
                    let result = match node.work {
                        NodeWork::DependencyOnly => Some(ExecutionResult::Success(Vec::new())),
                        NodeWork::Provision { .. } => {
                            report.executed.push(node.node.clone());
                            provision(&node)
                        }
                    };
                    if let Some(result) = result {
                        queue.push_back(RuntimeEvent::ExecutionFinished {
                            node: node.node,
                            result,
                        });
                    }
                }
                CoreCommand::Deliver(events) => queue.extend(events),
                CoreCommand::NotifyParent {
                    request, outcome, ..
                } => report.notifications.push((request, outcome)),
            }
        }
    }

    report
}

/// Provisioning function that succeeds with `link://<resource>`.
pub fn succeed_all(node: &ScheduledNode) -> Option<ExecutionResult> {
    match &node.work {
        NodeWork::Provision {
            resource_description_ref,
        } => Some(ExecutionResult::Success(vec![format!(
            "link://{resource_description_ref}"
        )])),
        NodeWork::DependencyOnly => Some(ExecutionResult::Success(Vec::new())),
    }
}
