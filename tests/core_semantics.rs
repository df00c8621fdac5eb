// tests/core_semantics.rs

use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{Duration, Utc};

use compositor::dag::{SubTaskStatus, Transition};
use compositor::engine::{CoreRuntime, ExecutionResult, RequestOutcome, RuntimeEvent};
use compositor::store::{InMemoryNodeStore, NodeStore};
use compositor::types::{FailureKind, NodeId, RequestId};
use compositor_test_utils::builders::{
    NodeSpecBuilder, RequestBuilder, chain, diamond, transitive_diamond,
};
use compositor_test_utils::driver::{drive, succeed_all};

fn core() -> CoreRuntime {
    CoreRuntime::new(Arc::new(InMemoryNodeStore::new()))
}

fn status(core: &CoreRuntime, node: &str) -> SubTaskStatus {
    core.node(&NodeId::from(node)).unwrap().unwrap().status
}

#[test]
fn created_request_starts_in_created_state() {
    let core = core();
    let events = core.create_request(&diamond("r")).unwrap();

    assert_eq!(events.len(), 4);
    assert_eq!(events[0], RuntimeEvent::NodeCreated { node: NodeId::from("1") });
    for node in ["1", "2", "3", "4"] {
        assert_eq!(status(&core, node), SubTaskStatus::Created);
    }
}

#[test]
fn diamond_executes_each_node_once_and_sink_last() {
    let core = core();
    let events = core.create_request(&diamond("r")).unwrap();
    let report = drive(&core, events, succeed_all);

    let executed: Vec<&str> = report.executed.iter().map(NodeId::as_str).collect();
    assert_eq!(executed.first(), Some(&"1"));
    assert_eq!(executed.last(), Some(&"4"));
    assert_eq!(executed.len(), 4);

    assert_eq!(report.notifications.len(), 1);
    let (request, outcome) = &report.notifications[0];
    assert_eq!(request, &RequestId::from("r"));
    let RequestOutcome::Succeeded { links } = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(
        links.get(&NodeId::from("4")),
        Some(&vec!["link://res-4".to_string()])
    );
}

#[test]
fn transitive_diamond_completes_every_node_with_one_notification() {
    let core = core();
    let events = core.create_request(&transitive_diamond("r")).unwrap();
    let report = drive(&core, events, succeed_all);

    let executed: Vec<&str> = report.executed.iter().map(NodeId::as_str).collect();
    assert_eq!(executed.len(), 4);
    let pos = |id: &str| executed.iter().position(|n| *n == id).unwrap();
    assert!(pos("1") < pos("2"));
    assert!(pos("2") < pos("3"));
    assert!(pos("2") < pos("4"));

    for node in ["1", "2", "3", "4"] {
        assert_eq!(status(&core, node), SubTaskStatus::Completed);
    }

    assert_eq!(report.notifications.len(), 1);
    let RequestOutcome::Succeeded { links } = &report.notifications[0].1 else {
        panic!("expected success, got {:?}", report.notifications[0].1);
    };
    for node in ["1", "2", "3", "4"] {
        assert_eq!(
            links.get(&NodeId::from(node)),
            Some(&vec![format!("link://res-{node}")])
        );
    }
}

#[test]
fn sink_waits_for_every_prerequisite() {
    let core = core();
    core.create_request(&diamond("r")).unwrap();
    for node in ["1", "2", "3", "4"] {
        core.step(RuntimeEvent::NodeCreated {
            node: NodeId::from(node),
        });
    }
    assert_eq!(status(&core, "4"), SubTaskStatus::Waiting);

    let step = core.step(RuntimeEvent::DependencySucceeded {
        node: NodeId::from("4"),
        dependency: NodeId::from("2"),
        links: vec![],
    });
    assert_eq!(step.transition, Transition::Updated);
    assert_eq!(step.executed_nodes().count(), 0);

    // The same prerequisite again does not count twice.
    let step = core.step(RuntimeEvent::DependencySucceeded {
        node: NodeId::from("4"),
        dependency: NodeId::from("2"),
        links: vec![],
    });
    assert_eq!(step.transition, Transition::Unchanged);
    let stored = core.node(&NodeId::from("4")).unwrap().unwrap();
    assert_eq!(stored.remaining_dependencies, 1);

    let step = core.step(RuntimeEvent::DependencySucceeded {
        node: NodeId::from("4"),
        dependency: NodeId::from("3"),
        links: vec![],
    });
    assert_eq!(step.transition, Transition::Execute);
    assert_eq!(status(&core, "4"), SubTaskStatus::Executing);
}

#[test]
fn dependency_success_before_start_is_not_lost() {
    let core = core();
    core.create_request(&chain("r", 2)).unwrap();

    core.step(RuntimeEvent::DependencySucceeded {
        node: NodeId::from("n1"),
        dependency: NodeId::from("n0"),
        links: vec![],
    });
    let step = core.step(RuntimeEvent::NodeCreated {
        node: NodeId::from("n1"),
    });
    assert_eq!(step.transition, Transition::Execute);
}

#[test]
fn failure_cascade_reaches_every_descendant_without_execution() {
    let core = core();
    let events = core.create_request(&chain("r", 5)).unwrap();
    let report = drive(&core, events, |node| {
        if node.node.as_str() == "n1" {
            Some(ExecutionResult::Failure("disk full".into()))
        } else {
            succeed_all(node)
        }
    });

    let executed: Vec<&str> = report.executed.iter().map(NodeId::as_str).collect();
    assert_eq!(executed, vec!["n0", "n1"]);
    for node in ["n2", "n3", "n4"] {
        let stored = core.node(&NodeId::from(node)).unwrap().unwrap();
        assert_eq!(stored.status, SubTaskStatus::Failed);
        assert!(stored.resource_links.is_empty());
        assert_eq!(
            stored.failure_reason.as_ref().map(|r| r.origin.clone()),
            Some(NodeId::from("n1"))
        );
    }

    assert_eq!(report.notifications.len(), 1);
    match &report.notifications[0].1 {
        RequestOutcome::Failed { reason } => {
            assert_eq!(reason.kind, FailureKind::Execution);
            assert_eq!(reason.message, "disk full");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn late_result_after_failure_is_dropped() {
    let core = core();
    core.create_request(
        &RequestBuilder::new("r")
            .with_node(NodeSpecBuilder::new("a"))
            .build(),
    )
    .unwrap();
    core.step(RuntimeEvent::NodeCreated {
        node: NodeId::from("a"),
    });

    let step = core.step(RuntimeEvent::NodeExpired {
        node: NodeId::from("a"),
        now: Utc::now() + Duration::hours(2),
    });
    assert!(step.transition.is_terminal());
    assert!(step.notification().is_some());

    let step = core.step(RuntimeEvent::ExecutionFinished {
        node: NodeId::from("a"),
        result: ExecutionResult::Success(vec!["late".into()]),
    });
    assert_eq!(step.transition, Transition::Unchanged);
    assert!(step.commands.is_empty());

    let stored = core.node(&NodeId::from("a")).unwrap().unwrap();
    assert_eq!(stored.status, SubTaskStatus::Failed);
    assert!(stored.resource_links.is_empty());
}

#[test]
fn replaying_every_event_twice_changes_nothing() {
    let single = core();
    let events = single.create_request(&diamond("r")).unwrap();
    let once = drive(&single, events, succeed_all);

    let doubled = core();
    let events = doubled.create_request(&diamond("r")).unwrap();
    let mut queue: Vec<RuntimeEvent> = events;
    let mut notifications = Vec::new();
    let mut executed = Vec::new();

    // Deliver each event twice in a row, following every command.
    while !queue.is_empty() {
        let mut next = Vec::new();
        for event in queue.drain(..) {
            for _ in 0..2 {
                let step = doubled.step(event.clone());
                for node in step.executed_nodes() {
                    executed.push(node.node.clone());
                    next.push(RuntimeEvent::ExecutionFinished {
                        node: node.node.clone(),
                        result: succeed_all(node).unwrap(),
                    });
                }
                next.extend(step.delivered_events().cloned());
                if let Some(outcome) = step.notification() {
                    notifications.push(outcome.clone());
                }
            }
        }
        queue = next;
    }

    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0], once.notifications[0].1);
    let unique: BTreeSet<_> = executed.iter().collect();
    assert_eq!(unique.len(), executed.len(), "no node executed twice");

    for node in ["1", "2", "3", "4"] {
        let a = single.node(&NodeId::from(node)).unwrap().unwrap();
        let b = doubled.node(&NodeId::from(node)).unwrap().unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.resource_links, b.resource_links);
        assert_eq!(a.remaining_dependencies, b.remaining_dependencies);
    }
}

#[test]
fn concurrent_prerequisite_deliveries_dispatch_sink_once() {
    const FAN_IN: usize = 24;

    let mut builder = RequestBuilder::new("fan-in");
    let mut sink = NodeSpecBuilder::new("sink");
    for i in 0..FAN_IN {
        let id = format!("p{i}");
        builder = builder.with_node(NodeSpecBuilder::new(&id));
        sink = sink.after(&id);
    }
    let request = builder.with_node(sink).build();

    let core = Arc::new(core());
    core.create_request(&request).unwrap();
    core.step(RuntimeEvent::NodeCreated {
        node: NodeId::from("sink"),
    });

    let barrier = Arc::new(Barrier::new(FAN_IN));
    let handles: Vec<_> = (0..FAN_IN)
        .map(|i| {
            let core = Arc::clone(&core);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                core.step(RuntimeEvent::DependencySucceeded {
                    node: NodeId::from("sink"),
                    dependency: NodeId::new(format!("p{i}")),
                    links: vec![],
                })
                .executed_nodes()
                .count()
            })
        })
        .collect();

    let dispatches: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(dispatches, 1);
    assert_eq!(status(&core, "sink"), SubTaskStatus::Executing);
}

#[test]
fn concurrent_terminal_transitions_notify_exactly_once() {
    const WIDTH: usize = 32;

    let mut builder = RequestBuilder::new("wide");
    for i in 0..WIDTH {
        builder = builder.with_node(NodeSpecBuilder::new(&format!("w{i}")));
    }
    let core = Arc::new(core());
    let events = core.create_request(&builder.build()).unwrap();
    for event in events {
        core.step(event);
    }

    let barrier = Arc::new(Barrier::new(WIDTH));
    let handles: Vec<_> = (0..WIDTH)
        .map(|i| {
            let core = Arc::clone(&core);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let result = if i % 5 == 0 {
                    ExecutionResult::Failure(format!("w{i} failed"))
                } else {
                    ExecutionResult::Success(vec![format!("link-{i}")])
                };
                core.step(RuntimeEvent::ExecutionFinished {
                    node: NodeId::new(format!("w{i}")),
                    result,
                })
                .notification()
                .cloned()
            })
        })
        .collect();

    let notifications: Vec<RequestOutcome> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .collect();
    assert_eq!(notifications.len(), 1);
    assert!(!notifications[0].is_success());
    assert!(core.is_idle());
}

#[test]
fn sweep_only_reports_expired_non_terminal_nodes() {
    let core = core();
    let soon = Utc::now() + Duration::minutes(1);
    let later = Utc::now() + Duration::hours(1);
    let request = RequestBuilder::new("r")
        .with_node(NodeSpecBuilder::new("quick").expiring_at(soon))
        .with_node(NodeSpecBuilder::new("slow").expiring_at(later))
        .with_node(NodeSpecBuilder::new("done").expiring_at(soon))
        .build();
    core.create_request(&request).unwrap();
    core.step(RuntimeEvent::NodeCreated {
        node: NodeId::from("done"),
    });
    core.step(RuntimeEvent::ExecutionFinished {
        node: NodeId::from("done"),
        result: ExecutionResult::Success(vec![]),
    });

    let now = soon + Duration::seconds(1);
    let expired = core.sweep_expired(now).unwrap();
    assert_eq!(
        expired,
        vec![RuntimeEvent::NodeExpired {
            node: NodeId::from("quick"),
            now,
        }]
    );
}

#[test]
fn resume_rebuilds_progress_from_the_store() {
    let store: Arc<dyn NodeStore> = Arc::new(InMemoryNodeStore::new());

    // First process: node 1 completes, node 2 is handed to the provisioner.
    let first = CoreRuntime::new(Arc::clone(&store));
    let events = first.create_request(&diamond("r")).unwrap();
    drive(&first, events, |node| match node.node.as_str() {
        "1" => succeed_all(node),
        _ => None,
    });
    assert_eq!(status(&first, "2"), SubTaskStatus::Executing);
    assert_eq!(status(&first, "4"), SubTaskStatus::Waiting);

    // Second process over the same store.
    let second = CoreRuntime::new(Arc::clone(&store));
    let step = second.resume_request(&RequestId::from("r")).unwrap();
    assert!(step.notification().is_none());

    let events: Vec<RuntimeEvent> = step.delivered_events().cloned().collect();
    assert!(events.contains(&RuntimeEvent::ExecutionRequested {
        node: NodeId::from("2")
    }));

    let report = drive(&second, events, succeed_all);
    let executed: BTreeSet<&str> = report.executed.iter().map(NodeId::as_str).collect();
    assert!(!executed.contains("1"), "completed node must not run again");
    assert!(executed.contains("4"));
    assert_eq!(report.notifications.len(), 1);
    assert!(report.notifications[0].1.is_success());
}

#[test]
fn resume_of_unknown_request_fails() {
    let core = core();
    assert!(core.resume_request(&RequestId::from("ghost")).is_err());
}

#[test]
fn notified_requests_are_released() {
    let core = core();
    let mut events = Vec::new();
    for i in 0..100 {
        let request = RequestBuilder::new(&format!("r{i}"))
            .with_node(NodeSpecBuilder::new(&format!("only-{i}")))
            .build();
        events.extend(core.create_request(&request).unwrap());
    }
    assert_eq!(core.active_requests(), 100);
    assert!(!core.is_idle());

    let report = drive(&core, events, succeed_all);
    assert_eq!(report.notifications.len(), 100);
    assert_eq!(core.active_requests(), 0);
    assert!(core.is_idle());
}

#[test]
fn finished_request_can_be_resumed_in_the_same_process() {
    let core = core();
    let events = core.create_request(&chain("r", 2)).unwrap();
    let report = drive(&core, events, succeed_all);
    assert_eq!(report.notifications.len(), 1);

    let step = core.resume_request(&RequestId::from("r")).unwrap();
    assert!(step.notification().is_some_and(RequestOutcome::is_success));
    assert_eq!(core.active_requests(), 0);

    // Re-delivered successes hit terminal nodes and change nothing.
    let events: Vec<RuntimeEvent> = step.delivered_events().cloned().collect();
    let replay = drive(&core, events, succeed_all);
    assert!(replay.executed.is_empty());
    assert!(replay.notifications.is_empty());
}
