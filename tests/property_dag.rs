// tests/property_dag.rs

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use compositor::dag::{CompositionRequest, DependencyGraph, NodeWork, SubTaskStatus};
use compositor::engine::{CoreCommand, CoreRuntime, ExecutionResult, RequestOutcome, RuntimeEvent};
use compositor::store::InMemoryNodeStore;
use compositor::types::NodeId;
use compositor_test_utils::builders::{NodeSpecBuilder, RequestBuilder};

/// A random DAG: node `i` may only depend on nodes `0..i`, which keeps it
/// acyclic. Some nodes are dependency-only.
fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = CompositionRequest> {
    (1..=max_nodes).prop_flat_map(|num_nodes| {
        let deps = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..4),
            num_nodes,
        );
        let dependency_only = proptest::collection::vec(any::<bool>(), num_nodes);

        (deps, dependency_only).prop_map(move |(raw_deps, dependency_only)| {
            let mut builder = RequestBuilder::new("prop");
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let name = format!("node_{i}");
                let mut node = if dependency_only[i] && i > 0 {
                    NodeSpecBuilder::dependency_only(&name)
                } else {
                    NodeSpecBuilder::new(&name)
                };

                let valid: BTreeSet<usize> = if i == 0 {
                    BTreeSet::new()
                } else {
                    potential.into_iter().map(|d| d % i).collect()
                };
                for dep in valid {
                    node = node.after(&format!("node_{dep}"));
                }
                builder = builder.with_node(node);
            }
            builder.build()
        })
    })
}

struct Outcome {
    executed: Vec<NodeId>,
    notifications: Vec<RequestOutcome>,
}

/// Drive the core, taking the next event from a position chosen by `picks`
/// so deliveries arrive in arbitrary order.
fn run_shuffled(
    core: &CoreRuntime,
    events: Vec<RuntimeEvent>,
    failing: &HashSet<String>,
    picks: &[usize],
) -> Outcome {
    let mut queue = events;
    let mut outcome = Outcome {
        executed: Vec::new(),
        notifications: Vec::new(),
    };
    let mut turn = 0;

    while !queue.is_empty() {
        let pick = picks.get(turn % picks.len().max(1)).copied().unwrap_or(0);
        turn += 1;
        let event = queue.remove(pick % queue.len());

        for command in core.step(event).commands {
            match command {
                CoreCommand::Execute(node) => {
                    let result = match &node.work {
                        NodeWork::DependencyOnly => ExecutionResult::Success(vec![]),
                        NodeWork::Provision { .. } => {
                            outcome.executed.push(node.node.clone());
                            if failing.contains(node.node.as_str()) {
                                ExecutionResult::Failure("scripted failure".into())
                            } else {
                                ExecutionResult::Success(vec![format!("link://{}", node.node)])
                            }
                        }
                    };
                    queue.push(RuntimeEvent::ExecutionFinished {
                        node: node.node,
                        result,
                    });
                }
                CoreCommand::Deliver(events) => queue.extend(events),
                CoreCommand::NotifyParent { outcome: o, .. } => outcome.notifications.push(o),
            }
        }
    }

    outcome
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_dags_terminate_with_one_consistent_notification(
        request in dag_strategy(12),
        failing_indices in proptest::collection::vec(0..12usize, 0..4),
        picks in proptest::collection::vec(any::<usize>(), 1..32),
    ) {
        let failing: HashSet<String> = failing_indices
            .iter()
            .map(|i| format!("node_{i}"))
            .collect();

        let core = CoreRuntime::new(Arc::new(InMemoryNodeStore::new()));
        let events = core.create_request(&request).unwrap();
        let outcome = run_shuffled(&core, events, &failing, &picks);

        // Exactly one notification, and every node ends terminal.
        prop_assert_eq!(outcome.notifications.len(), 1);
        let mut any_failed = false;
        for spec in &request.nodes {
            let node = core.node(&spec.id).unwrap().unwrap();
            prop_assert!(node.is_terminal(), "node {} ended {:?}", node.id, node.status);
            any_failed |= node.status == SubTaskStatus::Failed;
        }

        // No node runs twice, and none runs before every prerequisite completed.
        let unique: HashSet<&NodeId> = outcome.executed.iter().collect();
        prop_assert_eq!(unique.len(), outcome.executed.len());
        for id in &outcome.executed {
            let spec = request.node(id).unwrap();
            for dep in &spec.depends_on {
                let dep_node = core.node(dep).unwrap().unwrap();
                prop_assert_eq!(dep_node.status, SubTaskStatus::Completed);
            }
        }

        // A failed execution takes every descendant down with it, unexecuted.
        let graph = DependencyGraph::build(&request).unwrap();
        for id in outcome.executed.iter().filter(|id| failing.contains(id.as_str())) {
            for descendant in graph.transitive_dependents(id) {
                let node = core.node(&descendant).unwrap().unwrap();
                prop_assert_eq!(node.status, SubTaskStatus::Failed);
                prop_assert!(!unique.contains(&descendant), "{} ran after an ancestor failed", descendant);
            }
        }

        // Success exactly when nothing failed.
        prop_assert_eq!(outcome.notifications[0].is_success(), !any_failed);
        if let RequestOutcome::Succeeded { links } = &outcome.notifications[0] {
            prop_assert_eq!(links.len(), request.nodes.len());
        }
    }
}
