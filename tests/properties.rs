// tests/properties.rs
//
// Property tests: single-writer commit tokens and single container binding,
// on the state machines alone and on the engine core under random events.

use std::collections::{BTreeMap, BTreeSet};

use dagengine::attempt::AttemptState;
use dagengine::commit::{CommitCoordinator, CommitDecision, CommitOutcome};
use dagengine::container::{Container, ContainerState};
use dagengine::engine::{DagState, EngineEvent};
use dagengine::types::{AttemptId, ContainerId, GroupId, NodeId, Resource, TaskId, VertexId};
use dagengine_test_utils::builders::TestDag;
use dagengine_test_utils::core_driver::{CoreDriver, finished, publishes};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum CommitOp {
    Request { vertex: u32, index: u32, number: u32 },
    Finish { vertex: u32, index: u32, number: u32 },
    Abort,
}

fn commit_op() -> impl Strategy<Value = CommitOp> {
    prop_oneof![
        6 => (0..3u32, 0..2u32, 0..3u32)
            .prop_map(|(vertex, index, number)| CommitOp::Request { vertex, index, number }),
        3 => (0..3u32, 0..2u32, 0..3u32)
            .prop_map(|(vertex, index, number)| CommitOp::Finish { vertex, index, number }),
        1 => Just(CommitOp::Abort),
    ]
}

/// Vertices 0 and 1 form a committing group with one task each; vertex 2
/// is a plain vertex with two tasks.
fn coordinator() -> CommitCoordinator {
    let mut c = CommitCoordinator::new();
    c.register_group(GroupId(0), &[VertexId(0), VertexId(1)]);
    c.register_vertex(VertexId(0), 1);
    c.register_vertex(VertexId(1), 1);
    c.register_vertex(VertexId(2), 2);
    c
}

fn attempt_of(vertex: u32, index: u32, number: u32) -> AttemptId {
    let index = if vertex < 2 { 0 } else { index };
    AttemptId::new(TaskId::new(VertexId(vertex), index), number)
}

proptest! {
    #[test]
    fn commit_token_has_a_single_writer(ops in proptest::collection::vec(commit_op(), 1..60)) {
        let mut c = coordinator();
        let mut holders: BTreeMap<TaskId, AttemptId> = BTreeMap::new();

        for op in ops {
            match op {
                CommitOp::Request { vertex, index, number } => {
                    let attempt = attempt_of(vertex, index, number);
                    match c.request(attempt) {
                        CommitDecision::Publish(granted) => {
                            let tasks: BTreeSet<TaskId> = granted.iter().map(|a| a.task).collect();
                            prop_assert_eq!(tasks.len(), granted.len(), "one grant per task");
                            for g in granted {
                                prop_assert!(
                                    holders.insert(g.task, g).is_none(),
                                    "task {} granted twice", g.task
                                );
                            }
                        }
                        CommitDecision::Reply(CommitOutcome::Granted) => {
                            prop_assert_eq!(holders.get(&attempt.task), Some(&attempt));
                        }
                        CommitDecision::Reply(CommitOutcome::Conflict { winner }) => {
                            prop_assert_ne!(winner, attempt);
                        }
                        CommitDecision::Reply(_) | CommitDecision::Wait => {}
                    }
                }
                CommitOp::Finish { vertex, index, number } => {
                    let _ = c.attempt_finished(attempt_of(vertex, index, number));
                }
                CommitOp::Abort => {
                    let released = c.abort("property");
                    for (_, outcome) in released {
                        prop_assert!(matches!(outcome, CommitOutcome::Aborted(_)));
                    }
                    prop_assert!(c.waiting().is_empty());
                }
            }

            for (task, holder) in &holders {
                prop_assert_eq!(c.token_holder(*task), Some(*holder), "token never moves");
            }
        }
    }
}

#[derive(Debug, Clone)]
enum ContainerOp {
    Allocate,
    Assign(u32),
    Launched,
    LaunchFailed,
    Succeeded(u32),
    Failed(u32),
    Killed(u32),
    Stop,
    NodeLost,
    StopTimeout,
    Completed,
}

fn container_op() -> impl Strategy<Value = ContainerOp> {
    prop_oneof![
        Just(ContainerOp::Allocate),
        (0..3u32).prop_map(ContainerOp::Assign),
        Just(ContainerOp::Launched),
        Just(ContainerOp::LaunchFailed),
        (0..3u32).prop_map(ContainerOp::Succeeded),
        (0..3u32).prop_map(ContainerOp::Failed),
        (0..3u32).prop_map(ContainerOp::Killed),
        Just(ContainerOp::Stop),
        Just(ContainerOp::NodeLost),
        Just(ContainerOp::StopTimeout),
        Just(ContainerOp::Completed),
    ]
}

fn numbered(n: u32) -> AttemptId {
    AttemptId::new(TaskId::new(VertexId(0), n), 0)
}

proptest! {
    #[test]
    fn container_binds_at_most_one_attempt(ops in proptest::collection::vec(container_op(), 1..40)) {
        let mut c = Container::new(ContainerId(1), NodeId::new("n1"), Resource::default());

        for op in ops {
            let (before_state, before_attempt) = (c.state(), c.attempt());
            let ok = match op {
                ContainerOp::Allocate => c.on_allocated().is_ok(),
                ContainerOp::Assign(n) => {
                    let ok = c.assign(numbered(n)).is_ok();
                    if ok {
                        prop_assert_eq!(before_attempt, None, "assign over an existing binding");
                    }
                    ok
                }
                ContainerOp::Launched => c.on_launched().is_ok(),
                ContainerOp::LaunchFailed => c.on_launch_failed().is_ok(),
                ContainerOp::Succeeded(n) => c.on_attempt_succeeded(numbered(n)).is_ok(),
                ContainerOp::Failed(n) => c.on_attempt_failed(numbered(n)).is_ok(),
                ContainerOp::Killed(n) => c.on_attempt_killed(numbered(n)).is_ok(),
                ContainerOp::Stop => { c.stop(); true }
                ContainerOp::NodeLost => { c.on_node_lost(); true }
                ContainerOp::StopTimeout => { c.on_stop_timeout(); true }
                ContainerOp::Completed => { c.on_completed(); true }
            };

            if !ok {
                prop_assert_eq!(c.state(), before_state, "rejected transition changed state");
                prop_assert_eq!(c.attempt(), before_attempt);
            }
            if c.attempt().is_some() {
                prop_assert!(
                    matches!(c.state(), ContainerState::Launching | ContainerState::Running),
                    "binding held in {:?}", c.state()
                );
            }
            if before_state.is_terminal() {
                prop_assert_eq!(c.state(), before_state, "terminal states are absorbing");
            }
        }
    }
}

#[derive(Debug, Clone)]
enum EngineOp {
    Grant(u8),
    Succeed(usize),
    Fail(usize),
    RequestCommit(usize),
    Speculate(u32),
    NodeLost(u8),
    Complete(usize),
}

fn engine_op() -> impl Strategy<Value = EngineOp> {
    prop_oneof![
        3 => (0..2u8).prop_map(EngineOp::Grant),
        3 => any::<usize>().prop_map(EngineOp::Succeed),
        2 => any::<usize>().prop_map(EngineOp::Fail),
        3 => any::<usize>().prop_map(EngineOp::RequestCommit),
        2 => (0..2u32).prop_map(EngineOp::Speculate),
        1 => (0..2u8).prop_map(EngineOp::NodeLost),
        1 => any::<usize>().prop_map(EngineOp::Complete),
    ]
}

fn running(d: &CoreDriver) -> Vec<AttemptId> {
    d.core
        .attempts()
        .filter(|a| a.state() == AttemptState::Running)
        .map(|a| a.id())
        .collect()
}

fn known_containers(d: &CoreDriver) -> Vec<ContainerId> {
    let ids: BTreeSet<ContainerId> = d.core.attempts().filter_map(|a| a.container()).collect();
    ids.into_iter().collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn engine_core_keeps_commit_and_binding_invariants(
        ops in proptest::collection::vec(engine_op(), 1..60)
    ) {
        let dag = TestDag::new("chaos").committed("v", 2, "/out").build();
        let mut d = CoreDriver::new(dag);
        d.start();

        for op in ops {
            match op {
                EngineOp::Grant(node) => {
                    d.grant(&format!("n{node}"));
                }
                EngineOp::Succeed(i) => {
                    let live = running(&d);
                    if !live.is_empty() {
                        d.succeed(live[i % live.len()]);
                    }
                }
                EngineOp::Fail(i) => {
                    let live = running(&d);
                    if !live.is_empty() {
                        d.fail(live[i % live.len()], "chaos");
                    }
                }
                EngineOp::RequestCommit(i) => {
                    let live = running(&d);
                    if !live.is_empty() {
                        d.request_commit(live[i % live.len()]);
                    }
                }
                EngineOp::Speculate(index) => {
                    d.speculate(TaskId::new(VertexId(0), index));
                }
                EngineOp::NodeLost(node) => {
                    d.step(EngineEvent::NodeLost { node: NodeId::new(format!("n{node}")) });
                }
                EngineOp::Complete(i) => {
                    let containers = known_containers(&d);
                    if !containers.is_empty() {
                        let container = containers[i % containers.len()];
                        d.step(EngineEvent::ContainerCompleted { container });
                    }
                }
            }

            prop_assert_ne!(d.core.state(), DagState::Error, "{:?}", d.core.status().diagnostics);
            prop_assert!(finished(&d.log).len() <= 1, "DAG finished twice");

            let mut published: BTreeMap<TaskId, usize> = BTreeMap::new();
            for a in publishes(&d.log) {
                *published.entry(a.task).or_default() += 1;
            }
            prop_assert!(published.values().all(|n| *n <= 1), "double publish: {:?}", published);

            let mut bound: BTreeSet<ContainerId> = BTreeSet::new();
            for a in running(&d) {
                let cid = d.container_of(a).expect("running attempt has a container");
                prop_assert!(bound.insert(cid), "container {} runs two attempts", cid);
                prop_assert_eq!(d.core.container(cid).and_then(|c| c.attempt()), Some(a));
            }
        }
    }
}
