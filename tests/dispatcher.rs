// tests/dispatcher.rs
//
// The async dispatcher against a fake allocator, a scripted launcher and
// in-memory storage.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dagengine::dag::Dag;
use dagengine::engine::{
    DagClient, DagState, DagStatus, Dispatcher, EngineChannels, LaunchRequest, submit,
};
use dagengine::errors::{EngineError, Result};
use dagengine::exec::AttemptEnv;
use dagengine::storage::{MockStorage, OutputStorage};
use dagengine::types::VertexId;
use dagengine_test_utils::builders::{TestDag, context, fast_config};
use dagengine_test_utils::fake_cluster::{
    AllocatorLog, FakeAllocator, LauncherLog, Script, ScriptedLauncher,
};
use dagengine_test_utils::{init_tracing, with_timeout};
use tokio::task::JoinHandle;

struct Harness {
    client: DagClient,
    handle: JoinHandle<Result<DagStatus>>,
    allocator: Arc<Mutex<AllocatorLog>>,
    launcher: Arc<Mutex<LauncherLog>>,
}

impl Harness {
    async fn finish(self) -> DagStatus {
        with_timeout(self.handle)
            .await
            .expect("dispatcher task panicked")
            .expect("dispatcher returned an error")
    }
}

fn dispatcher<F>(
    dag: Dag,
    storage: &MockStorage,
    script: F,
) -> Result<(Dispatcher<FakeAllocator, ScriptedLauncher>, Arc<Mutex<AllocatorLog>>, Arc<Mutex<LauncherLog>>)>
where
    F: Fn(&LaunchRequest) -> Script + Send + Sync + 'static,
{
    let context = context(dag);
    let channels = EngineChannels::new(context.config.event_channel_capacity);
    let shared: Arc<dyn OutputStorage> = Arc::new(storage.clone());

    let allocator = FakeAllocator::new(channels.events());
    let env = AttemptEnv {
        events: channels.events(),
        commit: channels.commit_client(context.config.commit_poll_interval),
        storage: Arc::clone(&shared),
    };
    let launcher = ScriptedLauncher::new(env, script);
    let (alloc_log, launch_log) = (allocator.log(), launcher.log());

    let dispatcher = Dispatcher::new(context, channels, allocator, launcher, shared)?;
    Ok((dispatcher, alloc_log, launch_log))
}

fn spawn<F>(dag: Dag, storage: &MockStorage, script: F) -> Harness
where
    F: Fn(&LaunchRequest) -> Script + Send + Sync + 'static,
{
    let (d, allocator, launcher) = dispatcher(dag, storage, script).expect("dispatcher setup");
    let (client, handle) = submit(d);
    Harness {
        client,
        handle,
        allocator,
        launcher,
    }
}

async fn wait_for_commits(launcher: &Arc<Mutex<LauncherLog>>, n: usize) {
    with_timeout(async {
        while launcher.lock().unwrap().commits.len() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
}

fn has_temporary(paths: &[PathBuf]) -> bool {
    paths
        .iter()
        .any(|p| p.components().any(|c| c.as_os_str() == "_temporary"))
}

#[tokio::test]
async fn successful_dag_publishes_every_task_and_cleans_staging() {
    init_tracing();
    let storage = MockStorage::new();
    let dag = TestDag::new("ok")
        .vertex("prep", 1)
        .committed("v", 2, "/out/v")
        .edge("prep", "v")
        .build();

    let h = spawn(dag, &storage, |_| Script::succeed());
    let client = h.client.clone();
    let status = h.finish().await;

    assert_eq!(status.state, DagState::Succeeded, "{status}");
    assert_eq!(
        storage.paths(),
        vec![
            PathBuf::from("/out/v/part-v-00000"),
            PathBuf::from("/out/v/part-v-00001"),
        ]
    );
    assert_eq!(storage.published().len(), 2);
    assert!(!has_temporary(&storage.paths()));
    assert_eq!(status.vertices["v"].succeeded_tasks, 2);
    assert_eq!(client.status().state, DagState::Succeeded);
}

#[tokio::test]
async fn wait_for_completion_reports_the_terminal_status() {
    init_tracing();
    let storage = MockStorage::new();
    let dag = TestDag::new("wait").vertex("v", 3).build();

    let h = spawn(dag, &storage, |_| Script::succeed());
    let status = with_timeout(h.client.wait_for_completion()).await.unwrap();

    assert_eq!(status.state, DagState::Succeeded);
    // Aborting a finished DAG is a no-op.
    h.client.abort("too late").await.unwrap();
    assert_eq!(h.finish().await.state, DagState::Succeeded);
}

#[tokio::test]
async fn failed_attempt_is_retried() {
    init_tracing();
    let storage = MockStorage::new();
    let dag = TestDag::new("retry").committed("v", 1, "/out").build();

    let h = spawn(dag, &storage, |req| {
        if req.attempt.number == 0 {
            Script::fail("transient")
        } else {
            Script::succeed()
        }
    });
    let launcher = Arc::clone(&h.launcher);
    let status = h.finish().await;

    assert_eq!(status.state, DagState::Succeeded, "{status}");
    assert_eq!(status.vertices["v"].failed_attempts, 1);
    assert_eq!(launcher.lock().unwrap().launched.len(), 2);
    assert_eq!(storage.paths(), vec![PathBuf::from("/out/part-v-00000")]);
}

#[tokio::test]
async fn exhausted_task_fails_the_dag_and_releases_containers() {
    init_tracing();
    let storage = MockStorage::new();
    let dag = TestDag::new("doomed").vertex("v", 1).build();

    let h = spawn(dag, &storage, |_| Script::fail("always"));
    let allocator = Arc::clone(&h.allocator);
    let status = h.finish().await;

    assert_eq!(status.state, DagState::Failed);
    assert!(status.diagnostics_text().contains("always"));
    let log = allocator.lock().unwrap();
    assert!(!log.requested.is_empty());
    assert!(!log.released.is_empty());
}

#[tokio::test]
async fn abort_unblocks_commit_waiters_within_the_poll_interval() {
    init_tracing();
    let storage = MockStorage::new();
    let dag = TestDag::new("stuck")
        .committed("a", 3, "/out/g")
        .committed("b", 1, "/out/g")
        .committing_group("g", &["a", "b"], "/out/g")
        .build();
    let poll = fast_config().commit_poll_interval;

    // `b` never asks for commit, so all three tasks of `a` wait at the
    // barrier.
    let h = spawn(dag, &storage, |req| {
        if req.vertex == "b" {
            Script::Hang
        } else {
            Script::succeed()
        }
    });
    let launcher = Arc::clone(&h.launcher);

    with_timeout(async {
        while launcher.lock().unwrap().launched.len() < 4 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(launcher.lock().unwrap().commits.is_empty(), "nobody may commit yet");

    let aborted_at = Instant::now();
    h.client.abort("operator request").await.unwrap();
    with_timeout(async {
        while launcher.lock().unwrap().commits.len() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    let elapsed = aborted_at.elapsed();
    assert!(
        elapsed < poll + Duration::from_millis(40),
        "waiters released after {elapsed:?}, poll interval is {poll:?}"
    );

    let status = h.finish().await;
    assert_eq!(status.state, DagState::Killed);
    assert!(status.diagnostics_text().contains("operator request"));

    let log = launcher.lock().unwrap();
    assert_eq!(log.commits.len(), 3);
    for (attempt, result) in &log.commits {
        assert_eq!(attempt.task.vertex, VertexId(0));
        let err = result.as_ref().expect_err("commit must be refused");
        assert!(err.contains("aborted"), "{attempt}: {err}");
    }
    assert!(
        log.launched
            .iter()
            .filter(|r| r.vertex == "b")
            .all(|r| log.killed.contains(&r.attempt)),
        "hanging attempt is killed"
    );
    assert!(storage.published().is_empty());
    assert!(!has_temporary(&storage.paths()));
}

#[tokio::test]
async fn existing_output_directory_is_refused() {
    init_tracing();
    let storage = MockStorage::new();
    storage.add_file("/out/v/part-v-00000", "previous run");
    let dag = TestDag::new("exists").committed("v", 1, "/out/v").build();

    let err = dispatcher(dag, &storage, |_| Script::succeed()).unwrap_err();

    match err {
        EngineError::OutputExists(dir) => assert_eq!(dir, Path::new("/out/v")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn publish_failure_fails_the_dag() {
    init_tracing();
    let storage = MockStorage::new();
    storage.fail_publish_matching("part-v-00001");
    let dag = TestDag::new("publish").committed("v", 2, "/out/v").build();

    let h = spawn(dag, &storage, |_| Script::succeed());
    let launcher = Arc::clone(&h.launcher);
    let status = h.finish().await;

    assert_eq!(status.state, DagState::Failed, "{status}");
    assert!(status.diagnostics_text().contains("publishing output"));
    assert!(!has_temporary(&storage.paths()));
    wait_for_commits(&launcher, 2).await;
    let log = launcher.lock().unwrap();
    assert!(
        log.commits.iter().any(|(a, r)| a.task.index == 1 && r.is_err()),
        "the attempt whose publish failed is told so"
    );
}

#[tokio::test]
async fn group_publish_failure_retracts_every_member_output() {
    init_tracing();
    let storage = MockStorage::new();
    storage.fail_publish_matching("part-b-");
    let dag = TestDag::new("union")
        .committed("a", 1, "/out/g")
        .committed("b", 1, "/out/g")
        .committing_group("g", &["a", "b"], "/out/g")
        .build();

    let h = spawn(dag, &storage, |_| Script::succeed());
    let launcher = Arc::clone(&h.launcher);
    let status = h.finish().await;

    assert_eq!(status.state, DagState::Failed, "{status}");
    assert!(status.diagnostics_text().contains("publishing output"));
    // `a` is published first in the batch and must have been taken back.
    assert!(
        storage
            .published()
            .iter()
            .any(|(_, final_path)| final_path.ends_with("part-a-00000"))
    );
    let visible = storage.paths();
    assert!(visible.is_empty(), "partial union visible: {visible:?}");

    wait_for_commits(&launcher, 2).await;
    let log = launcher.lock().unwrap();
    assert!(
        log.commits.iter().all(|(_, r)| r.is_err()),
        "no member is granted: {:?}",
        log.commits
    );
}

#[tokio::test]
async fn speculative_loser_is_denied_through_the_dispatcher() {
    init_tracing();
    let storage = MockStorage::new();
    let dag = TestDag::new("race").committed("v", 1, "/out").build();

    // Attempt 0 is slow; attempt 1 is requested while it runs and wins.
    let h = spawn(dag, &storage, |req| {
        if req.attempt.number == 0 {
            Script::Succeed {
                delay: Duration::from_millis(200),
            }
        } else {
            Script::succeed()
        }
    });
    let launcher = Arc::clone(&h.launcher);
    with_timeout(async {
        while launcher.lock().unwrap().launched.is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    let task = launcher.lock().unwrap().launched[0].attempt.task;
    h.client
        .request_speculation(task)
        .await
        .expect("speculation request");

    let status = h.finish().await;
    assert_eq!(status.state, DagState::Succeeded, "{status}");
    assert_eq!(storage.published().len(), 1);
    assert_eq!(storage.paths(), vec![PathBuf::from("/out/part-v-00000")]);
}
