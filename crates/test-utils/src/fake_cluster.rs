#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dagengine::attempt::Counters;
use dagengine::engine::{ContainerRequest, EngineEvent, EventSender, LaunchRequest};
use dagengine::errors::{EngineError, Result};
use dagengine::exec::{AttemptEnv, BoxFuture, ResourceAllocator, WorkerLauncher};
use dagengine::types::{AttemptId, ContainerId, NodeId, Resource};
use tokio::sync::oneshot;

/// What a scripted attempt does once launched.
#[derive(Debug, Clone)]
pub enum Script {
    /// Write every staging output, ask for commit if needed, report success.
    Succeed { delay: Duration },
    /// Report failure after `delay` without writing anything.
    Fail { delay: Duration, reason: String },
    /// Never finishes on its own; only a kill or an abort ends it.
    Hang,
}

impl Script {
    pub fn succeed() -> Self {
        Script::Succeed {
            delay: Duration::from_millis(5),
        }
    }

    pub fn fail(reason: &str) -> Self {
        Script::Fail {
            delay: Duration::from_millis(5),
            reason: reason.to_string(),
        }
    }
}

/// Calls seen by [`FakeAllocator`].
#[derive(Debug, Default, Clone)]
pub struct AllocatorLog {
    pub requested: Vec<ContainerRequest>,
    pub released: Vec<ContainerId>,
}

/// Grants every request right away on one node. Releases are confirmed
/// with `ContainerCompleted`.
///
/// Events are sent from spawned tasks so the dispatcher is never blocked on
/// its own channel.
#[derive(Debug)]
pub struct FakeAllocator {
    events: EventSender,
    node: NodeId,
    next_id: u64,
    log: Arc<Mutex<AllocatorLog>>,
}

impl FakeAllocator {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            node: NodeId::new("fake-node"),
            next_id: 1,
            log: Arc::new(Mutex::new(AllocatorLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<AllocatorLog>> {
        Arc::clone(&self.log)
    }
}

impl ResourceAllocator for FakeAllocator {
    fn request_containers(&mut self, requests: Vec<ContainerRequest>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for request in requests {
                let container = ContainerId(self.next_id);
                self.next_id += 1;
                let event = EngineEvent::ContainerAllocated {
                    container,
                    node: self.node.clone(),
                    resource: Resource::new(
                        request.resource.memory_mb.max(1024),
                        request.resource.vcores.max(1),
                    ),
                };
                self.log.lock().unwrap().requested.push(request);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let _ = events.send(event).await;
                });
            }
            Ok(())
        })
    }

    fn release_container(&mut self, container: ContainerId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.log.lock().unwrap().released.push(container);
            let events = self.events.clone();
            tokio::spawn(async move {
                let _ = events
                    .send(EngineEvent::ContainerCompleted { container })
                    .await;
            });
            Ok(())
        })
    }
}

/// Calls and outcomes seen by [`ScriptedLauncher`].
#[derive(Debug, Default, Clone)]
pub struct LauncherLog {
    pub launched: Vec<LaunchRequest>,
    pub killed: Vec<AttemptId>,
    /// Result of every `request_commit`, as `Ok(())` or the error text.
    pub commits: Vec<(AttemptId, std::result::Result<(), String>)>,
}

impl LauncherLog {
    pub fn launched_attempts(&self) -> Vec<AttemptId> {
        self.launched.iter().map(|r| r.attempt).collect()
    }
}

type ScriptFn = dyn Fn(&LaunchRequest) -> Script + Send + Sync;

/// Launcher whose attempts follow a per-launch [`Script`].
pub struct ScriptedLauncher {
    env: AttemptEnv,
    script: Arc<ScriptFn>,
    log: Arc<Mutex<LauncherLog>>,
    cancels: HashMap<AttemptId, oneshot::Sender<()>>,
}

impl std::fmt::Debug for ScriptedLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedLauncher")
            .field("running", &self.cancels.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedLauncher {
    pub fn new<F>(env: AttemptEnv, script: F) -> Self
    where
        F: Fn(&LaunchRequest) -> Script + Send + Sync + 'static,
    {
        Self {
            env,
            script: Arc::new(script),
            log: Arc::new(Mutex::new(LauncherLog::default())),
            cancels: HashMap::new(),
        }
    }

    /// Every attempt succeeds.
    pub fn succeeding(env: AttemptEnv) -> Self {
        Self::new(env, |_| Script::succeed())
    }

    pub fn log(&self) -> Arc<Mutex<LauncherLog>> {
        Arc::clone(&self.log)
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(&mut self, request: LaunchRequest) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let script = (self.script)(&request);
            self.log.lock().unwrap().launched.push(request.clone());

            let (cancel_tx, cancel_rx) = oneshot::channel();
            self.cancels.insert(request.attempt, cancel_tx);

            let env = self.env.clone();
            let log = Arc::clone(&self.log);
            tokio::spawn(async move {
                // A decision already delivered wins over a kill sent after it.
                tokio::select! {
                    biased;

                    _ = run_script(request, script, env, log) => {}
                    _ = cancel_rx => {}
                }
            });
            Ok(())
        })
    }

    fn kill(&mut self, attempt: AttemptId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.log.lock().unwrap().killed.push(attempt);
            if let Some(cancel) = self.cancels.remove(&attempt) {
                let _ = cancel.send(());
            }
            Ok(())
        })
    }
}

async fn run_script(
    request: LaunchRequest,
    script: Script,
    env: AttemptEnv,
    log: Arc<Mutex<LauncherLog>>,
) {
    let attempt = request.attempt;
    if !request.reuse {
        let _ = env
            .events
            .send(EngineEvent::ContainerLaunched {
                container: request.container,
            })
            .await;
    }

    match script {
        Script::Succeed { delay } => {
            tokio::time::sleep(delay).await;
            for output in &request.outputs {
                let content = format!("{} {}", request.vertex, attempt);
                if let Err(err) = env.storage.write(&output.staging, content.as_bytes()) {
                    let _ = env
                        .events
                        .send(EngineEvent::AttemptFailed {
                            attempt,
                            reason: err.to_string(),
                        })
                        .await;
                    return;
                }
            }
            if request.requires_commit {
                let result = env.commit.request_commit(attempt).await;
                log.lock()
                    .unwrap()
                    .commits
                    .push((attempt, result.as_ref().map(|_| ()).map_err(|e| e.to_string())));
                match result {
                    Ok(()) | Err(EngineError::CommitConflict { .. }) => {}
                    Err(EngineError::Aborted(_)) => return,
                    Err(err) => {
                        let _ = env
                            .events
                            .send(EngineEvent::AttemptFailed {
                                attempt,
                                reason: err.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }
            let _ = env
                .events
                .send(EngineEvent::AttemptSucceeded {
                    attempt,
                    counters: Counters::new(),
                })
                .await;
        }
        Script::Fail { delay, reason } => {
            tokio::time::sleep(delay).await;
            let _ = env
                .events
                .send(EngineEvent::AttemptFailed { attempt, reason })
                .await;
        }
        Script::Hang => std::future::pending::<()>().await,
    }
}
