// src/engine/runtime.rs

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::commit::{CommitClient, CommitOutcome};
use crate::errors::{EngineError, Result};
use crate::exec::{ResourceAllocator, WorkerLauncher};
use crate::storage::OutputStorage;
use crate::types::AttemptId;

use super::client::DagClient;
use super::context::DagContext;
use super::core::EngineCore;
use super::placement::PlacementPolicy;
use super::vertex::ParallelismResolver;
use super::status::{DagState, DagStatus};
use super::{Command, EngineEvent, EngineStep, GrantedOutputs};

/// Message on the dispatcher's inbound channel.
#[derive(Debug)]
pub enum Inbound {
    Event(EngineEvent),
    /// A blocked `request_commit`; `reply` is answered once the decision is
    /// final.
    CommitRequest {
        attempt: AttemptId,
        reply: oneshot::Sender<CommitOutcome>,
    },
}

/// Cloneable handle collaborators use to report to the dispatcher.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Inbound>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<Inbound>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, event: EngineEvent) -> Result<()> {
        self.tx
            .send(Inbound::Event(event))
            .await
            .map_err(|_| EngineError::Aborted("dispatcher stopped".into()))
    }

    pub async fn request_commit(
        &self,
        attempt: AttemptId,
        reply: oneshot::Sender<CommitOutcome>,
    ) -> Result<()> {
        self.tx
            .send(Inbound::CommitRequest { attempt, reply })
            .await
            .map_err(|_| EngineError::Aborted("dispatcher stopped".into()))
    }
}

/// The channels of one submission, created before the collaborators so
/// they can be wired to the dispatcher.
#[derive(Debug)]
pub struct EngineChannels {
    tx: mpsc::Sender<Inbound>,
    rx: mpsc::Receiver<Inbound>,
    abort: Arc<watch::Sender<Option<String>>>,
}

impl EngineChannels {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (abort, _) = watch::channel(None);
        Self {
            tx,
            rx,
            abort: Arc::new(abort),
        }
    }

    pub fn events(&self) -> EventSender {
        EventSender::new(self.tx.clone())
    }

    pub fn commit_client(&self, poll_interval: Duration) -> CommitClient {
        CommitClient::new(self.events(), self.abort.subscribe(), poll_interval)
    }
}

/// Async shell around [`EngineCore`].
///
/// Reads inbound messages, feeds them to the core one at a time and
/// executes the returned commands against the allocator, the launcher and
/// the output storage. Events the shell itself produces (a failed launch
/// or publish) go to a local backlog that is drained before the channel,
/// so the loop never sends into its own bounded channel.
pub struct Dispatcher<A: ResourceAllocator, L: WorkerLauncher> {
    core: EngineCore,
    context: DagContext,
    events: EventSender,
    inbound_rx: mpsc::Receiver<Inbound>,
    backlog: VecDeque<EngineEvent>,
    allocator: A,
    launcher: L,
    storage: Arc<dyn OutputStorage>,
    /// Reply channels of blocked commit requests, by attempt.
    waiters: HashMap<AttemptId, oneshot::Sender<CommitOutcome>>,
    status_tx: watch::Sender<DagStatus>,
    abort: Arc<watch::Sender<Option<String>>>,
}

impl<A: ResourceAllocator, L: WorkerLauncher> fmt::Debug for Dispatcher<A, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("core", &self.core)
            .field("backlog", &self.backlog.len())
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

impl<A: ResourceAllocator, L: WorkerLauncher> Dispatcher<A, L> {
    /// Refuses to build a dispatcher when a commit directory of the DAG
    /// already exists.
    pub fn new(
        context: DagContext,
        channels: EngineChannels,
        allocator: A,
        launcher: L,
        storage: Arc<dyn OutputStorage>,
    ) -> Result<Self> {
        for dir in commit_dirs(&context) {
            if storage.exists(&dir) {
                return Err(EngineError::OutputExists(dir));
            }
        }

        let core = EngineCore::new(&context);
        let (status_tx, _) = watch::channel(core.status());
        let EngineChannels { tx, rx, abort } = channels;
        Ok(Self {
            core,
            context,
            events: EventSender::new(tx),
            inbound_rx: rx,
            backlog: VecDeque::new(),
            allocator,
            launcher,
            storage,
            waiters: HashMap::new(),
            status_tx,
            abort,
        })
    }

    pub fn with_placement(mut self, placement: Box<dyn PlacementPolicy>) -> Self {
        self.core = self.core.with_placement(placement);
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ParallelismResolver>) -> Self {
        self.core = self.core.with_resolver(resolver);
        self
    }

    pub fn client(&self) -> DagClient {
        DagClient::new(
            self.status_tx.subscribe(),
            self.events.clone(),
            Arc::clone(&self.abort),
        )
    }

    /// Run the DAG to completion and return the final status.
    pub async fn run(mut self) -> Result<DagStatus> {
        info!(dag = %self.core.dag().name(), "dispatcher started");

        let step = self.core.start();
        let mut running = self.apply(step).await;

        while running {
            let inbound = match self.backlog.pop_front() {
                Some(event) => Inbound::Event(event),
                None => match self.inbound_rx.recv().await {
                    Some(inbound) => inbound,
                    None => {
                        warn!("inbound channel closed; stopping dispatcher");
                        break;
                    }
                },
            };

            let step = match inbound {
                Inbound::Event(event) => self.core.step(event),
                Inbound::CommitRequest { attempt, reply } => {
                    if self.waiters.insert(attempt, reply).is_some() {
                        debug!(%attempt, "replacing earlier commit request of the same attempt");
                    }
                    self.core.step(EngineEvent::CommitRequested { attempt })
                }
            };
            running = self.apply(step).await;
        }

        for (attempt, reply) in self.waiters.drain() {
            debug!(%attempt, "releasing commit waiter on shutdown");
            let _ = reply.send(CommitOutcome::Aborted("dispatcher stopped".into()));
        }

        let status = self.core.status();
        self.status_tx.send_replace(status.clone());
        info!(dag = %status.name, state = %status.state, "dispatcher finished");
        Ok(status)
    }

    async fn apply(&mut self, step: EngineStep) -> bool {
        for command in step.commands {
            self.execute(command).await;
        }
        self.status_tx.send_replace(self.core.status());
        step.keep_running
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::RequestContainers(requests) => {
                let count = requests.len();
                if let Err(err) = self.allocator.request_containers(requests).await {
                    error!(error = %err, count, "container request failed");
                    self.backlog.push_back(EngineEvent::InternalError {
                        reason: format!("container request failed: {err}"),
                    });
                }
            }
            Command::ReleaseContainer(container) => {
                if let Err(err) = self.allocator.release_container(container).await {
                    warn!(%container, error = %err, "releasing container failed");
                }
            }
            Command::ArmStopTimer(container) => {
                let events = self.events.clone();
                let timeout = self.context.config.container_stop_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    let _ = events
                        .send(EngineEvent::ContainerStopTimedOut { container })
                        .await;
                });
            }
            Command::Launch(request) => {
                let (attempt, container, reuse) = (request.attempt, request.container, request.reuse);
                if let Err(err) = self.launcher.launch(request).await {
                    warn!(%attempt, %container, error = %err, "launch failed");
                    let reason = err.to_string();
                    // A reused container is already RUNNING; only the
                    // attempt is affected.
                    self.backlog.push_back(if reuse {
                        EngineEvent::AttemptFailed { attempt, reason }
                    } else {
                        EngineEvent::LaunchFailed { container, reason }
                    });
                }
            }
            Command::KillAttempt { attempt, container } => {
                if let Err(err) = self.launcher.kill(attempt).await {
                    warn!(%attempt, ?container, error = %err, "kill request failed");
                }
            }
            Command::Publish(batch) => self.publish(batch).await,
            Command::ResolveCommit { attempt, outcome } => self.resolve(attempt, outcome),
            Command::Discard(paths) => {
                discard(Arc::clone(&self.storage), paths, "staging output").await
            }
            Command::Cleanup(paths) => {
                discard(Arc::clone(&self.storage), paths, "temporary directory").await
            }
            Command::Finished(state) => {
                if state != DagState::Succeeded {
                    let reason = self
                        .core
                        .status()
                        .diagnostics
                        .last()
                        .cloned()
                        .unwrap_or_else(|| format!("DAG {state}"));
                    self.abort.send_replace(Some(reason));
                }
                info!(%state, "DAG reached terminal state");
            }
        }
    }

    async fn publish(&mut self, batch: Vec<GrantedOutputs>) {
        let Some(first) = batch.first().map(|g| g.attempt) else {
            return;
        };
        let storage = Arc::clone(&self.storage);
        let jobs = batch.clone();
        let result = tokio::task::spawn_blocking(move || publish_batch(storage.as_ref(), &jobs))
            .await
            .unwrap_or_else(|err| Err((first, anyhow::Error::from(err))));

        match result {
            Ok(()) => {
                for g in &batch {
                    info!(attempt = %g.attempt, "output published");
                    self.resolve(g.attempt, CommitOutcome::Granted);
                }
            }
            Err((attempt, err)) => {
                let reason = format!("{err:#}");
                error!(
                    %attempt,
                    error = %reason,
                    batch = batch.len(),
                    "publish failed, batch rolled back"
                );
                for g in &batch {
                    self.resolve(g.attempt, CommitOutcome::Failed(reason.clone()));
                }
                self.backlog
                    .push_back(EngineEvent::PublishFailed { attempt, reason });
            }
        }
    }

    fn resolve(&mut self, attempt: AttemptId, outcome: CommitOutcome) {
        match self.waiters.remove(&attempt) {
            Some(reply) => {
                debug!(%attempt, ?outcome, "answering commit request");
                if reply.send(outcome).is_err() {
                    debug!(%attempt, "commit requester went away");
                }
            }
            None => debug!(%attempt, ?outcome, "no waiter for commit decision"),
        }
    }

}

/// Publish the batch target by target. On the first failure every output
/// already published by this batch is removed again; the error names the
/// attempt whose publish failed.
fn publish_batch(
    storage: &dyn OutputStorage,
    batch: &[GrantedOutputs],
) -> std::result::Result<(), (AttemptId, anyhow::Error)> {
    let mut published: Vec<&Path> = Vec::new();
    for granted in batch {
        for t in &granted.targets {
            if let Err(err) = storage.atomic_publish(&t.staging, &t.final_path) {
                for path in published.iter().rev() {
                    if let Err(undo) = storage.discard(path) {
                        error!(path = ?path, error = %undo, "retracting published output failed");
                    }
                }
                return Err((granted.attempt, err));
            }
            published.push(&t.final_path);
        }
    }
    Ok(())
}

async fn discard(storage: Arc<dyn OutputStorage>, paths: Vec<PathBuf>, what: &'static str) {
    let result = tokio::task::spawn_blocking(move || {
        for p in &paths {
            if let Err(err) = storage.discard(p) {
                warn!(path = ?p, error = %err, what, "discard failed");
            }
        }
    })
    .await;
    if let Err(err) = result {
        warn!(error = %err, what, "discard task panicked");
    }
}

fn commit_dirs(context: &DagContext) -> Vec<PathBuf> {
    let dag = &context.dag;
    let mut dirs: Vec<PathBuf> = dag
        .vertex_ids()
        .flat_map(|v| {
            dag.vertex(v)
                .committed_outputs()
                .filter_map(|(_, od)| od.commit_dir.clone())
                .collect::<Vec<_>>()
        })
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

/// Spawn the dispatcher; returns the submission handle and the join handle
/// of the run.
pub fn submit<A, L>(dispatcher: Dispatcher<A, L>) -> (DagClient, JoinHandle<Result<DagStatus>>)
where
    A: ResourceAllocator + 'static,
    L: WorkerLauncher + 'static,
{
    let client = dispatcher.client();
    let handle = tokio::spawn(dispatcher.run());
    (client, handle)
}
