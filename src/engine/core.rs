// src/engine/core.rs

//! Pure core of the dispatcher.
//!
//! [`EngineCore`] owns every runtime entity of one DAG run in id-keyed
//! arenas: tasks, attempts, containers, the commit coordinator and the
//! ready queue. It consumes [`EngineEvent`]s one at a time and returns the
//! [`Command`]s the async shell must execute. It has no channels, no Tokio
//! types and performs no IO, so every scheduling decision can be unit
//! tested by feeding events.
//!
//! The core is the only writer of the task -> attempt and
//! container -> attempt bindings.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::attempt::{AttemptState, Counters, Task, TaskAttempt};
use crate::commit::CommitCoordinator;
use crate::container::{AssignOutcome, Container, ContainerPool, StopOutcome};
use crate::dag::Dag;
use crate::engine::context::{Credentials, DagContext, EngineConfig};
use crate::engine::placement::{LocalityAwarePlacement, PlacementPolicy, PlacementRequest};
use crate::engine::queue::ReadyQueue;
use crate::engine::status::{DagState, DagStatus, VertexProgress, VertexState};
use crate::engine::vertex::{
    ParallelismResolver, UpstreamParallelismResolver, VertexRuntime, task_count,
};
use crate::engine::{
    Command, ContainerRequest, EngineEvent, EngineStep, LaunchRequest, OutputTarget,
    PublishTarget,
};
use crate::errors::{EngineError, Result};
use crate::storage::layout;
use crate::types::{AttemptId, ContainerId, GroupId, SchedulingType, TaskId, VertexId};

#[derive(Debug)]
pub struct EngineCore {
    pub(super) dag: Arc<Dag>,
    pub(super) config: EngineConfig,
    pub(super) credentials: Arc<Credentials>,
    pub(super) vertices: Vec<VertexRuntime>,
    pub(super) tasks: BTreeMap<TaskId, Task>,
    pub(super) attempts: BTreeMap<AttemptId, TaskAttempt>,
    pub(super) containers: ContainerPool,
    pub(super) coordinator: CommitCoordinator,
    pub(super) ready: ReadyQueue,
    pub(super) placement: Box<dyn PlacementPolicy>,
    pub(super) resolver: Box<dyn ParallelismResolver>,
    /// Containers requested from the allocator and not granted yet.
    pub(super) outstanding_requests: usize,
    pub(super) state: DagState,
    pub(super) diagnostics: Vec<String>,
    /// Commands accumulated while handling the current event.
    pub(super) out: Vec<Command>,
}

impl EngineCore {
    pub fn new(context: &DagContext) -> Self {
        let dag = Arc::clone(&context.dag);
        let vertices = vec![VertexRuntime::new(); dag.vertex_count()];
        Self {
            dag,
            config: context.config.clone(),
            credentials: Arc::clone(&context.credentials),
            vertices,
            tasks: BTreeMap::new(),
            attempts: BTreeMap::new(),
            containers: ContainerPool::new(),
            coordinator: CommitCoordinator::new(),
            ready: ReadyQueue::new(),
            placement: Box::new(LocalityAwarePlacement),
            resolver: Box::new(UpstreamParallelismResolver),
            outstanding_requests: 0,
            state: DagState::Running,
            diagnostics: Vec::new(),
            out: Vec::new(),
        }
    }

    pub fn with_placement(mut self, placement: Box<dyn PlacementPolicy>) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ParallelismResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn state(&self) -> DagState {
        self.state
    }

    pub fn attempt(&self, id: AttemptId) -> Option<&TaskAttempt> {
        self.attempts.get(&id)
    }

    pub fn attempts(&self) -> impl Iterator<Item = &TaskAttempt> {
        self.attempts.values()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn container(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(id)
    }

    pub fn commit_holder(&self, task: TaskId) -> Option<AttemptId> {
        self.coordinator.token_holder(task)
    }

    pub fn vertex_state(&self, vertex: VertexId) -> VertexState {
        self.vertices[vertex.0 as usize].state
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Register commit groups, start every vertex that has no blocking
    /// upstream and ask for containers.
    pub fn start(&mut self) -> EngineStep {
        info!(dag = %self.dag.name(), vertices = self.dag.vertex_count(), "starting DAG");
        for (i, group) in self.dag.groups().iter().enumerate() {
            if group.has_committed_outputs() {
                self.coordinator
                    .register_group(GroupId(i as u32), &group.members);
            }
        }
        let result = self.try_start_vertices();
        self.finish_step(result)
    }

    /// Handle a single event, returning the commands for the IO shell.
    pub fn step(&mut self, event: EngineEvent) -> EngineStep {
        debug!(?event, "engine received event");
        let result = match event {
            EngineEvent::ContainerAllocated {
                container,
                node,
                resource,
            } => self.on_container_allocated(container, node, resource),
            EngineEvent::ContainerLaunched { container } => self.on_container_launched(container),
            EngineEvent::LaunchFailed { container, reason } => {
                self.on_launch_failed(container, reason)
            }
            EngineEvent::AttemptSucceeded { attempt, counters } => {
                self.on_attempt_succeeded(attempt, counters)
            }
            EngineEvent::AttemptFailed { attempt, reason } => {
                self.on_attempt_failed(attempt, reason)
            }
            EngineEvent::NodeLost { node } => self.on_node_lost(node),
            EngineEvent::ContainerCompleted { container } => {
                self.on_container_completed(container)
            }
            EngineEvent::ContainerStopTimedOut { container } => {
                self.on_stop_timeout(container);
                Ok(())
            }
            EngineEvent::CommitRequested { attempt } => self.on_commit_requested(attempt),
            EngineEvent::PublishFailed { attempt, reason } => {
                self.on_publish_failed(attempt, reason)
            }
            EngineEvent::SpeculationRequested { task } => self.on_speculation_requested(task),
            EngineEvent::DagAborted { reason } => {
                self.on_dag_aborted(reason);
                Ok(())
            }
            EngineEvent::InternalError { reason } => {
                error!(%reason, "collaborator failure");
                self.finish(DagState::Error, Some(reason));
                Ok(())
            }
        };
        self.finish_step(result)
    }

    fn finish_step(&mut self, result: Result<()>) -> EngineStep {
        let result = result.and_then(|()| {
            if self.state.is_terminal() {
                Ok(())
            } else {
                self.schedule()
            }
        });
        if let Err(err) = result {
            error!(error = %err, "engine state violation");
            self.finish(DagState::Error, Some(err.to_string()));
        }
        EngineStep {
            commands: std::mem::take(&mut self.out),
            keep_running: !self.state.is_terminal(),
        }
    }

    /// Snapshot for the submission handle.
    pub fn status(&self) -> DagStatus {
        let mut status = DagStatus::new(self.dag.name());
        status.state = self.state;
        status.diagnostics = self.diagnostics.clone();

        for v in self.dag.vertex_ids() {
            let rt = &self.vertices[v.0 as usize];
            let mut progress = VertexProgress {
                state: rt.state,
                total_tasks: rt.tasks,
                succeeded_tasks: rt.succeeded,
                running_attempts: 0,
                failed_attempts: 0,
                killed_attempts: 0,
            };
            for a in self.attempts.values().filter(|a| a.id().task.vertex == v) {
                match a.state() {
                    AttemptState::Running => progress.running_attempts += 1,
                    AttemptState::Failed => progress.failed_attempts += 1,
                    AttemptState::Killed => progress.killed_attempts += 1,
                    _ => {}
                }
            }
            status.counters.merge(&rt.counters);
            status
                .vertices
                .insert(self.dag.vertex(v).name.clone(), progress);
        }
        status
    }

    // ---- vertex / task creation ------------------------------------------

    /// Start every NEW vertex whose SEQUENTIAL upstreams have succeeded and
    /// whose CONCURRENT upstreams have at least started.
    pub(super) fn try_start_vertices(&mut self) -> Result<()> {
        loop {
            let startable: Vec<VertexId> = self
                .dag
                .vertex_ids()
                .filter(|v| self.vertices[v.0 as usize].state == VertexState::New)
                .filter(|v| self.can_start(*v))
                .collect();
            if startable.is_empty() {
                return Ok(());
            }
            for v in startable {
                self.start_vertex(v)?;
            }
        }
    }

    fn can_start(&self, vertex: VertexId) -> bool {
        self.dag.upstream_of(vertex).iter().all(|u| {
            let state = self.vertices[u.vertex.0 as usize].state;
            match u.scheduling {
                SchedulingType::Sequential => state == VertexState::Succeeded,
                SchedulingType::Concurrent => state != VertexState::New,
            }
        })
    }

    fn start_vertex(&mut self, vertex: VertexId) -> Result<()> {
        let started: BTreeMap<VertexId, u32> = self
            .dag
            .vertex_ids()
            .filter(|v| self.vertices[v.0 as usize].state != VertexState::New)
            .map(|v| (v, self.vertices[v.0 as usize].tasks))
            .collect();
        let tasks = task_count(&self.dag, vertex, self.resolver.as_ref(), &started).max(1);

        let rt = &mut self.vertices[vertex.0 as usize];
        rt.state = VertexState::Running;
        rt.tasks = tasks;
        info!(vertex = %self.dag.vertex(vertex).name, tasks, "vertex started");

        self.coordinator.register_vertex(vertex, tasks);
        for index in 0..tasks {
            let id = TaskId::new(vertex, index);
            self.tasks
                .insert(id, Task::new(id, self.config.max_failed_attempts));
            self.create_attempt(id, false)?;
        }
        Ok(())
    }

    pub(super) fn create_attempt(&mut self, task: TaskId, speculative: bool) -> Result<AttemptId> {
        let t = self
            .tasks
            .get_mut(&task)
            .ok_or_else(|| EngineError::unknown(task, "create attempt for"))?;
        let id = t.new_attempt()?;
        self.attempts.insert(id, TaskAttempt::new(id, speculative));

        let vertex = self.dag.vertex(task.vertex);
        self.ready.push(
            self.dag.depth(task.vertex),
            PlacementRequest {
                attempt: id,
                resource: vertex.resource,
                location_hints: vertex.location_hints.clone(),
            },
        );
        debug!(attempt = %id, speculative, "attempt created");
        Ok(id)
    }

    // ---- scheduling -------------------------------------------------------

    /// Place ready attempts on assignable containers and request containers
    /// for the rest.
    pub(super) fn schedule(&mut self) -> Result<()> {
        let entries: Vec<PlacementRequest> =
            self.ready.iter().map(|e| e.request.clone()).collect();

        for request in entries {
            let chosen = {
                let candidates: Vec<&Container> = self.containers.assignable().collect();
                if candidates.is_empty() {
                    break;
                }
                self.placement.select(&request, &candidates)
            };
            if let Some(container) = chosen {
                self.ready.remove(request.attempt);
                self.assign(request.attempt, container)?;
            }
        }

        self.request_missing_containers();
        self.release_unusable_idle();
        Ok(())
    }

    fn request_missing_containers(&mut self) {
        // Grants are not tied to the request that caused them. A grant that
        // was released unused leaves more entries marked than requests
        // outstanding; the surplus asks again.
        let marked = self.ready.iter().filter(|e| e.requested).count();
        if marked > self.outstanding_requests {
            let cleared = self.ready.unmark_requested(marked - self.outstanding_requests);
            debug!(cleared, "container requests no longer outstanding");
        }

        let waiting = self.ready.len();
        let missing = waiting.saturating_sub(self.outstanding_requests);
        if missing == 0 {
            return;
        }
        let requests: Vec<ContainerRequest> = self
            .ready
            .iter()
            .filter(|e| !e.requested)
            .take(missing)
            .map(|e| ContainerRequest {
                attempt: e.request.attempt,
                resource: e.request.resource,
                location_hints: e.request.location_hints.clone(),
            })
            .collect();
        if requests.is_empty() {
            return;
        }
        for r in &requests {
            self.ready.mark_requested(r.attempt);
        }
        self.outstanding_requests += requests.len();
        debug!(count = requests.len(), "requesting containers");
        self.out.push(Command::RequestContainers(requests));
    }

    /// Assignable containers that fit none of the waiting attempts only hold
    /// capacity the allocator could hand out in the right size.
    fn release_unusable_idle(&mut self) {
        if self.ready.is_empty() {
            return;
        }
        let unusable: Vec<ContainerId> = self
            .containers
            .assignable()
            .filter(|c| {
                !self
                    .ready
                    .iter()
                    .any(|e| c.capability().fits(&e.request.resource))
            })
            .map(|c| c.id())
            .collect();
        for id in unusable {
            debug!(container = %id, "releasing container too small for waiting attempts");
            self.stop_container(id);
        }
    }

    fn assign(&mut self, attempt: AttemptId, container_id: ContainerId) -> Result<()> {
        let container = self
            .containers
            .get_mut(container_id)
            .ok_or_else(|| EngineError::unknown(container_id, "assign to"))?;
        let outcome = container.assign(attempt)?;
        let node = container.node().clone();

        let a = self
            .attempts
            .get_mut(&attempt)
            .ok_or_else(|| EngineError::unknown(attempt, "assign"))?;
        a.assign(container_id)?;

        let reuse = outcome == AssignOutcome::Reuse;
        if reuse {
            a.start()?;
            if let Some(t) = self.tasks.get_mut(&attempt.task) {
                t.mark_running();
            }
        }
        info!(%attempt, container = %container_id, %node, reuse, "attempt assigned");

        let request = self.launch_request(attempt, container_id, reuse);
        self.out.push(Command::Launch(request));
        Ok(())
    }

    fn launch_request(&self, attempt: AttemptId, container: ContainerId, reuse: bool) -> LaunchRequest {
        let vertex = self.dag.vertex(attempt.task.vertex);
        let outputs = vertex
            .committed_outputs()
            .filter_map(|(name, od)| {
                od.commit_dir.as_ref().map(|dir| OutputTarget {
                    name: name.to_string(),
                    staging: layout::staging_path(dir, attempt, &vertex.name),
                })
            })
            .collect();
        LaunchRequest {
            container,
            attempt,
            vertex: vertex.name.clone(),
            processor: vertex.processor.clone(),
            outputs,
            requires_commit: vertex.requires_commit(),
            reuse,
            credentials: Arc::clone(&self.credentials),
        }
    }

    // ---- helpers shared by the event handlers ------------------------------

    pub(super) fn live_attempts(&self, task: TaskId) -> Vec<AttemptId> {
        self.tasks
            .get(&task)
            .map(|t| {
                t.attempts()
                    .iter()
                    .filter(|a| self.attempts.get(a).is_some_and(TaskAttempt::is_live))
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn staging_paths(&self, attempt: AttemptId) -> Vec<PathBuf> {
        let vertex = self.dag.vertex(attempt.task.vertex);
        vertex
            .committed_outputs()
            .filter_map(|(_, od)| od.commit_dir.as_ref())
            .map(|dir| layout::staging_path(dir, attempt, &vertex.name))
            .collect()
    }

    pub(super) fn publish_targets(&self, attempt: AttemptId) -> Vec<PublishTarget> {
        let vertex = self.dag.vertex(attempt.task.vertex);
        vertex
            .committed_outputs()
            .filter_map(|(_, od)| od.commit_dir.as_ref())
            .map(|dir| PublishTarget {
                staging: layout::staging_path(dir, attempt, &vertex.name),
                final_path: layout::final_path(dir, &vertex.name, attempt.task.index),
            })
            .collect()
    }

    pub(super) fn discard_staging(&mut self, attempt: AttemptId) {
        let paths = self.staging_paths(attempt);
        if !paths.is_empty() {
            self.out.push(Command::Discard(paths));
        }
    }

    /// Ask a container to stop; releases it right away when nothing runs on
    /// it.
    pub(super) fn stop_container(&mut self, id: ContainerId) {
        let Some(container) = self.containers.get_mut(id) else {
            return;
        };
        if container.stop() == StopOutcome::Stopping {
            self.out.push(Command::ReleaseContainer(id));
            self.out.push(Command::ArmStopTimer(id));
        }
    }

    /// Kill a live attempt: the worker is told to stop and its container is
    /// not reused.
    pub(super) fn kill_attempt(&mut self, attempt: AttemptId, reason: &str) -> Result<()> {
        let Some(a) = self.attempts.get_mut(&attempt) else {
            return Ok(());
        };
        if !a.is_live() {
            return Ok(());
        }
        a.kill(reason)?;
        let committed = a.is_committed();
        let container = a.container();
        if let Some(t) = self.tasks.get_mut(&attempt.task) {
            t.record_kill();
        }
        self.ready.remove(attempt);
        info!(%attempt, %reason, "attempt killed");

        if let Some(cid) = container {
            if let Some(c) = self.containers.get_mut(cid) {
                if c.attempt() == Some(attempt) {
                    c.on_attempt_killed(attempt)?;
                    self.out.push(Command::ReleaseContainer(cid));
                    self.out.push(Command::ArmStopTimer(cid));
                }
            }
        }
        self.out.push(Command::KillAttempt { attempt, container });

        if let Some(outcome) = self.coordinator.attempt_finished(attempt) {
            self.out.push(Command::ResolveCommit { attempt, outcome });
        }
        if !committed {
            self.discard_staging(attempt);
        }
        Ok(())
    }

    /// Terminal transition of the whole DAG. Runs at most once; later calls
    /// are ignored.
    pub(super) fn finish(&mut self, state: DagState, diagnostic: Option<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
        let reason = diagnostic
            .clone()
            .unwrap_or_else(|| format!("DAG {state}"));
        if let Some(d) = diagnostic {
            self.diagnostics.push(d);
        }

        for (attempt, outcome) in self.coordinator.abort(&reason) {
            self.out.push(Command::ResolveCommit { attempt, outcome });
        }

        let live: Vec<AttemptId> = self
            .attempts
            .values()
            .filter(|a| a.is_live())
            .map(TaskAttempt::id)
            .collect();
        for attempt in live {
            if let Err(err) = self.kill_attempt(attempt, &reason) {
                error!(%attempt, error = %err, "failed to kill attempt while finishing");
            }
        }
        self.ready.clear();

        for rt in &mut self.vertices {
            if !rt.state.is_terminal() {
                rt.state = VertexState::Killed;
            }
        }
        for task in self.tasks.values_mut() {
            task.kill();
        }

        for id in self.containers.live() {
            self.stop_container(id);
        }

        let temporary: BTreeSet<PathBuf> = self
            .dag
            .vertex_ids()
            .flat_map(|v| {
                self.dag
                    .vertex(v)
                    .committed_outputs()
                    .filter_map(|(_, od)| od.commit_dir.as_ref().map(|d| layout::temporary_dir(d)))
                    .collect::<Vec<_>>()
            })
            .collect();
        if !temporary.is_empty() {
            self.out.push(Command::Cleanup(temporary.into_iter().collect()));
        }

        match state {
            DagState::Succeeded => info!(dag = %self.dag.name(), "DAG succeeded"),
            _ => error!(dag = %self.dag.name(), %state, %reason, "DAG finished unsuccessfully"),
        }
        self.out.push(Command::Finished(state));
    }

    pub(super) fn vertex_task_succeeded(&mut self, vertex: VertexId, counters: &Counters) -> Result<()> {
        let rt = &mut self.vertices[vertex.0 as usize];
        rt.succeeded += 1;
        rt.counters.merge(counters);
        if rt.succeeded < rt.tasks {
            return Ok(());
        }
        rt.state = VertexState::Succeeded;
        info!(vertex = %self.dag.vertex(vertex).name, "vertex succeeded");

        if self
            .vertices
            .iter()
            .all(|v| v.state == VertexState::Succeeded)
        {
            self.finish(DagState::Succeeded, None);
            return Ok(());
        }
        self.try_start_vertices()
    }
}
