// src/engine/event_handlers.rs

//! Event handling logic for the engine core.
//!
//! Each handler routes one event to the addressed state machine (looked up
//! by id in the core's arenas) and pushes the follow-up commands. Events
//! that refer to entities which already reached a terminal state are stale
//! (a report racing a kill or a node loss) and are dropped.

use tracing::{debug, error, info, warn};

use crate::attempt::{Counters, RetryDecision};
use crate::commit::{CommitDecision, CommitOutcome};
use crate::container::{Container, ContainerState};
use crate::engine::core::EngineCore;
use crate::engine::status::{DagState, VertexState};
use crate::engine::{Command, GrantedOutputs};
use crate::errors::{EngineError, Result};
use crate::types::{AttemptId, ContainerId, NodeId, Resource, TaskId};

impl EngineCore {
    pub(super) fn on_container_allocated(
        &mut self,
        id: ContainerId,
        node: NodeId,
        resource: Resource,
    ) -> Result<()> {
        self.outstanding_requests = self.outstanding_requests.saturating_sub(1);
        let mut container = Container::new(id, node, resource);
        container.on_allocated()?;

        if self.state.is_terminal() {
            self.out.push(Command::ReleaseContainer(id));
            return Ok(());
        }
        debug!(container = %id, node = %container.node(), %resource, "container allocated");
        self.containers.insert(container)
    }

    pub(super) fn on_container_launched(&mut self, id: ContainerId) -> Result<()> {
        let Some(container) = self.containers.get_mut(id) else {
            warn!(container = %id, "launch reported for unknown container");
            return Ok(());
        };
        if container.state() != ContainerState::Launching {
            debug!(container = %id, state = ?container.state(), "ignoring stale launch report");
            return Ok(());
        }
        container.on_launched()?;

        if let Some(attempt) = container.attempt() {
            if let Some(a) = self.attempts.get_mut(&attempt) {
                a.start()?;
            }
            if let Some(t) = self.tasks.get_mut(&attempt.task) {
                t.mark_running();
            }
        }
        Ok(())
    }

    pub(super) fn on_launch_failed(&mut self, id: ContainerId, reason: String) -> Result<()> {
        let Some(container) = self.containers.get_mut(id) else {
            warn!(container = %id, "launch failure reported for unknown container");
            return Ok(());
        };
        if container.state() != ContainerState::Launching {
            debug!(container = %id, state = ?container.state(), "ignoring stale launch failure");
            return Ok(());
        }
        let bound = container.on_launch_failed()?;
        warn!(container = %id, %reason, "container launch failed");
        self.out.push(Command::ReleaseContainer(id));

        if let Some(attempt) = bound {
            self.attempt_failed(attempt, format!("launch on {id} failed: {reason}"))?;
        }
        Ok(())
    }

    pub(super) fn on_attempt_succeeded(&mut self, attempt: AttemptId, counters: Counters) -> Result<()> {
        let Some(a) = self.attempts.get(&attempt) else {
            warn!(%attempt, "success reported for unknown attempt");
            return Ok(());
        };
        if !a.is_live() {
            debug!(%attempt, state = ?a.state(), "ignoring success of finished attempt");
            return Ok(());
        }
        let (committed, denied) = (a.is_committed(), a.commit_denied());
        self.release_container_of(attempt, true)?;

        let requires_commit = self.dag.vertex(attempt.task.vertex).requires_commit();
        if requires_commit && !committed {
            if denied {
                info!(%attempt, "redundant success after losing the commit race");
                if let Some(a) = self.attempts.get_mut(&attempt) {
                    a.kill("commit denied; output discarded")?;
                }
                if let Some(t) = self.tasks.get_mut(&attempt.task) {
                    t.record_kill();
                }
                return Ok(());
            }
            let err = EngineError::AttemptExecution {
                attempt,
                reason: "reported success without a commit decision".into(),
            };
            return self.attempt_failed(attempt, err.to_string());
        }

        if let Some(a) = self.attempts.get_mut(&attempt) {
            a.succeed(counters.clone())?;
        }
        let task = self
            .tasks
            .get_mut(&attempt.task)
            .ok_or_else(|| EngineError::unknown(attempt.task, "succeed"))?;
        task.succeed(attempt)?;
        info!(%attempt, "task succeeded");

        for sibling in self.live_attempts(attempt.task) {
            self.kill_attempt(sibling, &format!("{attempt} succeeded first"))?;
        }
        self.vertex_task_succeeded(attempt.task.vertex, &counters)
    }

    pub(super) fn on_attempt_failed(&mut self, attempt: AttemptId, reason: String) -> Result<()> {
        let Some(a) = self.attempts.get(&attempt) else {
            warn!(%attempt, "failure reported for unknown attempt");
            return Ok(());
        };
        if !a.is_live() {
            debug!(%attempt, state = ?a.state(), "ignoring failure of finished attempt");
            return Ok(());
        }
        self.release_container_of(attempt, false)?;
        let err = EngineError::AttemptExecution { attempt, reason };
        self.attempt_failed(attempt, err.to_string())
    }

    /// Clear the container binding of a finishing attempt.
    fn release_container_of(&mut self, attempt: AttemptId, succeeded: bool) -> Result<()> {
        let Some(cid) = self.attempts.get(&attempt).and_then(|a| a.container()) else {
            return Ok(());
        };
        let Some(container) = self.containers.get_mut(cid) else {
            return Ok(());
        };
        if container.attempt() != Some(attempt) {
            return Ok(());
        }
        if container.state() == ContainerState::Launching {
            // Worker died before confirming its start.
            container.on_launch_failed()?;
            self.out.push(Command::ReleaseContainer(cid));
            return Ok(());
        }
        let next = if succeeded {
            container.on_attempt_succeeded(attempt)?
        } else {
            container.on_attempt_failed(attempt)?
        };
        match next {
            ContainerState::Idle if !self.config.container_reuse => self.stop_container(cid),
            ContainerState::Stopping => {
                self.out.push(Command::ReleaseContainer(cid));
                self.out.push(Command::ArmStopTimer(cid));
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a failed attempt and decide between retry, waiting for a
    /// sibling and failing the task.
    pub(super) fn attempt_failed(&mut self, attempt: AttemptId, reason: String) -> Result<()> {
        let a = self
            .attempts
            .get_mut(&attempt)
            .ok_or_else(|| EngineError::unknown(attempt, "fail"))?;
        a.fail(reason.clone())?;
        let committed = a.is_committed();
        warn!(%attempt, %reason, "attempt failed");

        if let Some(outcome) = self.coordinator.attempt_finished(attempt) {
            self.out.push(Command::ResolveCommit { attempt, outcome });
        }
        if !committed {
            self.discard_staging(attempt);
        }
        if self.state.is_terminal() {
            return Ok(());
        }

        let task_id = attempt.task;
        if committed {
            return self.fail_task(
                task_id,
                format!("attempt {attempt} failed after its output was committed"),
            );
        }

        let live = self.live_attempts(task_id).len();
        let task = self
            .tasks
            .get_mut(&task_id)
            .ok_or_else(|| EngineError::unknown(task_id, "retry"))?;
        match task.record_failure(live) {
            RetryDecision::Retry => {
                let failed = task.failed_attempts();
                let next = self.create_attempt(task_id, false)?;
                info!(%attempt, retry = %next, failed, "retrying task");
                Ok(())
            }
            RetryDecision::Wait => {
                debug!(%attempt, live, "another attempt of the task is still live");
                Ok(())
            }
            RetryDecision::Exhausted => {
                let failed = task.failed_attempts();
                self.fail_task(
                    task_id,
                    format!("all {failed} attempts failed; last error: {reason}"),
                )
            }
        }
    }

    /// The task can no longer succeed: fail it, its vertex and the DAG.
    pub(super) fn fail_task(&mut self, task: TaskId, reason: String) -> Result<()> {
        if let Some(t) = self.tasks.get_mut(&task) {
            t.fail();
        }
        let err = EngineError::ResourceExhausted {
            task,
            reason,
        };
        error!(%task, error = %err, "task failed");

        for (attempt, outcome) in self.coordinator.task_failed(task) {
            self.out.push(Command::ResolveCommit { attempt, outcome });
        }
        for sibling in self.live_attempts(task) {
            self.kill_attempt(sibling, &format!("{task} failed"))?;
        }
        self.vertices[task.vertex.0 as usize].state = VertexState::Failed;
        self.finish(DagState::Failed, Some(err.to_string()));
        Ok(())
    }

    pub(super) fn on_node_lost(&mut self, node: NodeId) -> Result<()> {
        let lost = self.containers.on_node(&node);
        warn!(%node, containers = lost.len(), "node lost");

        for cid in lost {
            let Some(container) = self.containers.get_mut(cid) else {
                continue;
            };
            let bound = container.on_node_lost();
            self.out.push(Command::ReleaseContainer(cid));

            let Some(attempt) = bound else { continue };
            if self.attempts.get(&attempt).is_some_and(|a| a.is_live()) {
                // Outcome unknown: FAILED, never KILLED, so it can be retried.
                let err = EngineError::NodeLoss {
                    node: node.clone(),
                    container: cid,
                };
                self.attempt_failed(attempt, err.to_string())?;
            }
        }
        Ok(())
    }

    pub(super) fn on_container_completed(&mut self, id: ContainerId) -> Result<()> {
        let Some(container) = self.containers.get_mut(id) else {
            debug!(container = %id, "completion reported for unknown container");
            return Ok(());
        };
        let bound = container.on_completed();
        if let Some(attempt) = bound {
            if self.attempts.get(&attempt).is_some_and(|a| a.is_live()) {
                self.attempt_failed(attempt, format!("container {id} exited unexpectedly"))?;
            }
        }
        Ok(())
    }

    pub(super) fn on_stop_timeout(&mut self, id: ContainerId) {
        if let Some(container) = self.containers.get_mut(id) {
            container.on_stop_timeout();
        }
    }

    pub(super) fn on_commit_requested(&mut self, attempt: AttemptId) -> Result<()> {
        if self.state.is_terminal() {
            let outcome = CommitOutcome::Aborted(format!("DAG already {}", self.state));
            self.out.push(Command::ResolveCommit { attempt, outcome });
            return Ok(());
        }
        let Some(a) = self.attempts.get(&attempt) else {
            let outcome = CommitOutcome::Failed(format!("unknown attempt {attempt}"));
            self.out.push(Command::ResolveCommit { attempt, outcome });
            return Ok(());
        };
        if !a.is_live() {
            let outcome = match self.coordinator.token_holder(attempt.task) {
                Some(winner) if winner != attempt => CommitOutcome::Conflict { winner },
                _ => CommitOutcome::Failed(format!("attempt {attempt} is {:?}", a.state())),
            };
            self.out.push(Command::ResolveCommit { attempt, outcome });
            return Ok(());
        }

        match self.coordinator.request(attempt) {
            CommitDecision::Publish(granted) => {
                let mut batch = Vec::with_capacity(granted.len());
                for g in granted {
                    if let Some(a) = self.attempts.get_mut(&g) {
                        a.mark_committed();
                    }
                    batch.push(GrantedOutputs {
                        attempt: g,
                        targets: self.publish_targets(g),
                    });
                }
                self.out.push(Command::Publish(batch));
            }
            CommitDecision::Reply(outcome) => {
                if let CommitOutcome::Conflict { .. } = outcome {
                    if let Some(a) = self.attempts.get_mut(&attempt) {
                        a.mark_commit_denied();
                    }
                    self.discard_staging(attempt);
                }
                self.out.push(Command::ResolveCommit { attempt, outcome });
            }
            CommitDecision::Wait => {}
        }
        Ok(())
    }

    /// The token stays with `attempt`; its output can never be committed
    /// by anyone else, so the task fails.
    pub(super) fn on_publish_failed(&mut self, attempt: AttemptId, reason: String) -> Result<()> {
        error!(%attempt, %reason, "publishing committed output failed");
        if self.state.is_terminal() {
            return Ok(());
        }
        self.fail_task(
            attempt.task,
            format!("publishing output of {attempt} failed: {reason}"),
        )
    }

    pub(super) fn on_speculation_requested(&mut self, task: TaskId) -> Result<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let Some(t) = self.tasks.get(&task) else {
            debug!(%task, "speculation requested for unknown task");
            return Ok(());
        };
        if t.state().is_terminal() || t.budget_exhausted() {
            debug!(%task, state = ?t.state(), "no speculation for finished task");
            return Ok(());
        }
        let live = self.live_attempts(task);
        if live.len() != 1 || self.coordinator.token_holder(task).is_some() {
            debug!(%task, live = live.len(), "speculation not applicable");
            return Ok(());
        }
        let id = self.create_attempt(task, true)?;
        info!(%task, attempt = %id, "speculative attempt created");
        Ok(())
    }

    pub(super) fn on_dag_aborted(&mut self, reason: String) {
        if self.state.is_terminal() {
            debug!(%reason, "abort after DAG finished; ignoring");
            return;
        }
        warn!(%reason, "DAG abort requested");
        self.finish(DagState::Killed, Some(EngineError::Aborted(reason).to_string()));
    }
}
