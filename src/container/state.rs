// src/container/state.rs

//! Container lifecycle state machine.
//!
//! ```text
//! NEW -> ALLOCATED -> LAUNCHING -> RUNNING <-> IDLE -> STOPPING -> COMPLETED
//!                 any non-terminal state -> FAILED | LOST
//! ```
//!
//! A container holds at most one attempt binding. `assign` on an
//! `ALLOCATED` container binds the attempt and moves through `LAUNCHING`
//! (the worker has to start first); on an `IDLE` container it resumes
//! `RUNNING` directly.

use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::types::{AttemptId, ContainerId, NodeId, Resource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    New,
    Allocated,
    Launching,
    Running,
    Idle,
    Stopping,
    Completed,
    Failed,
    Lost,
}

impl ContainerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ContainerState::Completed | ContainerState::Failed | ContainerState::Lost
        )
    }
}

/// What the caller must do after a successful `assign`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOutcome {
    /// The worker process is not up yet; launch it with the attempt.
    Launch,
    /// The worker is already up and idle; hand it the attempt.
    Reuse,
}

/// Result of `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Moved to `STOPPING`; release the container and arm the stop timer.
    Stopping,
    /// An attempt is bound; the stop happens when it reports completion.
    Deferred,
    /// Already stopping or terminal.
    Noop,
}

#[derive(Debug, Clone)]
pub struct Container {
    id: ContainerId,
    node: NodeId,
    capability: Resource,
    state: ContainerState,
    attempt: Option<AttemptId>,
    stop_requested: bool,
    completed_attempts: u32,
}

impl Container {
    pub fn new(id: ContainerId, node: NodeId, capability: Resource) -> Self {
        Self {
            id,
            node,
            capability,
            state: ContainerState::New,
            attempt: None,
            stop_requested: false,
            completed_attempts: 0,
        }
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn capability(&self) -> Resource {
        self.capability
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn attempt(&self) -> Option<AttemptId> {
        self.attempt
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Number of attempts that finished on this container.
    pub fn completed_attempts(&self) -> u32 {
        self.completed_attempts
    }

    /// Whether new work may be assigned right now.
    pub fn is_assignable(&self) -> bool {
        self.attempt.is_none()
            && !self.stop_requested
            && matches!(self.state, ContainerState::Allocated | ContainerState::Idle)
    }

    fn transition(&mut self, to: ContainerState) {
        debug!(container = %self.id, from = ?self.state, to = ?to, "container transition");
        self.state = to;
    }

    fn invalid(&self, operation: &'static str) -> EngineError {
        EngineError::invalid_state(self.id, self.state, operation)
    }

    /// The allocator granted this container.
    pub fn on_allocated(&mut self) -> Result<()> {
        if self.state != ContainerState::New {
            return Err(self.invalid("allocate"));
        }
        self.transition(ContainerState::Allocated);
        Ok(())
    }

    pub fn assign(&mut self, attempt: AttemptId) -> Result<AssignOutcome> {
        if self.attempt.is_some() || self.stop_requested {
            return Err(self.invalid("assign"));
        }
        let outcome = match self.state {
            ContainerState::Allocated => {
                self.transition(ContainerState::Launching);
                AssignOutcome::Launch
            }
            ContainerState::Idle => {
                self.transition(ContainerState::Running);
                AssignOutcome::Reuse
            }
            _ => return Err(self.invalid("assign")),
        };
        self.attempt = Some(attempt);
        Ok(outcome)
    }

    /// The worker process is up and runs the bound attempt.
    pub fn on_launched(&mut self) -> Result<()> {
        if self.state != ContainerState::Launching {
            return Err(self.invalid("mark launched"));
        }
        self.transition(ContainerState::Running);
        Ok(())
    }

    /// The worker could not be started. Returns the attempt that was bound.
    pub fn on_launch_failed(&mut self) -> Result<Option<AttemptId>> {
        if self.state != ContainerState::Launching {
            return Err(self.invalid("fail launch of"));
        }
        self.transition(ContainerState::Failed);
        Ok(self.attempt.take())
    }

    pub fn on_attempt_succeeded(&mut self, attempt: AttemptId) -> Result<ContainerState> {
        self.finish_attempt(attempt, "report success on")
    }

    pub fn on_attempt_failed(&mut self, attempt: AttemptId) -> Result<ContainerState> {
        self.finish_attempt(attempt, "report failure on")
    }

    fn finish_attempt(&mut self, attempt: AttemptId, operation: &'static str) -> Result<ContainerState> {
        if self.state != ContainerState::Running || self.attempt != Some(attempt) {
            return Err(self.invalid(operation));
        }
        self.attempt = None;
        self.completed_attempts += 1;
        let next = if self.stop_requested {
            ContainerState::Stopping
        } else {
            ContainerState::Idle
        };
        self.transition(next);
        Ok(next)
    }

    /// The engine killed the bound attempt. A killed worker is never reused,
    /// so the container moves straight to `STOPPING`.
    pub fn on_attempt_killed(&mut self, attempt: AttemptId) -> Result<()> {
        let running = matches!(
            self.state,
            ContainerState::Running | ContainerState::Launching
        );
        if !running || self.attempt != Some(attempt) {
            return Err(self.invalid("kill attempt on"));
        }
        self.attempt = None;
        self.stop_requested = true;
        self.transition(ContainerState::Stopping);
        Ok(())
    }

    pub fn stop(&mut self) -> StopOutcome {
        if self.state.is_terminal() || self.state == ContainerState::Stopping {
            return StopOutcome::Noop;
        }
        self.stop_requested = true;
        match self.state {
            ContainerState::Running | ContainerState::Launching => StopOutcome::Deferred,
            _ => {
                self.transition(ContainerState::Stopping);
                StopOutcome::Stopping
            }
        }
    }

    /// Forces `LOST` from any non-terminal state and returns the attempt that
    /// was bound, whose outcome is now unknown.
    pub fn on_node_lost(&mut self) -> Option<AttemptId> {
        if self.state.is_terminal() {
            return None;
        }
        warn!(container = %self.id, node = %self.node, "container lost with its node");
        self.transition(ContainerState::Lost);
        self.attempt.take()
    }

    /// The container did not confirm its stop in time.
    pub fn on_stop_timeout(&mut self) -> bool {
        if self.state != ContainerState::Stopping {
            return false;
        }
        warn!(container = %self.id, "container did not stop in time; presuming lost");
        self.transition(ContainerState::Lost);
        true
    }

    /// The allocator reports that the container exited. Expected only while
    /// stopping; anywhere else it counts as a failure and the bound attempt
    /// (if any) is returned.
    pub fn on_completed(&mut self) -> Option<AttemptId> {
        match self.state {
            ContainerState::Stopping => {
                self.transition(ContainerState::Completed);
                None
            }
            s if s.is_terminal() => None,
            _ => {
                warn!(container = %self.id, state = ?self.state, "container exited unexpectedly");
                self.transition(ContainerState::Failed);
                self.attempt.take()
            }
        }
    }
}
