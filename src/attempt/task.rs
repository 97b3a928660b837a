// src/attempt/task.rs

//! Per-task bookkeeping: attempts created so far, the failure budget and the
//! single successful attempt.

use crate::errors::{EngineError, Result};
use crate::types::{AttemptId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its vertex to start or for an attempt to be placed.
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Killed
        )
    }
}

/// What the scheduler should do after an attempt of this task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Another attempt may be created.
    Retry,
    /// Another live attempt still runs; wait for it.
    Wait,
    /// The failure budget is spent; the task has failed.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Task {
    id: TaskId,
    state: TaskState,
    attempts: Vec<AttemptId>,
    failed_attempts: u32,
    killed_attempts: u32,
    max_failed_attempts: u32,
    successful_attempt: Option<AttemptId>,
}

impl Task {
    pub fn new(id: TaskId, max_failed_attempts: u32) -> Self {
        Self {
            id,
            state: TaskState::Scheduled,
            attempts: Vec::new(),
            failed_attempts: 0,
            killed_attempts: 0,
            max_failed_attempts: max_failed_attempts.max(1),
            successful_attempt: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn attempts(&self) -> &[AttemptId] {
        &self.attempts
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn killed_attempts(&self) -> u32 {
        self.killed_attempts
    }

    pub fn successful_attempt(&self) -> Option<AttemptId> {
        self.successful_attempt
    }

    /// Allocate the id of the next attempt and record it.
    pub fn new_attempt(&mut self) -> Result<AttemptId> {
        if self.state.is_terminal() {
            return Err(EngineError::invalid_state(self.id, self.state, "add attempt to"));
        }
        let id = AttemptId::new(self.id, self.attempts.len() as u32);
        self.attempts.push(id);
        Ok(id)
    }

    pub fn mark_running(&mut self) {
        if self.state == TaskState::Scheduled {
            self.state = TaskState::Running;
        }
    }

    /// Record a failed attempt. `live_attempts` counts the attempts of this
    /// task that are still pending or running after the failure.
    pub fn record_failure(&mut self, live_attempts: usize) -> RetryDecision {
        self.failed_attempts += 1;
        if self.state.is_terminal() {
            return RetryDecision::Wait;
        }
        if self.failed_attempts >= self.max_failed_attempts {
            if live_attempts == 0 {
                self.state = TaskState::Failed;
                return RetryDecision::Exhausted;
            }
            // Budget spent but a sibling may still succeed.
            return RetryDecision::Wait;
        }
        if live_attempts > 0 {
            RetryDecision::Wait
        } else {
            RetryDecision::Retry
        }
    }

    /// Killed attempts never count against the failure budget.
    pub fn record_kill(&mut self) {
        self.killed_attempts += 1;
    }

    pub fn budget_exhausted(&self) -> bool {
        self.failed_attempts >= self.max_failed_attempts
    }

    pub fn succeed(&mut self, attempt: AttemptId) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EngineError::invalid_state(self.id, self.state, "succeed"));
        }
        self.state = TaskState::Succeeded;
        self.successful_attempt = Some(attempt);
        Ok(())
    }

    /// Fail the task regardless of its remaining budget.
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Failed;
        }
    }

    pub fn kill(&mut self) {
        if !self.state.is_terminal() {
            self.state = TaskState::Killed;
        }
    }
}
