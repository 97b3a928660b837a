// src/attempt/state.rs

//! Lifecycle of a single task attempt.

use tracing::debug;

use crate::attempt::counters::Counters;
use crate::errors::{EngineError, Result};
use crate::types::{AttemptId, ContainerId};

/// Outcome / progress of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    /// Created, possibly bound to a container that is still launching.
    Pending,
    Running,
    Succeeded,
    /// Worker-reported failure, launch failure or lost node.
    Failed,
    /// Stopped by the engine (speculation loser, DAG abort).
    Killed,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptState::Succeeded | AttemptState::Failed | AttemptState::Killed
        )
    }
}

#[derive(Debug, Clone)]
pub struct TaskAttempt {
    id: AttemptId,
    state: AttemptState,
    container: Option<ContainerId>,
    speculative: bool,
    /// Set once the commit coordinator granted this attempt's commit.
    committed: bool,
    /// Set when the attempt was denied a commit (lost the race).
    commit_denied: bool,
    diagnostics: Vec<String>,
    counters: Counters,
}

impl TaskAttempt {
    pub fn new(id: AttemptId, speculative: bool) -> Self {
        Self {
            id,
            state: AttemptState::Pending,
            container: None,
            speculative,
            committed: false,
            commit_denied: false,
            diagnostics: Vec::new(),
            counters: Counters::new(),
        }
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    pub fn container(&self) -> Option<ContainerId> {
        self.container
    }

    pub fn is_speculative(&self) -> bool {
        self.speculative
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn commit_denied(&self) -> bool {
        self.commit_denied
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Whether this attempt may still reach `Succeeded`.
    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Record the container the scheduler bound this attempt to.
    pub fn assign(&mut self, container: ContainerId) -> Result<()> {
        if self.state != AttemptState::Pending || self.container.is_some() {
            return Err(EngineError::invalid_state(self.id, self.state, "assign"));
        }
        self.container = Some(container);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        match (self.state, self.container) {
            (AttemptState::Pending, Some(container)) => {
                debug!(attempt = %self.id, %container, "attempt running");
                self.state = AttemptState::Running;
                Ok(())
            }
            _ => Err(EngineError::invalid_state(self.id, self.state, "start")),
        }
    }

    pub fn succeed(&mut self, counters: Counters) -> Result<()> {
        if self.state != AttemptState::Running {
            return Err(EngineError::invalid_state(self.id, self.state, "succeed"));
        }
        self.state = AttemptState::Succeeded;
        self.counters = counters;
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EngineError::invalid_state(self.id, self.state, "fail"));
        }
        self.state = AttemptState::Failed;
        self.diagnostics.push(reason.into());
        Ok(())
    }

    pub fn kill(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.state.is_terminal() {
            return Err(EngineError::invalid_state(self.id, self.state, "kill"));
        }
        self.state = AttemptState::Killed;
        self.diagnostics.push(reason.into());
        Ok(())
    }

    pub fn mark_committed(&mut self) {
        self.committed = true;
    }

    pub fn mark_commit_denied(&mut self) {
        self.commit_denied = true;
    }
}
