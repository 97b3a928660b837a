// src/errors.rs

//! Crate-wide error taxonomy and `Result` alias.
//!
//! The first six variants are the engine's own failure classes; the rest
//! cover configuration loading and collaborator IO.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{AttemptId, ContainerId, NodeId, TaskId};

#[derive(Error, Debug)]
pub enum EngineError {
    /// Illegal transition requested on a state machine. Always a protocol or
    /// programming bug; fatal to the entity it was raised on.
    #[error("invalid state: cannot {operation} {entity} while {state}")]
    InvalidState {
        entity: String,
        state: String,
        operation: &'static str,
    },

    #[error("attempt {attempt} failed: {reason}")]
    AttemptExecution { attempt: AttemptId, reason: String },

    #[error("node {node} lost while running container {container}")]
    NodeLoss { node: NodeId, container: ContainerId },

    /// Another attempt of the same task already holds the commit token.
    #[error("attempt {attempt} lost the commit race to {winner}")]
    CommitConflict { attempt: AttemptId, winner: AttemptId },

    #[error("DAG aborted: {0}")]
    Aborted(String),

    #[error("task {task} cannot succeed: {reason}")]
    ResourceExhausted { task: TaskId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("output directory {0:?} already exists")]
    OutputExists(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub(crate) fn invalid_state(
        entity: impl ToString,
        state: impl std::fmt::Debug,
        operation: &'static str,
    ) -> Self {
        EngineError::InvalidState {
            entity: entity.to_string(),
            state: format!("{state:?}"),
            operation,
        }
    }

    /// An id that no arena knows about was addressed.
    pub(crate) fn unknown(entity: impl ToString, operation: &'static str) -> Self {
        EngineError::InvalidState {
            entity: entity.to_string(),
            state: "Unknown".to_string(),
            operation,
        }
    }

    /// Whether the scheduler may create another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::AttemptExecution { .. } | EngineError::NodeLoss { .. }
        )
    }

    /// Whether this error reaches the submission handle's diagnostics.
    ///
    /// Retries and commit-race losers are handled internally.
    pub fn is_surfaced(&self) -> bool {
        !matches!(
            self,
            EngineError::AttemptExecution { .. }
                | EngineError::NodeLoss { .. }
                | EngineError::CommitConflict { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VertexId;

    fn attempt(n: u32) -> AttemptId {
        AttemptId::new(TaskId::new(VertexId(0), 0), n)
    }

    #[test]
    fn retryable_and_surfaced_classes() {
        let exec = EngineError::AttemptExecution {
            attempt: attempt(0),
            reason: "exit 1".into(),
        };
        assert!(exec.is_retryable());
        assert!(!exec.is_surfaced());

        let conflict = EngineError::CommitConflict {
            attempt: attempt(1),
            winner: attempt(0),
        };
        assert!(!conflict.is_retryable());
        assert!(!conflict.is_surfaced());

        let aborted = EngineError::Aborted("user".into());
        assert!(!aborted.is_retryable());
        assert!(aborted.is_surfaced());
    }

    #[test]
    fn invalid_state_message_names_operation() {
        let err = EngineError::invalid_state(
            "container_7",
            crate::container::ContainerState::Stopping,
            "assign",
        );
        assert_eq!(
            err.to_string(),
            "invalid state: cannot assign container_7 while Stopping"
        );
    }
}
