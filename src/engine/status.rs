// src/engine/status.rs

use std::collections::BTreeMap;
use std::fmt;

use crate::attempt::Counters;

/// State of a DAG run as seen through the submission handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DagState {
    Running,
    Succeeded,
    Failed,
    Killed,
    /// The engine itself hit an invalid state transition.
    Error,
}

impl DagState {
    pub fn is_terminal(self) -> bool {
        self != DagState::Running
    }
}

impl fmt::Display for DagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DagState::Running => "RUNNING",
            DagState::Succeeded => "SUCCEEDED",
            DagState::Failed => "FAILED",
            DagState::Killed => "KILLED",
            DagState::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexState {
    New,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl VertexState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VertexState::Succeeded | VertexState::Failed | VertexState::Killed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexProgress {
    pub state: VertexState,
    pub total_tasks: u32,
    pub succeeded_tasks: u32,
    pub running_attempts: u32,
    pub failed_attempts: u32,
    pub killed_attempts: u32,
}

/// Snapshot published after every engine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagStatus {
    pub name: String,
    pub state: DagState,
    pub diagnostics: Vec<String>,
    pub vertices: BTreeMap<String, VertexProgress>,
    pub counters: Counters,
}

impl DagStatus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DagState::Running,
            diagnostics: Vec::new(),
            vertices: BTreeMap::new(),
            counters: Counters::new(),
        }
    }

    pub fn diagnostics_text(&self) -> String {
        self.diagnostics.join("\n")
    }
}

impl fmt::Display for DagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DAG '{}': {}", self.name, self.state)?;
        for (name, p) in &self.vertices {
            writeln!(
                f,
                "  {name:<16} {:?} {}/{} tasks, {} running, {} failed, {} killed",
                p.state,
                p.succeeded_tasks,
                p.total_tasks,
                p.running_attempts,
                p.failed_attempts,
                p.killed_attempts
            )?;
        }
        for d in &self.diagnostics {
            writeln!(f, "  diagnostic: {d}")?;
        }
        Ok(())
    }
}
