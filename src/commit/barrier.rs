// src/commit/barrier.rs

//! Counting barrier for vertex groups with committed outputs.
//!
//! Every task of every member vertex must offer a commit candidate before
//! any of them is granted. Member vertices may have different task counts;
//! the barrier waits for all of them.

use std::collections::BTreeMap;

use crate::types::{AttemptId, GroupId, TaskId, VertexId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierState {
    Open,
    Released,
    /// A member task can no longer commit; nobody in the group will.
    Broken(String),
}

/// Result of offering a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Candidate recorded; the barrier is still waiting for other tasks.
    Waiting,
    /// This offer completed the barrier; every candidate may now commit.
    Released(Vec<AttemptId>),
    /// Another attempt of the same task is already the candidate.
    Taken(AttemptId),
    Broken(String),
}

#[derive(Debug, Clone)]
pub struct GroupBarrier {
    group: GroupId,
    /// Member vertex -> task count, `None` until the member has started.
    expected: BTreeMap<VertexId, Option<u32>>,
    candidates: BTreeMap<TaskId, AttemptId>,
    state: BarrierState,
}

impl GroupBarrier {
    pub fn new(group: GroupId, members: &[VertexId]) -> Self {
        Self {
            group,
            expected: members.iter().map(|m| (*m, None)).collect(),
            candidates: BTreeMap::new(),
            state: BarrierState::Open,
        }
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn state(&self) -> &BarrierState {
        &self.state
    }

    /// Record the resolved task count of a member vertex.
    pub fn register_member(&mut self, vertex: VertexId, tasks: u32) {
        if let Some(slot) = self.expected.get_mut(&vertex) {
            *slot = Some(tasks);
        }
    }

    pub fn candidate(&self, task: TaskId) -> Option<AttemptId> {
        self.candidates.get(&task).copied()
    }

    /// Candidates currently held at the barrier.
    pub fn waiting(&self) -> Vec<AttemptId> {
        match self.state {
            BarrierState::Open => self.candidates.values().copied().collect(),
            _ => Vec::new(),
        }
    }

    pub fn offer(&mut self, attempt: AttemptId) -> Offer {
        match &self.state {
            BarrierState::Broken(reason) => return Offer::Broken(reason.clone()),
            BarrierState::Released => {
                // Every task already has its committed candidate.
                if let Some(existing) = self.candidates.get(&attempt.task) {
                    return Offer::Taken(*existing);
                }
            }
            BarrierState::Open => {}
        }

        if let Some(existing) = self.candidates.get(&attempt.task) {
            if *existing != attempt {
                return Offer::Taken(*existing);
            }
        }
        self.candidates.insert(attempt.task, attempt);

        if self.is_complete() {
            self.state = BarrierState::Released;
            Offer::Released(self.candidates.values().copied().collect())
        } else {
            Offer::Waiting
        }
    }

    /// Drop `attempt` as candidate of its task, so that a retry can take its
    /// place. Returns whether it was the candidate.
    pub fn withdraw(&mut self, attempt: AttemptId) -> bool {
        if self.state != BarrierState::Open {
            return false;
        }
        if self.candidates.get(&attempt.task) == Some(&attempt) {
            self.candidates.remove(&attempt.task);
            true
        } else {
            false
        }
    }

    /// Break an open barrier; returns the candidates that were waiting.
    pub fn break_with(&mut self, reason: impl Into<String>) -> Vec<AttemptId> {
        if self.state != BarrierState::Open {
            return Vec::new();
        }
        let waiting = self.waiting();
        self.state = BarrierState::Broken(reason.into());
        waiting
    }

    fn is_complete(&self) -> bool {
        self.expected.iter().all(|(vertex, tasks)| match tasks {
            Some(n) => {
                let offered = self
                    .candidates
                    .keys()
                    .filter(|t| t.vertex == *vertex)
                    .count();
                offered as u32 == *n
            }
            None => false,
        })
    }
}
