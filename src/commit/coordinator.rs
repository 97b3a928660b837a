// src/commit/coordinator.rs

//! Engine-side commit decisions.
//!
//! The coordinator is owned by the engine core and mutated only from its
//! event loop. It never talks to storage or to attempts itself: it returns
//! a [`CommitDecision`] and the dispatcher performs the publish and answers
//! the waiting attempt.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use crate::commit::barrier::{GroupBarrier, Offer};
use crate::commit::token::CommitToken;
use crate::types::{AttemptId, GroupId, TaskId, VertexId};

/// Answer delivered to an attempt blocked in `request_commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Output published; the attempt may report success.
    Granted,
    /// Another attempt holds the token; discard output and exit.
    Conflict { winner: AttemptId },
    Aborted(String),
    /// The commit can never happen (publish failed, group broken).
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitDecision {
    /// Tokens were taken for these attempts; publish their outputs, then
    /// answer each with [`CommitOutcome::Granted`].
    Publish(Vec<AttemptId>),
    /// Answer the requester right away.
    Reply(CommitOutcome),
    /// The requester stays blocked (group barrier not released yet).
    Wait,
}

#[derive(Debug, Default)]
pub struct CommitCoordinator {
    tokens: HashMap<TaskId, CommitToken>,
    member_of: HashMap<VertexId, GroupId>,
    barriers: BTreeMap<GroupId, GroupBarrier>,
    aborted: Option<String>,
}

impl CommitCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a vertex group whose committed outputs go through a barrier.
    pub fn register_group(&mut self, group: GroupId, members: &[VertexId]) {
        for m in members {
            self.member_of.insert(*m, group);
        }
        self.barriers
            .insert(group, GroupBarrier::new(group, members));
    }

    /// A member vertex started with `tasks` tasks.
    pub fn register_vertex(&mut self, vertex: VertexId, tasks: u32) {
        if let Some(group) = self.member_of.get(&vertex) {
            if let Some(barrier) = self.barriers.get_mut(group) {
                barrier.register_member(vertex, tasks);
            }
        }
    }

    pub fn token_holder(&self, task: TaskId) -> Option<AttemptId> {
        self.tokens.get(&task).and_then(CommitToken::holder)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Attempts blocked at a group barrier.
    pub fn waiting(&self) -> Vec<AttemptId> {
        self.barriers.values().flat_map(|b| b.waiting()).collect()
    }

    pub fn request(&mut self, attempt: AttemptId) -> CommitDecision {
        if let Some(reason) = &self.aborted {
            return CommitDecision::Reply(CommitOutcome::Aborted(reason.clone()));
        }

        let task = attempt.task;
        if let Some(winner) = self.token_holder(task) {
            if winner == attempt {
                return CommitDecision::Reply(CommitOutcome::Granted);
            }
            warn!(%attempt, %winner, "commit denied: token already held");
            return CommitDecision::Reply(CommitOutcome::Conflict { winner });
        }

        let Some(group) = self.member_of.get(&task.vertex).copied() else {
            return self.grant(vec![attempt]);
        };
        let Some(barrier) = self.barriers.get_mut(&group) else {
            return self.grant(vec![attempt]);
        };

        match barrier.offer(attempt) {
            Offer::Waiting => {
                debug!(%attempt, %group, "commit candidate waiting at group barrier");
                CommitDecision::Wait
            }
            Offer::Released(candidates) => {
                info!(%group, attempts = candidates.len(), "group barrier released");
                self.grant(candidates)
            }
            Offer::Taken(winner) => {
                warn!(%attempt, %winner, "commit denied: task already has a group candidate");
                CommitDecision::Reply(CommitOutcome::Conflict { winner })
            }
            Offer::Broken(reason) => CommitDecision::Reply(CommitOutcome::Failed(reason)),
        }
    }

    fn grant(&mut self, attempts: Vec<AttemptId>) -> CommitDecision {
        let mut granted = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let token = self.tokens.entry(attempt.task).or_default();
            match token.try_acquire(attempt) {
                Ok(()) => {
                    info!(%attempt, "commit granted");
                    granted.push(attempt);
                }
                // Unreachable through `request`: group candidates are unique
                // per task and tokens are only taken here.
                Err(winner) => warn!(%attempt, %winner, "token taken before grant"),
            }
        }
        CommitDecision::Publish(granted)
    }

    /// An attempt failed or was killed. If it was waiting at a group barrier
    /// it is withdrawn so a retry can become the candidate; the returned
    /// outcome must be delivered to it.
    pub fn attempt_finished(&mut self, attempt: AttemptId) -> Option<CommitOutcome> {
        let group = self.member_of.get(&attempt.task.vertex)?;
        let barrier = self.barriers.get_mut(group)?;
        if barrier.withdraw(attempt) {
            debug!(%attempt, "commit candidate withdrawn");
            Some(CommitOutcome::Failed(format!(
                "attempt {attempt} withdrawn from the commit barrier"
            )))
        } else {
            None
        }
    }

    /// A task can no longer succeed. Breaks its group's barrier and returns
    /// the waiters to release.
    pub fn task_failed(&mut self, task: TaskId) -> Vec<(AttemptId, CommitOutcome)> {
        let Some(group) = self.member_of.get(&task.vertex).copied() else {
            return Vec::new();
        };
        let Some(barrier) = self.barriers.get_mut(&group) else {
            return Vec::new();
        };
        let reason = format!("{group} cannot commit: {task} failed");
        barrier
            .break_with(reason.clone())
            .into_iter()
            .map(|a| (a, CommitOutcome::Failed(reason.clone())))
            .collect()
    }

    /// DAG-wide abort. Every later request is denied and every waiter is
    /// returned for immediate release.
    pub fn abort(&mut self, reason: &str) -> Vec<(AttemptId, CommitOutcome)> {
        if self.aborted.is_some() {
            return Vec::new();
        }
        self.aborted = Some(reason.to_string());
        let waiting = self.waiting();
        for barrier in self.barriers.values_mut() {
            barrier.break_with(format!("aborted: {reason}"));
        }
        waiting
            .into_iter()
            .map(|a| (a, CommitOutcome::Aborted(reason.to_string())))
            .collect()
    }
}
