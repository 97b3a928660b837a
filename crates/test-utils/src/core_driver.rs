#![allow(dead_code)]

use dagengine::attempt::Counters;
use dagengine::commit::CommitOutcome;
use dagengine::dag::Dag;
use dagengine::engine::{
    Command, DagState, EngineConfig, EngineCore, EngineEvent, EngineStep, DagContext,
};
use dagengine::types::{AttemptId, ContainerId, NodeId, Resource, TaskId};

use crate::builders::fast_config;

/// Drives an [`EngineCore`] synchronously, playing allocator and launcher.
///
/// - Every `Launch` of a fresh container is confirmed right away with
///   `ContainerLaunched`, so attempts reach `RUNNING` without extra steps.
/// - Every command the core emitted is kept in `log`.
pub struct CoreDriver {
    pub core: EngineCore,
    pub log: Vec<Command>,
    pub keep_running: bool,
    next_container: u64,
}

impl CoreDriver {
    pub fn new(dag: Dag) -> Self {
        Self::with_config(dag, fast_config())
    }

    pub fn with_config(dag: Dag, config: EngineConfig) -> Self {
        let context = DagContext::new(dag, config);
        Self {
            core: EngineCore::new(&context),
            log: Vec::new(),
            keep_running: true,
            next_container: 1,
        }
    }

    pub fn start(&mut self) -> Vec<Command> {
        let step = self.core.start();
        self.absorb(step)
    }

    pub fn step(&mut self, event: EngineEvent) -> Vec<Command> {
        let step = self.core.step(event);
        self.absorb(step)
    }

    fn absorb(&mut self, step: EngineStep) -> Vec<Command> {
        self.keep_running = step.keep_running;
        let mut out = step.commands;
        let fresh: Vec<ContainerId> = out
            .iter()
            .filter_map(|c| match c {
                Command::Launch(req) if !req.reuse => Some(req.container),
                _ => None,
            })
            .collect();
        self.log.extend(out.iter().cloned());
        for container in fresh {
            let more = self.step(EngineEvent::ContainerLaunched { container });
            out.extend(more);
        }
        out
    }

    /// Grant one container on `node`, large enough for every test vertex.
    pub fn grant(&mut self, node: &str) -> (ContainerId, Vec<Command>) {
        let id = ContainerId(self.next_container);
        self.next_container += 1;
        let cmds = self.step(EngineEvent::ContainerAllocated {
            container: id,
            node: NodeId::new(node),
            resource: Resource::new(4096, 4),
        });
        (id, cmds)
    }

    /// Grant containers on `node` until no attempt waits for one. Returns
    /// the attempts launched along the way.
    pub fn run_ready(&mut self, node: &str) -> Vec<AttemptId> {
        let mut launched = Vec::new();
        while self.core.ready_len() > 0 && self.keep_running {
            let (_, cmds) = self.grant(node);
            launched.extend(launches(&cmds));
        }
        launched
    }

    /// Attempts launched by `cmds` (e.g. on a reused container), followed by
    /// those launched on fresh containers for whatever still waits.
    pub fn settle(&mut self, cmds: &[Command], node: &str) -> Vec<AttemptId> {
        let mut launched = launches(cmds);
        launched.extend(self.run_ready(node));
        launched
    }

    pub fn succeed(&mut self, attempt: AttemptId) -> Vec<Command> {
        self.step(EngineEvent::AttemptSucceeded {
            attempt,
            counters: Counters::new(),
        })
    }

    pub fn fail(&mut self, attempt: AttemptId, reason: &str) -> Vec<Command> {
        self.step(EngineEvent::AttemptFailed {
            attempt,
            reason: reason.to_string(),
        })
    }

    pub fn request_commit(&mut self, attempt: AttemptId) -> Vec<Command> {
        self.step(EngineEvent::CommitRequested { attempt })
    }

    pub fn speculate(&mut self, task: TaskId) -> Vec<Command> {
        self.step(EngineEvent::SpeculationRequested { task })
    }

    pub fn container_of(&self, attempt: AttemptId) -> Option<ContainerId> {
        self.core.attempt(attempt).and_then(|a| a.container())
    }

    /// Terminal states announced so far, in order.
    pub fn finishes(&self) -> Vec<DagState> {
        finished(&self.log)
    }
}

pub fn launches(cmds: &[Command]) -> Vec<AttemptId> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::Launch(req) => Some(req.attempt),
            _ => None,
        })
        .collect()
}

/// Granted attempts of every publish batch, flattened.
pub fn publishes(cmds: &[Command]) -> Vec<AttemptId> {
    publish_batches(cmds).into_iter().flatten().collect()
}

pub fn publish_batches(cmds: &[Command]) -> Vec<Vec<AttemptId>> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::Publish(batch) => Some(batch.iter().map(|g| g.attempt).collect()),
            _ => None,
        })
        .collect()
}

pub fn resolutions(cmds: &[Command]) -> Vec<(AttemptId, CommitOutcome)> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::ResolveCommit { attempt, outcome } => Some((*attempt, outcome.clone())),
            _ => None,
        })
        .collect()
}

pub fn kills(cmds: &[Command]) -> Vec<AttemptId> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::KillAttempt { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect()
}

pub fn released(cmds: &[Command]) -> Vec<ContainerId> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::ReleaseContainer(id) => Some(*id),
            _ => None,
        })
        .collect()
}

pub fn stop_timers(cmds: &[Command]) -> Vec<ContainerId> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::ArmStopTimer(id) => Some(*id),
            _ => None,
        })
        .collect()
}

pub fn requested(cmds: &[Command]) -> Vec<AttemptId> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::RequestContainers(reqs) => Some(reqs.iter().map(|r| r.attempt)),
            _ => None,
        })
        .flatten()
        .collect()
}

pub fn finished(cmds: &[Command]) -> Vec<DagState> {
    cmds.iter()
        .filter_map(|c| match c {
            Command::Finished(state) => Some(*state),
            _ => None,
        })
        .collect()
}
