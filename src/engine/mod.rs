// src/engine/mod.rs

//! Dispatcher / scheduler of a DAG run.
//!
//! The pure core state machine lives in [`core`] (with the per-event logic in
//! [`event_handlers`]); it consumes [`EngineEvent`]s and returns
//! [`Command`]s. The async shell in [`runtime`] reads events from the
//! collaborators, feeds the core and executes the commands against the
//! resource allocator, the worker launcher and the output storage.

use std::path::PathBuf;
use std::sync::Arc;

use crate::attempt::Counters;
use crate::commit::CommitOutcome;
use crate::dag::ProcessorDescriptor;
use crate::types::{AttemptId, ContainerId, NodeId, Resource, TaskId};

pub mod client;
pub mod context;
pub mod core;
pub mod event_handlers;
pub mod placement;
pub mod queue;
pub mod runtime;
pub mod status;
pub mod vertex;

pub use client::DagClient;
pub use context::{Credentials, DagContext, EngineConfig};
pub use core::EngineCore;
pub use placement::{LocalityAwarePlacement, PlacementPolicy, PlacementRequest};
pub use queue::ReadyQueue;
pub use runtime::{Dispatcher, EngineChannels, EventSender, Inbound, submit};
pub use status::{DagState, DagStatus, VertexProgress, VertexState};
pub use vertex::{ParallelismResolver, UpstreamParallelismResolver};

/// Events flowing into the engine from collaborators, attempts and the
/// submission handle.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ContainerAllocated {
        container: ContainerId,
        node: NodeId,
        resource: Resource,
    },
    /// The worker process of a container is up and runs its first attempt.
    ContainerLaunched { container: ContainerId },
    LaunchFailed { container: ContainerId, reason: String },
    AttemptSucceeded { attempt: AttemptId, counters: Counters },
    AttemptFailed { attempt: AttemptId, reason: String },
    NodeLost { node: NodeId },
    /// The allocator reports that a container exited.
    ContainerCompleted { container: ContainerId },
    ContainerStopTimedOut { container: ContainerId },
    /// An attempt asks whether it may commit. The reply travels back
    /// through [`Command::ResolveCommit`] or after [`Command::Publish`].
    CommitRequested { attempt: AttemptId },
    PublishFailed { attempt: AttemptId, reason: String },
    SpeculationRequested { task: TaskId },
    DagAborted { reason: String },
    /// A collaborator call failed in a way the engine cannot recover from.
    InternalError { reason: String },
}

/// Ask the allocator for one container suitable for `attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRequest {
    pub attempt: AttemptId,
    pub resource: Resource,
    pub location_hints: Vec<NodeId>,
}

/// A committed output an attempt writes into its staging path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub name: String,
    pub staging: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub staging: PathBuf,
    pub final_path: PathBuf,
}

/// Outputs of one granted attempt inside a publish batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedOutputs {
    pub attempt: AttemptId,
    pub targets: Vec<PublishTarget>,
}

/// Everything a worker needs to run one attempt.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub container: ContainerId,
    pub attempt: AttemptId,
    pub vertex: String,
    pub processor: ProcessorDescriptor,
    pub outputs: Vec<OutputTarget>,
    pub requires_commit: bool,
    /// The container's worker is already running; only hand it the attempt.
    pub reuse: bool,
    pub credentials: Arc<Credentials>,
}

/// Command produced by the pure core, executed by the async shell.
#[derive(Debug, Clone)]
pub enum Command {
    RequestContainers(Vec<ContainerRequest>),
    ReleaseContainer(ContainerId),
    /// Emit `ContainerStopTimedOut` after the configured stop timeout.
    ArmStopTimer(ContainerId),
    Launch(LaunchRequest),
    KillAttempt {
        attempt: AttemptId,
        container: Option<ContainerId>,
    },
    /// Publish every attempt of the batch, then answer each with
    /// `CommitOutcome::Granted`. A released group barrier is a single
    /// batch: either all of it becomes visible or none of it does.
    Publish(Vec<GrantedOutputs>),
    ResolveCommit {
        attempt: AttemptId,
        outcome: CommitOutcome,
    },
    /// Remove staging output that will never be committed.
    Discard(Vec<PathBuf>),
    /// Remove the `_temporary` trees of every commit directory.
    Cleanup(Vec<PathBuf>),
    Finished(DagState),
}

/// Decision returned by the core after handling one event.
#[derive(Debug, Clone)]
pub struct EngineStep {
    pub commands: Vec<Command>,
    pub keep_running: bool,
}
