// src/engine/vertex.rs

//! Runtime state of a vertex and resolution of deferred parallelism.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::attempt::Counters;
use crate::dag::{Dag, Parallelism};
use crate::engine::status::VertexState;
use crate::types::{DataMovementType, VertexId};

#[derive(Debug, Clone)]
pub struct VertexRuntime {
    pub state: VertexState,
    /// Resolved task count; 0 until the vertex starts.
    pub tasks: u32,
    pub succeeded: u32,
    /// Sum of the counters of every task's successful attempt.
    pub counters: Counters,
}

impl VertexRuntime {
    pub fn new() -> Self {
        Self {
            state: VertexState::New,
            tasks: 0,
            succeeded: 0,
            counters: Counters::new(),
        }
    }
}

impl Default for VertexRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides the task count of a vertex declared with
/// [`Parallelism::Deferred`] at the moment it starts.
pub trait ParallelismResolver: Send + Debug {
    /// `started` maps every already-started vertex to its task count.
    fn resolve(&self, dag: &Dag, vertex: VertexId, started: &BTreeMap<VertexId, u32>) -> u32;
}

/// A ONE_TO_ONE consumer copies its producer's task count; anything else
/// runs a single task.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamParallelismResolver;

impl ParallelismResolver for UpstreamParallelismResolver {
    fn resolve(&self, dag: &Dag, vertex: VertexId, started: &BTreeMap<VertexId, u32>) -> u32 {
        dag.upstream_of(vertex)
            .iter()
            .filter(|u| u.movement == DataMovementType::OneToOne)
            .find_map(|u| started.get(&u.vertex).copied())
            .unwrap_or(1)
            .max(1)
    }
}

/// Task count of `vertex`, resolving deferred parallelism through `resolver`.
pub fn task_count(
    dag: &Dag,
    vertex: VertexId,
    resolver: &dyn ParallelismResolver,
    started: &BTreeMap<VertexId, u32>,
) -> u32 {
    match dag.vertex(vertex).parallelism {
        Parallelism::Fixed(n) => n,
        Parallelism::Deferred => resolver.resolve(dag, vertex, started),
    }
}
