#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use dagengine::dag::{
    Dag, DagBuilder, EdgeProperty, InputDescriptor, OutputDescriptor, Parallelism,
    ProcessorDescriptor, Vertex,
};
use dagengine::engine::{DagContext, EngineConfig};
use dagengine::types::{DataMovementType, DataSourceType, Resource, SchedulingType};

/// Builder for `Dag` to simplify test setup.
///
/// ```ignore
/// let dag = TestDag::new("d")
///     .vertex("a", 2)
///     .committed("b", 1, "/out/b")
///     .edge("a", "b")
///     .build();
/// ```
pub struct TestDag {
    builder: DagBuilder,
}

impl TestDag {
    pub fn new(name: &str) -> Self {
        Self {
            builder: DagBuilder::new(name),
        }
    }

    /// Vertex without committed outputs.
    pub fn vertex(mut self, name: &str, tasks: u32) -> Self {
        self.builder.add_vertex(plain_vertex(name, tasks));
        self
    }

    /// Vertex with one committed output `out` under `commit_dir`.
    pub fn committed(mut self, name: &str, tasks: u32, commit_dir: &str) -> Self {
        self.builder
            .add_vertex(committed_vertex(name, tasks, "out", commit_dir));
        self
    }

    pub fn with_vertex(mut self, vertex: Vertex) -> Self {
        self.builder.add_vertex(vertex);
        self
    }

    /// SEQUENTIAL scatter-gather edge.
    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.builder
            .add_edge(from, to, edge(DataMovementType::ScatterGather, SchedulingType::Sequential));
        self
    }

    pub fn edge_with(mut self, from: &str, to: &str, property: EdgeProperty) -> Self {
        self.builder.add_edge(from, to, property);
        self
    }

    /// A group whose members already declare output `out` to `commit_dir`;
    /// the shared output is declared on the group as well.
    pub fn committing_group(mut self, name: &str, members: &[&str], commit_dir: &str) -> Self {
        self.builder.create_vertex_group(name, members);
        self.builder
            .add_group_output(name, "out", file_output(commit_dir));
        self
    }

    pub fn group_edge(mut self, group: &str, to: &str) -> Self {
        self.builder.add_group_edge(
            group,
            to,
            edge(DataMovementType::ScatterGather, SchedulingType::Sequential),
            InputDescriptor::new("merged-input"),
        );
        self
    }

    pub fn build(self) -> Dag {
        self.builder
            .build()
            .expect("Failed to build valid DAG from builder")
    }
}

pub fn plain_vertex(name: &str, tasks: u32) -> Vertex {
    Vertex::new(
        name,
        ProcessorDescriptor::new("write-payload").with_payload(name.as_bytes()),
        Parallelism::Fixed(tasks),
        Resource::new(256, 1),
    )
}

pub fn committed_vertex(name: &str, tasks: u32, output: &str, commit_dir: &str) -> Vertex {
    plain_vertex(name, tasks).with_output(output, file_output(commit_dir))
}

pub fn file_output(commit_dir: impl AsRef<Path>) -> OutputDescriptor {
    OutputDescriptor::new("file-output").with_commit_dir(commit_dir)
}

pub fn edge(movement: DataMovementType, scheduling: SchedulingType) -> EdgeProperty {
    EdgeProperty::new(
        movement,
        DataSourceType::Persisted,
        scheduling,
        OutputDescriptor::new("edge-output"),
        InputDescriptor::new("edge-input"),
    )
}

/// Engine settings with short timeouts for tests.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_failed_attempts: 3,
        commit_poll_interval: Duration::from_millis(10),
        container_stop_timeout: Duration::from_millis(50),
        container_reuse: true,
        event_channel_capacity: 64,
    }
}

pub fn context(dag: Dag) -> DagContext {
    DagContext::new(dag, fast_config())
}
