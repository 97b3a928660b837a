// src/types.rs

//! Opaque identifiers and small value types shared by every module.
//!
//! Entities never hold references to each other; they hold these ids and
//! look the other side up in the collection that owns it.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Index of a vertex inside its [`Dag`](crate::dag::Dag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub u32);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vertex_{:02}", self.0)
    }
}

/// Index of a vertex group inside its DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group_{:02}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub vertex: VertexId,
    pub index: u32,
}

impl TaskId {
    pub fn new(vertex: VertexId, index: u32) -> Self {
        Self { vertex, index }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task_{:02}_{:06}", self.vertex.0, self.index)
    }
}

/// One execution try of a task. Attempt numbers start at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId {
    pub task: TaskId,
    pub number: u32,
}

impl AttemptId {
    pub fn new(task: TaskId, number: u32) -> Self {
        Self { task, number }
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt_{:02}_{:06}_{}",
            self.task.vertex.0, self.task.index, self.number
        )
    }
}

/// Identifier handed out by the resource allocator on grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "container_{:06}", self.0)
    }
}

/// Cluster node (host) a container lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resource capability of a container, or requirement of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct Resource {
    pub memory_mb: u64,
    pub vcores: u32,
}

impl Resource {
    pub fn new(memory_mb: u64, vcores: u32) -> Self {
        Self { memory_mb, vcores }
    }

    /// Whether a container with capacity `self` can host `required`.
    pub fn fits(&self, required: &Resource) -> bool {
        self.memory_mb >= required.memory_mb && self.vcores >= required.vcores
    }
}

impl Default for Resource {
    fn default() -> Self {
        Self {
            memory_mb: 1024,
            vcores: 1,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memory:{}MB, vcores:{}>", self.memory_mb, self.vcores)
    }
}

/// How data produced by source tasks is routed to destination tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataMovementType {
    /// Task i of the source feeds task i of the destination.
    OneToOne,
    /// Every source task partitions its output across all destination tasks.
    ScatterGather,
    /// Every destination task receives all of every source task's output.
    Broadcast,
}

/// Lifetime of the data an edge carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceType {
    /// Output survives the producing task (written to local disk or storage).
    Persisted,
    /// Output only lives as long as the producer runs.
    Ephemeral,
}

/// When the destination vertex may start relative to the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingType {
    /// Destination starts after the source completes.
    Sequential,
    /// Destination may run concurrently with the source.
    Concurrent,
}

impl FromStr for DataMovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "one_to_one" => Ok(DataMovementType::OneToOne),
            "scatter_gather" => Ok(DataMovementType::ScatterGather),
            "broadcast" => Ok(DataMovementType::Broadcast),
            other => Err(format!(
                "invalid data movement type: {other} (expected one_to_one, scatter_gather or broadcast)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_render_with_stable_padding() {
        let task = TaskId::new(VertexId(3), 12);
        assert_eq!(task.to_string(), "task_03_000012");
        assert_eq!(AttemptId::new(task, 2).to_string(), "attempt_03_000012_2");
        assert_eq!(ContainerId(41).to_string(), "container_000041");
    }

    #[test]
    fn resource_fit_requires_both_dimensions() {
        let cap = Resource::new(2048, 2);
        assert!(cap.fits(&Resource::new(2048, 1)));
        assert!(!cap.fits(&Resource::new(4096, 1)));
        assert!(!cap.fits(&Resource::new(512, 4)));
    }

    #[test]
    fn movement_type_parses_case_insensitively() {
        assert_eq!(
            "Scatter_Gather".parse::<DataMovementType>(),
            Ok(DataMovementType::ScatterGather)
        );
        assert!("shuffle".parse::<DataMovementType>().is_err());
    }
}
