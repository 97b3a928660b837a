// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{DataMovementType, DataSourceType, SchedulingType};

/// A DAG definition file as read from TOML.
///
/// ```toml
/// [engine]
/// max_failed_attempts = 4
///
/// [local]
/// max_containers = 4
///
/// [dag]
/// name = "union"
///
/// [vertex.map1]
/// processor = "write-payload"
/// payload = "hello"
/// parallelism = 2
///
/// [vertex.map1.output.parts]
/// class = "file-output"
/// commit_dir = "out/parts"
///
/// [[edge]]
/// from = "map1"
/// to = "checker"
/// ```
///
/// Only `[dag]` and at least one vertex are required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub local: LocalSection,

    pub dag: DagSection,

    /// Keyed by vertex name.
    #[serde(default)]
    pub vertex: BTreeMap<String, VertexConfig>,

    /// Keyed by group name.
    #[serde(default)]
    pub group: BTreeMap<String, GroupConfig>,

    #[serde(default)]
    pub edge: Vec<EdgeConfig>,
}

/// `[engine]`: overrides of `EngineConfig` defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub max_failed_attempts: Option<u32>,
    pub commit_poll_interval_ms: Option<u64>,
    pub container_stop_timeout_ms: Option<u64>,
    pub container_reuse: Option<bool>,
    pub event_channel_capacity: Option<usize>,
}

/// `[local]`: settings of the local-mode runner.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalSection {
    #[serde(default = "default_max_containers")]
    pub max_containers: usize,
}

fn default_max_containers() -> usize {
    4
}

impl Default for LocalSection {
    fn default() -> Self {
        Self {
            max_containers: default_max_containers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DagSection {
    pub name: String,
}

/// `[vertex.<name>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VertexConfig {
    /// Class name looked up in the processor registry.
    pub processor: String,

    /// Opaque processor payload, stored as UTF-8 bytes.
    #[serde(default)]
    pub payload: Option<String>,

    /// Omitted means deferred: resolved when the vertex starts.
    #[serde(default)]
    pub parallelism: Option<u32>,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    #[serde(default = "default_vcores")]
    pub vcores: u32,

    /// Preferred node names, most preferred first.
    #[serde(default)]
    pub locations: Vec<String>,

    #[serde(default)]
    pub input: BTreeMap<String, DescriptorConfig>,

    #[serde(default)]
    pub output: BTreeMap<String, OutputConfig>,
}

fn default_memory_mb() -> u64 {
    1024
}

fn default_vcores() -> u32 {
    1
}

/// `[vertex.<v>.input.<name>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DescriptorConfig {
    pub class: String,
    #[serde(default)]
    pub payload: Option<String>,
}

/// `[vertex.<v>.output.<name>]` or `[group.<g>.output.<name>]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub class: String,
    #[serde(default)]
    pub payload: Option<String>,
    /// Present means the output requires commit. Relative paths are
    /// resolved against the directory of the config file.
    #[serde(default)]
    pub commit_dir: Option<PathBuf>,
}

/// `[group.<name>]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub members: Vec<String>,
    /// Shared outputs, propagated to every member.
    #[serde(default)]
    pub output: BTreeMap<String, OutputConfig>,
}

/// `[[edge]]`. `from` names a vertex or a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    pub from: String,
    pub to: String,

    #[serde(default = "default_movement")]
    pub movement: DataMovementType,

    #[serde(default = "default_source")]
    pub source: DataSourceType,

    #[serde(default = "default_scheduling")]
    pub scheduling: SchedulingType,

    #[serde(default = "default_output_class")]
    pub output: String,

    #[serde(default = "default_input_class")]
    pub input: String,

    /// Only meaningful when `from` is a group.
    #[serde(default)]
    pub merged_input: Option<String>,
}

fn default_movement() -> DataMovementType {
    DataMovementType::ScatterGather
}

fn default_source() -> DataSourceType {
    DataSourceType::Persisted
}

fn default_scheduling() -> SchedulingType {
    SchedulingType::Sequential
}

fn default_output_class() -> String {
    "default-output".to_string()
}

fn default_input_class() -> String {
    "default-input".to_string()
}
