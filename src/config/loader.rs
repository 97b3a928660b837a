// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::model::{OutputConfig, RawConfigFile};
use crate::config::validate::validate_raw_config;
use crate::dag::{
    Dag, DagBuilder, EdgeProperty, InputDescriptor, OutputDescriptor, Parallelism,
    ProcessorDescriptor, Vertex,
};
use crate::engine::EngineConfig;
use crate::errors::Result;
use crate::types::{NodeId, Resource};

/// Settings of the local-mode runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub max_containers: usize,
}

/// A validated DAG definition with its engine and runner settings.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub dag: Dag,
    pub engine: EngineConfig,
    pub local: LocalConfig,
}

/// Load a DAG definition file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// the DAG.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: RawConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Load, validate and build a DAG definition file.
///
/// Relative `commit_dir`s are resolved against the directory holding the
/// file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<LoadedConfig> {
    let path = path.as_ref();
    let raw = load_from_path(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    build(raw, base)
}

/// Same as [`load_and_validate`] for an in-memory TOML document.
pub fn load_from_str(contents: &str, base_dir: &Path) -> Result<LoadedConfig> {
    let raw: RawConfigFile = toml::from_str(contents)?;
    build(raw, base_dir)
}

fn build(raw: RawConfigFile, base_dir: &Path) -> Result<LoadedConfig> {
    validate_raw_config(&raw)?;

    let mut b = DagBuilder::new(raw.dag.name.clone());

    for (name, v) in &raw.vertex {
        let mut processor = ProcessorDescriptor::new(&v.processor);
        if let Some(p) = &v.payload {
            processor = processor.with_payload(p.as_bytes());
        }
        let parallelism = v.parallelism.map_or(Parallelism::Deferred, Parallelism::Fixed);
        let mut vertex = Vertex::new(
            name.as_str(),
            processor,
            parallelism,
            Resource::new(v.memory_mb, v.vcores),
        );
        for (in_name, i) in &v.input {
            let mut desc = InputDescriptor::new(&i.class);
            if let Some(p) = &i.payload {
                desc = desc.with_payload(p.as_bytes());
            }
            vertex = vertex.with_input(in_name.as_str(), desc);
        }
        for (out_name, o) in &v.output {
            vertex = vertex.with_output(out_name.as_str(), output(o, base_dir));
        }
        // Group outputs are declared once on the group and inherited by
        // every member.
        for g in raw.group.values().filter(|g| g.members.contains(name)) {
            for (out_name, o) in &g.output {
                if !vertex.outputs.contains_key(out_name) {
                    vertex = vertex.with_output(out_name.as_str(), output(o, base_dir));
                }
            }
        }
        for node in &v.locations {
            vertex = vertex.with_location_hint(NodeId::new(node.as_str()));
        }
        b.add_vertex(vertex);
    }

    for (name, g) in &raw.group {
        let members: Vec<&str> = g.members.iter().map(String::as_str).collect();
        b.create_vertex_group(name.as_str(), &members);
        for (out_name, o) in &g.output {
            b.add_group_output(name, out_name.as_str(), output(o, base_dir));
        }
    }

    for e in &raw.edge {
        let property = EdgeProperty::new(
            e.movement,
            e.source,
            e.scheduling,
            OutputDescriptor::new(&e.output),
            InputDescriptor::new(&e.input),
        );
        if raw.group.contains_key(&e.from) {
            let merged = e.merged_input.as_deref().unwrap_or("merged-input");
            b.add_group_edge(e.from.as_str(), e.to.as_str(), property, InputDescriptor::new(merged));
        } else {
            b.add_edge(e.from.as_str(), e.to.as_str(), property);
        }
    }

    let dag = b.build()?;
    Ok(LoadedConfig {
        dag,
        engine: engine_config(&raw),
        local: LocalConfig {
            max_containers: raw.local.max_containers,
        },
    })
}

fn output(o: &OutputConfig, base_dir: &Path) -> OutputDescriptor {
    let mut desc = OutputDescriptor::new(&o.class);
    if let Some(p) = &o.payload {
        desc = desc.with_payload(p.as_bytes());
    }
    if let Some(dir) = &o.commit_dir {
        desc = desc.with_commit_dir(resolve(dir, base_dir));
    }
    desc
}

fn resolve(dir: &Path, base_dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        base_dir.join(dir)
    }
}

fn engine_config(raw: &RawConfigFile) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    let s = &raw.engine;
    if let Some(n) = s.max_failed_attempts {
        cfg.max_failed_attempts = n;
    }
    if let Some(ms) = s.commit_poll_interval_ms {
        cfg.commit_poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = s.container_stop_timeout_ms {
        cfg.container_stop_timeout = Duration::from_millis(ms);
    }
    if let Some(reuse) = s.container_reuse {
        cfg.container_reuse = reuse;
    }
    if let Some(cap) = s.event_channel_capacity {
        cfg.event_channel_capacity = cap;
    }
    cfg
}

/// Default DAG definition file in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("dag.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;

    const UNION: &str = r#"
        [engine]
        max_failed_attempts = 2
        container_reuse = false

        [local]
        max_containers = 8

        [dag]
        name = "union"

        [vertex.map1]
        processor = "write-payload"
        payload = "a"
        parallelism = 2

        [vertex.map2]
        processor = "write-payload"
        parallelism = 1

        [vertex.checker]
        processor = "write-payload"
        [vertex.checker.output.final]
        class = "file-output"
        commit_dir = "out/final"

        [group.union]
        members = ["map1", "map2"]
        [group.union.output.parts]
        class = "file-output"
        commit_dir = "out/parts"

        [[edge]]
        from = "union"
        to = "checker"
        merged_input = "concatenated-input"
    "#;

    #[test]
    fn group_outputs_propagate_to_members() {
        let cfg = load_from_str(UNION, Path::new("/base")).unwrap();
        let dag = &cfg.dag;
        for m in ["map1", "map2"] {
            let v = dag.vertex(dag.vertex_id(m).unwrap());
            let parts = &v.outputs["parts"];
            assert_eq!(parts.commit_dir.as_deref(), Some(Path::new("/base/out/parts")));
        }
        assert_eq!(dag.group_edges().len(), 1);
        assert!(dag.committing_group(dag.vertex_id("map1").unwrap()).is_some());
        assert_eq!(
            dag.vertex(dag.vertex_id("checker").unwrap()).parallelism,
            Parallelism::Deferred
        );
    }

    #[test]
    fn engine_and_local_sections_override_defaults() {
        let cfg = load_from_str(UNION, Path::new(".")).unwrap();
        assert_eq!(cfg.engine.max_failed_attempts, 2);
        assert!(!cfg.engine.container_reuse);
        assert_eq!(
            cfg.engine.commit_poll_interval,
            EngineConfig::default().commit_poll_interval
        );
        assert_eq!(cfg.local.max_containers, 8);
    }

    #[test]
    fn zero_parallelism_is_a_config_error() {
        let toml = r#"
            [dag]
            name = "d"
            [vertex.a]
            processor = "write-payload"
            parallelism = 0
        "#;
        assert!(matches!(
            load_from_str(toml, Path::new(".")),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn cycle_is_reported() {
        let toml = r#"
            [dag]
            name = "d"
            [vertex.a]
            processor = "p"
            [vertex.b]
            processor = "p"
            [[edge]]
            from = "a"
            to = "b"
            [[edge]]
            from = "b"
            to = "a"
        "#;
        assert!(matches!(
            load_from_str(toml, Path::new(".")),
            Err(EngineError::DagCycle(_))
        ));
    }

    #[test]
    fn merged_input_on_vertex_edge_is_rejected() {
        let toml = r#"
            [dag]
            name = "d"
            [vertex.a]
            processor = "p"
            [vertex.b]
            processor = "p"
            [[edge]]
            from = "a"
            to = "b"
            merged_input = "x"
        "#;
        assert!(matches!(
            load_from_str(toml, Path::new(".")),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let toml = r#"
            [dag]
            name = "d"
            colour = "blue"
        "#;
        assert!(matches!(
            load_from_str(toml, Path::new(".")),
            Err(EngineError::Toml(_))
        ));
    }
}
