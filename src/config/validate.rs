// src/config/validate.rs

//! Checks on the raw TOML model that the DAG builder cannot see: numeric
//! bounds, section-level consistency and group output propagation
//! conflicts. Graph-level rules (names, membership, cycles) are left to
//! `DagBuilder::build`.

use crate::config::model::RawConfigFile;
use crate::errors::{EngineError, Result};

pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_vertices(cfg)?;
    validate_engine_section(cfg)?;
    validate_vertices(cfg)?;
    validate_group_outputs(cfg)?;
    validate_edges(cfg)?;
    Ok(())
}

fn config_err(msg: impl Into<String>) -> EngineError {
    EngineError::Config(msg.into())
}

fn ensure_has_vertices(cfg: &RawConfigFile) -> Result<()> {
    if cfg.dag.name.trim().is_empty() {
        return Err(config_err("[dag].name must not be empty"));
    }
    if cfg.vertex.is_empty() {
        return Err(config_err(
            "config must contain at least one [vertex.<name>] section",
        ));
    }
    Ok(())
}

fn validate_engine_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.engine.max_failed_attempts == Some(0) {
        return Err(config_err("[engine].max_failed_attempts must be >= 1 (got 0)"));
    }
    if cfg.engine.commit_poll_interval_ms == Some(0) {
        return Err(config_err(
            "[engine].commit_poll_interval_ms must be >= 1 (got 0)",
        ));
    }
    if cfg.engine.event_channel_capacity == Some(0) {
        return Err(config_err(
            "[engine].event_channel_capacity must be >= 1 (got 0)",
        ));
    }
    if cfg.local.max_containers == 0 {
        return Err(config_err("[local].max_containers must be >= 1 (got 0)"));
    }
    Ok(())
}

fn validate_vertices(cfg: &RawConfigFile) -> Result<()> {
    for (name, v) in &cfg.vertex {
        if v.processor.trim().is_empty() {
            return Err(config_err(format!("vertex '{name}' has an empty processor")));
        }
        if v.parallelism == Some(0) {
            return Err(config_err(format!(
                "vertex '{name}' has parallelism 0; omit it to defer"
            )));
        }
        if v.memory_mb == 0 || v.vcores == 0 {
            return Err(config_err(format!(
                "vertex '{name}' must request memory_mb >= 1 and vcores >= 1"
            )));
        }
    }
    Ok(())
}

/// A group output is copied into every member; a member that already
/// declares an output of the same name must declare exactly the same one.
fn validate_group_outputs(cfg: &RawConfigFile) -> Result<()> {
    for (group, g) in &cfg.group {
        for member in &g.members {
            let Some(v) = cfg.vertex.get(member) else {
                continue;
            };
            for (out_name, out) in &g.output {
                if let Some(existing) = v.output.get(out_name) {
                    if existing != out {
                        return Err(config_err(format!(
                            "vertex '{member}' declares output '{out_name}' differently from its group '{group}'"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn validate_edges(cfg: &RawConfigFile) -> Result<()> {
    for e in &cfg.edge {
        let from_group = cfg.group.contains_key(&e.from);
        if from_group && cfg.vertex.contains_key(&e.from) {
            return Err(config_err(format!(
                "'{}' names both a vertex and a group",
                e.from
            )));
        }
        if e.merged_input.is_some() && !from_group {
            return Err(config_err(format!(
                "edge {} -> {}: merged_input is only valid on edges from a group",
                e.from, e.to
            )));
        }
    }
    Ok(())
}
