// src/lib.rs

pub mod attempt;
pub mod cli;
pub mod commit;
pub mod config;
pub mod container;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod storage;
pub mod types;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{LoadedConfig, load_and_validate};
use crate::dag::{Dag, Parallelism};
use crate::engine::vertex::task_count;
use crate::engine::{
    DagContext, DagState, DagStatus, Dispatcher, EngineChannels, UpstreamParallelismResolver,
    submit,
};
use crate::errors::EngineError;
use crate::exec::{AttemptEnv, LocalAllocator, LocalLauncher, ProcessorRegistry};
use crate::storage::{LocalFsStorage, OutputStorage};
use crate::types::VertexId;

/// High-level entry point used by `main.rs`. Returns whether the DAG
/// succeeded (a dry run always does).
///
/// This wires together:
/// - config loading and the local-mode checks
/// - the local allocator, launcher and filesystem storage
/// - the dispatcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<bool> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading {:?}", args.config))?;
    let registry = ProcessorRegistry::with_builtins();
    check_processors(&cfg.dag, &registry)?;
    check_local_capacity(&cfg)?;

    if args.dry_run {
        print_plan(&cfg);
        return Ok(true);
    }

    let status = run_local(cfg, registry).await?;
    println!("{status}");
    Ok(status.state == DagState::Succeeded)
}

/// Run a loaded DAG in-process until it reaches a terminal state.
pub async fn run_local(cfg: LoadedConfig, registry: ProcessorRegistry) -> Result<DagStatus> {
    let LoadedConfig { dag, engine, local } = cfg;
    info!(dag = %dag.name(), max_containers = local.max_containers, "running DAG locally");

    let channels = EngineChannels::new(engine.event_channel_capacity);
    let storage: Arc<dyn OutputStorage> = Arc::new(LocalFsStorage);
    let allocator = LocalAllocator::spawn(channels.events(), local.max_containers);
    let env = AttemptEnv {
        events: channels.events(),
        commit: channels.commit_client(engine.commit_poll_interval),
        storage: Arc::clone(&storage),
    };
    let launcher = LocalLauncher::new(env, Arc::new(registry));

    let context = DagContext::new(dag, engine);
    let dispatcher = Dispatcher::new(context, channels, allocator, launcher, storage)?;
    let (client, handle) = submit(dispatcher);

    // Ctrl-C -> DAG abort.
    let ctrl_c = {
        let client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            if let Err(e) = client.abort("interrupted").await {
                debug!(error = %e, "abort after dispatcher stopped");
            }
        })
    };

    let status = handle.await.context("dispatcher task panicked")??;
    ctrl_c.abort();
    Ok(status)
}

fn check_processors(dag: &Dag, registry: &ProcessorRegistry) -> Result<()> {
    for v in dag.vertex_ids() {
        let vertex = dag.vertex(v);
        if !registry.contains(&vertex.processor.class_name) {
            return Err(EngineError::Config(format!(
                "vertex '{}' uses unknown processor '{}'",
                vertex.name, vertex.processor.class_name
            ))
            .into());
        }
    }
    Ok(())
}

/// Expected task count of every vertex, resolving deferred parallelism the
/// way the engine will.
fn planned_tasks(dag: &Dag) -> BTreeMap<VertexId, u32> {
    let mut order: Vec<VertexId> = dag.vertex_ids().collect();
    order.sort_by_key(|v| dag.depth(*v));
    let resolver = UpstreamParallelismResolver;
    let mut planned = BTreeMap::new();
    for v in order {
        let n = task_count(dag, v, &resolver, &planned).max(1);
        planned.insert(v, n);
    }
    planned
}

/// Attempts of a committing group hold their containers while waiting at
/// the group barrier; the pool must fit every task of the group at once.
fn check_local_capacity(cfg: &LoadedConfig) -> Result<()> {
    let planned = planned_tasks(&cfg.dag);
    for group in cfg.dag.groups().iter().filter(|g| g.has_committed_outputs()) {
        let needed: u32 = group
            .members
            .iter()
            .map(|m| planned.get(m).copied().unwrap_or(1))
            .sum();
        if needed as usize > cfg.local.max_containers {
            return Err(EngineError::Config(format!(
                "vertex group '{}' commits {} tasks together but [local].max_containers is {}",
                group.name, needed, cfg.local.max_containers
            ))
            .into());
        }
    }
    Ok(())
}

/// Dry-run output: vertices in scheduling order with their outputs and
/// upstreams, then groups and settings.
fn print_plan(cfg: &LoadedConfig) {
    let dag = &cfg.dag;
    let planned = planned_tasks(dag);
    println!("dagengine dry-run: {}", dag.name());
    println!(
        "  engine: max_failed_attempts={} container_reuse={} stop_timeout={:?}",
        cfg.engine.max_failed_attempts, cfg.engine.container_reuse, cfg.engine.container_stop_timeout
    );
    println!("  local: max_containers={}", cfg.local.max_containers);
    println!();

    let mut order: Vec<VertexId> = dag.vertex_ids().collect();
    order.sort_by_key(|v| (dag.depth(*v), *v));
    println!("vertices ({}):", order.len());
    for v in order {
        let vertex = dag.vertex(v);
        let parallelism = match vertex.parallelism {
            Parallelism::Fixed(n) => n.to_string(),
            Parallelism::Deferred => format!("deferred (~{})", planned[&v]),
        };
        println!("  - {} [depth {}]", vertex.name, dag.depth(v));
        println!("      processor: {}", vertex.processor.class_name);
        println!("      tasks: {parallelism}");
        println!("      resource: {}", vertex.resource);
        for (name, od) in &vertex.outputs {
            match &od.commit_dir {
                Some(dir) => println!("      output {name}: {} -> commit to {dir:?}", od.class_name),
                None => println!("      output {name}: {}", od.class_name),
            }
        }
        let upstream: Vec<&str> = dag
            .upstream_of(v)
            .iter()
            .map(|u| dag.vertex(u.vertex).name.as_str())
            .collect();
        if !upstream.is_empty() {
            println!("      after: {upstream:?}");
        }
    }

    if !dag.groups().is_empty() {
        println!();
        println!("groups ({}):", dag.groups().len());
        for g in dag.groups() {
            let members: Vec<&str> = g.members.iter().map(|m| dag.vertex(*m).name.as_str()).collect();
            println!(
                "  - {} {:?}{}",
                g.name,
                members,
                if g.has_committed_outputs() { " (commits together)" } else { "" }
            );
        }
    }

    debug!("dry-run complete (no execution)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use std::path::Path;

    const GROUP: &str = r#"
        [local]
        max_containers = 2

        [dag]
        name = "g"

        [vertex.a]
        processor = "write-payload"
        parallelism = 2

        [vertex.b]
        processor = "write-payload"
        parallelism = 1

        [group.ab]
        members = ["a", "b"]
        [group.ab.output.parts]
        class = "file-output"
        commit_dir = "out"
    "#;

    #[test]
    fn committing_group_larger_than_pool_is_rejected() {
        let cfg = load_from_str(GROUP, Path::new("/tmp")).unwrap();
        let err = check_local_capacity(&cfg).unwrap_err();
        assert!(err.to_string().contains("max_containers is 2"));
    }

    #[test]
    fn unknown_processor_is_rejected() {
        let cfg = load_from_str(
            "[dag]\nname = \"d\"\n[vertex.a]\nprocessor = \"mystery\"\n",
            Path::new("."),
        )
        .unwrap();
        let registry = ProcessorRegistry::with_builtins();
        assert!(check_processors(&cfg.dag, &registry).is_err());
    }
}
