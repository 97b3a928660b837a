// src/exec/processor.rs

//! User logic run inside an attempt.
//!
//! A vertex names its processor by class name; the [`ProcessorRegistry`]
//! maps that name to an implementation. Two processors are built in:
//!
//! - `write-payload` writes the processor payload to the staging path of
//!   every committed output.
//! - `shell` runs the payload as a shell command. The staging path of each
//!   committed output is exported as `DAGENGINE_OUTPUT_<NAME>`.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::attempt::Counters;
use crate::engine::{Credentials, OutputTarget};
use crate::exec::backend::BoxFuture;
use crate::storage::OutputStorage;
use crate::types::AttemptId;

pub const WRITE_PAYLOAD: &str = "write-payload";
pub const SHELL: &str = "shell";

/// What a processor gets to see of its attempt.
#[derive(Debug, Clone)]
pub struct ProcessorContext {
    pub attempt: AttemptId,
    pub vertex: String,
    pub payload: Vec<u8>,
    /// Committed outputs and their staging paths.
    pub outputs: Vec<OutputTarget>,
    pub storage: Arc<dyn OutputStorage>,
    pub credentials: Arc<Credentials>,
}

pub trait Processor: Send + Sync + Debug {
    /// Run to completion and return the attempt's counters. Output goes to
    /// the staging paths in `ctx.outputs` only.
    fn run<'a>(&'a self, ctx: &'a ProcessorContext) -> BoxFuture<'a, Result<Counters>>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<String, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `write-payload` and `shell`.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register(WRITE_PAYLOAD, Arc::new(WritePayload));
        r.register(SHELL, Arc::new(Shell));
        r
    }

    pub fn register(&mut self, class_name: impl Into<String>, processor: Arc<dyn Processor>) {
        self.processors.insert(class_name.into(), processor);
    }

    pub fn get(&self, class_name: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(class_name).cloned()
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.processors.contains_key(class_name)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WritePayload;

impl Processor for WritePayload {
    fn run<'a>(&'a self, ctx: &'a ProcessorContext) -> BoxFuture<'a, Result<Counters>> {
        Box::pin(async move {
            let mut counters = Counters::new();
            for output in &ctx.outputs {
                let storage = Arc::clone(&ctx.storage);
                let path = output.staging.clone();
                let payload = ctx.payload.clone();
                tokio::task::spawn_blocking(move || storage.write(&path, &payload))
                    .await
                    .context("joining staging write")?
                    .with_context(|| format!("writing output '{}'", output.name))?;
                counters.incr(WRITE_PAYLOAD, "bytes_written", ctx.payload.len() as u64);
                counters.incr(WRITE_PAYLOAD, "outputs", 1);
            }
            debug!(attempt = %ctx.attempt, outputs = ctx.outputs.len(), "payload written");
            Ok(counters)
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Shell;

impl Processor for Shell {
    fn run<'a>(&'a self, ctx: &'a ProcessorContext) -> BoxFuture<'a, Result<Counters>> {
        Box::pin(run_shell(ctx))
    }
}

async fn run_shell(ctx: &ProcessorContext) -> Result<Counters> {
    let script = String::from_utf8(ctx.payload.clone())
        .with_context(|| format!("payload of vertex '{}' is not a UTF-8 command", ctx.vertex))?;
    if script.trim().is_empty() {
        bail!("vertex '{}' has an empty shell command", ctx.vertex);
    }

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(&script);
        c
    };
    cmd.env("DAGENGINE_ATTEMPT", ctx.attempt.to_string())
        .env("DAGENGINE_VERTEX", &ctx.vertex)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the attempt future on kill must take the child with it.
        .kill_on_drop(true);
    for output in &ctx.outputs {
        if let Some(parent) = output.staging.parent() {
            create_dir(parent).await?;
        }
        cmd.env(output_env_var(&output.name), &output.staging);
    }

    info!(attempt = %ctx.attempt, vertex = %ctx.vertex, cmd = %script, "starting shell processor");
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning shell for vertex '{}'", ctx.vertex))?;

    if let Some(stderr) = child.stderr.take() {
        let attempt = ctx.attempt;
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(%attempt, "stderr: {}", line);
            }
        });
    }

    let mut counters = Counters::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await.context("reading stdout")? {
            debug!(attempt = %ctx.attempt, "stdout: {}", line);
            counters.incr(SHELL, "stdout_lines", 1);
        }
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for shell of vertex '{}'", ctx.vertex))?;
    let code = status.code().unwrap_or(-1);
    info!(attempt = %ctx.attempt, exit_code = code, success = status.success(), "shell exited");
    if !status.success() {
        bail!("command exited with code {code}");
    }
    Ok(counters)
}

async fn create_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating staging dir {dir:?}"))
}

/// `part-a` -> `DAGENGINE_OUTPUT_PART_A`.
fn output_env_var(name: &str) -> String {
    let suffix: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("DAGENGINE_OUTPUT_{suffix}")
}
