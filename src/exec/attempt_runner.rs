// src/exec/attempt_runner.rs

//! Runs one attempt inside a local container.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::commit::CommitClient;
use crate::engine::{EngineEvent, EventSender, LaunchRequest};
use crate::errors::EngineError;
use crate::exec::processor::{Processor, ProcessorContext};
use crate::storage::OutputStorage;

/// Everything an attempt needs besides its launch request.
#[derive(Debug, Clone)]
pub struct AttemptEnv {
    pub events: EventSender,
    pub commit: CommitClient,
    pub storage: Arc<dyn OutputStorage>,
}

/// How the attempt body ended, when it was not cancelled.
enum Finish {
    Succeeded(crate::attempt::Counters),
    /// The DAG is going down; the engine kills the attempt itself.
    Aborted(String),
}

/// Run the processor, ask for commit when the vertex has committed outputs
/// and report the outcome.
///
/// - A commit conflict still reports success: the engine knows the attempt
///   lost the race and records it as a redundant success.
/// - If `cancel_rx` fires the attempt is dropped mid-flight and **no**
///   report is sent; the engine already considers it killed.
pub async fn run_attempt(
    request: LaunchRequest,
    processor: Arc<dyn Processor>,
    env: AttemptEnv,
    cancel_rx: oneshot::Receiver<()>,
) {
    let attempt = request.attempt;
    let events = env.events.clone();
    if let Err(err) = run_attempt_inner(request, processor, env, cancel_rx).await {
        let reason = format!("{err:#}");
        error!(%attempt, error = %reason, "attempt execution error");
        let _ = events
            .send(EngineEvent::AttemptFailed { attempt, reason })
            .await;
    }
}

async fn run_attempt_inner(
    request: LaunchRequest,
    processor: Arc<dyn Processor>,
    env: AttemptEnv,
    mut cancel_rx: oneshot::Receiver<()>,
) -> Result<()> {
    let attempt = request.attempt;
    if !request.reuse {
        env.events
            .send(EngineEvent::ContainerLaunched {
                container: request.container,
            })
            .await
            .with_context(|| format!("reporting launch of {}", request.container))?;
    }
    info!(%attempt, container = %request.container, vertex = %request.vertex, "attempt started");

    let ctx = ProcessorContext {
        attempt,
        vertex: request.vertex.clone(),
        payload: request.processor.payload.clone(),
        outputs: request.outputs.clone(),
        storage: Arc::clone(&env.storage),
        credentials: Arc::clone(&request.credentials),
    };

    let body = async {
        let counters = processor
            .run(&ctx)
            .await
            .with_context(|| format!("processor '{}' failed", request.processor.class_name))?;
        if !request.requires_commit {
            return Ok::<_, anyhow::Error>(Finish::Succeeded(counters));
        }
        match env.commit.request_commit(attempt).await {
            Ok(()) => Ok(Finish::Succeeded(counters)),
            Err(EngineError::CommitConflict { winner, .. }) => {
                info!(%attempt, %winner, "lost the commit race; output discarded");
                Ok(Finish::Succeeded(counters))
            }
            Err(EngineError::Aborted(reason)) => Ok(Finish::Aborted(reason)),
            Err(err) => Err(err).context("commit refused"),
        }
    };

    tokio::select! {
        finish = body => {
            match finish? {
                Finish::Succeeded(counters) => {
                    env.events
                        .send(EngineEvent::AttemptSucceeded { attempt, counters })
                        .await
                        .with_context(|| format!("reporting success of {attempt}"))?;
                }
                Finish::Aborted(reason) => {
                    info!(%attempt, %reason, "attempt stopped by DAG abort");
                }
            }
        }

        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => info!(%attempt, "attempt killed"),
                Err(_) => debug!(%attempt, "launcher went away; dropping attempt"),
            }
        }
    }

    Ok(())
}
