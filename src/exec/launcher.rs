// src/exec/launcher.rs

//! In-process worker launcher: one Tokio task per attempt.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::engine::LaunchRequest;
use crate::exec::attempt_runner::{AttemptEnv, run_attempt};
use crate::exec::backend::{BoxFuture, WorkerLauncher};
use crate::exec::processor::ProcessorRegistry;
use crate::errors::Result;
use crate::types::AttemptId;

/// Handle of a running attempt task.
///
/// - `cancel` asks the runner to drop the attempt (a kill).
/// - `handle` is the Tokio task running it.
struct ActiveAttempt {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

pub struct LocalLauncher {
    env: AttemptEnv,
    registry: Arc<ProcessorRegistry>,
    active: HashMap<AttemptId, ActiveAttempt>,
}

impl std::fmt::Debug for LocalLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLauncher")
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl LocalLauncher {
    pub fn new(env: AttemptEnv, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            env,
            registry,
            active: HashMap::new(),
        }
    }
}

impl WorkerLauncher for LocalLauncher {
    fn launch(&mut self, request: LaunchRequest) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.active.retain(|_, a| !a.handle.is_finished());

            let class = &request.processor.class_name;
            let processor = self
                .registry
                .get(class)
                .ok_or_else(|| anyhow!("no processor registered as '{class}'"))?;

            let attempt = request.attempt;
            let (cancel_tx, cancel_rx) = oneshot::channel();
            let env = self.env.clone();
            let handle = tokio::spawn(async move {
                run_attempt(request, processor, env, cancel_rx).await;
                debug!(%attempt, "attempt runner finished");
            });
            self.active.insert(
                attempt,
                ActiveAttempt {
                    cancel: Some(cancel_tx),
                    handle,
                },
            );
            Ok(())
        })
    }

    fn kill(&mut self, attempt: AttemptId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let Some(mut active) = self.active.remove(&attempt) else {
                debug!(%attempt, "kill for attempt that is not running here");
                return Ok(());
            };
            info!(%attempt, "killing attempt");
            if let Some(cancel) = active.cancel.take() {
                if cancel.send(()).is_err() {
                    debug!(%attempt, "attempt already finished while killing");
                }
            }
            Ok(())
        })
    }
}
