// src/engine/client.rs

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::errors::{EngineError, Result};
use crate::types::TaskId;

use super::runtime::EventSender;
use super::status::DagStatus;
use super::EngineEvent;

/// Submission handle of a running DAG.
#[derive(Debug, Clone)]
pub struct DagClient {
    status_rx: watch::Receiver<DagStatus>,
    events: EventSender,
    abort: Arc<watch::Sender<Option<String>>>,
}

impl DagClient {
    pub(crate) fn new(
        status_rx: watch::Receiver<DagStatus>,
        events: EventSender,
        abort: Arc<watch::Sender<Option<String>>>,
    ) -> Self {
        Self {
            status_rx,
            events,
            abort,
        }
    }

    /// Latest status snapshot.
    pub fn status(&self) -> DagStatus {
        self.status_rx.borrow().clone()
    }

    /// Resolves with the final status once the DAG is in a terminal state.
    pub async fn wait_for_completion(&self) -> Result<DagStatus> {
        let mut rx = self.status_rx.clone();
        let status = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| EngineError::Aborted("dispatcher stopped before finishing".into()))?;
        Ok(status.clone())
    }

    /// Abort the DAG. Blocked commit requests are released right away;
    /// the dispatcher then kills every live attempt.
    pub async fn abort(&self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        if self.status_rx.borrow().state.is_terminal() {
            debug!(%reason, "abort after DAG finished; ignoring");
            return Ok(());
        }
        info!(%reason, "aborting DAG");
        self.abort.send_replace(Some(reason.clone()));
        self.events.send(EngineEvent::DagAborted { reason }).await
    }

    /// Ask for a speculative attempt of a running task. The engine ignores
    /// the request when the task already finished, has spent its failure
    /// budget, runs more than one attempt or holds a commit token.
    pub async fn request_speculation(&self, task: TaskId) -> Result<()> {
        debug!(%task, "speculation requested");
        self.events
            .send(EngineEvent::SpeculationRequested { task })
            .await
    }
}
