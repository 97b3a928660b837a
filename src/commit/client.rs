// src/commit/client.rs

//! Attempt-side commit handle.

use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::commit::CommitOutcome;
use crate::engine::EventSender;
use crate::errors::{EngineError, Result};
use crate::types::AttemptId;

/// Handed to every running attempt. `request_commit` blocks until the
/// engine answers, the DAG is aborted or the engine goes away.
#[derive(Debug, Clone)]
pub struct CommitClient {
    events: EventSender,
    abort: watch::Receiver<Option<String>>,
    poll_interval: Duration,
}

impl CommitClient {
    pub fn new(
        events: EventSender,
        abort: watch::Receiver<Option<String>>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            events,
            abort,
            poll_interval,
        }
    }

    /// Ask permission to publish the output of `attempt`.
    ///
    /// `Ok(())` means the output was published and the attempt may report
    /// success. [`EngineError::CommitConflict`] means another attempt of the
    /// same task won; the caller discards its output and exits without
    /// treating it as a failure.
    pub async fn request_commit(&self, attempt: AttemptId) -> Result<()> {
        if let Some(reason) = self.aborted() {
            return Err(EngineError::Aborted(reason));
        }

        let (tx, mut rx) = oneshot::channel();
        self.events
            .request_commit(attempt, tx)
            .await
            .map_err(|_| EngineError::Aborted("engine is not running".into()))?;

        let mut abort = self.abort.clone();
        let mut tick = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                biased;

                reply = &mut rx => {
                    return match reply {
                        Ok(outcome) => into_result(attempt, outcome),
                        Err(_) => Err(EngineError::Aborted("engine stopped before answering".into())),
                    };
                }

                changed = abort.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::Aborted("engine stopped".into()));
                    }
                    let aborted = abort.borrow_and_update().clone();
                    if let Some(reason) = aborted {
                        return Err(EngineError::Aborted(reason));
                    }
                }

                _ = tick.tick() => {
                    if let Some(reason) = self.aborted() {
                        return Err(EngineError::Aborted(reason));
                    }
                    debug!(%attempt, "waiting for commit decision");
                }
            }
        }
    }

    fn aborted(&self) -> Option<String> {
        self.abort.borrow().clone()
    }
}

fn into_result(attempt: AttemptId, outcome: CommitOutcome) -> Result<()> {
    match outcome {
        CommitOutcome::Granted => Ok(()),
        CommitOutcome::Conflict { winner } => Err(EngineError::CommitConflict { attempt, winner }),
        CommitOutcome::Aborted(reason) => Err(EngineError::Aborted(reason)),
        CommitOutcome::Failed(reason) => Err(EngineError::ResourceExhausted {
            task: attempt.task,
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Inbound;
    use crate::types::{TaskId, VertexId};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn attempt(n: u32) -> AttemptId {
        AttemptId::new(TaskId::new(VertexId(0), 0), n)
    }

    fn client() -> (
        CommitClient,
        mpsc::Receiver<Inbound>,
        Arc<watch::Sender<Option<String>>>,
    ) {
        let (tx, rx) = mpsc::channel(8);
        let (abort_tx, abort_rx) = watch::channel(None);
        let client = CommitClient::new(EventSender::new(tx), abort_rx, Duration::from_millis(10));
        (client, rx, Arc::new(abort_tx))
    }

    #[tokio::test]
    async fn conflict_maps_to_commit_conflict() {
        let (client, mut rx, _abort) = client();
        let engine = tokio::spawn(async move {
            match rx.recv().await {
                Some(Inbound::CommitRequest { attempt: got, reply }) => {
                    assert_eq!(got, attempt(1));
                    let _ = reply.send(CommitOutcome::Conflict { winner: attempt(0) });
                }
                other => panic!("unexpected inbound: {other:?}"),
            }
        });

        let err = client.request_commit(attempt(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::CommitConflict { .. }));
        engine.await.unwrap();
    }

    #[tokio::test]
    async fn abort_unblocks_waiting_request() {
        let (client, mut rx, abort) = client();
        let waiter = tokio::spawn(async move { client.request_commit(attempt(0)).await });

        // Hold the reply sender so only the abort can unblock the waiter.
        let held = match rx.recv().await {
            Some(Inbound::CommitRequest { reply, .. }) => reply,
            Some(Inbound::Event(e)) => panic!("unexpected event: {e:?}"),
            None => panic!("channel closed"),
        };
        abort.send_replace(Some("user abort".into()));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::Aborted(ref r) if r == "user abort"));
        drop(held);
    }

    #[tokio::test]
    async fn aborted_dag_refuses_without_asking() {
        let (client, mut rx, abort) = client();
        abort.send_replace(Some("stopped".into()));
        assert!(matches!(
            client.request_commit(attempt(0)).await,
            Err(EngineError::Aborted(_))
        ));
        drop(client);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn failed_outcome_is_not_retryable_conflict() {
        let err = into_result(attempt(0), CommitOutcome::Failed("group broken".into())).unwrap_err();
        assert!(matches!(err, EngineError::ResourceExhausted { .. }));
        assert!(!err.is_retryable());
    }
}
