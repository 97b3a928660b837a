// src/exec/local_allocator.rs

//! Bounded pool of in-process containers on a single node.

use std::collections::{BTreeSet, VecDeque};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{ContainerRequest, EngineEvent, EventSender};
use crate::errors::{EngineError, Result};
use crate::exec::backend::{BoxFuture, ResourceAllocator};
use crate::types::{ContainerId, NodeId};

pub const LOCAL_NODE: &str = "localhost";

#[derive(Debug)]
enum AllocatorMsg {
    Request(Vec<ContainerRequest>),
    Release(ContainerId),
}

/// Grants at most `max_containers` live containers at a time. Requests over
/// the limit wait until a container is released.
///
/// The pool runs in a background task fed through an unbounded channel, so
/// calls from the dispatcher never wait on it.
#[derive(Debug, Clone)]
pub struct LocalAllocator {
    tx: mpsc::UnboundedSender<AllocatorMsg>,
}

impl LocalAllocator {
    pub fn spawn(events: EventSender, max_containers: usize) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let max = max_containers.max(1);

        tokio::spawn(async move {
            info!(max_containers = max, "local allocator started");
            let mut pool = Pool::new(max);
            while let Some(msg) = rx.recv().await {
                let events_out = pool.handle(msg);
                for event in events_out {
                    if events.send(event).await.is_err() {
                        debug!("dispatcher gone; stopping local allocator");
                        return;
                    }
                }
            }
            info!("local allocator finished (channel closed)");
        });

        Self { tx }
    }

    fn send(&self, msg: AllocatorMsg) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| EngineError::Other(anyhow::anyhow!("local allocator stopped")))
    }
}

impl ResourceAllocator for LocalAllocator {
    fn request_containers(&mut self, requests: Vec<ContainerRequest>) -> BoxFuture<'_, Result<()>> {
        let result = self.send(AllocatorMsg::Request(requests));
        Box::pin(async move { result })
    }

    fn release_container(&mut self, container: ContainerId) -> BoxFuture<'_, Result<()>> {
        let result = self.send(AllocatorMsg::Release(container));
        Box::pin(async move { result })
    }
}

/// Bookkeeping of the background task; returns the events to report.
#[derive(Debug)]
struct Pool {
    max: usize,
    next_id: u64,
    live: BTreeSet<ContainerId>,
    pending: VecDeque<ContainerRequest>,
}

impl Pool {
    fn new(max: usize) -> Self {
        Self {
            max,
            next_id: 1,
            live: BTreeSet::new(),
            pending: VecDeque::new(),
        }
    }

    fn handle(&mut self, msg: AllocatorMsg) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        match msg {
            AllocatorMsg::Request(requests) => {
                debug!(count = requests.len(), "container requests queued");
                self.pending.extend(requests);
            }
            AllocatorMsg::Release(id) => {
                if self.live.remove(&id) {
                    debug!(container = %id, "container released");
                    out.push(EngineEvent::ContainerCompleted { container: id });
                } else {
                    warn!(container = %id, "release of unknown container");
                }
            }
        }
        self.grant(&mut out);
        out
    }

    fn grant(&mut self, out: &mut Vec<EngineEvent>) {
        while self.live.len() < self.max {
            let Some(request) = self.pending.pop_front() else {
                return;
            };
            let id = ContainerId(self.next_id);
            self.next_id += 1;
            self.live.insert(id);
            debug!(container = %id, attempt = %request.attempt, "container granted");
            out.push(EngineEvent::ContainerAllocated {
                container: id,
                node: NodeId::new(LOCAL_NODE),
                resource: request.resource,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptId, Resource, TaskId, VertexId};

    fn request(task: u32) -> ContainerRequest {
        ContainerRequest {
            attempt: AttemptId::new(TaskId::new(VertexId(0), task), 0),
            resource: Resource::new(256, 1),
            location_hints: Vec::new(),
        }
    }

    fn allocated(events: &[EngineEvent]) -> Vec<ContainerId> {
        events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::ContainerAllocated { container, .. } => Some(*container),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn grants_up_to_the_limit_then_on_release() {
        let mut pool = Pool::new(2);
        let first = pool.handle(AllocatorMsg::Request((0..3).map(request).collect()));
        assert_eq!(allocated(&first), vec![ContainerId(1), ContainerId(2)]);

        let after = pool.handle(AllocatorMsg::Release(ContainerId(1)));
        assert!(matches!(
            after[0],
            EngineEvent::ContainerCompleted { container: ContainerId(1) }
        ));
        assert_eq!(allocated(&after), vec![ContainerId(3)]);
    }

    #[test]
    fn unknown_release_is_ignored() {
        let mut pool = Pool::new(1);
        assert!(pool.handle(AllocatorMsg::Release(ContainerId(9))).is_empty());
    }

    #[tokio::test]
    async fn background_task_reports_grants() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut alloc = LocalAllocator::spawn(EventSender::new(tx), 1);
        alloc.request_containers(vec![request(0)]).await.unwrap();

        match rx.recv().await {
            Some(crate::engine::Inbound::Event(EngineEvent::ContainerAllocated { node, .. })) => {
                assert_eq!(node, NodeId::new(LOCAL_NODE));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
