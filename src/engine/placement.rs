// src/engine/placement.rs

//! Pluggable choice of which container runs which attempt.

use std::fmt::Debug;

use crate::container::{Container, ContainerState};
use crate::types::{AttemptId, ContainerId, NodeId, Resource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest {
    pub attempt: AttemptId,
    pub resource: Resource,
    /// Preferred nodes, most preferred first.
    pub location_hints: Vec<NodeId>,
}

pub trait PlacementPolicy: Send + Debug {
    /// Pick one of `candidates` (all currently assignable) for `request`, or
    /// `None` to keep the attempt waiting.
    fn select(&self, request: &PlacementRequest, candidates: &[&Container]) -> Option<ContainerId>;
}

/// Default policy: the container must fit the request; among those prefer
/// hinted nodes (in hint order), then warm idle workers, then the smallest
/// container.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalityAwarePlacement;

impl PlacementPolicy for LocalityAwarePlacement {
    fn select(&self, request: &PlacementRequest, candidates: &[&Container]) -> Option<ContainerId> {
        candidates
            .iter()
            .filter(|c| c.capability().fits(&request.resource))
            .min_by_key(|c| {
                let locality = request
                    .location_hints
                    .iter()
                    .position(|n| n == c.node())
                    .unwrap_or(request.location_hints.len());
                let warm = if c.state() == ContainerState::Idle { 0 } else { 1 };
                (
                    locality,
                    warm,
                    c.capability().memory_mb,
                    c.capability().vcores,
                    c.id(),
                )
            })
            .map(|c| c.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TaskId, VertexId};

    fn container(id: u64, node: &str, mem: u64) -> Container {
        let mut c = Container::new(ContainerId(id), NodeId::new(node), Resource::new(mem, 1));
        c.on_allocated().unwrap();
        c
    }

    fn request(mem: u64, hints: &[&str]) -> PlacementRequest {
        PlacementRequest {
            attempt: AttemptId::new(TaskId::new(VertexId(0), 0), 0),
            resource: Resource::new(mem, 1),
            location_hints: hints.iter().map(|h| NodeId::new(*h)).collect(),
        }
    }

    #[test]
    fn prefers_hinted_node_over_smaller_container() {
        let a = container(1, "n1", 1024);
        let b = container(2, "n2", 4096);
        let chosen = LocalityAwarePlacement.select(&request(512, &["n2"]), &[&a, &b]);
        assert_eq!(chosen, Some(ContainerId(2)));
    }

    #[test]
    fn skips_containers_that_do_not_fit() {
        let a = container(1, "n1", 512);
        let b = container(2, "n1", 2048);
        let chosen = LocalityAwarePlacement.select(&request(1024, &[]), &[&a, &b]);
        assert_eq!(chosen, Some(ContainerId(2)));
        assert_eq!(LocalityAwarePlacement.select(&request(8192, &[]), &[&a, &b]), None);
    }

    #[test]
    fn prefers_idle_worker_over_fresh_allocation() {
        let fresh = container(1, "n1", 1024);
        let mut warm = container(2, "n1", 1024);
        let attempt = AttemptId::new(TaskId::new(VertexId(0), 9), 0);
        warm.assign(attempt).unwrap();
        warm.on_launched().unwrap();
        warm.on_attempt_succeeded(attempt).unwrap();

        let chosen = LocalityAwarePlacement.select(&request(512, &[]), &[&fresh, &warm]);
        assert_eq!(chosen, Some(ContainerId(2)));
    }
}
