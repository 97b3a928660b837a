// src/container/pool.rs

use std::collections::BTreeMap;

use crate::container::state::{Container, ContainerState};
use crate::errors::{EngineError, Result};
use crate::types::{ContainerId, NodeId};

/// Arena of every container granted during a DAG run, keyed by id.
///
/// Terminal containers are kept for diagnostics; they are never handed out
/// by [`ContainerPool::assignable`].
#[derive(Debug, Default)]
pub struct ContainerPool {
    containers: BTreeMap<ContainerId, Container>,
}

impl ContainerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, container: Container) -> Result<()> {
        let id = container.id();
        if let Some(existing) = self.containers.get(&id) {
            return Err(EngineError::invalid_state(id, existing.state(), "grant again"));
        }
        self.containers.insert(id, container);
        Ok(())
    }

    pub fn get(&self, id: ContainerId) -> Option<&Container> {
        self.containers.get(&id)
    }

    pub fn get_mut(&mut self, id: ContainerId) -> Option<&mut Container> {
        self.containers.get_mut(&id)
    }

    /// Containers that can take an attempt now, in id order.
    pub fn assignable(&self) -> impl Iterator<Item = &Container> {
        self.containers.values().filter(|c| c.is_assignable())
    }

    /// Ids of non-terminal containers living on `node`.
    pub fn on_node(&self, node: &NodeId) -> Vec<ContainerId> {
        self.containers
            .values()
            .filter(|c| c.node() == node && !c.state().is_terminal())
            .map(|c| c.id())
            .collect()
    }

    /// Ids of every non-terminal container.
    pub fn live(&self) -> Vec<ContainerId> {
        self.containers
            .values()
            .filter(|c| !c.state().is_terminal())
            .map(|c| c.id())
            .collect()
    }

    pub fn count_in(&self, state: ContainerState) -> usize {
        self.containers
            .values()
            .filter(|c| c.state() == state)
            .count()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Resource;

    fn granted(id: u64, node: &str) -> Container {
        let mut c = Container::new(ContainerId(id), NodeId::new(node), Resource::default());
        c.on_allocated().unwrap();
        c
    }

    #[test]
    fn duplicate_grant_is_rejected() {
        let mut pool = ContainerPool::new();
        pool.insert(granted(1, "a")).unwrap();
        assert!(pool.insert(granted(1, "a")).is_err());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn node_lookup_skips_terminal_containers() {
        let mut pool = ContainerPool::new();
        pool.insert(granted(1, "a")).unwrap();
        pool.insert(granted(2, "a")).unwrap();
        pool.insert(granted(3, "b")).unwrap();
        pool.get_mut(ContainerId(2)).unwrap().on_node_lost();

        assert_eq!(pool.on_node(&NodeId::new("a")), vec![ContainerId(1)]);
        assert_eq!(pool.assignable().count(), 2);
        assert_eq!(pool.count_in(ContainerState::Lost), 1);
        assert_eq!(pool.live().len(), 2);
    }
}
