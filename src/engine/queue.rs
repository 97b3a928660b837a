// src/engine/queue.rs

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::engine::placement::PlacementRequest;
use crate::types::AttemptId;

/// An attempt waiting for a container.
#[derive(Debug, Clone)]
pub struct ReadyEntry {
    pub request: PlacementRequest,
    /// A container was already requested from the allocator for it.
    pub requested: bool,
}

/// Attempts waiting for a container, served shallowest vertex first.
///
/// Ordering key is `(depth, attempt)`: vertices closer to the roots go
/// first, then by task index and attempt number.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: BTreeMap<(u32, AttemptId), ReadyEntry>,
    depth_of: HashMap<AttemptId, u32>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, depth: u32, request: PlacementRequest) {
        let attempt = request.attempt;
        debug!(%attempt, depth, "attempt queued for placement");
        self.depth_of.insert(attempt, depth);
        self.entries.insert(
            (depth, attempt),
            ReadyEntry {
                request,
                requested: false,
            },
        );
    }

    pub fn remove(&mut self, attempt: AttemptId) -> Option<ReadyEntry> {
        let depth = self.depth_of.remove(&attempt)?;
        self.entries.remove(&(depth, attempt))
    }

    pub fn contains(&self, attempt: AttemptId) -> bool {
        self.depth_of.contains_key(&attempt)
    }

    pub fn mark_requested(&mut self, attempt: AttemptId) {
        if let Some(depth) = self.depth_of.get(&attempt) {
            if let Some(entry) = self.entries.get_mut(&(*depth, attempt)) {
                entry.requested = true;
            }
        }
    }

    /// Clear the `requested` flag of up to `n` entries, lowest priority
    /// first. Returns how many were cleared.
    pub fn unmark_requested(&mut self, n: usize) -> usize {
        let mut cleared = 0;
        for entry in self.entries.values_mut().rev() {
            if cleared == n {
                break;
            }
            if entry.requested {
                entry.requested = false;
                cleared += 1;
            }
        }
        cleared
    }

    /// Entries in service order.
    pub fn iter(&self) -> impl Iterator<Item = &ReadyEntry> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.depth_of.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
