//! Mutable controller state threaded through every topology operation.

use chainring_index::{AdjIndex, NetIndex};
use serde::Serialize;

use crate::wait_cache::WaitCache;

/// Everything the engine reads and writes between controller calls.
///
/// Owned by the service and lent to the engine as `&mut` for the duration
/// of one operation.
#[derive(Debug, Clone, Default)]
pub struct ControllerState {
    /// Raw controller records.
    pub net: NetIndex,
    /// Chain adjacency derived from `net`.
    pub adj: AdjIndex,
    /// Nodes whose last change is still settling.
    pub wait: WaitCache,
}

/// Serializable view of the indices, for status output.
#[derive(Debug, Serialize)]
pub struct StateSnapshot<'a> {
    pub networks: usize,
    pub nodes: usize,
    pub settling: usize,
    pub adjacency: &'a AdjIndex,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StateSnapshot<'_> {
        StateSnapshot {
            networks: self.adj.network_ids().len(),
            nodes: self.adj.node_ids().len(),
            settling: self.wait.len(),
            adjacency: &self.adj,
        }
    }
}
