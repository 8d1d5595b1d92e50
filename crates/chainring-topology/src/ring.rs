//! Closing chains into rings and opening rings back into chains.
//!
//! A chain is a path of nodes where each node's exit network is its
//! upstream neighbour's own network. The head has no exit network and the
//! tail's own network is dangling. Closing joins the head to the tail's
//! network; unwrapping detaches one node from its exit network so it becomes
//! the head and its former upstream the tail.
//!
//! New nodes arrive as a separate chain segment recorded in the boot list.
//! Once the nodes outside the segment form a ring, the whole segment is
//! grafted in between a target node and its upstream.

use std::collections::BTreeSet;

use chainring_index::{AdjIndex, NetworkId, NodeId};
use tracing::{debug, error, info};

use crate::client::ControllerClient;
use crate::engine::{Topology, CLOSE_WAIT, UNWRAP_WAIT};
use crate::error::Result;
use crate::state::ControllerState;

/// Result of [`Topology::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing to do.
    Unchanged,
    /// The boot chain was closed on itself.
    Wrapped,
    /// The boot chain was spliced into the existing ring.
    Grafted,
}

/// A node's place in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborIds {
    /// Network the node owns.
    pub src_net: NetworkId,
    /// Upstream network the node joined.
    pub exit_net: Option<NetworkId>,
    /// Downstream member of `src_net`.
    pub src_node: Option<NodeId>,
    /// Owner of `exit_net`.
    pub exit_node: Option<NodeId>,
}

/// Resolve the neighbours of `node`. `None` if the node owns no network.
pub fn get_neighbor_ids(adj: &AdjIndex, node: &NodeId) -> Option<NeighborIds> {
    let src_net = adj.src_net(node)?;
    let exit_net = adj.exit_net(node);
    Some(NeighborIds {
        src_node: adj.downstream(&src_net),
        exit_node: exit_net.as_ref().and_then(|n| adj.owner(n)),
        src_net,
        exit_net,
    })
}

/// Dangling networks other than `exclude`, flattened to
/// `[network, owner, network, owner, ...]`.
pub fn find_dangling_nets(adj: &AdjIndex, exclude: Option<&NetworkId>) -> Vec<String> {
    adj.dangling_nets()
        .into_iter()
        .filter(|(net, _)| Some(net) != exclude)
        .flat_map(|(net, owner)| [net.to_string(), owner.to_string()])
        .collect()
}

/// True if `nodes` are exactly one cycle of exit links.
pub fn is_ring(adj: &AdjIndex, nodes: &[NodeId]) -> bool {
    let members: BTreeSet<&NodeId> = nodes.iter().collect();
    let Some(start) = nodes.first() else {
        return false;
    };
    if members.len() < 2 {
        return false;
    }

    let mut seen = BTreeSet::new();
    let mut current = start.clone();
    loop {
        if !seen.insert(current.clone()) {
            return &current == start && seen.len() == members.len();
        }
        let upstream = adj.exit_net(&current).and_then(|net| adj.owner(&net));
        match upstream {
            Some(next) if members.contains(&next) => current = next,
            _ => return false,
        }
    }
}

/// Head (no exit network) and tail (dangling own network) of the chain
/// formed by `members`. `None` unless each is unique.
pub fn chain_ends(adj: &AdjIndex, members: &[NodeId]) -> Option<(NodeId, NodeId)> {
    let heads: Vec<&NodeId> = members
        .iter()
        .filter(|n| adj.src_net(n).is_some() && adj.exit_net(n).is_none())
        .collect();
    let tails: Vec<&NodeId> = members
        .iter()
        .filter(|n| adj.src_net(n).is_some_and(|net| adj.downstream(&net).is_none()))
        .collect();
    match (heads.as_slice(), tails.as_slice()) {
        ([head], [tail]) => Some(((*head).clone(), (*tail).clone())),
        _ => None,
    }
}

/// Nodes from `head` downstream until the chain ends or loops.
pub fn chain_order(adj: &AdjIndex, head: &NodeId) -> Vec<NodeId> {
    let mut order = vec![head.clone()];
    let mut current = head.clone();
    while let Some(next) = adj.src_net(&current).and_then(|net| adj.downstream(&net)) {
        if order.contains(&next) {
            break;
        }
        order.push(next.clone());
        current = next;
    }
    order
}

/// The node to detach when opening or grafting into a ring: the first node
/// (in ID order) outside `boot_list` that has an exit network.
pub fn get_target_node_id(adj: &AdjIndex, node_list: &[NodeId], boot_list: &[NodeId]) -> Option<NodeId> {
    let sorted: BTreeSet<&NodeId> = node_list.iter().collect();
    sorted
        .into_iter()
        .find(|n| !boot_list.contains(n) && adj.exit_net(n).is_some())
        .cloned()
}

impl<C: ControllerClient> Topology<C> {
    /// Close the boot chain.
    ///
    /// Wraps it on itself when it is the whole population and at least
    /// `min_nodes` long; grafts it into the ring formed by the other nodes
    /// otherwise. Makes no controller calls when neither applies.
    pub async fn close(
        &self,
        state: &mut ControllerState,
        node_list: &[NodeId],
        boot_list: &[NodeId],
    ) -> Result<CloseOutcome> {
        let nodes: BTreeSet<&NodeId> = node_list.iter().collect();
        let boot: BTreeSet<&NodeId> = boot_list.iter().collect();

        if nodes == boot && nodes.len() >= self.config().min_nodes {
            return self.wrap(state, boot_list).await;
        }

        if nodes.len() > boot.len() && !boot.is_empty() {
            let rest: Vec<NodeId> = node_list
                .iter()
                .filter(|n| !boot.contains(n))
                .cloned()
                .collect();
            if is_ring(&state.adj, &rest) {
                return self.graft(state, node_list, boot_list).await;
            }
        }

        debug!(
            "Chain left open: {} nodes, {} booting",
            nodes.len(),
            boot.len()
        );
        Ok(CloseOutcome::Unchanged)
    }

    async fn wrap(&self, state: &mut ControllerState, boot_list: &[NodeId]) -> Result<CloseOutcome> {
        let Some((head, tail)) = chain_ends(&state.adj, boot_list) else {
            error!("Cannot wrap: boot list {:?} is not a single chain", boot_list);
            return Ok(CloseOutcome::Unchanged);
        };
        let (Some(head_src), Some(tail_src)) = (state.adj.src_net(&head), state.adj.src_net(&tail)) else {
            error!("Cannot wrap: chain ends {} and {} own no network", head, tail);
            return Ok(CloseOutcome::Unchanged);
        };
        for node in boot_list {
            state.wait.insert(node, CLOSE_WAIT);
        }

        // drop memberships the head holds outside the chain
        let strays: Vec<NetworkId> = state
            .net
            .networks()
            .map(|n| n.id.clone())
            .filter(|net| net != &head_src && state.net.member(net, &head).is_some())
            .collect();
        for net in strays {
            self.detach(state, &net, &head).await?;
        }

        if self.connect(state, &head, &head_src, &tail_src, &tail).await? {
            info!("Wrapped {} nodes into a ring ({} -> {})", boot_list.len(), head, tail);
            Ok(CloseOutcome::Wrapped)
        } else {
            Ok(CloseOutcome::Unchanged)
        }
    }

    async fn graft(
        &self,
        state: &mut ControllerState,
        node_list: &[NodeId],
        boot_list: &[NodeId],
    ) -> Result<CloseOutcome> {
        let Some((head, tail)) = chain_ends(&state.adj, boot_list) else {
            error!("Cannot graft: boot list {:?} is not a single chain", boot_list);
            return Ok(CloseOutcome::Unchanged);
        };
        let Some(target) = get_target_node_id(&state.adj, node_list, boot_list) else {
            error!("Cannot graft: no ring node to splice at");
            return Ok(CloseOutcome::Unchanged);
        };
        let Some(ids) = get_neighbor_ids(&state.adj, &target) else {
            error!("Cannot graft at {}: not in the chain", target);
            return Ok(CloseOutcome::Unchanged);
        };
        let (Some(target_exit), Some(upstream)) = (ids.exit_net, ids.exit_node) else {
            error!("Cannot graft at {}: no upstream", target);
            return Ok(CloseOutcome::Unchanged);
        };
        let (Some(head_src), Some(tail_src)) = (state.adj.src_net(&head), state.adj.src_net(&tail)) else {
            error!("Cannot graft: segment ends {} and {} own no network", head, tail);
            return Ok(CloseOutcome::Unchanged);
        };

        for node in [&target, &upstream, &head, &tail] {
            state.wait.insert(node, CLOSE_WAIT);
        }

        self.detach(state, &target_exit, &target).await?;
        if !self.connect(state, &target, &ids.src_net, &tail_src, &tail).await? {
            return Ok(CloseOutcome::Unchanged);
        }
        if !self.connect(state, &head, &head_src, &target_exit, &upstream).await? {
            return Ok(CloseOutcome::Unchanged);
        }
        info!(
            "Grafted {} nodes between {} and {}",
            boot_list.len(),
            upstream,
            target
        );
        Ok(CloseOutcome::Grafted)
    }

    /// Open a ring that shrank below `min_nodes` back into a chain.
    ///
    /// Returns the chain order from the new head to the new tail, or `None`
    /// when the ring is left alone.
    ///
    /// Only the target's exit membership is removed. A ring has no dangling
    /// network, so afterwards the upstream node's network is the single
    /// dangling one and the target has nothing it could be relinked to
    /// except that same network. The opened chain stays open until new nodes
    /// are bootstrapped onto its tail.
    pub async fn unwrap_ring(
        &self,
        state: &mut ControllerState,
        node_list: &[NodeId],
        boot_list: &[NodeId],
    ) -> Result<Option<Vec<NodeId>>> {
        if !boot_list.is_empty()
            || node_list.len() >= self.config().min_nodes
            || !is_ring(&state.adj, node_list)
        {
            return Ok(None);
        }
        let Some(target) = get_target_node_id(&state.adj, node_list, boot_list) else {
            return Ok(None);
        };
        let Some(ids) = get_neighbor_ids(&state.adj, &target) else {
            error!("Cannot unwrap at {}: not in the chain", target);
            return Ok(None);
        };
        let (Some(exit_net), Some(upstream)) = (ids.exit_net, ids.exit_node) else {
            error!("Cannot unwrap at {}: no upstream", target);
            return Ok(None);
        };

        state.wait.insert(&target, UNWRAP_WAIT);
        state.wait.insert(&upstream, UNWRAP_WAIT);
        self.detach(state, &exit_net, &target).await?;

        let order = chain_order(&state.adj, &target);
        info!(
            "Unwrapped {} nodes: {} is now the head, {} the tail",
            order.len(),
            target,
            upstream
        );
        Ok(Some(order))
    }
}
