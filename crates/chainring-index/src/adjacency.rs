//! Chain adjacency index.
//!
//! Every edge of the chain is stored twice: once under the node and once
//! under the network. Position matters on both sides:
//!
//! - node entry: `peers = [src_net, exit_net]`, the network it owns followed
//!   by the upstream network it joined (absent for a chain head)
//! - network entry: `peers = [owner, downstream]`, downstream absent while
//!   the network is dangling
//!
//! Removing the first peer of an entry removes the whole entry: a node
//! without its own network, or a network without its owner, has no place in
//! the chain and is left for orphan cleanup.

use serde::Serialize;

use crate::ids::{is_network_id, is_node_id, NetworkId, NodeId};
use crate::index::PrefixIndex;

/// Adjacency value: peer IDs plus per-attachment "needs configuration" flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Adjacency {
    pub peers: Vec<String>,
    pub needs: Vec<bool>,
}

impl Adjacency {
    /// Create an entry from peers and flags.
    pub fn new(peers: Vec<String>, needs: Vec<bool>) -> Self {
        Self { peers, needs }
    }

    fn set_need(&mut self, slot: usize, value: bool) {
        if self.needs.len() <= slot {
            self.needs.resize(slot + 1, true);
        }
        self.needs[slot] = value;
    }
}

/// The chain adjacency graph, keyed by node ID or network ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AdjIndex {
    inner: PrefixIndex<Adjacency>,
}

impl AdjIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: Adjacency) {
        self.inner.put(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Adjacency> {
        self.inner.get(key)
    }

    pub fn delete(&mut self, key: &str) -> Option<Adjacency> {
        self.inner.delete(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn prefix_keys(&self, prefix: &str) -> Vec<String> {
        self.inner.prefix_keys(prefix)
    }

    pub fn prefix_values(&self, prefix: &str) -> Vec<&Adjacency> {
        self.inner.prefix_values(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Adjacency)> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// IDs of all node entries, in key order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.inner
            .keys()
            .filter(|k| is_node_id(k))
            .filter_map(|k| NodeId::parse(k).ok())
            .collect()
    }

    /// IDs of all network entries, in key order.
    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.inner
            .keys()
            .filter(|k| is_network_id(k))
            .filter_map(|k| NetworkId::parse(k).ok())
            .collect()
    }

    fn peer<T: std::str::FromStr>(&self, key: &str, slot: usize) -> Option<T> {
        self.inner
            .get(key)
            .and_then(|a| a.peers.get(slot))
            .and_then(|p| p.parse().ok())
    }

    /// Network owned by `node`.
    pub fn src_net(&self, node: &NodeId) -> Option<NetworkId> {
        self.peer(node.as_str(), 0)
    }

    /// Upstream network `node` joined.
    pub fn exit_net(&self, node: &NodeId) -> Option<NetworkId> {
        self.peer(node.as_str(), 1)
    }

    /// Owner of `net`.
    pub fn owner(&self, net: &NetworkId) -> Option<NodeId> {
        self.peer(net.as_str(), 0)
    }

    /// Downstream member of `net`.
    pub fn downstream(&self, net: &NetworkId) -> Option<NodeId> {
        self.peer(net.as_str(), 1)
    }

    /// Networks with an owner but no downstream member, as `(network, owner)`.
    pub fn dangling_nets(&self) -> Vec<(NetworkId, NodeId)> {
        self.network_ids()
            .into_iter()
            .filter(|net| self.inner.get(net.as_str()).map(|a| a.peers.len()) == Some(1))
            .filter_map(|net| self.owner(&net).map(|owner| (net, owner)))
            .collect()
    }

    /// Record `node` as owner of `net`.
    ///
    /// Creates the node entry as `([net], [false, true])` and the network
    /// entry as `([node], [false])` where missing. Returns false (and changes
    /// nothing) if either side already names a different owner/network.
    pub fn link_owner(&mut self, net: &NetworkId, node: &NodeId) -> bool {
        let node_ok = self.src_net(node).map_or(true, |n| &n == net);
        let net_ok = self.owner(net).map_or(true, |o| &o == node);
        if !node_ok || !net_ok {
            return false;
        }
        if !self.contains(node.as_str()) {
            self.put(
                node.as_str(),
                Adjacency::new(vec![net.to_string()], vec![false, true]),
            );
        }
        if !self.contains(net.as_str()) {
            self.put(net.as_str(), Adjacency::new(vec![node.to_string()], vec![false]));
        }
        true
    }

    /// Record `node` as the downstream member of `net`.
    ///
    /// Both entries must already exist (via [`AdjIndex::link_owner`]) and the
    /// downstream slots must be free or already hold this edge. `needs` is
    /// written to the downstream slot on both sides.
    pub fn link_downstream(&mut self, net: &NetworkId, node: &NodeId, needs: bool) -> bool {
        let node_free = match self.inner.get(node.as_str()) {
            Some(a) => a.peers.len() == 1 || a.peers.get(1).map(String::as_str) == Some(net.as_str()),
            None => false,
        };
        let net_free = match self.inner.get(net.as_str()) {
            Some(a) => a.peers.len() == 1 || a.peers.get(1).map(String::as_str) == Some(node.as_str()),
            None => false,
        };
        if !node_free || !net_free || self.src_net(node).as_ref() == Some(net) {
            return false;
        }

        for (key, peer) in [(node.as_str(), net.as_str()), (net.as_str(), node.as_str())] {
            if let Some(entry) = self.inner.get_mut(key) {
                entry.peers.truncate(1);
                entry.peers.push(peer.to_string());
                entry.set_need(1, needs);
            }
        }
        true
    }

    /// Remove the edge between `net` and `node` from both sides.
    ///
    /// Removing a node's own network drops the node entry; removing a
    /// network's owner drops the network entry.
    pub fn unlink(&mut self, net: &NetworkId, node: &NodeId) {
        self.unlink_side(node.as_str(), net.as_str());
        self.unlink_side(net.as_str(), node.as_str());
    }

    fn unlink_side(&mut self, key: &str, peer: &str) {
        let Some(entry) = self.inner.get_mut(key) else {
            return;
        };
        match entry.peers.iter().position(|p| p == peer) {
            Some(0) => {
                self.inner.delete(key);
            }
            Some(slot) => {
                entry.peers.truncate(slot);
                entry.needs.truncate(slot);
                // a node that lost its exit attachment needs it configured again
                if is_node_id(key) {
                    entry.set_need(1, true);
                }
            }
            None => {}
        }
    }

    /// Remove `node` and every edge that mentions it.
    pub fn remove_node(&mut self, node: &NodeId) {
        let nets: Vec<NetworkId> = self
            .network_ids()
            .into_iter()
            .filter(|net| {
                self.inner
                    .get(net.as_str())
                    .is_some_and(|a| a.peers.iter().any(|p| p == node.as_str()))
            })
            .collect();
        for net in nets {
            self.unlink_side(net.as_str(), node.as_str());
        }
        self.inner.delete(node.as_str());
    }

    /// Remove `net` and every edge that mentions it.
    pub fn remove_network(&mut self, net: &NetworkId) {
        let nodes: Vec<NodeId> = self
            .node_ids()
            .into_iter()
            .filter(|node| {
                self.inner
                    .get(node.as_str())
                    .is_some_and(|a| a.peers.iter().any(|p| p == net.as_str()))
            })
            .collect();
        for node in nodes {
            self.unlink_side(node.as_str(), net.as_str());
        }
        self.inner.delete(net.as_str());
    }

    /// True if `node`'s exit attachment still needs controller configuration.
    pub fn needs_config(&self, node: &NodeId) -> bool {
        self.inner
            .get(node.as_str())
            .is_some_and(|a| a.peers.len() > 1 && a.needs.get(1).copied().unwrap_or(true))
    }

    /// Clear the configuration flags on `node` and on the networks it is
    /// attached to.
    pub fn mark_configured(&mut self, node: &NodeId) {
        let nets = match self.inner.get_mut(node.as_str()) {
            Some(entry) => {
                entry.needs = vec![false; entry.peers.len().max(1)];
                entry.peers.clone()
            }
            None => return,
        };
        for net in nets {
            if let Some(entry) = self.inner.get_mut(&net) {
                if let Some(slot) = entry.peers.iter().position(|p| p == node.as_str()) {
                    entry.set_need(slot, false);
                }
            }
        }
    }
}
