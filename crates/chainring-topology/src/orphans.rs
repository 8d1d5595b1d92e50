//! Reclaiming controller objects the chain no longer accounts for.

use std::collections::BTreeSet;

use chainring_index::{member_key, AdjIndex, NetIndex, NetworkId, NodeId};
use tracing::{debug, info};

use crate::client::{ControllerClient, ObjectRef};
use crate::engine::Topology;
use crate::error::Result;
use crate::state::ControllerState;

/// Objects found by [`find_orphans`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Orphans {
    /// Networks known to only one of the two indices.
    pub networks: Vec<NetworkId>,
    /// Memberships without a reciprocal adjacency edge.
    pub members: Vec<(NetworkId, NodeId)>,
}

impl Orphans {
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.members.is_empty()
    }
}

fn lists(adj: &AdjIndex, key: &str, peer: &str) -> bool {
    adj.get(key).is_some_and(|a| a.peers.iter().any(|p| p == peer))
}

/// Compare the indices and collect what should be deleted.
///
/// Orphan networks have a controller record but no adjacency entry, or an
/// adjacency entry but no controller record. Orphan memberships are
/// adjacency edges recorded on one side only, and authorized memberships
/// with no adjacency edge at all. Memberships of orphan networks are not
/// listed separately.
pub fn find_orphans(net: &NetIndex, adj: &AdjIndex) -> Orphans {
    let mut networks = BTreeSet::new();
    for record in net.networks() {
        if !adj.contains(record.id.as_str()) {
            networks.insert(record.id.clone());
        }
    }
    for id in adj.network_ids() {
        if net.network(&id).is_none() {
            networks.insert(id);
        }
    }

    let mut members = BTreeSet::new();
    for node in adj.node_ids() {
        for peer in adj.get(node.as_str()).map(|a| a.peers.clone()).unwrap_or_default() {
            if let Ok(id) = NetworkId::parse(&peer) {
                if !lists(adj, id.as_str(), node.as_str()) {
                    members.insert((id, node.clone()));
                }
            }
        }
    }
    for id in adj.network_ids() {
        for peer in adj.get(id.as_str()).map(|a| a.peers.clone()).unwrap_or_default() {
            if let Ok(node) = NodeId::parse(&peer) {
                if !lists(adj, node.as_str(), id.as_str()) {
                    members.insert((id.clone(), node));
                }
            }
        }
    }
    for record in net.networks() {
        for member in net.members_of(&record.id) {
            let linked = lists(adj, member.id.as_str(), record.id.as_str())
                || lists(adj, record.id.as_str(), member.id.as_str());
            if member.authorized && !linked {
                members.insert((record.id.clone(), member.id.clone()));
            }
        }
    }
    members.retain(|(id, _)| !networks.contains(id));

    Orphans {
        networks: networks.into_iter().collect(),
        members: members.into_iter().collect(),
    }
}

impl<C: ControllerClient> Topology<C> {
    /// Delete orphan networks and memberships at the controller and drop
    /// them from both indices. Anything involving a wait-cached node is left
    /// for a later pass. Returns the number of objects reclaimed.
    pub async fn cleanup_orphans(&self, state: &mut ControllerState) -> Result<usize> {
        let orphans = find_orphans(&state.net, &state.adj);
        if orphans.is_empty() {
            return Ok(0);
        }
        let mut reclaimed = 0;

        for net in orphans.networks {
            let mut involved: Vec<NodeId> = state.net.members_of(&net).iter().map(|m| m.id.clone()).collect();
            if let Some(entry) = state.adj.get(net.as_str()) {
                involved.extend(entry.peers.iter().filter_map(|p| NodeId::parse(p).ok()));
            }
            if involved.iter().any(|n| state.wait.contains(n)) {
                debug!("Orphan network {} has settling members, skipping", net);
                continue;
            }
            self.client()
                .delete_object(&ObjectRef::Network(net.clone()))
                .await?;
            state.net.purge_network(&net);
            state.adj.remove_network(&net);
            info!("Deleted orphan network {}", net);
            reclaimed += 1;
        }

        for (net, node) in orphans.members {
            if state.wait.contains(&node) {
                debug!("Orphan membership {} in {} is settling, skipping", node, net);
                continue;
            }
            self.client()
                .delete_object(&ObjectRef::Member(net.clone(), node.clone()))
                .await?;
            state.net.delete(&member_key(&net, &node));
            state.adj.unlink(&net, &node);
            info!("Deleted orphan membership {} in {}", node, net);
            reclaimed += 1;
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainring_index::{Adjacency, MemberRecord, NetworkRecord};
    use serde_json::json;

    fn network(id: &str) -> NetworkRecord {
        serde_json::from_value(json!({"id": id, "routes": [{"target": "172.16.0.0/30", "via": null}]}))
            .unwrap()
    }

    fn member(net: &str, node: &str, authorized: bool) -> MemberRecord {
        serde_json::from_value(json!({"id": node, "nwid": net, "authorized": authorized})).unwrap()
    }

    const NET: &str = "c0ffee0000000001";
    const STRAY: &str = "c0ffee0000000002";
    const A: &str = "aaaaaaaaaa";
    const B: &str = "bbbbbbbbbb";

    #[test]
    fn consistent_indices_have_no_orphans() {
        let mut net = NetIndex::new();
        let mut adj = AdjIndex::new();
        net.put_network(network(NET));
        net.put_member(member(NET, A, true));
        adj.link_owner(&NetworkId::parse(NET).unwrap(), &NodeId::parse(A).unwrap());
        assert!(find_orphans(&net, &adj).is_empty());
    }

    #[test]
    fn one_sided_networks_and_edges() {
        let mut net = NetIndex::new();
        let mut adj = AdjIndex::new();
        net.put_network(network(NET));
        net.put_network(network(STRAY));
        net.put_member(member(NET, A, true));
        net.put_member(member(NET, B, true));
        net.put_member(member(STRAY, B, true));
        adj.link_owner(&NetworkId::parse(NET).unwrap(), &NodeId::parse(A).unwrap());
        // the network side lists B but B's own entry does not list NET
        adj.put(NET, Adjacency::new(vec![A.into(), B.into()], vec![false, false]));

        let orphans = find_orphans(&net, &adj);
        assert_eq!(orphans.networks, vec![NetworkId::parse(STRAY).unwrap()]);
        assert_eq!(
            orphans.members,
            vec![(NetworkId::parse(NET).unwrap(), NodeId::parse(B).unwrap())]
        );
    }

    #[test]
    fn unauthorized_members_are_ignored() {
        let mut net = NetIndex::new();
        let mut adj = AdjIndex::new();
        net.put_network(network(NET));
        net.put_member(member(NET, A, true));
        net.put_member(member(NET, B, false));
        adj.link_owner(&NetworkId::parse(NET).unwrap(), &NodeId::parse(A).unwrap());
        assert!(find_orphans(&net, &adj).is_empty());
    }
}
