//! Chain maintenance: bootstrap, connect, offline handling and state refresh.
//!
//! Every operation takes the service-owned [`ControllerState`] by `&mut`,
//! talks to the controller through a [`ControllerClient`] and updates the
//! indices as controller calls succeed. A failed call aborts the operation
//! with the indices reflecting exactly the calls that went through; the next
//! refresh and orphan cleanup reconcile the rest.
//!
//! Missing or inconsistent topology data is not an error: it is logged and
//! the operation reports `Ok(false)`.

use std::net::Ipv4Addr;
use std::time::Duration;

use chainring_index::{member_key, MemberRecord, NetIndex, NetworkId, NetworkRecord, NodeId};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::client::{ControllerClient, ObjectRef};
use crate::error::{ClientError, Result, TopologyError};
use crate::pool::{Subnet, SubnetPool};
use crate::ring::{find_dangling_nets, get_neighbor_ids, NeighborIds};
use crate::rules::default_rules;
use crate::state::ControllerState;

/// Neighbours of a node that went offline settle for this long.
pub const OFFLINE_WAIT: Duration = Duration::from_secs(90);
/// Nodes touched by closing a chain settle for this long.
pub const CLOSE_WAIT: Duration = Duration::from_secs(120);
/// Nodes touched by unwrapping a ring settle for this long.
pub const UNWRAP_WAIT: Duration = Duration::from_secs(90);

/// Smallest population kept as a ring.
pub const DEFAULT_MIN_NODES: usize = 5;

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    /// Chains of at least this many nodes are closed into a ring, rings
    /// below it are unwrapped.
    pub min_nodes: usize,
    /// Address range chain subnets are carved from.
    pub pool: SubnetPool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            min_nodes: DEFAULT_MIN_NODES,
            pool: SubnetPool::default(),
        }
    }
}

/// The topology engine.
#[derive(Debug)]
pub struct Topology<C> {
    client: C,
    config: TopologyConfig,
}

impl<C: ControllerClient> Topology<C> {
    pub fn new(client: C, config: TopologyConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Add `node` to the overlay.
    ///
    /// Creates the node's own network and makes the node its gateway. Unless
    /// `is_exit`, the node also joins the single dangling network as its
    /// downstream member; routing through it is finished later by
    /// [`Topology::connect_pending`]. Returns `Ok(true)` immediately for a
    /// node that is already indexed.
    pub async fn bootstrap(
        &self,
        state: &mut ControllerState,
        node: &NodeId,
        ctlr: &NodeId,
        is_exit: bool,
    ) -> Result<bool> {
        if state.adj.contains(node.as_str()) {
            debug!("Node {} already bootstrapped", node);
            return Ok(true);
        }

        let (src_net, subnet) = self.create_chain_network(state, ctlr).await?;
        self.attach(state, &src_net, node, subnet.gateway()).await?;
        state.adj.link_owner(&src_net, node);
        info!("Bootstrapped node {} with network {}", node, src_net);

        if is_exit {
            return Ok(true);
        }

        let dangling = find_dangling_nets(&state.adj, Some(&src_net));
        let [net, owner] = dangling.as_slice() else {
            error!(
                "Cannot attach node {}: expected one dangling network, found {:?}",
                node, dangling
            );
            return Ok(false);
        };
        let Ok(exit_net) = NetworkId::parse(net) else {
            error!("Cannot attach node {}: bad dangling network {}", node, net);
            return Ok(false);
        };
        let Some(exit_subnet) = self.subnet_of(&state.net, &exit_net) else {
            error!("Cannot attach node {}: network {} has no subnet", node, exit_net);
            return Ok(false);
        };

        self.attach(state, &exit_net, node, exit_subnet.peer()).await?;
        if !state.adj.link_downstream(&exit_net, node, true) {
            error!("Cannot link node {} below {} ({})", node, exit_net, owner);
            return Ok(false);
        }
        info!("Node {} joined {} owned by {}", node, exit_net, owner);
        Ok(true)
    }

    /// Attach `node` (owner of `src_net`) to `exit_net` as its downstream
    /// member and route the exit network through `gateway`.
    ///
    /// Any other exit attachment the node has is detached first. Refuses
    /// when `exit_net` already has a different downstream member.
    pub async fn connect(
        &self,
        state: &mut ControllerState,
        node: &NodeId,
        src_net: &NetworkId,
        exit_net: &NetworkId,
        gateway: &NodeId,
    ) -> Result<bool> {
        let Some(subnet) = self.subnet_of(&state.net, exit_net) else {
            error!("Cannot connect {}: network {} has no subnet", node, exit_net);
            return Ok(false);
        };
        if let Some(other) = state.adj.downstream(exit_net).filter(|d| d != node) {
            error!(
                "Cannot connect {} to {}: downstream slot held by {}",
                node, exit_net, other
            );
            return Ok(false);
        }
        let gateway_ip = state
            .net
            .member(exit_net, gateway)
            .and_then(|m| m.ip_assignments.first().cloned())
            .unwrap_or_else(|| subnet.gateway().to_string());

        if let Some(stale) = state.adj.exit_net(node).filter(|n| n != exit_net) {
            debug!("Detaching {} from stale exit {}", node, stale);
            self.detach(state, &stale, node).await?;
        }

        self.attach(state, exit_net, node, subnet.peer()).await?;
        let routes = json!({
            "routes": [
                {"target": subnet.cidr(), "via": null},
                {"target": "0.0.0.0/0", "via": gateway_ip},
            ]
        });
        let data = self
            .client
            .configure_object(&ObjectRef::Network(exit_net.clone()), routes)
            .await?;
        let record: NetworkRecord = serde_json::from_value(data)?;
        state.net.put_network(record);

        if !state.adj.link_owner(src_net, node) || !state.adj.link_owner(exit_net, gateway) {
            warn!(
                "Ownership of {} or {} disagrees with the index",
                src_net, exit_net
            );
        }
        if !state.adj.link_downstream(exit_net, node, false) {
            error!("Cannot link node {} below {}", node, exit_net);
            return Ok(false);
        }
        state.adj.mark_configured(node);
        info!("Connected {} to {} via {} ({})", node, exit_net, gateway, gateway_ip);
        Ok(true)
    }

    /// Remove `node` from the chain and splice its neighbours together.
    ///
    /// `plan` holds the node's neighbours across retries. It is resolved from
    /// AdjIndex on the first attempt and reused afterwards, because a partial
    /// attempt may already have unlinked the node. The node leaves its exit
    /// network first, its downstream neighbour is relinked, and only then is
    /// the node's own network torn down. Every step tolerates having already
    /// happened, so a retry repeats the finished steps and goes on.
    pub async fn offline(
        &self,
        state: &mut ControllerState,
        node: &NodeId,
        plan: &mut Option<NeighborIds>,
    ) -> Result<bool> {
        if plan.is_none() {
            *plan = get_neighbor_ids(&state.adj, node);
        }
        let Some(ids) = plan.clone() else {
            error!("Cannot take {} offline: not in the chain", node);
            return Ok(false);
        };
        for neighbour in [&ids.src_node, &ids.exit_node].into_iter().flatten() {
            state.wait.insert(neighbour, OFFLINE_WAIT);
        }

        // frees the exit network's downstream slot for the relink
        if let Some(exit_net) = &ids.exit_net {
            self.detach(state, exit_net, node).await?;
        }

        match (&ids.src_node, &ids.exit_net, &ids.exit_node) {
            (Some(src_node), Some(exit_net), Some(exit_node)) if src_node != exit_node => {
                let Some(src_node_net) = state.adj.src_net(src_node) else {
                    error!("Cannot relink {}: it owns no network", src_node);
                    return Ok(false);
                };
                if !self
                    .connect(state, src_node, &src_node_net, exit_net, exit_node)
                    .await?
                {
                    return Ok(false);
                }
            }
            (Some(src_node), Some(_), Some(_)) => {
                info!("Node {} loses its only neighbour {}", src_node, node);
            }
            _ => info!("Node {} was a chain end, nothing to relink", node),
        }

        let own = ObjectRef::Member(ids.src_net.clone(), node.clone());
        match self.client.configure_object(&own, json!({"authorized": false})).await {
            Ok(_) | Err(ClientError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.client
            .delete_object(&ObjectRef::Network(ids.src_net.clone()))
            .await?;
        state.net.purge_network(&ids.src_net);
        state.adj.remove_network(&ids.src_net);
        state.adj.remove_node(node);
        info!("Node {} removed from the chain", node);
        Ok(true)
    }

    /// Rebuild NetIndex from the controller and merge authorized memberships
    /// into AdjIndex.
    ///
    /// The merge is additive: owners (members holding their network's first
    /// pool address) are linked first, then downstream members. Existing
    /// adjacency entries are never rewritten.
    pub async fn refresh_state(&self, state: &mut ControllerState) -> Result<()> {
        let mut fresh = NetIndex::new();

        for id in self.client.get_object_ids(None).await? {
            let Ok(net) = NetworkId::parse(&id) else {
                warn!("Ignoring malformed network id {:?}", id);
                continue;
            };
            let Some(data) = found(
                self.client
                    .get_object_data(&ObjectRef::Network(net.clone()))
                    .await,
            )?
            else {
                continue;
            };
            fresh.put_network(serde_json::from_value(data)?);

            let Some(members) = found(self.client.get_object_ids(Some(&net)).await)? else {
                continue;
            };
            for member in members {
                let Ok(node) = NodeId::parse(&member) else {
                    warn!("Ignoring malformed member id {:?} in {}", member, net);
                    continue;
                };
                let target = ObjectRef::Member(net.clone(), node);
                if let Some(data) = found(self.client.get_object_data(&target).await)? {
                    fresh.put_member(serde_json::from_value(data)?);
                }
            }
        }

        debug!("Refreshed {} controller records", fresh.len());
        state.net = fresh;
        merge_memberships(state);
        Ok(())
    }

    /// Finish every attachment still flagged as needing configuration.
    /// Returns how many nodes were connected.
    pub async fn connect_pending(&self, state: &mut ControllerState) -> Result<usize> {
        let mut connected = 0;
        for node in state.adj.node_ids() {
            if !state.adj.needs_config(&node) || state.wait.contains(&node) {
                continue;
            }
            let src = state.adj.src_net(&node);
            let exit = state.adj.exit_net(&node);
            let gateway = exit.as_ref().and_then(|e| state.adj.owner(e));
            let (Some(src), Some(exit), Some(gateway)) = (src, exit, gateway) else {
                warn!("Pending node {} has an incomplete attachment", node);
                continue;
            };
            if self.connect(state, &node, &src, &exit, &gateway).await? {
                connected += 1;
            }
        }
        Ok(connected)
    }

    /// Create a network owned by `ctlr` on a fresh `/30` with the chain
    /// rules, and index it.
    async fn create_chain_network(
        &self,
        state: &mut ControllerState,
        ctlr: &NodeId,
    ) -> Result<(NetworkId, Subnet)> {
        let used = state
            .net
            .networks()
            .flat_map(|n| n.routes.iter().filter(|r| r.via.is_none()))
            .map(|r| r.target.as_str());
        let subnet = self
            .config
            .pool
            .next_free(used)
            .ok_or(TopologyError::PoolExhausted)?;

        let created = self.client.create_network(ctlr).await?;
        let fragment = json!({
            "private": true,
            "v4AssignMode": {"zt": true},
            "ipAssignmentPools": [{
                "ipRangeStart": subnet.gateway().to_string(),
                "ipRangeEnd": subnet.peer().to_string(),
            }],
            "routes": [{"target": subnet.cidr(), "via": null}],
            "rules": default_rules(),
        });
        let data = self
            .client
            .configure_object(&ObjectRef::Network(created.id.clone()), fragment)
            .await?;
        let record: NetworkRecord = serde_json::from_value(data)?;
        debug!("Created network {} ({}) on {}", record.id, record.name, subnet.cidr());
        let id = record.id.clone();
        state.net.put_network(record);
        Ok((id, subnet))
    }

    /// Authorize `node` in `net` with address `ip`, and index the membership.
    pub(crate) async fn attach(
        &self,
        state: &mut ControllerState,
        net: &NetworkId,
        node: &NodeId,
        ip: Ipv4Addr,
    ) -> Result<()> {
        self.client.create_member(net, node).await?;
        let data = self
            .client
            .configure_object(
                &ObjectRef::Member(net.clone(), node.clone()),
                json!({"authorized": true, "ipAssignments": [ip.to_string()]}),
            )
            .await?;
        let record: MemberRecord = serde_json::from_value(data)?;
        state.net.put_member(record);
        Ok(())
    }

    /// Deauthorize and delete the membership of `node` in `net`, and drop the
    /// edge from both indices.
    pub(crate) async fn detach(
        &self,
        state: &mut ControllerState,
        net: &NetworkId,
        node: &NodeId,
    ) -> Result<()> {
        let target = ObjectRef::Member(net.clone(), node.clone());
        match self
            .client
            .configure_object(&target, json!({"authorized": false}))
            .await
        {
            Ok(_) | Err(ClientError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.client.delete_object(&target).await?;
        state.net.delete(&member_key(net, node));
        state.adj.unlink(net, node);
        debug!("Detached {} from {}", node, net);
        Ok(())
    }

    /// The `/30` a network routes directly.
    pub(crate) fn subnet_of(&self, net: &NetIndex, id: &NetworkId) -> Option<Subnet> {
        net.network(id)
            .and_then(NetworkRecord::subnet)
            .and_then(Subnet::from_cidr)
    }
}

/// Map a not-found answer to `None`.
fn found<T>(result: std::result::Result<T, ClientError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ClientError::NotFound(path)) => {
            debug!("{} vanished during refresh", path);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Merge authorized memberships from NetIndex into AdjIndex.
fn merge_memberships(state: &mut ControllerState) {
    let mut owners = Vec::new();
    let mut downstream = Vec::new();
    for network in state.net.networks() {
        let pool_start = network.pool_start();
        for member in state.net.members_of(&network.id) {
            if !member.authorized {
                continue;
            }
            let is_owner = pool_start.is_some_and(|start| member.ip_assignments.iter().any(|ip| ip == start));
            let edge = (network.id.clone(), member.id.clone());
            if is_owner {
                owners.push(edge);
            } else {
                downstream.push(edge);
            }
        }
    }

    for (net, node) in &owners {
        if !state.adj.link_owner(net, node) {
            debug!("Skipping owner edge {} -> {}", node, net);
        }
    }
    for (net, node) in &downstream {
        if state.adj.exit_net(node).as_ref() == Some(net) {
            continue;
        }
        if !state.adj.link_downstream(net, node, false) {
            debug!("Skipping downstream edge {} -> {}", node, net);
        }
    }
}
