//! In-process network controller.
//!
//! Behaves like the real controller API closely enough to drive the engine
//! without one: controller-scoped network IDs, member upserts, idempotent
//! deletes, merge-on-configure. Every call is logged so tests can assert on
//! exactly what the engine asked for. Also used for dry runs of the daemon.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chainring_index::{MemberRecord, NetworkId, NetworkRecord, NodeId};
use serde_json::{json, Value};

use crate::client::{
    members_path, new_network_path, random_network_name, ControllerClient, ObjectRef,
    NETWORKS_PATH, PEERS_PATH, STATUS_PATH,
};
use crate::error::ClientError;

#[derive(Debug, Default)]
struct Inner {
    next_net: u32,
    networks: BTreeMap<NetworkId, Value>,
    members: BTreeMap<(NetworkId, NodeId), Value>,
    online: BTreeSet<NodeId>,
    calls: Vec<String>,
    fail_skip: usize,
    fail_next: usize,
}

impl Inner {
    fn record(&mut self, call: String, mutating: bool) -> Result<(), ClientError> {
        self.calls.push(call.clone());
        if mutating && self.fail_next > 0 {
            if self.fail_skip > 0 {
                self.fail_skip -= 1;
                return Ok(());
            }
            self.fail_next -= 1;
            return Err(ClientError::Transport(format!("injected failure: {}", call)));
        }
        Ok(())
    }
}

fn merge(target: &mut Value, fragment: Value) {
    if let (Value::Object(obj), Value::Object(frag)) = (target, fragment) {
        for (k, v) in frag {
            obj.insert(k, v);
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))
}

/// An in-memory controller.
#[derive(Debug)]
pub struct MemoryController {
    id: NodeId,
    inner: Mutex<Inner>,
}

impl MemoryController {
    /// Create an empty controller with node ID `id`.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the set of online member nodes.
    pub fn set_online(&self, nodes: &[NodeId]) {
        self.lock().online = nodes.iter().cloned().collect();
    }

    /// Bring one node online.
    pub fn go_online(&self, node: &NodeId) {
        self.lock().online.insert(node.clone());
    }

    /// Take one node offline.
    pub fn go_offline(&self, node: &NodeId) {
        self.lock().online.remove(node);
    }

    /// Fail the next `n` mutating calls with a transport error.
    pub fn fail_next(&self, n: usize) {
        self.fail_after(0, n);
    }

    /// Let `skip` mutating calls through, then fail the `n` after them.
    pub fn fail_after(&self, skip: usize, n: usize) {
        let mut inner = self.lock();
        inner.fail_skip = skip;
        inner.fail_next = n;
    }

    /// Every call made so far, as `METHOD path`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls that change controller state.
    pub fn mutation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| !c.starts_with("GET"))
            .count()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// IDs of all networks.
    pub fn network_ids(&self) -> Vec<NetworkId> {
        self.lock().networks.keys().cloned().collect()
    }

    /// Member IDs of `net`.
    pub fn member_ids(&self, net: &NetworkId) -> Vec<NodeId> {
        self.lock()
            .members
            .keys()
            .filter(|(n, _)| n == net)
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// Insert a raw membership, bypassing the API (for seeding stale state).
    pub fn insert_member(&self, net: &NetworkId, node: &NodeId, data: Value) {
        self.lock().members.insert((net.clone(), node.clone()), data);
    }
}

#[async_trait]
impl ControllerClient for MemoryController {
    async fn create_network(&self, ctlr: &NodeId) -> Result<NetworkRecord, ClientError> {
        let mut inner = self.lock();
        inner.record(format!("POST {}", new_network_path(ctlr)), true)?;
        inner.next_net += 1;
        let id = NetworkId::parse(&format!("{}{:06x}", ctlr, inner.next_net))
            .map_err(|e| ClientError::Decode(e.to_string()))?;
        let data = json!({
            "id": id.as_str(),
            "nwid": id.as_str(),
            "name": random_network_name(),
            "private": true,
            "ipAssignmentPools": [],
            "routes": [],
            "rules": [],
        });
        inner.networks.insert(id, data.clone());
        decode(data)
    }

    async fn create_member(&self, net: &NetworkId, node: &NodeId) -> Result<MemberRecord, ClientError> {
        let target = ObjectRef::Member(net.clone(), node.clone());
        let mut inner = self.lock();
        inner.record(format!("POST {}", target.path()), true)?;
        if !inner.networks.contains_key(net) {
            return Err(ClientError::NotFound(ObjectRef::Network(net.clone()).path()));
        }
        let data = inner
            .members
            .entry((net.clone(), node.clone()))
            .or_insert_with(|| {
                json!({
                    "id": node.as_str(),
                    "address": node.as_str(),
                    "nwid": net.as_str(),
                    "authorized": false,
                    "ipAssignments": [],
                })
            })
            .clone();
        decode(data)
    }

    async fn configure_object(&self, target: &ObjectRef, fragment: Value) -> Result<Value, ClientError> {
        let mut inner = self.lock();
        inner.record(format!("POST {}", target.path()), true)?;
        let slot = match target {
            ObjectRef::Network(net) => inner.networks.get_mut(net),
            ObjectRef::Member(net, node) => inner.members.get_mut(&(net.clone(), node.clone())),
        };
        let Some(slot) = slot else {
            return Err(ClientError::NotFound(target.path()));
        };
        merge(slot, fragment);
        Ok(slot.clone())
    }

    async fn delete_object(&self, target: &ObjectRef) -> Result<(), ClientError> {
        let mut inner = self.lock();
        inner.record(format!("DELETE {}", target.path()), true)?;
        match target {
            ObjectRef::Network(net) => {
                inner.networks.remove(net);
                inner.members.retain(|(n, _), _| n != net);
            }
            ObjectRef::Member(net, node) => {
                inner.members.remove(&(net.clone(), node.clone()));
            }
        }
        Ok(())
    }

    async fn get_object_data(&self, target: &ObjectRef) -> Result<Value, ClientError> {
        let mut inner = self.lock();
        inner.record(format!("GET {}", target.path()), false)?;
        let data = match target {
            ObjectRef::Network(net) => inner.networks.get(net),
            ObjectRef::Member(net, node) => inner.members.get(&(net.clone(), node.clone())),
        };
        data.cloned().ok_or_else(|| ClientError::NotFound(target.path()))
    }

    async fn get_object_ids(&self, net: Option<&NetworkId>) -> Result<Vec<String>, ClientError> {
        let mut inner = self.lock();
        match net {
            None => {
                inner.record(format!("GET {}", NETWORKS_PATH), false)?;
                Ok(inner.networks.keys().map(|n| n.to_string()).collect())
            }
            Some(net) => {
                inner.record(format!("GET {}", members_path(net)), false)?;
                if !inner.networks.contains_key(net) {
                    return Err(ClientError::NotFound(members_path(net)));
                }
                Ok(inner
                    .members
                    .keys()
                    .filter(|(n, _)| n == net)
                    .map(|(_, node)| node.to_string())
                    .collect())
            }
        }
    }

    async fn get_peer_ids(&self) -> Result<Vec<NodeId>, ClientError> {
        let mut inner = self.lock();
        inner.record(format!("GET {}", PEERS_PATH), false)?;
        Ok(inner.online.iter().cloned().collect())
    }

    async fn controller_id(&self) -> Result<NodeId, ClientError> {
        let mut inner = self.lock();
        inner.record(format!("GET {}", STATUS_PATH), false)?;
        Ok(self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctlr() -> MemoryController {
        MemoryController::new(NodeId::parse("c0ffee0000").unwrap())
    }

    #[tokio::test]
    async fn network_ids_are_controller_scoped() {
        let c = ctlr();
        let id = c.controller_id().await.unwrap();
        let net = c.create_network(&id).await.unwrap();
        assert!(net.id.as_str().starts_with("c0ffee0000"));
        assert_eq!(c.get_object_ids(None).await.unwrap(), vec![net.id.to_string()]);
    }

    #[tokio::test]
    async fn member_upsert_and_idempotent_delete() {
        let c = ctlr();
        let id = c.controller_id().await.unwrap();
        let net = c.create_network(&id).await.unwrap().id;
        let node = NodeId::parse("02beefdead").unwrap();

        c.create_member(&net, &node).await.unwrap();
        let target = ObjectRef::Member(net.clone(), node.clone());
        c.configure_object(&target, json!({"authorized": true, "ipAssignments": ["172.16.0.1"]}))
            .await
            .unwrap();
        let again = c.create_member(&net, &node).await.unwrap();
        assert!(again.authorized);

        c.delete_object(&target).await.unwrap();
        c.delete_object(&target).await.unwrap();
        assert!(c.member_ids(&net).is_empty());

        c.delete_object(&ObjectRef::Network(net.clone())).await.unwrap();
        assert!(matches!(
            c.get_object_data(&ObjectRef::Network(net)).await,
            Err(ClientError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn injected_failures_only_hit_mutations() {
        let c = ctlr();
        let id = c.controller_id().await.unwrap();
        c.fail_next(1);
        assert!(c.get_object_ids(None).await.is_ok());
        assert!(matches!(c.create_network(&id).await, Err(ClientError::Transport(_))));
        assert!(c.create_network(&id).await.is_ok());
        assert_eq!(c.mutation_count(), 2);
    }

    #[tokio::test]
    async fn delayed_failure_skips_earlier_mutations() {
        let c = ctlr();
        let id = c.controller_id().await.unwrap();
        c.fail_after(2, 1);
        assert!(c.create_network(&id).await.is_ok());
        assert!(c.get_object_ids(None).await.is_ok());
        assert!(c.create_network(&id).await.is_ok());
        assert!(matches!(c.create_network(&id).await, Err(ClientError::Transport(_))));
        assert!(c.create_network(&id).await.is_ok());
        assert_eq!(c.network_ids().len(), 3);
    }
}
