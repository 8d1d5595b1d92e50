//! Controller-observed records and the network index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{is_network_id, NetworkId, NodeId, NETWORK_ID_LEN, NODE_ID_LEN};
use crate::index::PrefixIndex;

/// Key of a membership record: network ID followed by node ID.
pub fn member_key(net: &NetworkId, node: &NodeId) -> String {
    format!("{}{}", net, node)
}

/// An address range handed out by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpPool {
    pub ip_range_start: String,
    pub ip_range_end: String,
}

/// A managed route pushed to network members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub target: String,
    #[serde(default)]
    pub via: Option<String>,
}

/// Network-level record as returned by `controller/network/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub id: NetworkId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ip_assignment_pools: Vec<IpPool>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub rules: Vec<Value>,
    /// Everything else the controller reports, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NetworkRecord {
    /// The directly attached subnet (first route without a gateway).
    pub fn subnet(&self) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.via.is_none())
            .map(|r| r.target.as_str())
    }

    /// First address of the first assignment pool.
    pub fn pool_start(&self) -> Option<&str> {
        self.ip_assignment_pools
            .first()
            .map(|p| p.ip_range_start.as_str())
    }
}

/// Membership record as returned by `controller/network/{id}/member/{node}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRecord {
    /// Member node ID.
    pub id: NodeId,
    /// Network the membership belongs to.
    pub nwid: NetworkId,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub ip_assignments: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A NetIndex value. The variant always matches the shape of its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NetRecord {
    Network(NetworkRecord),
    Membership(MemberRecord),
}

/// Raw controller state: network records keyed by network ID and membership
/// records keyed by `network + node`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NetIndex {
    inner: PrefixIndex<NetRecord>,
}

impl NetIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a network record, replacing any previous one.
    pub fn put_network(&mut self, record: NetworkRecord) {
        let key = record.id.to_string();
        self.inner.put(key, NetRecord::Network(record));
    }

    /// Store a membership record, replacing any previous one.
    pub fn put_member(&mut self, record: MemberRecord) {
        let key = member_key(&record.nwid, &record.id);
        self.inner.put(key, NetRecord::Membership(record));
    }

    /// Raw access by key.
    pub fn get(&self, key: &str) -> Option<&NetRecord> {
        self.inner.get(key)
    }

    /// Remove a single key.
    pub fn delete(&mut self, key: &str) -> Option<NetRecord> {
        self.inner.delete(key)
    }

    /// Keys starting with `prefix`.
    pub fn prefix_keys(&self, prefix: &str) -> Vec<String> {
        self.inner.prefix_keys(prefix)
    }

    /// Values whose key starts with `prefix`.
    pub fn prefix_values(&self, prefix: &str) -> Vec<&NetRecord> {
        self.inner.prefix_values(prefix)
    }

    /// Network record for `net`.
    pub fn network(&self, net: &NetworkId) -> Option<&NetworkRecord> {
        match self.inner.get(net.as_str()) {
            Some(NetRecord::Network(n)) => Some(n),
            _ => None,
        }
    }

    /// Membership record for `node` in `net`.
    pub fn member(&self, net: &NetworkId, node: &NodeId) -> Option<&MemberRecord> {
        match self.inner.get(&member_key(net, node)) {
            Some(NetRecord::Membership(m)) => Some(m),
            _ => None,
        }
    }

    /// All membership records of `net`.
    pub fn members_of(&self, net: &NetworkId) -> Vec<&MemberRecord> {
        self.inner
            .iter_prefix(net.as_str())
            .filter(|(k, _)| k.len() == NETWORK_ID_LEN + NODE_ID_LEN)
            .filter_map(|(_, v)| match v {
                NetRecord::Membership(m) => Some(m),
                NetRecord::Network(_) => None,
            })
            .collect()
    }

    /// All network records, in ID order.
    pub fn networks(&self) -> impl Iterator<Item = &NetworkRecord> {
        self.inner.iter().filter_map(|(k, v)| match v {
            NetRecord::Network(n) if is_network_id(k) => Some(n),
            _ => None,
        })
    }

    /// Drop the network record and every membership under it.
    pub fn purge_network(&mut self, net: &NetworkId) -> usize {
        self.inner.delete_prefix(net.as_str())
    }

    /// Number of records of both kinds.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn network_json() -> Value {
        json!({
            "id": "7ac4235ec5d3d938",
            "nwid": "7ac4235ec5d3d938",
            "name": "quiet-heron",
            "ipAssignmentPools": [{"ipRangeStart": "172.16.0.1", "ipRangeEnd": "172.16.0.2"}],
            "routes": [{"target": "172.16.0.0/30", "via": null}],
            "revision": 3
        })
    }

    #[test]
    fn network_record_from_controller_json() {
        let record: NetworkRecord = serde_json::from_value(network_json()).unwrap();
        assert_eq!(record.id.as_str(), "7ac4235ec5d3d938");
        assert_eq!(record.subnet(), Some("172.16.0.0/30"));
        assert_eq!(record.pool_start(), Some("172.16.0.1"));
        assert_eq!(record.extra.get("revision"), Some(&json!(3)));
    }

    #[test]
    fn records_keyed_by_shape() {
        let mut index = NetIndex::new();
        let net: NetworkRecord = serde_json::from_value(network_json()).unwrap();
        let member: MemberRecord = serde_json::from_value(json!({
            "id": "02beefdead",
            "nwid": "7ac4235ec5d3d938",
            "authorized": true,
            "ipAssignments": ["172.16.0.1"]
        }))
        .unwrap();

        let net_id = net.id.clone();
        let node_id = member.id.clone();
        index.put_network(net);
        index.put_member(member);

        assert!(index.network(&net_id).is_some());
        assert!(index.member(&net_id, &node_id).unwrap().authorized);
        assert_eq!(index.members_of(&net_id).len(), 1);
        let members = index.members_of(&NetworkId::parse("7ac4235ec5d3d938").unwrap());
        assert_eq!(members[0].id, node_id);
        assert_eq!(index.networks().count(), 1);
        assert_eq!(index.prefix_keys(net_id.as_str()).len(), 2);

        assert_eq!(index.purge_network(&net_id), 2);
        assert!(index.is_empty());
    }
}
