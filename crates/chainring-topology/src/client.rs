//! Network-controller client contract.
//!
//! Endpoint paths are relative to the controller's API root and must match
//! the controller exactly:
//!
//! | object          | path                                       |
//! |-----------------|--------------------------------------------|
//! | network list    | `controller/network`                       |
//! | network         | `controller/network/{network}`             |
//! | member list     | `controller/network/{network}/member`      |
//! | member          | `controller/network/{network}/member/{node}` |
//! | new network     | `controller/network/{controller}______`    |
//! | online peers    | `peer`                                     |
//! | controller node | `status`                                   |

use std::sync::Arc;

use async_trait::async_trait;
use chainring_index::{MemberRecord, NetworkId, NetworkRecord, NodeId};
use rand::seq::SliceRandom;
use serde_json::Value;

use crate::error::ClientError;

/// Path listing all networks.
pub const NETWORKS_PATH: &str = "controller/network";

/// Path listing online peers.
pub const PEERS_PATH: &str = "peer";

/// Path describing the controller node itself.
pub const STATUS_PATH: &str = "status";

/// Path listing the members of `net`.
pub fn members_path(net: &NetworkId) -> String {
    format!("{}/{}/member", NETWORKS_PATH, net)
}

/// Path that creates a network with a controller-generated ID.
pub fn new_network_path(ctlr: &NodeId) -> String {
    format!("{}/{}______", NETWORKS_PATH, ctlr)
}

/// A network or membership object at the controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Network(NetworkId),
    Member(NetworkId, NodeId),
}

impl ObjectRef {
    /// Endpoint path of the object.
    pub fn path(&self) -> String {
        match self {
            ObjectRef::Network(net) => format!("{}/{}", NETWORKS_PATH, net),
            ObjectRef::Member(net, node) => format!("{}/{}", members_path(net), node),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

const ADJECTIVES: &[&str] = &[
    "amber", "brisk", "calm", "dusky", "eager", "fuzzy", "gentle", "hollow", "icy", "jolly",
    "keen", "lucky", "misty", "noble", "olive", "plain", "quiet", "rapid", "sunny", "tidy",
];

const NOUNS: &[&str] = &[
    "badger", "crane", "dingo", "egret", "ferret", "gecko", "heron", "ibis", "jackal", "koala",
    "lemur", "marten", "newt", "otter", "panda", "quail", "raven", "stoat", "tapir", "vole",
];

/// A random human-readable network name such as `quiet-heron`.
pub fn random_network_name() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}-{}",
        ADJECTIVES.choose(&mut rng).copied().unwrap_or("plain"),
        NOUNS.choose(&mut rng).copied().unwrap_or("vole"),
    )
}

/// Operations the topology engine needs from the network controller.
///
/// Implementations must make mutations idempotent: deleting an absent object
/// succeeds and creating an existing member returns it.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Create a network owned by controller `ctlr` with a random name.
    async fn create_network(&self, ctlr: &NodeId) -> Result<NetworkRecord, ClientError>;

    /// Create (or fetch) the membership of `node` in `net`.
    async fn create_member(&self, net: &NetworkId, node: &NodeId) -> Result<MemberRecord, ClientError>;

    /// Merge a partial configuration into a network or membership.
    /// Returns the full object after the merge.
    async fn configure_object(&self, target: &ObjectRef, fragment: Value) -> Result<Value, ClientError>;

    /// Permanently remove a network (with its members) or a membership.
    async fn delete_object(&self, target: &ObjectRef) -> Result<(), ClientError>;

    /// Current state of a network or membership.
    async fn get_object_data(&self, target: &ObjectRef) -> Result<Value, ClientError>;

    /// Network IDs, or the member IDs of `net`.
    async fn get_object_ids(&self, net: Option<&NetworkId>) -> Result<Vec<String>, ClientError>;

    /// Member nodes currently online at the controller.
    async fn get_peer_ids(&self) -> Result<Vec<NodeId>, ClientError>;

    /// Node ID of the controller itself.
    async fn controller_id(&self) -> Result<NodeId, ClientError>;
}

#[async_trait]
impl<C: ControllerClient + ?Sized> ControllerClient for Arc<C> {
    async fn create_network(&self, ctlr: &NodeId) -> Result<NetworkRecord, ClientError> {
        (**self).create_network(ctlr).await
    }

    async fn create_member(&self, net: &NetworkId, node: &NodeId) -> Result<MemberRecord, ClientError> {
        (**self).create_member(net, node).await
    }

    async fn configure_object(&self, target: &ObjectRef, fragment: Value) -> Result<Value, ClientError> {
        (**self).configure_object(target, fragment).await
    }

    async fn delete_object(&self, target: &ObjectRef) -> Result<(), ClientError> {
        (**self).delete_object(target).await
    }

    async fn get_object_data(&self, target: &ObjectRef) -> Result<Value, ClientError> {
        (**self).get_object_data(target).await
    }

    async fn get_object_ids(&self, net: Option<&NetworkId>) -> Result<Vec<String>, ClientError> {
        (**self).get_object_ids(net).await
    }

    async fn get_peer_ids(&self) -> Result<Vec<NodeId>, ClientError> {
        (**self).get_peer_ids().await
    }

    async fn controller_id(&self) -> Result<NodeId, ClientError> {
        (**self).controller_id().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_paths() {
        let net = NetworkId::parse("7ac4235ec5d3d938").unwrap();
        let node = NodeId::parse("02beefdead").unwrap();

        assert_eq!(NETWORKS_PATH, "controller/network");
        assert_eq!(
            ObjectRef::Network(net.clone()).path(),
            "controller/network/7ac4235ec5d3d938"
        );
        assert_eq!(members_path(&net), "controller/network/7ac4235ec5d3d938/member");
        assert_eq!(
            ObjectRef::Member(net, node.clone()).path(),
            "controller/network/7ac4235ec5d3d938/member/02beefdead"
        );
        assert_eq!(new_network_path(&node), "controller/network/02beefdead______");
    }

    #[test]
    fn network_names_are_two_words() {
        let name = random_network_name();
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(NOUNS.contains(&parts[1]));
    }
}
