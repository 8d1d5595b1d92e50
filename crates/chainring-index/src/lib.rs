//! Chainring State Index
//!
//! Two prefix-queryable key/value stores backing the Chainring controller.
//!
//! # Key Space
//!
//! Node IDs are 10 hex characters, network IDs are 16. Membership records are
//! keyed by the concatenation `network + node` (26 characters). The three key
//! shapes never collide, so a single ordered map can hold all of them and a
//! prefix query on a network ID returns the network and all of its members.
//!
//! # Indices
//!
//! - [`NetIndex`]: raw records observed at the network controller, replaced
//!   wholesale on every refresh.
//! - [`AdjIndex`]: the chain adjacency graph. Node entries list
//!   `[src_net, exit_net]`, network entries list `[owner, downstream]`.
//!
//! No invariants are enforced here; the topology engine owns them.

mod adjacency;
mod ids;
mod index;
mod records;

pub use adjacency::{AdjIndex, Adjacency};
pub use ids::{is_network_id, is_node_id, IdError, NetworkId, NodeId, NETWORK_ID_LEN, NODE_ID_LEN};
pub use index::PrefixIndex;
pub use records::{member_key, IpPool, MemberRecord, NetIndex, NetRecord, NetworkRecord, Route};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_shapes_never_collide() {
        let node = NodeId::parse("02beefdead").unwrap();
        let net = NetworkId::parse("7ac4235ec5d3d938").unwrap();
        let member = member_key(&net, &node);

        assert_eq!(node.as_str().len(), NODE_ID_LEN);
        assert_eq!(net.as_str().len(), NETWORK_ID_LEN);
        assert_eq!(member.len(), NODE_ID_LEN + NETWORK_ID_LEN);
        assert!(!is_node_id(&member));
        assert!(!is_network_id(&member));
    }
}
