//! Announce and cfg messages exchanged with member nodes.
//!
//! Announce: a bare 10-hex-character node ID, no envelope.
//!
//! Cfg: `{"node_id": "<10-hex>", "networks": ["<16-hex>", ...]}` with
//! exactly those two keys.

use chainring_index::{AdjIndex, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;

/// Validate an announce message, returning the announced node ID.
pub fn valid_announce_msg(msg: &str) -> Result<NodeId, MessageError> {
    NodeId::parse(msg).map_err(MessageError::Announce)
}

/// Network assignment for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfgMsg {
    pub node_id: NodeId,
    pub networks: Vec<String>,
}

impl CfgMsg {
    /// Wire form.
    pub fn to_json(&self) -> String {
        // two plain string fields, serialization cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Validate a serialized cfg message.
pub fn valid_cfg_msg(msg: &str) -> Result<CfgMsg, MessageError> {
    if !msg.contains("node_id") {
        return Err(MessageError::MissingNodeId);
    }
    let value: Value =
        serde_json::from_str(msg).map_err(|e| MessageError::NotAnObject(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(MessageError::NotAnObject(msg.to_string()));
    };

    let mut keys: Vec<String> = obj.keys().cloned().collect();
    keys.sort();
    if keys != ["networks", "node_id"] {
        return Err(MessageError::UnexpectedKeys(keys));
    }

    let node_id = match obj.get("node_id") {
        Some(Value::String(s)) => NodeId::parse(s).map_err(MessageError::NodeId)?,
        _ => return Err(MessageError::MissingNodeId),
    };

    let networks = obj
        .get("networks")
        .and_then(Value::as_array)
        .ok_or(MessageError::Networks)?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or(MessageError::Networks))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CfgMsg { node_id, networks })
}

/// Build the cfg message for `node` from its adjacency entry.
pub fn make_cfg_msg(adj: &AdjIndex, node: &NodeId) -> Option<CfgMsg> {
    adj.get(node.as_str()).map(|entry| CfgMsg {
        node_id: node.clone(),
        networks: entry.peers.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainring_index::Adjacency;

    #[test]
    fn announce_examples() {
        assert_eq!(valid_announce_msg("deadbeef00").unwrap().as_str(), "deadbeef00");
        assert!(valid_announce_msg("deadbeef0").is_err());
        assert!(valid_announce_msg("deadbeeh00").is_err());
        assert!(valid_announce_msg("").is_err());
    }

    #[test]
    fn cfg_valid() {
        let msg = r#"{"node_id":"02beefdead","networks":["7ac4235ec5d3d938"]}"#;
        let cfg = valid_cfg_msg(msg).unwrap();
        assert_eq!(cfg.node_id.as_str(), "02beefdead");
        assert_eq!(cfg.networks, vec!["7ac4235ec5d3d938"]);
    }

    #[test]
    fn cfg_extra_key_rejected() {
        let msg = r#"{"node_id":"02beefdead","networks":["7ac4235ec5d3d938"],"net0_id":"7ac4235ec5d3d938"}"#;
        assert!(matches!(valid_cfg_msg(msg), Err(MessageError::UnexpectedKeys(_))));
    }

    #[test]
    fn cfg_rejections() {
        assert_eq!(valid_cfg_msg(r#"{"networks":[]}"#), Err(MessageError::MissingNodeId));
        assert!(matches!(valid_cfg_msg("node_id"), Err(MessageError::NotAnObject(_))));
        assert!(matches!(valid_cfg_msg(r#"["node_id"]"#), Err(MessageError::NotAnObject(_))));
        assert!(matches!(
            valid_cfg_msg(r#"{"node_id":"02beefdea","networks":[]}"#),
            Err(MessageError::NodeId(_))
        ));
        assert!(matches!(
            valid_cfg_msg(r#"{"node_id":"02beefdead","networks":"7ac4235ec5d3d938"}"#),
            Err(MessageError::Networks)
        ));
    }

    #[test]
    fn make_cfg_from_adjacency() {
        let mut adj = AdjIndex::new();
        adj.put(
            "02beefdead",
            Adjacency::new(vec!["7ac4235ec5d3d938".into()], vec![false, true]),
        );
        let node = NodeId::parse("02beefdead").unwrap();

        let cfg = make_cfg_msg(&adj, &node).unwrap();
        assert_eq!(
            cfg.to_json(),
            r#"{"node_id":"02beefdead","networks":["7ac4235ec5d3d938"]}"#
        );
        assert!(valid_cfg_msg(&cfg.to_json()).is_ok());

        let stranger = NodeId::parse("03beefdead").unwrap();
        assert!(make_cfg_msg(&adj, &stranger).is_none());
    }
}
