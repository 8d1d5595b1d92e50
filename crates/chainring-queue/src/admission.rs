//! Node admission and cfg delivery protocol.
//!
//! A node becomes `registered` once the controller has both seen it online
//! (the `node` queue, fed by the refresh loop) and received its announce
//! message, in either order. Registered nodes are placed in the chain by the
//! topology engine, which then publishes a cfg message to `active/cfg`. The
//! node polls for it with [`wait_for_cfg_msg`]; polls that keep missing are
//! bounded by `max_hold` before the node is sent back through registration.

use std::collections::HashSet;

use chainring_index::NodeId;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::message::{valid_cfg_msg, CfgMsg};
use crate::store::{Queue, QueueStore, Txn};

/// Observations a node may spend in `waiting` before it expires.
pub const DEFAULT_MAX_WAIT: usize = 3;

/// Failed cfg polls before a node is requeued for registration.
pub const DEFAULT_MAX_HOLD: usize = 3;

/// What happened to an announce message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The node was already known online and is now registered.
    Registered,
    /// The node has not been seen online yet; parked in `announce`.
    Parked,
}

/// Result of a cfg poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfgPoll {
    /// The node's cfg message, removed from `active/cfg`.
    Ready(CfgMsg),
    /// Nothing yet; the node is held (this many times so far).
    Held(usize),
    /// Held `max_hold` times; the node went back to `registered`.
    Requeued,
}

/// Handle a validated announce message.
///
/// Duplicates are allowed in `registered`; consumers dedupe.
pub fn handle_announce_msg(store: &QueueStore, node: &NodeId) -> Result<Admission> {
    let id = node.as_str();
    store.transact(|txn| {
        if txn.contains(Queue::Node, id) || txn.contains(Queue::Waiting, id) {
            txn.remove_all(Queue::Waiting, id);
            txn.remove_all(Queue::Announce, id);
            txn.append(Queue::Registered, id);
            debug!("Announce from {} accepted", id);
            Ok(Admission::Registered)
        } else {
            if !txn.contains(Queue::Announce, id) {
                txn.append(Queue::Announce, id);
            }
            debug!("Announce from {} parked until seen online", id);
            Ok(Admission::Parked)
        }
    })
}

/// Reconcile the online `node` queue against registration.
///
/// `placed` are nodes already in the chain. For each online node that is
/// neither placed nor registered: a pending announce registers it, otherwise
/// it is observed in `waiting`, where it expires after `max_wait`
/// observations. Returns the nodes registered by this call.
pub fn manage_incoming_nodes(
    store: &QueueStore,
    placed: &HashSet<NodeId>,
    max_wait: usize,
) -> Result<Vec<NodeId>> {
    store.transact(|txn| {
        let mut registered = Vec::new();
        for id in txn.items(Queue::Node) {
            let Ok(node) = NodeId::parse(&id) else {
                warn!("Dropping malformed id {:?} from node queue", id);
                continue;
            };
            if placed.contains(&node) || txn.contains(Queue::Registered, &id) {
                txn.remove_all(Queue::Waiting, &id);
                continue;
            }
            if txn.remove_all(Queue::Announce, &id) > 0 {
                txn.remove_all(Queue::Waiting, &id);
                txn.append(Queue::Registered, id.as_str());
                info!("Node {} registered", id);
                registered.push(node);
                continue;
            }
            txn.append(Queue::Waiting, id.as_str());
            if txn.count(Queue::Waiting, &id) > max_wait {
                txn.remove_all(Queue::Waiting, &id);
                debug!("Node {} expired from waiting without announcing", id);
            }
        }
        Ok(registered)
    })
}

fn cfg_node_is(msg: &str, node: &NodeId) -> bool {
    valid_cfg_msg(msg).is_ok_and(|cfg| &cfg.node_id == node)
}

/// Poll for `node`'s cfg message.
pub fn wait_for_cfg_msg(store: &QueueStore, node: &NodeId, max_hold: usize) -> Result<CfgPoll> {
    let id = node.as_str();
    store.transact(|txn| {
        if let Some(raw) = txn.remove_first(Queue::Cfg, |msg| cfg_node_is(msg, node)) {
            txn.remove_all(Queue::Hold, id);
            let cfg = valid_cfg_msg(&raw)?;
            info!("Delivered cfg to {}", id);
            return Ok(CfgPoll::Ready(cfg));
        }

        txn.append(Queue::Hold, id);
        let held = txn.count(Queue::Hold, id);
        if held >= max_hold {
            txn.remove_all(Queue::Hold, id);
            if !txn.contains(Queue::Registered, id) {
                txn.append(Queue::Registered, id);
            }
            warn!("No cfg for {} after {} polls, requeued for registration", id, held);
            return Ok(CfgPoll::Requeued);
        }
        Ok(CfgPoll::Held(held))
    })
}

/// Publish `cfg`, replacing any older cfg message for the same node.
///
/// Returns false if this exact message is already waiting for delivery.
pub fn publish_cfg_msg(store: &QueueStore, cfg: &CfgMsg) -> Result<bool> {
    let json = cfg.to_json();
    // round-trip through the validator so nothing malformed is ever enqueued
    valid_cfg_msg(&json)?;
    let id = cfg.node_id.as_str();
    store.transact(|txn| {
        if txn.contains(Queue::Cfg, &json) {
            return Ok(false);
        }
        txn.remove_where(Queue::Cfg, |msg| cfg_node_is(msg, &cfg.node_id));
        txn.append(Queue::Cfg, json.as_str());
        if !txn.contains(Queue::Publish, id) {
            txn.append(Queue::Publish, id);
        }
        Ok(true)
    })
}

/// Forget everything queued for `node`.
pub fn retract_node(store: &QueueStore, node: &NodeId) -> Result<()> {
    let id = node.as_str();
    store.transact(|txn| {
        txn.remove_where(Queue::Cfg, |msg| cfg_node_is(msg, node));
        for queue in [
            Queue::Publish,
            Queue::Hold,
            Queue::Boot,
            Queue::Registered,
            Queue::Waiting,
            Queue::Announce,
        ] {
            txn.remove_all(queue, id);
        }
        Ok(())
    })
}

/// Replace the `node` queue with the currently online nodes.
pub fn set_online_nodes(store: &QueueStore, nodes: &[NodeId]) -> Result<()> {
    store.transact(|txn| {
        txn.clear(Queue::Node);
        for node in nodes {
            txn.append(Queue::Node, node.as_str());
        }
        Ok(())
    })
}

fn parse_ids(items: Vec<String>, queue: Queue) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter_map(|id| match NodeId::parse(&id) {
            Ok(node) => Some(node),
            Err(e) => {
                warn!("Skipping malformed id {:?} in {}: {}", id, queue, e);
                None
            }
        })
        .filter(|node| seen.insert(node.clone()))
        .collect()
}

/// Pop everything from `registered`, deduplicated, in arrival order.
pub fn drain_registered(store: &QueueStore) -> Result<Vec<NodeId>> {
    store.transact(|txn| {
        let mut items = Vec::new();
        while let Some(id) = txn.pop_left(Queue::Registered) {
            items.push(id);
        }
        Ok(parse_ids(items, Queue::Registered))
    })
}

// --- Bootstrap segment ---

/// The open bootstrap segment, in join order.
pub fn boot_list(store: &QueueStore) -> Result<Vec<NodeId>> {
    Ok(parse_ids(store.items(Queue::Boot)?, Queue::Boot))
}

/// Append `node` to the bootstrap segment unless already present.
pub fn push_boot(store: &QueueStore, node: &NodeId) -> Result<()> {
    store.transact(|txn| {
        if !txn.contains(Queue::Boot, node.as_str()) {
            txn.append(Queue::Boot, node.as_str());
        }
        Ok(())
    })
}

/// Replace the bootstrap segment.
pub fn set_boot_list(store: &QueueStore, nodes: &[NodeId]) -> Result<()> {
    store.transact(|txn| {
        replace(txn, Queue::Boot, nodes);
        Ok(())
    })
}

fn replace(txn: &mut Txn<'_>, queue: Queue, nodes: &[NodeId]) {
    txn.clear(queue);
    for node in nodes {
        txn.append(queue, node.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn node(s: &str) -> NodeId {
        NodeId::parse(s).unwrap()
    }

    fn open() -> (tempfile::TempDir, QueueStore) {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn announce_after_seen_online_registers() {
        let (_dir, store) = open();
        let a = node("aaaaaaaaaa");
        set_online_nodes(&store, &[a.clone()]).unwrap();

        assert_eq!(handle_announce_msg(&store, &a).unwrap(), Admission::Registered);
        assert_eq!(handle_announce_msg(&store, &a).unwrap(), Admission::Registered);
        // duplicates are allowed, drain dedupes
        assert_eq!(store.count(Queue::Registered, a.as_str()).unwrap(), 2);
        assert_eq!(drain_registered(&store).unwrap(), vec![a]);
        assert_eq!(store.len(Queue::Registered).unwrap(), 0);
    }

    #[test]
    fn announce_before_seen_online_is_parked() {
        let (_dir, store) = open();
        let a = node("aaaaaaaaaa");

        assert_eq!(handle_announce_msg(&store, &a).unwrap(), Admission::Parked);
        assert_eq!(handle_announce_msg(&store, &a).unwrap(), Admission::Parked);
        assert_eq!(store.count(Queue::Announce, a.as_str()).unwrap(), 1);

        set_online_nodes(&store, &[a.clone()]).unwrap();
        let registered = manage_incoming_nodes(&store, &HashSet::new(), DEFAULT_MAX_WAIT).unwrap();
        assert_eq!(registered, vec![a.clone()]);
        assert!(!store.contains(Queue::Announce, a.as_str()).unwrap());
        assert!(store.contains(Queue::Registered, a.as_str()).unwrap());
    }

    #[test]
    fn waiting_node_registers_on_announce() {
        let (_dir, store) = open();
        let a = node("aaaaaaaaaa");
        set_online_nodes(&store, &[a.clone()]).unwrap();
        manage_incoming_nodes(&store, &HashSet::new(), DEFAULT_MAX_WAIT).unwrap();
        assert!(store.contains(Queue::Waiting, a.as_str()).unwrap());

        set_online_nodes(&store, &[]).unwrap();
        assert_eq!(handle_announce_msg(&store, &a).unwrap(), Admission::Registered);
        assert!(!store.contains(Queue::Waiting, a.as_str()).unwrap());
    }

    #[test]
    fn waiting_expires_after_max_wait() {
        let (_dir, store) = open();
        let a = node("aaaaaaaaaa");
        set_online_nodes(&store, &[a.clone()]).unwrap();

        for seen in 1..=3 {
            manage_incoming_nodes(&store, &HashSet::new(), 3).unwrap();
            assert_eq!(store.count(Queue::Waiting, a.as_str()).unwrap(), seen);
        }
        manage_incoming_nodes(&store, &HashSet::new(), 3).unwrap();
        assert_eq!(store.count(Queue::Waiting, a.as_str()).unwrap(), 0);
        assert_eq!(store.len(Queue::Registered).unwrap(), 0);
    }

    #[test]
    fn placed_nodes_are_not_observed() {
        let (_dir, store) = open();
        let a = node("aaaaaaaaaa");
        set_online_nodes(&store, &[a.clone()]).unwrap();

        let placed: HashSet<NodeId> = [a.clone()].into_iter().collect();
        manage_incoming_nodes(&store, &placed, 3).unwrap();
        assert_eq!(store.len(Queue::Waiting).unwrap(), 0);
    }

    #[test]
    fn cfg_delivered_once() {
        let (_dir, store) = open();
        let a = node("02beefdead");
        let cfg = CfgMsg {
            node_id: a.clone(),
            networks: vec!["7ac4235ec5d3d938".into()],
        };
        assert!(publish_cfg_msg(&store, &cfg).unwrap());
        assert!(!publish_cfg_msg(&store, &cfg).unwrap());
        assert!(store.contains(Queue::Publish, a.as_str()).unwrap());

        // a held poll is cleared by the successful one
        store.append(Queue::Hold, a.as_str()).unwrap();
        assert_eq!(wait_for_cfg_msg(&store, &a, 3).unwrap(), CfgPoll::Ready(cfg));
        assert_eq!(store.len(Queue::Cfg).unwrap(), 0);
        assert_eq!(store.count(Queue::Hold, a.as_str()).unwrap(), 0);
    }

    #[test]
    fn newer_cfg_replaces_older() {
        let (_dir, store) = open();
        let a = node("02beefdead");
        let old = CfgMsg {
            node_id: a.clone(),
            networks: vec!["7ac4235ec5d3d938".into()],
        };
        let new = CfgMsg {
            node_id: a.clone(),
            networks: vec!["7ac4235ec5d3d938".into(), "7ac4235ec5d3d939".into()],
        };
        publish_cfg_msg(&store, &old).unwrap();
        publish_cfg_msg(&store, &new).unwrap();

        assert_eq!(store.items(Queue::Cfg).unwrap(), vec![new.to_json()]);
        assert_eq!(store.count(Queue::Publish, a.as_str()).unwrap(), 1);
    }

    #[test]
    fn hold_then_requeue() {
        let (_dir, store) = open();
        let a = node("02beefdead");
        let other = CfgMsg {
            node_id: node("03beefdead"),
            networks: vec![],
        };
        publish_cfg_msg(&store, &other).unwrap();

        assert_eq!(wait_for_cfg_msg(&store, &a, 3).unwrap(), CfgPoll::Held(1));
        assert_eq!(wait_for_cfg_msg(&store, &a, 3).unwrap(), CfgPoll::Held(2));
        assert_eq!(store.count(Queue::Registered, a.as_str()).unwrap(), 0);

        assert_eq!(wait_for_cfg_msg(&store, &a, 3).unwrap(), CfgPoll::Requeued);
        assert_eq!(store.count(Queue::Registered, a.as_str()).unwrap(), 1);
        assert_eq!(store.count(Queue::Hold, a.as_str()).unwrap(), 0);
        // someone else's cfg is untouched
        assert_eq!(store.len(Queue::Cfg).unwrap(), 1);
    }

    #[test]
    fn retract_clears_all_queues() {
        let (_dir, store) = open();
        let a = node("02beefdead");
        publish_cfg_msg(
            &store,
            &CfgMsg {
                node_id: a.clone(),
                networks: vec![],
            },
        )
        .unwrap();
        push_boot(&store, &a).unwrap();
        store.append(Queue::Hold, a.as_str()).unwrap();

        retract_node(&store, &a).unwrap();
        for queue in Queue::ALL {
            assert_eq!(store.count(queue, a.as_str()).unwrap(), 0, "{}", queue);
        }
        assert_eq!(store.len(Queue::Cfg).unwrap(), 0);
    }

    #[test]
    fn boot_list_keeps_join_order() {
        let (_dir, store) = open();
        let (a, b) = (node("aaaaaaaaaa"), node("bbbbbbbbbb"));
        push_boot(&store, &a).unwrap();
        push_boot(&store, &b).unwrap();
        push_boot(&store, &a).unwrap();
        assert_eq!(boot_list(&store).unwrap(), vec![a.clone(), b.clone()]);

        set_boot_list(&store, &[b.clone()]).unwrap();
        assert_eq!(boot_list(&store).unwrap(), vec![b]);
    }
}
