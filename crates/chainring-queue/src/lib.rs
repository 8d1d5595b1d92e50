//! Chainring Coordination Queues
//!
//! Durable sequences that carry nodes through admission and deliver their
//! network assignments:
//!
//! - `announce`: announced node IDs not yet seen online
//! - `node`: node IDs currently online at the controller
//! - `waiting`: online nodes that have not announced (bounded retention)
//! - `registered`: nodes ready to be placed in the chain
//! - `boot`: the open bootstrap segment of the chain
//! - `active/cfg`: cfg messages awaiting delivery
//! - `hold`: nodes polling for a cfg message that is not ready (bounded)
//! - `publish`: nodes that have had a cfg message published
//!
//! Queues live in RocksDB and survive crashes. Multi-step mutations run
//! inside [`QueueStore::transact`] so concurrent responders and the refresh
//! loop never observe half of a pop/push pair.

mod admission;
mod error;
mod message;
mod store;

pub use admission::{
    boot_list, drain_registered, handle_announce_msg, manage_incoming_nodes, publish_cfg_msg,
    push_boot, retract_node, set_boot_list, set_online_nodes, wait_for_cfg_msg, Admission,
    CfgPoll, DEFAULT_MAX_HOLD, DEFAULT_MAX_WAIT,
};
pub use error::{MessageError, QueueError, Result};
pub use message::{make_cfg_msg, valid_announce_msg, valid_cfg_msg, CfgMsg};
pub use store::{Queue, QueueStore, Txn};
