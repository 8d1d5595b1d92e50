//! Chainring Topology Engine
//!
//! Keeps overlay members arranged as a chain of point-to-point virtual
//! networks, closed into a ring once enough nodes are present.
//!
//! # Chain Model
//!
//! ```text
//!   head            middle            tail
//!  [node A] <----- [node B] <----- [node C]
//!   owns a          owns b          owns c (dangling)
//!                   joins a         joins b
//! ```
//!
//! Every node owns one network and takes its first address (the gateway).
//! Every node except the head also joins its upstream neighbour's network
//! with the second address and routes its default traffic through it.
//! Closing the ring makes the head join the tail's network.
//!
//! # Pieces
//!
//! - [`ControllerClient`]: the controller contract, with an in-memory
//!   implementation in [`MemoryController`]
//! - [`Topology`]: bootstrap, connect, offline, close, unwrap, orphan cleanup
//!   and state refresh over a [`ControllerState`]
//! - [`RetryPolicy`] / [`RetryJob`]: bounded retry of idempotent jobs

mod client;
mod engine;
mod error;
mod memory;
mod orphans;
mod pool;
mod retry;
mod ring;
mod rules;
mod state;
mod wait_cache;

pub use client::{
    members_path, new_network_path, random_network_name, ControllerClient, ObjectRef, NETWORKS_PATH,
    PEERS_PATH, STATUS_PATH,
};
pub use engine::{
    Topology, TopologyConfig, CLOSE_WAIT, DEFAULT_MIN_NODES, OFFLINE_WAIT, UNWRAP_WAIT,
};
pub use error::{ClientError, Result, TopologyError};
pub use memory::MemoryController;
pub use orphans::{find_orphans, Orphans};
pub use pool::{Subnet, SubnetPool, DEFAULT_POOL};
pub use retry::{
    JobContext, JobStatus, RetryJob, RetryPolicy, Verdict, DEFAULT_MAX_RETRY, SUCCESS_TOKENS,
};
pub use ring::{
    chain_ends, chain_order, find_dangling_nets, get_neighbor_ids, get_target_node_id, is_ring,
    CloseOutcome, NeighborIds,
};
pub use rules::default_rules;
pub use state::{ControllerState, StateSnapshot};
pub use wait_cache::WaitCache;
