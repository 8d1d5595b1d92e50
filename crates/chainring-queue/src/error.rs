//! Error types for chainring-queue.

use chainring_index::IdError;
use thiserror::Error;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// A message failed validation. Never enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Announce payload is not a node ID.
    #[error("invalid announce message: {0}")]
    Announce(IdError),

    /// Cfg payload does not mention `node_id` at all.
    #[error("cfg message has no node_id")]
    MissingNodeId,

    /// Cfg payload is not a JSON object.
    #[error("cfg message is not a JSON object: {0}")]
    NotAnObject(String),

    /// Cfg object has keys other than exactly `node_id` and `networks`.
    #[error("cfg message keys must be exactly node_id and networks, got {0:?}")]
    UnexpectedKeys(Vec<String>),

    /// `node_id` is not a valid node ID.
    #[error("cfg message node_id invalid: {0}")]
    NodeId(IdError),

    /// `networks` is not a list of strings.
    #[error("cfg message networks must be a list of strings")]
    Networks,
}

/// Errors from the durable queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// RocksDB failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// A stored key could not be decoded
    #[error("Corrupt queue key: {0}")]
    Corrupt(String),

    /// The in-process queue lock was poisoned by a panicking writer
    #[error("queue lock poisoned")]
    Poisoned,

    /// Message validation failure
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rocksdb::Error> for QueueError {
    fn from(e: rocksdb::Error) -> Self {
        QueueError::Storage(e.to_string())
    }
}
