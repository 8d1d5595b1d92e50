//! Error types for chainring-topology.

use thiserror::Error;

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Failures reported by a network-controller client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The object does not exist at the controller.
    #[error("not found: {0}")]
    NotFound(String),

    /// The controller answered with an unexpected HTTP status.
    #[error("controller returned {status} for {path}")]
    Status { status: u16, path: String },

    /// The request never completed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body was not what the contract promises.
    #[error("malformed controller response: {0}")]
    Decode(String),
}

/// Errors that abort a topology operation.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Controller call failed.
    #[error("controller error: {0}")]
    Client(#[from] ClientError),

    /// Controller data did not decode into a record.
    #[error("record decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// No free subnet left in the address pool.
    #[error("subnet pool exhausted")]
    PoolExhausted,

    /// Subnet pool string could not be parsed.
    #[error("invalid subnet pool {0:?}")]
    InvalidPool(String),
}
