//! Error types for the controller daemon.

use chainring_queue::QueueError;
use chainring_topology::{ClientError, TopologyError};
use thiserror::Error;

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that stop the daemon.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue storage failure
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Topology engine failure
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Controller client could not be set up
    #[error("Controller error: {0}")]
    Client(#[from] ClientError),

    /// Controller never answered at startup
    #[error("Controller unavailable: {0}")]
    Unavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
