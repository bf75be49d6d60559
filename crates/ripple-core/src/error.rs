//! Error types for Ripple Core

use thiserror::Error;

/// Result type alias using Ripple Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Ripple replication engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Replica (or other named entity) not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create issued for a record id that already exists on the primary
    #[error("Duplicate key: record {0} already exists")]
    DuplicateKey(String),

    /// A replica with the same id is already in the fan-out set
    #[error("Duplicate replica: {0} is already registered")]
    DuplicateReplica(String),

    /// Simulated transient failure while a replica applied an operation
    #[error("Replication failed for replica {replica_id} (operation at {timestamp})")]
    ReplicationRejected {
        /// Replica that rejected the operation
        replica_id: String,
        /// Logical timestamp of the rejected operation
        timestamp: u64,
    },

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Background work could not be scheduled
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a runtime error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Whether the error is a simulated replica rejection
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ReplicationRejected { .. })
    }
}
