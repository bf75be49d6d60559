//! Operation log entries
//!
//! One entry per committed write. Entries are built by the primary, appended
//! to its log and shared with delivery workers as `Arc<Operation>`; nothing
//! mutates an entry after it is logged.

use crate::store::Record;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Table every operation targets
pub const USERS_TABLE: &str = "users";

/// Write kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// Record creation
    Create,
    /// Full-record update
    Update,
    /// Record removal
    Delete,
    /// Kind emitted by a newer primary; replicas skip it
    #[serde(other)]
    Unknown,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Unknown => "UNKNOWN",
        };
        write!(f, "{value}")
    }
}

/// Operation body: the full record, or only its key for deletes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationPayload {
    /// Post-write record (CREATE / UPDATE)
    Record(Record),
    /// Key of the removed record (DELETE)
    Key {
        /// Removed record id
        id: String,
    },
}

impl OperationPayload {
    /// Id of the record the payload refers to
    pub fn id(&self) -> &str {
        match self {
            Self::Record(record) => &record.id,
            Self::Key { id } => id,
        }
    }

    /// The carried record, if any
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Key { .. } => None,
        }
    }
}

/// A committed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Write kind
    pub kind: OperationKind,
    /// Target table, always [`USERS_TABLE`]
    pub table: String,
    /// Record or key
    #[serde(rename = "data")]
    pub payload: OperationPayload,
    /// Logical commit timestamp (ms), strictly increasing per primary
    pub timestamp: u64,
}

impl Operation {
    /// CREATE carrying the stored record
    pub fn create(record: Record, timestamp: u64) -> Self {
        Self::with_payload(OperationKind::Create, OperationPayload::Record(record), timestamp)
    }

    /// UPDATE carrying the full post-merge record
    pub fn update(record: Record, timestamp: u64) -> Self {
        Self::with_payload(OperationKind::Update, OperationPayload::Record(record), timestamp)
    }

    /// DELETE carrying only the id
    pub fn delete(id: impl Into<String>, timestamp: u64) -> Self {
        Self::with_payload(
            OperationKind::Delete,
            OperationPayload::Key { id: id.into() },
            timestamp,
        )
    }

    fn with_payload(kind: OperationKind, payload: OperationPayload, timestamp: u64) -> Self {
        Self {
            kind,
            table: USERS_TABLE.to_string(),
            payload,
            timestamp,
        }
    }

    /// Id of the affected record
    pub fn record_id(&self) -> &str {
        self.payload.id()
    }
}
