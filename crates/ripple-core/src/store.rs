//! Record store shared by the primary and every replica
//!
//! A plain id-keyed table. Nodes own their store exclusively; the only way a
//! replica's store changes is through [`RecordStore::apply`].

use crate::replication::operation::{Operation, OperationKind, OperationPayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Caller-assigned id, never changes
    pub id: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
    /// Set once by the create that introduced the record
    pub created_at: DateTime<Utc>,
    /// Advanced by every update
    pub updated_at: DateTime<Utc>,
}

/// Record fields supplied by the caller on create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Record id
    pub id: String,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
}

impl NewRecord {
    /// Build a new record description
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn into_record(self, at: DateTime<Utc>) -> Record {
        Record {
            id: self.id,
            name: self.name,
            email: self.email,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPatch {
    /// New display name
    pub name: Option<String>,
    /// New email
    pub email: Option<String>,
}

impl RecordPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the email
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Merge into `record`, stamping `updated_at`
    pub(crate) fn apply_to(self, record: &mut Record, at: DateTime<Utc>) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(email) = self.email {
            record.email = email;
        }
        record.updated_at = at;
    }
}

/// What [`RecordStore::apply`] did with an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Record inserted or overwritten
    Upserted,
    /// Record removed
    Deleted,
    /// Delete for an id the store did not hold
    DeleteMissing,
    /// Kind or payload not understood; nothing changed
    Ignored,
}

impl ApplyOutcome {
    /// Whether the operation was understood and applied
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Id-keyed record table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStore {
    records: HashMap<String, Record>,
}

impl RecordStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Mutable lookup
    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    /// Whether `id` is present
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// All records, ordered by id
    pub fn all(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or overwrite by id, returning the previous record
    pub fn upsert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.id.clone(), record)
    }

    /// Remove by id
    pub fn remove(&mut self, id: &str) -> Option<Record> {
        self.records.remove(id)
    }

    /// Apply one log entry
    ///
    /// CREATE and UPDATE upsert the payload record; DELETE removes the payload
    /// id. Unknown kinds, and kinds whose payload shape does not match, are
    /// ignored.
    pub fn apply(&mut self, operation: &Operation) -> ApplyOutcome {
        match (operation.kind, &operation.payload) {
            (OperationKind::Create | OperationKind::Update, OperationPayload::Record(record)) => {
                self.upsert(record.clone());
                ApplyOutcome::Upserted
            }
            (OperationKind::Delete, payload) => match self.remove(payload.id()) {
                Some(_) => ApplyOutcome::Deleted,
                None => ApplyOutcome::DeleteMissing,
            },
            _ => ApplyOutcome::Ignored,
        }
    }
}

impl FromIterator<Record> for RecordStore {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().map(|r| (r.id.clone(), r)).collect(),
        }
    }
}
