//! Consistency auditing between a replica and a reference snapshot

use crate::store::{Record, RecordStore};
use serde::{Deserialize, Serialize};

/// Divergence of one replica from a reference record set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyDelta {
    /// No missing and no outdated records
    pub consistent: bool,
    /// Reference records absent from the replica
    pub missing: usize,
    /// Reference records the replica holds with an older `updated_at`
    pub outdated: usize,
}

impl ConsistencyDelta {
    /// Compare `local` against `reference`
    ///
    /// Records only present in `local` are not counted: the reference is
    /// authoritative for existence.
    pub fn compute(local: &RecordStore, reference: &[Record]) -> Self {
        let mut missing = 0;
        let mut outdated = 0;

        for expected in reference {
            match local.get(&expected.id) {
                None => missing += 1,
                Some(found) if found.updated_at < expected.updated_at => outdated += 1,
                Some(_) => {}
            }
        }

        Self {
            consistent: missing == 0 && outdated == 0,
            missing,
            outdated,
        }
    }
}

/// One replica's line in a [`ConsistencyReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConsistency {
    /// Replica id
    pub replica_id: String,
    /// Delta against the primary snapshot
    pub delta: ConsistencyDelta,
}

/// Point-in-time audit of every replica against the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Clock value when the primary snapshot was taken (ms)
    pub taken_at: u64,
    /// Records in the primary snapshot
    pub primary_records: usize,
    /// Per-replica deltas, in registration order
    pub replicas: Vec<ReplicaConsistency>,
}

impl ConsistencyReport {
    /// Whether every replica matched the snapshot
    pub fn all_consistent(&self) -> bool {
        self.replicas.iter().all(|r| r.delta.consistent)
    }

    /// Delta for one replica
    pub fn replica(&self, replica_id: &str) -> Option<&ConsistencyDelta> {
        self.replicas
            .iter()
            .find(|r| r.replica_id == replica_id)
            .map(|r| &r.delta)
    }
}
