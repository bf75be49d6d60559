//! Replica node implementation for replication
//!
//! The replica node:
//! - Applies operations delivered by the primary's delivery worker
//! - Simulates transient apply failures at a configurable rate
//! - Tracks the timestamp of the last applied operation
//! - Reports administrative health combined with a flaky probe
//! - Serves (possibly stale) reads from its own store

use crate::clock::Clock;
use crate::random::RandomSource;
use crate::replication::config::ReplicaConfig;
use crate::replication::consistency::ConsistencyDelta;
use crate::replication::operation::Operation;
use crate::store::{ApplyOutcome, Record, RecordStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Replica node statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    /// Operations applied to the store
    pub operations_applied: u64,
    /// Operations rejected by the simulated failure
    pub operations_rejected: u64,
    /// Operations skipped because their kind was not understood
    pub operations_ignored: u64,
    /// Timestamp of the last applied operation
    pub last_applied_timestamp: u64,
    /// Records currently held
    pub records: usize,
}

struct ReplicaState {
    records: RecordStore,
    last_applied_timestamp: u64,
    stats: ReplicaStats,
}

/// Replica node for replication
pub struct Replica {
    /// Replica ID
    id: String,
    /// Failure simulation settings
    config: ReplicaConfig,
    /// Store and sync metadata; every apply holds this lock
    state: Mutex<ReplicaState>,
    /// Administrative health flag
    healthy: AtomicBool,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl Replica {
    /// Create a new replica node
    ///
    /// The sync marker starts at the clock's current value.
    pub fn new(
        id: impl Into<String>,
        config: ReplicaConfig,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate()?;

        let started_at = clock.now_millis();
        Ok(Self {
            id: id.into(),
            config,
            state: Mutex::new(ReplicaState {
                records: RecordStore::new(),
                last_applied_timestamp: started_at,
                stats: ReplicaStats {
                    last_applied_timestamp: started_at,
                    ..Default::default()
                },
            }),
            healthy: AtomicBool::new(true),
            clock,
            random,
        })
    }

    /// Get replica ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Failure simulation settings
    pub fn config(&self) -> ReplicaConfig {
        self.config
    }

    /// Apply an operation received from the primary
    ///
    /// Fails with [`Error::ReplicationRejected`] before touching any state
    /// when the simulated failure trips. Unknown kinds return
    /// [`ApplyOutcome::Ignored`] and leave the sync marker alone.
    pub fn apply_operation(&self, operation: &Operation) -> Result<ApplyOutcome> {
        let mut state = self.state.lock();

        if self.random.next_f64() < self.config.failure_rate {
            state.stats.operations_rejected += 1;
            return Err(Error::ReplicationRejected {
                replica_id: self.id.clone(),
                timestamp: operation.timestamp,
            });
        }

        let outcome = state.records.apply(operation);
        if outcome.is_applied() {
            state.last_applied_timestamp = operation.timestamp;
            state.stats.operations_applied += 1;
        } else {
            tracing::debug!(
                "Replica {} ignoring {} operation at {}",
                self.id,
                operation.kind,
                operation.timestamp
            );
            state.stats.operations_ignored += 1;
        }

        Ok(outcome)
    }

    /// Read a record from the local store
    pub fn read(&self, id: &str) -> Option<Record> {
        self.state.lock().records.get(id).cloned()
    }

    /// All records in the local store, ordered by id
    pub fn read_all(&self) -> Vec<Record> {
        self.state.lock().records.all()
    }

    /// Timestamp of the last successfully applied operation
    pub fn last_synced_at(&self) -> u64 {
        self.state.lock().last_applied_timestamp
    }

    /// Milliseconds since the last successful apply
    pub fn lag_millis(&self) -> u64 {
        self.clock.now_millis().saturating_sub(self.last_synced_at())
    }

    /// Mark the replica administratively healthy/unhealthy
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Administrative flag, ignoring probe flakiness
    pub fn is_marked_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Health probe
    ///
    /// Healthy only if the administrative flag is set and the probe does not
    /// flake.
    pub fn is_healthy(&self) -> bool {
        self.is_marked_healthy() && self.random.next_f64() >= self.config.health_flake_rate
    }

    /// Compare the local store against a reference record set
    pub fn consistency_delta(&self, reference: &[Record]) -> ConsistencyDelta {
        ConsistencyDelta::compute(&self.state.lock().records, reference)
    }

    /// Get statistics
    pub fn stats(&self) -> ReplicaStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.last_applied_timestamp = state.last_applied_timestamp;
        stats.records = state.records.len();
        stats
    }
}

impl fmt::Debug for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replica")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("healthy", &self.is_marked_healthy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, millis_to_datetime};
    use crate::random::{FixedRandom, SequenceRandom};
    use crate::replication::operation::OperationKind;
    use crate::store::NewRecord;
    use std::time::Duration;

    fn create_test_replica(failure_rate: f64, random: f64) -> (Arc<ManualClock>, Replica) {
        let clock = Arc::new(ManualClock::new(1_000));
        let config = ReplicaConfig::default().with_failure_rate(failure_rate);
        let replica = Replica::new(
            "replica-1",
            config,
            clock.clone(),
            Arc::new(FixedRandom::new(random)),
        )
        .unwrap();
        (clock, replica)
    }

    fn record(id: &str, name: &str, at: u64) -> Record {
        NewRecord::new(id, name, "x@example.com").into_record(millis_to_datetime(at))
    }

    #[test]
    fn test_replica_creation() {
        let (_, replica) = create_test_replica(0.0, 0.5);

        assert_eq!(replica.id(), "replica-1");
        assert_eq!(replica.last_synced_at(), 1_000);
        assert!(replica.read_all().is_empty());
        assert!(replica.is_marked_healthy());
    }

    #[test]
    fn test_invalid_failure_rate() {
        let result = Replica::new(
            "bad",
            ReplicaConfig::default().with_failure_rate(3.0),
            Arc::new(ManualClock::new(0)),
            Arc::new(FixedRandom::new(0.0)),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_apply_advances_sync_marker() {
        let (_, replica) = create_test_replica(0.0, 0.5);

        let outcome = replica
            .apply_operation(&Operation::create(record("1", "Alice", 1_100), 1_100))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Upserted);
        assert_eq!(replica.last_synced_at(), 1_100);
        assert_eq!(replica.read("1").map(|r| r.name), Some("Alice".to_string()));

        replica
            .apply_operation(&Operation::delete("1", 1_200))
            .unwrap();
        assert!(replica.read("1").is_none());
        assert_eq!(replica.last_synced_at(), 1_200);
        assert_eq!(replica.stats().operations_applied, 2);
    }

    #[test]
    fn test_rejection_leaves_state_untouched() {
        let (_, replica) = create_test_replica(1.0, 0.999);

        let err = replica
            .apply_operation(&Operation::create(record("1", "Alice", 1_100), 1_100))
            .unwrap_err();
        assert!(err.is_rejection());
        assert!(replica.read("1").is_none());
        assert_eq!(replica.last_synced_at(), 1_000);

        let stats = replica.stats();
        assert_eq!(stats.operations_rejected, 1);
        assert_eq!(stats.operations_applied, 0);
    }

    #[test]
    fn test_failure_rate_threshold() {
        let clock = Arc::new(ManualClock::new(0));
        let replica = Replica::new(
            "r",
            ReplicaConfig::default().with_failure_rate(0.5),
            clock,
            Arc::new(SequenceRandom::new(vec![0.4, 0.6])),
        )
        .unwrap();

        let op = Operation::create(record("1", "a", 1), 1);
        assert!(replica.apply_operation(&op).is_err());
        assert!(replica.apply_operation(&op).is_ok());
    }

    #[test]
    fn test_unknown_kind_is_noop() {
        let (_, replica) = create_test_replica(0.0, 0.5);
        let mut op = Operation::create(record("1", "Alice", 1_100), 1_100);
        op.kind = OperationKind::Unknown;

        assert_eq!(replica.apply_operation(&op).unwrap(), ApplyOutcome::Ignored);
        assert!(replica.read("1").is_none());
        assert_eq!(replica.last_synced_at(), 1_000);
        assert_eq!(replica.stats().operations_ignored, 1);
    }

    #[test]
    fn test_health_combines_flag_and_probe() {
        let (_, replica) = create_test_replica(0.0, 0.5);
        assert!(replica.is_healthy());

        replica.set_healthy(false);
        assert!(!replica.is_healthy());

        // Probe draws below the 0.1 flake rate report unhealthy
        let (_, flaky) = create_test_replica(0.0, 0.05);
        assert!(flaky.is_marked_healthy());
        assert!(!flaky.is_healthy());
    }

    #[test]
    fn test_lag() {
        let (clock, replica) = create_test_replica(0.0, 0.5);
        clock.advance(Duration::from_millis(400));
        assert_eq!(replica.lag_millis(), 400);

        replica
            .apply_operation(&Operation::create(record("1", "a", 1_400), 1_400))
            .unwrap();
        assert_eq!(replica.lag_millis(), 0);
    }

    #[test]
    fn test_consistency_delta() {
        let (_, replica) = create_test_replica(0.0, 0.5);
        replica
            .apply_operation(&Operation::create(record("1", "Alice", 1_100), 1_100))
            .unwrap();

        let reference = vec![record("1", "Alice Smith", 1_200), record("2", "Bob", 1_150)];
        let delta = replica.consistency_delta(&reference);
        assert!(!delta.consistent);
        assert_eq!(delta.missing, 1);
        assert_eq!(delta.outdated, 1);
    }
}
