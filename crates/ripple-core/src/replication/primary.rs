//! Primary node implementation for replication
//!
//! The primary node:
//! - Owns the authoritative record store and the operation log
//! - Stamps every write with a strictly increasing logical timestamp
//! - Notifies commit listeners after each successful write
//! - Fans every entry out to one delivery worker per registered replica
//!
//! Each worker drains its own queue in log order, sleeping until an entry's
//! randomized due instant before applying it, so replicas never see entries
//! out of order and a slow replica never holds up another one.

use crate::clock::{Clock, millis_to_datetime};
use crate::random::RandomSource;
use crate::replication::config::ReplicationConfig;
use crate::replication::operation::Operation;
use crate::replication::replica::Replica;
use crate::store::{NewRecord, Record, RecordPatch, RecordStore};
use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Observer invoked synchronously after every committed write
pub type CommitListener = Arc<dyn Fn(&Operation) + Send + Sync>;

/// Primary node statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrimaryStats {
    /// Writes committed to the log
    pub writes_committed: u64,
    /// Current operation log length
    pub log_size: usize,
    /// Replicas in the fan-out set
    pub registered_replicas: usize,
    /// Deliveries queued across all replicas
    pub deliveries_scheduled: u64,
}

/// Operation queued for one replica
struct Delivery {
    operation: Arc<Operation>,
    due: Instant,
}

/// Fan-out target
struct ReplicaLink {
    replica_id: String,
    sender: mpsc::UnboundedSender<Delivery>,
}

struct PrimaryState {
    records: RecordStore,
    log: Vec<Arc<Operation>>,
    last_timestamp: u64,
    links: Vec<ReplicaLink>,
    stats: PrimaryStats,
}

/// Primary node for replication
pub struct Primary {
    /// Configuration
    config: ReplicationConfig,
    /// Store, log and fan-out set; one lock keeps log order and queue order equal
    state: Mutex<PrimaryState>,
    /// Commit observers
    listeners: RwLock<Vec<CommitListener>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl Primary {
    /// Create a new primary node
    pub fn new(
        config: ReplicationConfig,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(PrimaryState {
                records: RecordStore::new(),
                log: Vec::new(),
                last_timestamp: 0,
                links: Vec::new(),
                stats: PrimaryStats::default(),
            }),
            listeners: RwLock::new(Vec::new()),
            clock,
            random,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Add a replica to the fan-out set
    ///
    /// Spawns the replica's delivery worker on the current tokio runtime.
    /// With `replay_log_on_register`, the existing log is queued first.
    pub fn register_replica(&self, replica: Arc<Replica>) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::runtime(format!(
                "cannot start delivery worker for {}: {}",
                replica.id(),
                e
            ))
        })?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.links.iter().any(|l| l.replica_id == replica.id()) {
            return Err(Error::DuplicateReplica(replica.id().to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        if self.config.replay_log_on_register && !state.log.is_empty() {
            let now = Instant::now();
            for operation in &state.log {
                let _ = sender.send(Delivery {
                    operation: operation.clone(),
                    due: now + self.delivery_delay(),
                });
            }
            state.stats.deliveries_scheduled += state.log.len() as u64;
            tracing::info!(
                "Replaying {} log entries to replica {}",
                state.log.len(),
                replica.id()
            );
        }

        state.links.push(ReplicaLink {
            replica_id: replica.id().to_string(),
            sender,
        });
        state.stats.registered_replicas = state.links.len();

        tracing::info!("Registered replica: {}", replica.id());
        runtime.spawn(run_delivery_worker(replica, receiver));

        Ok(())
    }

    /// Ids of registered replicas, in registration order
    pub fn replica_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .links
            .iter()
            .map(|l| l.replica_id.clone())
            .collect()
    }

    /// Subscribe to committed operations
    pub fn on_commit(&self, listener: CommitListener) {
        self.listeners.write().push(listener);
    }

    /// Create a record
    ///
    /// Fails with [`Error::DuplicateKey`] if the id exists; nothing is logged
    /// in that case.
    pub fn create(&self, new_record: NewRecord) -> Result<Record> {
        let (record, operation) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.records.contains(&new_record.id) {
                return Err(Error::DuplicateKey(new_record.id));
            }

            let timestamp = self.next_timestamp(state);
            let record = new_record.into_record(millis_to_datetime(timestamp));
            state.records.upsert(record.clone());

            let operation = self.commit(state, Operation::create(record.clone(), timestamp));
            (record, operation)
        };

        self.notify(&operation);
        Ok(record)
    }

    /// Merge `patch` into an existing record
    ///
    /// Returns `None` without logging anything when `id` is absent.
    pub fn update(&self, id: &str, patch: RecordPatch) -> Option<Record> {
        let (record, operation) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.records.contains(id) {
                return None;
            }

            let timestamp = self.next_timestamp(state);
            let record = state.records.get_mut(id)?;
            patch.apply_to(record, millis_to_datetime(timestamp));
            let record = record.clone();

            let operation = self.commit(state, Operation::update(record.clone(), timestamp));
            (record, operation)
        };

        self.notify(&operation);
        Some(record)
    }

    /// Delete a record, returning whether one was removed
    pub fn delete(&self, id: &str) -> bool {
        let operation = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.records.remove(id).is_none() {
                return false;
            }

            let timestamp = self.next_timestamp(state);
            self.commit(state, Operation::delete(id, timestamp))
        };

        self.notify(&operation);
        true
    }

    /// Read a record from the authoritative store
    pub fn read(&self, id: &str) -> Option<Record> {
        self.state.lock().records.get(id).cloned()
    }

    /// All records, ordered by id
    pub fn read_all(&self) -> Vec<Record> {
        self.state.lock().records.all()
    }

    /// Full operation log, oldest first
    pub fn operation_log(&self) -> Vec<Arc<Operation>> {
        self.state.lock().log.clone()
    }

    /// Number of logged operations
    pub fn log_len(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Entries with a timestamp after `timestamp`, oldest first
    pub fn entries_since(&self, timestamp: u64, limit: usize) -> Vec<Arc<Operation>> {
        let state = self.state.lock();
        let start = state.log.partition_point(|op| op.timestamp <= timestamp);
        state.log[start..].iter().take(limit).cloned().collect()
    }

    /// Get statistics
    pub fn stats(&self) -> PrimaryStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.log_size = state.log.len();
        stats
    }

    /// Strictly increasing millisecond timestamp
    fn next_timestamp(&self, state: &mut PrimaryState) -> u64 {
        let timestamp = self.clock.now_millis().max(state.last_timestamp + 1);
        state.last_timestamp = timestamp;
        timestamp
    }

    /// Append to the log and queue a delivery per replica
    fn commit(&self, state: &mut PrimaryState, operation: Operation) -> Arc<Operation> {
        let operation = Arc::new(operation);
        state.log.push(operation.clone());
        state.stats.writes_committed += 1;

        let now = Instant::now();
        for link in &state.links {
            let delivery = Delivery {
                operation: operation.clone(),
                due: now + self.delivery_delay(),
            };
            if link.sender.send(delivery).is_err() {
                tracing::warn!(
                    "Delivery worker for replica {} is gone, dropping operation at {}",
                    link.replica_id,
                    operation.timestamp
                );
                continue;
            }
            state.stats.deliveries_scheduled += 1;
        }

        tracing::debug!(
            "Committed {} {} at {}",
            operation.kind,
            operation.record_id(),
            operation.timestamp
        );
        operation
    }

    /// `base_replication_delay + uniform(0, replication_jitter_max)`
    fn delivery_delay(&self) -> Duration {
        self.config.base_replication_delay
            + self
                .config
                .replication_jitter_max
                .mul_f64(self.random.next_f64())
    }

    fn notify(&self, operation: &Operation) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener(operation);
        }
    }
}

/// Apply queued operations to one replica in queue order
///
/// Rejected operations are logged and dropped; there is no retry.
async fn run_delivery_worker(replica: Arc<Replica>, mut deliveries: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = deliveries.recv().await {
        tokio::time::sleep_until(delivery.due).await;

        match replica.apply_operation(&delivery.operation) {
            Ok(outcome) => {
                tracing::trace!(
                    "Replica {} applied {} at {} ({:?})",
                    replica.id(),
                    delivery.operation.kind,
                    delivery.operation.timestamp,
                    outcome
                );
            }
            Err(e) => {
                tracing::warn!("Failed to replicate to {}: {}", replica.id(), e);
            }
        }
    }

    tracing::debug!("Delivery worker for replica {} stopped", replica.id());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::random::FixedRandom;
    use crate::replication::config::ReplicaConfig;
    use crate::replication::operation::{OperationKind, OperationPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn create_test_primary() -> (Arc<ManualClock>, Primary) {
        let clock = Arc::new(ManualClock::new(10_000));
        let primary = Primary::new(
            ReplicationConfig::default(),
            clock.clone(),
            Arc::new(FixedRandom::new(0.5)),
        );
        (clock, primary)
    }

    fn create_test_replica(id: &str, clock: Arc<ManualClock>) -> Arc<Replica> {
        Arc::new(
            Replica::new(
                id,
                ReplicaConfig::default(),
                clock,
                Arc::new(FixedRandom::new(0.5)),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_primary_creation() {
        let (_, primary) = create_test_primary();

        assert_eq!(primary.log_len(), 0);
        assert!(primary.read_all().is_empty());
        assert_eq!(primary.stats(), PrimaryStats::default());
    }

    #[test]
    fn test_create_stamps_timestamps() {
        let (_, primary) = create_test_primary();

        let record = primary
            .create(NewRecord::new("1", "Alice", "alice@example.com"))
            .unwrap();
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.created_at, millis_to_datetime(10_000));
        assert_eq!(primary.read("1"), Some(record));

        let log = primary.operation_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, OperationKind::Create);
        assert_eq!(log[0].timestamp, 10_000);
    }

    #[test]
    fn test_duplicate_create_rejected() {
        let (_, primary) = create_test_primary();
        primary
            .create(NewRecord::new("1", "Alice", "alice@example.com"))
            .unwrap();

        let err = primary
            .create(NewRecord::new("1", "Mallory", "m@example.com"))
            .unwrap_err();
        assert_eq!(err, Error::DuplicateKey("1".to_string()));
        assert_eq!(primary.read("1").map(|r| r.name), Some("Alice".to_string()));
        assert_eq!(primary.log_len(), 1);
    }

    #[test]
    fn test_update_missing_logs_nothing() {
        let (_, primary) = create_test_primary();
        assert!(primary.update("ghost", RecordPatch::new().name("x")).is_none());
        assert_eq!(primary.log_len(), 0);
        assert!(primary.read("ghost").is_none());
    }

    #[test]
    fn test_update_carries_full_record() {
        let (clock, primary) = create_test_primary();
        primary
            .create(NewRecord::new("1", "Alice", "alice@example.com"))
            .unwrap();

        clock.advance(Duration::from_millis(50));
        let updated = primary
            .update("1", RecordPatch::new().name("Alice Smith"))
            .unwrap();
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.updated_at, millis_to_datetime(10_050));
        assert!(updated.updated_at > updated.created_at);

        let log = primary.operation_log();
        assert_eq!(log[1].kind, OperationKind::Update);
        assert_eq!(log[1].payload, OperationPayload::Record(updated));
    }

    #[test]
    fn test_delete_logs_key_only() {
        let (_, primary) = create_test_primary();
        primary
            .create(NewRecord::new("1", "Alice", "alice@example.com"))
            .unwrap();

        assert!(primary.delete("1"));
        assert!(!primary.delete("1"));
        assert!(primary.read("1").is_none());

        let log = primary.operation_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].payload, OperationPayload::Key { id: "1".into() });
    }

    #[test]
    fn test_timestamps_strictly_increase_on_frozen_clock() {
        let (_, primary) = create_test_primary();
        primary.create(NewRecord::new("1", "a", "a@x")).unwrap();
        primary.update("1", RecordPatch::new().email("b@x")).unwrap();
        primary.create(NewRecord::new("2", "c", "c@x")).unwrap();

        let timestamps: Vec<u64> = primary.operation_log().iter().map(|o| o.timestamp).collect();
        assert_eq!(timestamps, vec![10_000, 10_001, 10_002]);
        assert_eq!(
            primary.read("1").map(|r| r.updated_at),
            Some(millis_to_datetime(10_001))
        );
    }

    #[test]
    fn test_entries_since() {
        let (_, primary) = create_test_primary();
        for i in 0..5 {
            primary
                .create(NewRecord::new(i.to_string(), "n", "e"))
                .unwrap();
        }

        let entries = primary.entries_since(10_001, 10);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].timestamp, 10_002);
        assert_eq!(primary.entries_since(10_001, 1).len(), 1);
    }

    #[test]
    fn test_commit_listeners() {
        let (_, primary) = create_test_primary();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        primary.on_commit(Arc::new(move |op: &Operation| {
            assert_eq!(op.table, "users");
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        primary.create(NewRecord::new("1", "a", "a@x")).unwrap();
        primary.update("1", RecordPatch::new().name("b")).unwrap();
        primary.update("missing", RecordPatch::new().name("b"));
        primary.delete("1");
        primary.delete("1");

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_register_requires_runtime() {
        let (clock, primary) = create_test_primary();
        let replica = create_test_replica("replica-1", clock);

        let err = primary.register_replica(replica).unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
        assert!(primary.replica_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_replica_rejected() {
        let (clock, primary) = create_test_primary();
        primary
            .register_replica(create_test_replica("replica-1", clock.clone()))
            .unwrap();

        let err = primary
            .register_replica(create_test_replica("replica-1", clock))
            .unwrap_err();
        assert_eq!(err, Error::DuplicateReplica("replica-1".to_string()));
        assert_eq!(primary.stats().registered_replicas, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_returns_before_delivery() {
        let (clock, primary) = create_test_primary();
        let replica = create_test_replica("replica-1", clock);
        primary.register_replica(replica.clone()).unwrap();

        primary.create(NewRecord::new("1", "Alice", "a@x")).unwrap();
        assert!(replica.read("1").is_none());
        assert_eq!(primary.stats().deliveries_scheduled, 1);

        // 100ms base + 0.5 * 25ms jitter
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(replica.read("1").is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(replica.read("1").map(|r| r.name), Some("Alice".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_log_on_register() {
        let clock = Arc::new(ManualClock::new(0));
        let primary = Primary::new(
            ReplicationConfig::default().with_replay_log_on_register(true),
            clock.clone(),
            Arc::new(FixedRandom::new(0.0)),
        );
        primary.create(NewRecord::new("1", "a", "a@x")).unwrap();
        primary.create(NewRecord::new("2", "b", "b@x")).unwrap();
        primary.delete("1");

        let late = create_test_replica("late", clock);
        primary.register_replica(late.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let ids: Vec<String> = late.read_all().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["2".to_string()]);
        assert_eq!(late.stats().operations_applied, 3);
    }
}
