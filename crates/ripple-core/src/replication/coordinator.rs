//! Replication coordinator
//!
//! Composition root for one primary and its replicas. Writes always go to the
//! primary; reads go to a randomly chosen replica unless the caller asks for
//! the primary. There is no session affinity, so a read right after a write
//! can observe stale data.

use crate::clock::{Clock, MonotonicClock};
use crate::random::{RandomSource, ThreadRandom};
use crate::replication::config::ReplicationConfig;
use crate::replication::consistency::{ConsistencyReport, ReplicaConsistency};
use crate::replication::health::{
    HealthListener, HealthMonitor, ReplicaStatus, collect_status, log_health_check,
};
use crate::replication::primary::{CommitListener, Primary};
use crate::replication::replica::Replica;
use crate::store::{NewRecord, Record, RecordPatch};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Routes client calls to the primary and replicas
pub struct ReplicationCoordinator {
    config: ReplicationConfig,
    primary: Arc<Primary>,
    /// Registered replicas, in registration order
    replicas: Arc<RwLock<Vec<Arc<Replica>>>>,
    health_listeners: Arc<RwLock<Vec<HealthListener>>>,
    monitor: HealthMonitor,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl ReplicationCoordinator {
    /// Create a coordinator using the tokio-anchored clock and thread RNG
    pub fn new(config: ReplicationConfig) -> Result<Self> {
        Self::with_sources(config, Arc::new(MonotonicClock::new()), Arc::new(ThreadRandom))
    }

    /// Create a coordinator with injected time and randomness
    ///
    /// The same sources are shared with the primary and with replicas built
    /// through [`add_replica`](Self::add_replica).
    pub fn with_sources(
        config: ReplicationConfig,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        config.validate()?;

        let primary = Arc::new(Primary::new(config.clone(), clock.clone(), random.clone()));
        Ok(Self {
            config,
            primary,
            replicas: Arc::new(RwLock::new(Vec::new())),
            health_listeners: Arc::new(RwLock::new(Vec::new())),
            monitor: HealthMonitor::new(),
            clock,
            random,
        })
    }

    /// Get configuration
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// The primary node
    pub fn primary(&self) -> &Arc<Primary> {
        &self.primary
    }

    /// Build and register a replica with the configured failure rate
    pub fn add_replica(&self, id: impl Into<String>) -> Result<Arc<Replica>> {
        self.add_replica_with_failure_rate(id, self.config.per_replica_failure_rate)
    }

    /// Build and register a replica with its own failure rate
    pub fn add_replica_with_failure_rate(
        &self,
        id: impl Into<String>,
        failure_rate: f64,
    ) -> Result<Arc<Replica>> {
        let config = self.config.replica_config().with_failure_rate(failure_rate);
        let replica = Arc::new(Replica::new(
            id,
            config,
            self.clock.clone(),
            self.random.clone(),
        )?);
        self.attach_replica(replica.clone())?;
        Ok(replica)
    }

    /// Register a caller-built replica
    pub fn attach_replica(&self, replica: Arc<Replica>) -> Result<()> {
        self.primary.register_replica(replica.clone())?;
        self.replicas.write().push(replica);
        Ok(())
    }

    /// Registered replicas
    pub fn replicas(&self) -> Vec<Arc<Replica>> {
        self.replicas.read().clone()
    }

    /// Look up a replica by id
    pub fn replica(&self, id: &str) -> Option<Arc<Replica>> {
        self.replicas.read().iter().find(|r| r.id() == id).cloned()
    }

    /// Administratively mark a replica healthy/unhealthy
    pub fn set_replica_health(&self, id: &str, healthy: bool) -> Result<()> {
        let replica = self
            .replica(id)
            .ok_or_else(|| Error::not_found(format!("replica {}", id)))?;
        replica.set_healthy(healthy);
        Ok(())
    }

    /// Subscribe to committed writes
    pub fn on_commit(&self, listener: CommitListener) {
        self.primary.on_commit(listener);
    }

    /// Subscribe to background health polls
    pub fn on_health_report(&self, listener: HealthListener) {
        self.health_listeners.write().push(listener);
    }

    /// Create a record on the primary
    pub fn create(&self, record: NewRecord) -> Result<Record> {
        self.primary.create(record)
    }

    /// Update a record on the primary
    pub fn update(&self, id: &str, patch: RecordPatch) -> Option<Record> {
        self.primary.update(id, patch)
    }

    /// Delete a record on the primary
    pub fn delete(&self, id: &str) -> bool {
        self.primary.delete(id)
    }

    /// Read a record
    ///
    /// With `use_replica` and at least one replica, a replica is picked at
    /// random per call; otherwise the primary serves the read.
    pub fn read(&self, id: &str, use_replica: bool) -> Option<Record> {
        match self.route_read(use_replica) {
            Some(replica) => replica.read(id),
            None => self.primary.read(id),
        }
    }

    /// Read every record, routed like [`read`](Self::read)
    pub fn read_all(&self, use_replica: bool) -> Vec<Record> {
        match self.route_read(use_replica) {
            Some(replica) => replica.read_all(),
            None => self.primary.read_all(),
        }
    }

    fn route_read(&self, use_replica: bool) -> Option<Arc<Replica>> {
        if !use_replica {
            return None;
        }

        let replicas = self.replicas.read();
        if replicas.is_empty() {
            return None;
        }

        let replica = replicas[self.random.next_index(replicas.len())].clone();
        tracing::trace!("Routing read to replica {}", replica.id());
        Some(replica)
    }

    /// Sync and health status of every replica, computed now
    pub fn replication_status(&self) -> Vec<ReplicaStatus> {
        collect_status(
            &self.replicas(),
            self.clock.as_ref(),
            self.config.lag_warning_threshold,
        )
    }

    /// Compare every replica against a snapshot of the primary
    ///
    /// Writes that land while the report is being built may or may not be
    /// reflected.
    pub fn consistency_report(&self) -> ConsistencyReport {
        let snapshot = self.primary.read_all();
        let taken_at = self.clock.now_millis();

        let replicas: Vec<ReplicaConsistency> = self
            .replicas()
            .iter()
            .map(|replica| ReplicaConsistency {
                replica_id: replica.id().to_string(),
                delta: replica.consistency_delta(&snapshot),
            })
            .collect();

        tracing::info!(
            "Data consistency report: primary has {} records",
            snapshot.len()
        );
        for line in &replicas {
            if line.delta.consistent {
                tracing::info!("Replica {}: consistent", line.replica_id);
            } else {
                tracing::warn!(
                    "Replica {}: inconsistent (missing: {}, outdated: {})",
                    line.replica_id,
                    line.delta.missing,
                    line.delta.outdated
                );
            }
        }

        ConsistencyReport {
            taken_at,
            primary_records: snapshot.len(),
            replicas,
        }
    }

    /// Start background health polling at the configured interval
    pub fn start_health_monitoring(&self) -> Result<bool> {
        self.start_health_monitoring_with_interval(self.config.health_poll_interval)
    }

    /// Start background health polling
    ///
    /// Returns `Ok(false)` if monitoring is already running.
    pub fn start_health_monitoring_with_interval(&self, interval: Duration) -> Result<bool> {
        let replicas = self.replicas.clone();
        let listeners = self.health_listeners.clone();
        let clock = self.clock.clone();
        let lag_warning_threshold = self.config.lag_warning_threshold;

        self.monitor.start(interval, move || {
            let replicas = replicas.read().clone();
            let statuses = collect_status(&replicas, clock.as_ref(), lag_warning_threshold);
            log_health_check(&statuses);

            let listeners = listeners.read().clone();
            for listener in &listeners {
                listener(&statuses);
            }
        })
    }

    /// Stop background health polling
    ///
    /// Safe to call repeatedly or before any start; in-flight deliveries are
    /// not affected.
    pub fn stop_health_monitoring(&self) -> bool {
        self.monitor.stop()
    }

    /// Whether background polling is active
    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_running()
    }

    /// Completed background polls
    pub fn health_polls(&self) -> u64 {
        self.monitor.polls()
    }
}
