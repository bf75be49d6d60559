//! Replica health and lag reporting
//!
//! [`collect_status`] computes a point-in-time status line per replica.
//! [`HealthMonitor`] owns the background task that repeats a poll on an
//! interval until it is stopped or dropped.

use crate::clock::Clock;
use crate::replication::replica::Replica;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};

/// Observer invoked with every background poll's statuses
pub type HealthListener = Arc<dyn Fn(&[ReplicaStatus]) + Send + Sync>;

/// Sync and health state of one replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    /// Replica ID
    pub replica_id: String,
    /// Timestamp of the last applied operation (ms)
    pub last_synced_at: u64,
    /// `now - last_synced_at` (ms)
    pub lag: u64,
    /// Health probe result
    pub healthy: bool,
}

impl ReplicaStatus {
    /// Lag as a duration
    pub fn lag_duration(&self) -> Duration {
        Duration::from_millis(self.lag)
    }
}

/// Query every replica for its sync marker and health
///
/// Replicas lagging more than `lag_warning_threshold` are logged at warn level.
pub fn collect_status(
    replicas: &[Arc<Replica>],
    clock: &dyn Clock,
    lag_warning_threshold: Duration,
) -> Vec<ReplicaStatus> {
    let now = clock.now_millis();

    replicas
        .iter()
        .map(|replica| {
            let last_synced_at = replica.last_synced_at();
            let status = ReplicaStatus {
                replica_id: replica.id().to_string(),
                last_synced_at,
                lag: now.saturating_sub(last_synced_at),
                healthy: replica.is_healthy(),
            };

            if status.lag_duration() > lag_warning_threshold {
                tracing::warn!(
                    "Replica {} lag warning: {}ms since last sync",
                    status.replica_id,
                    status.lag
                );
            }
            status
        })
        .collect()
}

/// Write a poll's statuses to the log
pub fn log_health_check(statuses: &[ReplicaStatus]) {
    tracing::info!("Health check: {} replicas", statuses.len());
    for status in statuses {
        tracing::info!(
            "Replica {}: {} (lag: {}ms)",
            status.replica_id,
            if status.healthy { "HEALTHY" } else { "UNHEALTHY" },
            status.lag
        );
    }
}

/// Owner of the recurring health poll task
#[derive(Debug, Default)]
pub struct HealthMonitor {
    /// Shutdown signal sender, present while a poll task is running
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Completed polls across all runs
    polls: Arc<AtomicU64>,
}

impl HealthMonitor {
    /// Create a stopped monitor
    pub fn new() -> Self {
        Self::default()
    }

    /// Start polling every `interval`, first poll one interval from now
    ///
    /// Returns `Ok(false)` without touching the running task if one exists.
    pub fn start<F>(&self, interval: Duration, poll: F) -> Result<bool>
    where
        F: Fn() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(Error::invalid_config(
                "health poll interval must be greater than zero",
            ));
        }

        let mut shutdown_slot = self.shutdown_tx.lock();
        if shutdown_slot.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::runtime(format!("cannot start health monitoring: {}", e)))?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *shutdown_slot = Some(shutdown_tx);

        let polls = self.polls.clone();
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        tracing::info!("Health monitoring stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        poll();
                        polls.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tracing::info!("Health monitoring started (interval: {:?})", interval);
        Ok(true)
    }

    /// Cancel future polls
    ///
    /// Safe to call when nothing is running; returns whether a running task
    /// was signalled.
    pub fn stop(&self) -> bool {
        match self.shutdown_tx.lock().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Whether a poll task is active
    pub fn is_running(&self) -> bool {
        self.shutdown_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of completed polls
    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::SeqCst)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
