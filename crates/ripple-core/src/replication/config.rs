//! Replication configuration

use crate::replication::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_HEALTH_FLAKE_RATE, DEFAULT_HEALTH_POLL_MS,
    DEFAULT_JITTER_MAX_MS, LAG_WARNING_THRESHOLD_MS,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Fixed part of every propagation delay
    #[serde(with = "serde_millis")]
    pub base_replication_delay: Duration,

    /// Upper bound of the uniform jitter added to each delay
    #[serde(with = "serde_millis")]
    pub replication_jitter_max: Duration,

    /// Probability that a replica rejects an operation (0-1)
    pub per_replica_failure_rate: f64,

    /// Interval between background health polls
    #[serde(with = "serde_millis")]
    pub health_poll_interval: Duration,

    /// Probability that a health probe reports an otherwise healthy replica as unhealthy (0-1)
    pub health_flake_rate: f64,

    /// Lag above which status polls log a warning
    #[serde(with = "serde_millis")]
    pub lag_warning_threshold: Duration,

    /// Queue the existing log to replicas registered after writes happened
    pub replay_log_on_register: bool,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            base_replication_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            replication_jitter_max: Duration::from_millis(DEFAULT_JITTER_MAX_MS),
            per_replica_failure_rate: 0.0,
            health_poll_interval: Duration::from_millis(DEFAULT_HEALTH_POLL_MS),
            health_flake_rate: DEFAULT_HEALTH_FLAKE_RATE,
            lag_warning_threshold: Duration::from_millis(LAG_WARNING_THRESHOLD_MS),
            replay_log_on_register: false,
        }
    }
}

impl ReplicationConfig {
    /// Set the base propagation delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_replication_delay = delay;
        self
    }

    /// Set the maximum jitter
    pub fn with_jitter_max(mut self, jitter: Duration) -> Self {
        self.replication_jitter_max = jitter;
        self
    }

    /// Set the default failure rate for replicas built by the coordinator
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.per_replica_failure_rate = rate;
        self
    }

    /// Set the health poll interval
    pub fn with_health_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval = interval;
        self
    }

    /// Set the health probe flake rate
    pub fn with_health_flake_rate(mut self, rate: f64) -> Self {
        self.health_flake_rate = rate;
        self
    }

    /// Set the lag warning threshold
    pub fn with_lag_warning_threshold(mut self, threshold: Duration) -> Self {
        self.lag_warning_threshold = threshold;
        self
    }

    /// Enable/disable log replay for late replicas
    pub fn with_replay_log_on_register(mut self, enabled: bool) -> Self {
        self.replay_log_on_register = enabled;
        self
    }

    /// Longest delay a single delivery can be scheduled with
    pub fn max_propagation_delay(&self) -> Duration {
        self.base_replication_delay + self.replication_jitter_max
    }

    /// Replica settings derived from this configuration
    pub fn replica_config(&self) -> ReplicaConfig {
        ReplicaConfig {
            failure_rate: self.per_replica_failure_rate,
            health_flake_rate: self.health_flake_rate,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_rate("per_replica_failure_rate", self.per_replica_failure_rate)?;
        validate_rate("health_flake_rate", self.health_flake_rate)?;

        if self.health_poll_interval.is_zero() {
            return Err(Error::invalid_config(
                "health_poll_interval must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Per-replica simulation settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaConfig {
    /// Probability that an apply is rejected (0-1)
    pub failure_rate: f64,
    /// Probability that a health probe flakes (0-1)
    pub health_flake_rate: f64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            health_flake_rate: DEFAULT_HEALTH_FLAKE_RATE,
        }
    }
}

impl ReplicaConfig {
    /// Settings with the given failure rate
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    /// Settings with the given probe flake rate
    pub fn with_health_flake_rate(mut self, rate: f64) -> Self {
        self.health_flake_rate = rate;
        self
    }

    /// Validate rates
    pub fn validate(&self) -> Result<()> {
        validate_rate("failure_rate", self.failure_rate)?;
        validate_rate("health_flake_rate", self.health_flake_rate)
    }
}

fn validate_rate(name: &str, rate: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&rate) {
        return Err(Error::invalid_config(format!(
            "{name} must be within [0, 1], got {rate}"
        )));
    }
    Ok(())
}
