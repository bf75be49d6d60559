//! Replication System for Ripple
//!
//! This module implements single-primary, multi-replica replication with:
//! - An append-only operation log on the primary
//! - Async, per-replica delivery with randomized delay
//! - Simulated transient replica failures (dropped, not retried)
//! - Lag/health polling and consistency audits
//!
//! # Architecture
//!
//! ```text
//!                       delivery worker   ┌─────────────────┐
//! ┌─────────────────┐ ──────────────────► │    Replica 1    │ ◄── reads
//! │     Primary     │                     └─────────────────┘
//! │                 │   delivery worker   ┌─────────────────┐
//! │  Writes go here │ ──────────────────► │    Replica 2    │ ◄── reads
//! └─────────────────┘                     └─────────────────┘
//!          ▲
//!          │            ReplicationCoordinator
//!          └──────────── (routing, health polls, consistency reports)
//! ```
//!
//! # Delivery
//!
//! Every committed entry is queued to each replica with a delay of
//! `base_replication_delay + uniform(0, replication_jitter_max)`. A replica's
//! worker applies its queue in log order. An entry rejected by the replica is
//! logged and dropped, so the replica stays behind on that record until a
//! later operation on the same record succeeds.

pub mod config;
pub mod consistency;
pub mod coordinator;
pub mod health;
pub mod operation;
pub mod primary;
pub mod replica;

pub use config::{ReplicaConfig, ReplicationConfig};
pub use consistency::{ConsistencyDelta, ConsistencyReport, ReplicaConsistency};
pub use coordinator::ReplicationCoordinator;
pub use health::{HealthListener, HealthMonitor, ReplicaStatus};
pub use operation::{Operation, OperationKind, OperationPayload, USERS_TABLE};
pub use primary::{CommitListener, Primary, PrimaryStats};
pub use replica::{Replica, ReplicaStats};

/// Default fixed propagation delay in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 100;

/// Default maximum jitter in milliseconds
pub const DEFAULT_JITTER_MAX_MS: u64 = 25;

/// Default health poll interval in milliseconds
pub const DEFAULT_HEALTH_POLL_MS: u64 = 5_000;

/// Default chance that a health probe flakes
pub const DEFAULT_HEALTH_FLAKE_RATE: f64 = 0.1;

/// Replication lag threshold for warnings (in milliseconds)
pub const LAG_WARNING_THRESHOLD_MS: u64 = 10_000;
