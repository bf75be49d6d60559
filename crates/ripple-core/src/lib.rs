//! Ripple Core - Eventually consistent primary/replica record store
//!
//! This crate provides the replication engine for Ripple, implementing:
//! - An in-memory record store shared by primary and replicas
//! - A primary with an append-only operation log and commit observers
//! - Asynchronous, failure-prone propagation to replicas
//! - Per-replica lag and health tracking with background polling
//! - Consistency audits of every replica against the primary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         Replication Coordinator             │
//! │   (write routing, replica reads, polling)   │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │        Primary  ──►  Delivery Workers        │
//! │   (operation log)     (delay, apply, drop)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Record Stores                   │
//! │        (primary + one per replica)          │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Time and randomness are injected ([`clock::Clock`], [`random::RandomSource`])
//! and all delays run on tokio time, so behaviour is reproducible under
//! `#[tokio::test(start_paused = true)]`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod random;
pub mod replication;
pub mod store;

pub use error::{Error, Result};
pub use replication::{
    ConsistencyReport, Operation, OperationKind, Primary, Replica, ReplicaStatus,
    ReplicationConfig, ReplicationCoordinator,
};
pub use store::{NewRecord, Record, RecordPatch, RecordStore};

