//! TpcKv - Replicated Key-Value Store with Two-Phase Commit
//!
//! A coordinator routes every write to two replicas chosen by consistent
//! hashing and commits it with two-phase commit. Reads are served from the
//! coordinator's cache or read through from a replica.
//!
//! # Architecture
//!
//! Replicas register with the coordinator and take their place on a hash
//! ring; a key lives on its primary and the primary's successor. Each replica
//! keeps a commit log of the 2PC messages it has voted on, so an operation
//! interrupted by a crash is recovered when the replica restarts.
//!
//! # Features
//!
//! - Consistent-hash replica ring with primary/successor placement
//! - Two-phase commit with bounded, jittered phase-2 retry
//! - Durable commit log with torn-tail recovery and optional compression
//! - Set-associative caches with second-chance eviction
//! - Fault injection through `ignoreNext`

pub mod cache;
pub mod client;
pub mod commitlog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod hash;
pub mod network;
pub mod registry;
pub mod replica;
pub mod store;

pub use config::TpcKvConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::KvClient;
    pub use crate::commitlog::{CommitLog, CommitLogOptions};
    pub use crate::config::TpcKvConfig;
    pub use crate::coordinator::{CommitCoordinator, CoordinatorHandler, RetryPolicy};
    pub use crate::error::{Error, Result};
    pub use crate::network::{KvMessage, NetworkClient, NetworkServer};
    pub use crate::registry::{RegistrationHandler, ReplicaId, ReplicaInfo, ReplicaRegistry};
    pub use crate::replica::{ReplicaHandler, ReplicaNode};
}
