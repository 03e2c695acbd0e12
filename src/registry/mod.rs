//! Replica Registry
//!
//! Consistent-hash ring of registered replicas, keyed by unsigned 64-bit id.
//! A key's primary is the replica with the smallest id at or above the key's
//! hash, wrapping to the smallest id; its successor is the next id after the
//! primary, wrapping the same way.

mod handler;
mod info;

pub use handler::RegistrationHandler;
pub use info::{ReplicaId, ReplicaInfo};

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::hash::hash64;

/// Consistent-hash ring shared by the coordinator's tasks
#[derive(Debug)]
pub struct ReplicaRegistry {
    ring: RwLock<BTreeMap<ReplicaId, ReplicaInfo>>,
    capacity: usize,
}

impl ReplicaRegistry {
    /// Create an empty registry holding at most `capacity` replicas
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Add a replica, or refresh the address of one already registered
    pub async fn register(&self, info: ReplicaInfo) -> Result<()> {
        let mut ring = self.ring.write().await;

        if let Some(existing) = ring.get_mut(&info.id) {
            tracing::info!(
                "Replica {} re-registered at {}:{} (was {}:{})",
                info.id,
                info.host,
                info.port,
                existing.host,
                existing.port
            );
            existing.host = info.host;
            existing.port = info.port;
            return Ok(());
        }

        if ring.len() >= self.capacity {
            return Err(Error::RegistryFull {
                capacity: self.capacity,
            });
        }

        tracing::info!("Registered replica {} ({}/{})", info, ring.len() + 1, self.capacity);
        ring.insert(info.id, info);
        Ok(())
    }

    /// Primary replica for a key
    pub async fn find_primary(&self, key: &str) -> Result<ReplicaInfo> {
        self.find_primary_for_hash(hash64(key)).await
    }

    /// Primary replica for a raw ring position
    pub async fn find_primary_for_hash(&self, hash: u64) -> Result<ReplicaInfo> {
        let ring = self.ring.read().await;
        primary_of(&ring, hash).cloned()
    }

    /// Next replica after `replica` on the ring
    pub async fn find_successor(&self, replica: &ReplicaInfo) -> Result<ReplicaInfo> {
        let ring = self.ring.read().await;
        successor_of(&ring, replica.id).cloned()
    }

    /// Primary and successor for a key, resolved under one lock
    pub async fn replica_pair(&self, key: &str) -> Result<(ReplicaInfo, ReplicaInfo)> {
        let ring = self.ring.read().await;
        let primary = primary_of(&ring, hash64(key))?;
        let successor = successor_of(&ring, primary.id)?;
        Ok((primary.clone(), successor.clone()))
    }

    /// Every registered replica in ring order
    pub async fn replicas(&self) -> Vec<ReplicaInfo> {
        self.ring.read().await.values().cloned().collect()
    }

    /// Number of registered replicas
    pub async fn len(&self) -> usize {
        self.ring.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ring.read().await.is_empty()
    }

    /// Maximum number of replicas
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn primary_of(ring: &BTreeMap<ReplicaId, ReplicaInfo>, hash: u64) -> Result<&ReplicaInfo> {
    ring.range(ReplicaId(hash)..)
        .next()
        .or_else(|| ring.iter().next())
        .map(|(_, info)| info)
        .ok_or(Error::NoReplicas)
}

fn successor_of(ring: &BTreeMap<ReplicaId, ReplicaInfo>, id: ReplicaId) -> Result<&ReplicaInfo> {
    ring.range((Excluded(id), Unbounded))
        .next()
        .or_else(|| ring.iter().next())
        .map(|(_, info)| info)
        .ok_or(Error::NoReplicas)
}
