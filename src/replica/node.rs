//! Replica Node
//!
//! Composes the authoritative store with the replica's cache. Operations that
//! touch both take the store lock first and the cache-set lock second, so
//! concurrent writers on keys that share a cache set cannot deadlock.

use tokio::sync::RwLock;

use crate::cache::KvCache;
use crate::error::Result;
use crate::network::{validate_key, validate_value};
use crate::store::KvStore;

/// Store + cache pair served by one replica
#[derive(Debug)]
pub struct ReplicaNode {
    store: RwLock<KvStore>,
    cache: KvCache,
}

impl ReplicaNode {
    /// Create a node with an empty store and a cache of the given geometry
    pub fn new(num_sets: usize, max_elems_per_set: usize) -> Self {
        Self {
            store: RwLock::new(KvStore::new()),
            cache: KvCache::new(num_sets, max_elems_per_set),
        }
    }

    /// Store a value
    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        validate_value(value)?;

        let mut store = self.store.write().await;
        let mut set = self.cache.lock(key).await;
        store.put(key, value);
        set.put(key, value);
        Ok(())
    }

    /// Read a value, filling the cache on a miss
    pub async fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;

        let store = self.store.read().await;
        let mut set = self.cache.lock(key).await;
        if let Some(value) = set.get(key) {
            return Ok(value);
        }

        let value = store.get(key)?;
        set.put(key, &value);
        Ok(value)
    }

    /// Delete a value
    pub async fn del(&self, key: &str) -> Result<()> {
        validate_key(key)?;

        let mut store = self.store.write().await;
        let mut set = self.cache.lock(key).await;
        store.del(key)?;
        set.del(key);
        Ok(())
    }

    /// Existence probe against the store only; the cache is left untouched
    pub async fn has_key(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.store.read().await.contains(key))
    }

    /// Cache of this node
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn test_put_get_del() {
        let node = ReplicaNode::new(10, 4);
        node.put("alpha", "1").await.unwrap();
        assert_eq!(node.get("alpha").await.unwrap(), "1");
        assert!(node.has_key("alpha").await.unwrap());

        node.del("alpha").await.unwrap();
        assert!(!node.has_key("alpha").await.unwrap());
        assert!(matches!(node.get("alpha").await, Err(Error::NotFound(_))));
        assert!(matches!(node.del("alpha").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_key_and_value_limits() {
        let node = ReplicaNode::new(10, 4);
        let max_key = "k".repeat(256);
        node.put(&max_key, "v").await.unwrap();
        assert_eq!(node.get(&max_key).await.unwrap(), "v");

        let long_key = "k".repeat(257);
        assert!(matches!(node.put(&long_key, "v").await, Err(Error::Oversized(_))));
        assert!(matches!(node.get(&long_key).await, Err(Error::Oversized(_))));
        assert!(matches!(node.put("", "v").await, Err(Error::InvalidArgument(_))));

        let big_value = "v".repeat(262_145);
        assert!(matches!(node.put("k", &big_value).await, Err(Error::Oversized(_))));
    }

    #[tokio::test]
    async fn test_has_key_does_not_touch_cache() {
        let node = ReplicaNode::new(1, 4);
        node.put("a", "1").await.unwrap();
        assert!(node.has_key("a").await.unwrap());

        let set = node.cache().lock("a").await;
        assert!(set.slots().all(|slot| !slot.accessed));
    }

    #[tokio::test]
    async fn test_get_fills_cache_after_eviction() {
        let node = ReplicaNode::new(1, 1);
        node.put("a", "1").await.unwrap();
        node.put("b", "2").await.unwrap();

        // "a" was evicted from the single slot but the store still has it
        assert_eq!(node.get("a").await.unwrap(), "1");
        let mut set = node.cache().lock("a").await;
        assert_eq!(set.get("a").as_deref(), Some("1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_sharing_one_cache_set() {
        let node = std::sync::Arc::new(ReplicaNode::new(1, 2));

        let mut tasks = Vec::new();
        for i in 0..16 {
            let node = node.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("k{}", i);
                node.put(&key, &format!("first-{}", i)).await.unwrap();
                node.put(&key, &format!("second-{}", i)).await.unwrap();
                assert_eq!(node.get(&key).await.unwrap(), format!("second-{}", i));
                if i % 2 == 1 {
                    node.del(&key).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for i in 0..16 {
            let key = format!("k{}", i);
            if i % 2 == 1 {
                assert!(!node.has_key(&key).await.unwrap());
            } else {
                assert_eq!(node.get(&key).await.unwrap(), format!("second-{}", i));
            }
        }

        let set = node.cache().lock("k0").await;
        assert!(set.len() <= 2);
        for slot in set.slots() {
            let i: usize = slot.key[1..].parse().unwrap();
            assert_eq!(i % 2, 0, "deleted key {} still cached", slot.key);
            assert_eq!(slot.value, format!("second-{}", i));
        }
    }
}
