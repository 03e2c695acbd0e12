//! Key-Value Store
//!
//! The authoritative per-replica map. No internal locking; the owning
//! `ReplicaNode` serializes access. Size limits are enforced above this layer.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// In-memory authoritative store
#[derive(Debug, Default)]
pub struct KvStore {
    entries: HashMap<String, String>,
}

impl KvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn put(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    /// Read a value
    pub fn get(&self, key: &str) -> Result<String> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("key \"{}\" does not exist", key)))
    }

    /// Remove a value
    pub fn del(&mut self, key: &str) -> Result<()> {
        match self.entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("key \"{}\" does not exist", key))),
        }
    }

    /// Whether the key is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_del() {
        let mut store = KvStore::new();
        store.put("k", "v1");
        store.put("k", "v2");
        assert_eq!(store.get("k").unwrap(), "v2");
        assert!(store.contains("k"));

        store.del("k").unwrap();
        assert!(!store.contains("k"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let mut store = KvStore::new();
        assert!(matches!(store.get("nope"), Err(Error::NotFound(_))));
        assert!(matches!(store.del("nope"), Err(Error::NotFound(_))));
    }
}
