//! Set-Associative Cache
//!
//! A fixed number of sets, each holding a bounded number of slots in
//! insertion order. When a set is full the second-chance scan picks the
//! victim: referenced slots at the front lose their flag and move to the
//! back, and the first unreferenced slot is evicted.
//!
//! Every set owns its own mutex. The cache never locks on its own: callers
//! take the set's lock with [`KvCache::lock`] and operate on the guard, so a
//! get-then-put or check-then-evict sequence stays atomic for as long as the
//! guard is held.

use std::collections::VecDeque;
use tokio::sync::{Mutex, MutexGuard};

use crate::hash::hash32;

/// Locked handle to one cache set
pub type CacheSetGuard<'a> = MutexGuard<'a, CacheSet>;

/// One cached entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlot {
    pub key: String,
    pub value: String,
    /// Reference bit for the second-chance scan
    pub accessed: bool,
}

/// One set of the cache
#[derive(Debug)]
pub struct CacheSet {
    slots: VecDeque<CacheSlot>,
    capacity: usize,
}

impl CacheSet {
    fn new(capacity: usize) -> Self {
        Self {
            slots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Look up a key, marking the slot referenced on a hit
    pub fn get(&mut self, key: &str) -> Option<String> {
        let slot = self.slots.iter_mut().find(|slot| slot.key == key)?;
        slot.accessed = true;
        Some(slot.value.clone())
    }

    /// Insert or overwrite a key, evicting by second chance when full.
    ///
    /// Returns the evicted slot, if any.
    pub fn put(&mut self, key: &str, value: &str) -> Option<CacheSlot> {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.key == key) {
            slot.value = value.to_string();
            slot.accessed = false;
            return None;
        }

        let evicted = if self.slots.len() >= self.capacity {
            self.evict()
        } else {
            None
        };

        self.slots.push_back(CacheSlot {
            key: key.to_string(),
            value: value.to_string(),
            accessed: false,
        });
        evicted
    }

    /// Remove a key; no-op when absent
    pub fn del(&mut self, key: &str) {
        if let Some(pos) = self.slots.iter().position(|slot| slot.key == key) {
            self.slots.remove(pos);
        }
    }

    /// Second-chance scan from the front of the set
    fn evict(&mut self) -> Option<CacheSlot> {
        while let Some(mut slot) = self.slots.pop_front() {
            if !slot.accessed {
                return Some(slot);
            }
            slot.accessed = false;
            self.slots.push_back(slot);
        }
        None
    }

    /// Slots in insertion order
    pub fn slots(&self) -> impl Iterator<Item = &CacheSlot> {
        self.slots.iter()
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Set-associative cache shared by the coordinator and every replica
#[derive(Debug)]
pub struct KvCache {
    sets: Vec<Mutex<CacheSet>>,
    max_elems_per_set: usize,
}

impl KvCache {
    /// Create a cache with `num_sets` sets of `max_elems_per_set` slots
    pub fn new(num_sets: usize, max_elems_per_set: usize) -> Self {
        let num_sets = num_sets.max(1);
        let max_elems_per_set = max_elems_per_set.max(1);
        Self {
            sets: (0..num_sets)
                .map(|_| Mutex::new(CacheSet::new(max_elems_per_set)))
                .collect(),
            max_elems_per_set,
        }
    }

    /// Index of the set holding `key`: `|hash32(key)| mod num_sets`
    pub fn set_index(&self, key: &str) -> usize {
        hash32(key).unsigned_abs() as usize % self.sets.len()
    }

    /// Lock the set holding `key`
    pub async fn lock(&self, key: &str) -> CacheSetGuard<'_> {
        self.sets[self.set_index(key)].lock().await
    }

    /// Number of sets
    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Slots per set
    pub fn max_elems_per_set(&self) -> usize {
        self.max_elems_per_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_marks_accessed() {
        let cache = KvCache::new(4, 2);
        let mut set = cache.lock("a").await;
        assert_eq!(set.get("a"), None);

        set.put("a", "1");
        assert!(!set.slots().next().unwrap().accessed);
        assert_eq!(set.get("a").as_deref(), Some("1"));
        assert!(set.slots().next().unwrap().accessed);
    }

    #[tokio::test]
    async fn test_overwrite_resets_reference_bit() {
        let cache = KvCache::new(1, 2);
        let mut set = cache.lock("a").await;
        set.put("a", "1");
        set.get("a");
        set.put("a", "2");

        let slot = set.slots().next().unwrap();
        assert_eq!(slot.value, "2");
        assert!(!slot.accessed);
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn test_second_chance_eviction_all_accessed() {
        // single set so every key collides
        let cache = KvCache::new(1, 3);
        let mut set = cache.lock("k1").await;
        for key in ["k1", "k2", "k3"] {
            set.put(key, key);
        }
        for key in ["k1", "k2", "k3"] {
            set.get(key);
        }

        // every slot gets its second chance, then the oldest goes
        let evicted = set.put("k4", "k4").unwrap();
        assert_eq!(evicted.key, "k1");

        let keys: Vec<&str> = set.slots().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["k2", "k3", "k4"]);
        assert!(set.slots().all(|s| !s.accessed));
    }

    #[tokio::test]
    async fn test_second_chance_skips_referenced_front() {
        let cache = KvCache::new(1, 3);
        let mut set = cache.lock("a").await;
        set.put("a", "1");
        set.put("b", "2");
        set.put("c", "3");
        set.get("a");

        let evicted = set.put("d", "4").unwrap();
        assert_eq!(evicted.key, "b");

        let keys: Vec<&str> = set.slots().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "d"]);
    }

    #[tokio::test]
    async fn test_del() {
        let cache = KvCache::new(8, 4);
        let mut set = cache.lock("gone").await;
        set.put("gone", "x");
        set.del("gone");
        assert_eq!(set.get("gone"), None);
        // deleting again is a no-op
        set.del("gone");
        assert!(set.is_empty());
    }

    #[test]
    fn test_set_index_handles_min_hash() {
        let cache = KvCache::new(100, 10);
        assert_eq!(hash32("polygenelubricants"), i32::MIN);
        assert_eq!(cache.set_index("polygenelubricants"), 2147483648usize % 100);
        assert!(cache.set_index("anything") < cache.num_sets());
    }
}
