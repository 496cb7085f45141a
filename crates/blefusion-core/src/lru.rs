//! Bounded least-recently-used map.
//!
//! A deliberately small LRU built on a `HashMap` with a monotone touch
//! counter: reads and writes stamp the entry, inserts past capacity evict the
//! entry with the oldest stamp. Touches are O(1); eviction is an O(n) scan
//! that only runs when the map is full, which is cheap at the capacities used
//! here (a few thousand entries).

use std::collections::HashMap;
use std::hash::Hash;

/// Bounded map that evicts the least-recently-touched entry on overflow.
#[derive(Debug)]
pub(crate) struct LruCache<K, V> {
    capacity: usize,
    tick: u64,
    entries: HashMap<K, (u64, V)>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    /// Create a cache bounded to `capacity` entries.
    ///
    /// A zero capacity is clamped to one so that an insert always succeeds.
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: HashMap::new(),
        }
    }

    /// Look up an entry, marking it most recently used.
    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|slot| {
            slot.0 = tick;
            &mut slot.1
        })
    }

    /// Insert an entry, evicting the least-recently-used one if full.
    pub(crate) fn insert(&mut self, key: K, value: V) {
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(key, (self.tick, value));
    }

    /// Remove an entry if present.
    pub(crate) fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (tick, _))| *tick)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = LruCache::new(4);
        cache.insert("a", 1);
        assert_eq!(cache.get_mut(&"a"), Some(&mut 1));
        assert_eq!(cache.get_mut(&"b"), None);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // Touch "a" so "b" is now the oldest.
        cache.get_mut(&"a");
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_mut(&"a").is_some());
        assert!(cache.get_mut(&"b").is_none());
        assert!(cache.get_mut(&"c").is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        cache.insert("a", 10);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_mut(&"a"), Some(&mut 10));
        assert!(cache.get_mut(&"b").is_some());
    }

    #[test]
    fn test_strict_eviction_order() {
        let mut cache = LruCache::new(3);
        for key in ["a", "b", "c"] {
            cache.insert(key, 0);
        }
        cache.get_mut(&"a");
        cache.get_mut(&"b");
        cache.insert("d", 0);
        assert!(cache.get_mut(&"c").is_none());
        cache.insert("e", 0);
        assert!(cache.get_mut(&"a").is_none());
    }

    #[test]
    fn test_remove_is_tolerant() {
        let mut cache: LruCache<&str, i32> = LruCache::new(2);
        assert_eq!(cache.remove(&"missing"), None);
        cache.insert("a", 1);
        assert_eq!(cache.remove(&"a"), Some(1));
        assert_eq!(cache.remove(&"a"), None);
    }
}
