//! Bounded key/value cache with per-entry time-to-live.
//!
//! Expiry is checked lazily on read; there is no background sweeper. When
//! full, inserting a new key evicts the least recently used entry.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

/// Fixed-capacity cache whose entries expire after `ttl`.
pub struct TtlCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    clock: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    /// Value for `key`, if present and not expired.
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) => now.duration_since(entry.inserted_at) >= self.ttl,
            None => return None,
        };

        if expired {
            self.entries.remove(key);
            return None;
        }

        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|entry| {
            entry.last_used = clock;
            entry.value.clone()
        })
    }

    /// Insert or overwrite `key`, resetting its age.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict(now);
        }

        self.clock += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_used: self.clock,
            },
        );
    }

    /// Drop expired entries first; if none, the least recently used one.
    fn evict(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| now.duration_since(e.inserted_at) < ttl);
        if self.entries.len() < self.capacity {
            return;
        }

        let lru = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| k.clone());
        if let Some(key) = lru {
            self.entries.remove(&key);
        }
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
    fn test_entry_expires_after_ttl() {
        let mut cache = TtlCache::new(10, Duration::from_secs(5));
        let start = Instant::now();
        cache.insert_at("ETH/BTC", 1, start);

        assert_eq!(cache.get_at(&"ETH/BTC", start + Duration::from_secs(4)), Some(1));
        assert_eq!(cache.get_at(&"ETH/BTC", start + Duration::from_secs(5)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert_at("a", 1, now);
        cache.insert_at("b", 2, now);

        // touch "a" so "b" becomes least recently used
        assert_eq!(cache.get_at(&"a", now), Some(1));
        cache.insert_at("c", 3, now);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"b", now), None);
        assert_eq!(cache.get_at(&"a", now), Some(1));
        assert_eq!(cache.get_at(&"c", now), Some(3));
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let mut cache = TtlCache::new(2, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert_at("a", 1, now);
        cache.insert_at("b", 2, now);
        cache.insert_at("a", 10, now);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"a", now), Some(10));
        assert_eq!(cache.get_at(&"b", now), Some(2));
    }

    #[test]
    fn test_expired_entries_are_evicted_first() {
        let mut cache = TtlCache::new(2, Duration::from_secs(5));
        let start = Instant::now();
        cache.insert_at("old", 1, start);
        cache.insert_at("fresh", 2, start + Duration::from_secs(4));
        // "fresh" was used least recently but "old" has expired
        cache.get_at(&"old", start + Duration::from_secs(1));
        cache.insert_at("new", 3, start + Duration::from_secs(6));

        assert_eq!(cache.get_at(&"fresh", start + Duration::from_secs(6)), Some(2));
        assert_eq!(cache.get_at(&"new", start + Duration::from_secs(6)), Some(3));
    }
}
