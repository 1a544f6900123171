//! Size-bounded, access-expiring entry map.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::key::{ErasedKey, TypeDescriptor};

pub(crate) type CachedValue = Arc<dyn Any + Send + Sync>;

struct Entry {
    descriptor: TypeDescriptor,
    value: CachedValue,
    last_access: Instant,
}

/// Result of a lookup.
pub(crate) enum Lookup {
    Hit(CachedValue),
    Miss,
    /// The entry had been idle for the whole expiration window and was dropped.
    Expired,
}

/// Backend reads in flight for one name.
struct Loading {
    loaders: usize,
    /// Bumped by every write or invalidation of the name while loads are open.
    version: u64,
}

/// Decoded values keyed by key name.
///
/// One entry per name mirrors the one row per name in the backend: writing a
/// name through any descriptor replaces whatever was cached for it, and a
/// lookup only hits when the cached descriptor matches the key's.
///
/// A reader that misses opens a load for the name and gets its version. It
/// may only populate the cache if no write or invalidation of that same name
/// happened in between, so a slow read cannot overwrite a newer write. Loads
/// of other names never interfere. Versions are only tracked for names with
/// an open load.
pub(crate) struct ExpiringLru {
    entries: LruCache<String, Entry>,
    loading: HashMap<String, Loading>,
    capacity: usize,
    ttl: Duration,
}

impl ExpiringLru {
    pub(crate) fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: LruCache::unbounded(),
            loading: HashMap::new(),
            capacity,
            ttl,
        }
    }

    /// Register a backend read of `name`; returns the version to populate with.
    pub(crate) fn begin_load(&mut self, name: &str) -> u64 {
        let slot = self
            .loading
            .entry(name.to_string())
            .or_insert(Loading {
                loaders: 0,
                version: 0,
            });
        slot.loaders += 1;
        slot.version
    }

    /// Close a load opened with [`begin_load`](Self::begin_load).
    pub(crate) fn end_load(&mut self, name: &str) {
        let Some(slot) = self.loading.get_mut(name) else {
            return;
        };
        slot.loaders = slot.loaders.saturating_sub(1);
        if slot.loaders == 0 {
            self.loading.remove(name);
        }
    }

    #[cfg(test)]
    pub(crate) fn open_loads(&self) -> usize {
        self.loading.values().map(|slot| slot.loaders).sum()
    }

    fn mark_written(&mut self, name: &str) {
        if let Some(slot) = self.loading.get_mut(name) {
            slot.version += 1;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&mut self, key: &ErasedKey, now: Instant) -> Lookup {
        let ttl = self.ttl;
        let Some(entry) = self.entries.get_mut(&key.name) else {
            return Lookup::Miss;
        };

        if now.saturating_duration_since(entry.last_access) >= ttl {
            self.entries.pop(&key.name);
            return Lookup::Expired;
        }
        if entry.descriptor != key.descriptor {
            return Lookup::Miss;
        }

        entry.last_access = now;
        Lookup::Hit(Arc::clone(&entry.value))
    }

    /// Live-entry check that leaves recency and access time alone.
    pub(crate) fn contains(&self, key: &ErasedKey, now: Instant) -> bool {
        self.entries.peek(&key.name).is_some_and(|entry| {
            entry.descriptor == key.descriptor
                && now.saturating_duration_since(entry.last_access) < self.ttl
        })
    }

    /// Insert or replace after a write; returns how many entries were evicted
    /// for size.
    pub(crate) fn insert(&mut self, key: &ErasedKey, value: CachedValue, now: Instant) -> usize {
        self.mark_written(&key.name);
        self.put(key, value, now)
    }

    fn put(&mut self, key: &ErasedKey, value: CachedValue, now: Instant) -> usize {
        if self.capacity == 0 {
            return 0;
        }

        self.entries.put(
            key.name.clone(),
            Entry {
                descriptor: key.descriptor.clone(),
                value,
                last_access: now,
            },
        );

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_lru();
            evicted += 1;
        }
        evicted
    }

    /// Cache a loaded value, unless `key`'s name was written or invalidated
    /// since its load began at `version`.
    pub(crate) fn populate(
        &mut self,
        key: &ErasedKey,
        value: CachedValue,
        now: Instant,
        version: u64,
    ) -> Option<usize> {
        let current = self.loading.get(&key.name).map(|slot| slot.version);
        (current == Some(version)).then(|| self.put(key, value, now))
    }

    pub(crate) fn invalidate(&mut self, name: &str) {
        self.mark_written(name);
        self.entries.pop(name);
    }

    pub(crate) fn clear(&mut self) {
        for slot in self.loading.values_mut() {
            slot.version += 1;
        }
        self.entries.clear();
    }

    /// Drop every entry idle for the whole window; returns how many.
    pub(crate) fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.last_access) >= self.ttl)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &expired {
            self.entries.pop(name);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{DataType, key};

    fn value(v: i32) -> CachedValue {
        Arc::new(v)
    }

    fn hit_value(lookup: Lookup) -> Option<i32> {
        match lookup {
            Lookup::Hit(v) => v.downcast_ref::<i32>().copied(),
            Lookup::Miss | Lookup::Expired => None,
        }
    }

    #[test]
    fn test_lru_bound_evicts_least_recent() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(2, Duration::from_secs(60));
        let (a, b, c) = (key::<i32>("a").erase(), key::<i32>("b").erase(), key::<i32>("c").erase());

        cache.insert(&a, value(1), now);
        cache.insert(&b, value(2), now);
        assert_eq!(hit_value(cache.get(&a, now)), Some(1));
        assert_eq!(cache.insert(&c, value(3), now), 1);

        assert_eq!(cache.len(), 2);
        assert!(matches!(cache.get(&b, now), Lookup::Miss));
        assert_eq!(hit_value(cache.get(&a, now)), Some(1));
    }

    #[test]
    fn test_expiry_is_measured_from_last_access() {
        let start = Instant::now();
        let ttl = Duration::from_secs(10);
        let mut cache = ExpiringLru::new(8, ttl);
        let a = key::<i32>("a").erase();

        cache.insert(&a, value(1), start);
        assert_eq!(hit_value(cache.get(&a, start + Duration::from_secs(8))), Some(1));
        // Touched at 8s, so still alive at 16s.
        assert_eq!(hit_value(cache.get(&a, start + Duration::from_secs(16))), Some(1));
        assert!(matches!(cache.get(&a, start + Duration::from_secs(27)), Lookup::Expired));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_descriptor_mismatch_misses_and_write_replaces() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(8, Duration::from_secs(60));
        let as_int = key::<i32>("shared").erase();
        let as_text = ErasedKey {
            name: "shared".into(),
            descriptor: String::descriptor(),
        };

        cache.insert(&as_int, value(1), now);
        assert!(matches!(cache.get(&as_text, now), Lookup::Miss));

        cache.insert(&as_text, Arc::new("one".to_string()), now);
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.get(&as_int, now), Lookup::Miss));
    }

    #[test]
    fn test_populate_skips_after_write_to_same_name() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(8, Duration::from_secs(60));
        let a = key::<i32>("a").erase();

        let version = cache.begin_load("a");
        cache.insert(&a, value(2), now);
        assert_eq!(cache.populate(&a, value(1), now, version), None);
        cache.end_load("a");

        assert_eq!(hit_value(cache.get(&a, now)), Some(2));
        assert_eq!(cache.open_loads(), 0);
    }

    #[test]
    fn test_loads_of_different_names_both_populate() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(8, Duration::from_secs(60));
        let (a, b) = (key::<i32>("a").erase(), key::<i32>("b").erase());

        let va = cache.begin_load("a");
        let vb = cache.begin_load("b");
        assert_eq!(cache.populate(&a, value(1), now, va), Some(0));
        cache.insert(&key::<i32>("c").erase(), value(3), now);
        assert_eq!(cache.populate(&b, value(2), now, vb), Some(0));
        cache.end_load("a");
        cache.end_load("b");

        assert_eq!(hit_value(cache.get(&a, now)), Some(1));
        assert_eq!(hit_value(cache.get(&b, now)), Some(2));
        assert_eq!(cache.open_loads(), 0);
    }

    #[test]
    fn test_concurrent_loads_of_one_name_both_populate() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(8, Duration::from_secs(60));
        let a = key::<i32>("a").erase();

        let first = cache.begin_load("a");
        let second = cache.begin_load("a");
        assert_eq!(cache.populate(&a, value(1), now, first), Some(0));
        assert_eq!(cache.populate(&a, value(1), now, second), Some(0));
        cache.end_load("a");
        assert_eq!(cache.open_loads(), 1);
        cache.end_load("a");
        assert_eq!(cache.open_loads(), 0);
    }

    #[test]
    fn test_clear_voids_open_loads() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(8, Duration::from_secs(60));
        let a = key::<i32>("a").erase();

        let version = cache.begin_load("a");
        cache.clear();
        assert_eq!(cache.populate(&a, value(1), now, version), None);
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let now = Instant::now();
        let mut cache = ExpiringLru::new(0, Duration::from_secs(60));
        let a = key::<i32>("a").erase();
        cache.insert(&a, value(1), now);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let start = Instant::now();
        let mut cache = ExpiringLru::new(8, Duration::from_secs(5));
        cache.insert(&key::<i32>("a").erase(), value(1), start);
        cache.insert(&key::<i32>("b").erase(), value(2), start + Duration::from_secs(4));

        assert_eq!(cache.purge_expired(start + Duration::from_secs(6)), 1);
        assert_eq!(cache.len(), 1);
    }
}
