//! Cache-aside reads and write-through writes over a [`StorageBackend`].
//!
//! The backend is always authoritative. Reads are served from memory when
//! possible and populate the cache on a miss; writes reach the backend first
//! and only then update the cache. When a backend write fails the cached entry
//! for that key is dropped, so the cache never holds a value the backend might
//! not.

mod clock;
mod entries;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::{BatchOp, StorageBackend};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::key::{DataType, ErasedKey, TypedKey};
use crate::logging::{debug, warn};
use crate::transaction::{Staged, WriteBuffer};

pub use self::clock::{Clock, ManualClock, SystemClock};
use self::entries::{CachedValue, ExpiringLru, Lookup};

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that found a value in the backend and cached it.
    pub loads: u64,
    /// Entries dropped for size or idleness.
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

/// A bounded, idle-expiring cache in front of a backend.
pub struct CacheLayer<B> {
    backend: B,
    entries: Mutex<ExpiringLru>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<B: StorageBackend> CacheLayer<B> {
    pub fn new(backend: B, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = usize::try_from(config.max_size).unwrap_or(usize::MAX);
        debug!(max_size = config.max_size, expiration_seconds = config.expiration_seconds, "cache ready");
        Self {
            backend,
            entries: Mutex::new(ExpiringLru::new(capacity, config.expiration())),
            clock,
            counters: Counters::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Cache-aside read.
    pub async fn get<T: DataType>(&self, key: &TypedKey<T>) -> Result<Option<T>> {
        let erased = key.erase();
        let lookup = self.entries.lock().get(&erased, self.clock.now());

        match lookup {
            Lookup::Hit(value) => match value.downcast::<T>() {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "cache hit");
                    return Ok(Some(T::clone(&value)));
                }
                Err(_) => {
                    // Same descriptor, different Rust type: drop it and reload.
                    warn!(key = %key, descriptor = %key.descriptor(), "cached value has a different type, reloading");
                    self.entries.lock().invalidate(key.name());
                }
            },
            Lookup::Expired => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "cache entry expired");
            }
            Lookup::Miss => {}
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "cache miss, fetching from backend");

        // Opened after any invalidation above, so the reload can be cached.
        let load = PendingLoad::begin(&self.entries, &erased.name);
        let Some(value) = self.backend.get(key).await? else {
            return Ok(None);
        };

        let cached: CachedValue = Arc::new(value.clone());
        match load.populate(&erased, cached, self.clock.now()) {
            Some(evicted) => {
                self.counters.loads.fetch_add(1, Ordering::Relaxed);
                self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            }
            None => debug!(key = %key, "key written during load, not caching"),
        }
        Ok(Some(value))
    }

    /// Write-through: backend first, then cache.
    pub async fn set<T: DataType>(&self, key: &TypedKey<T>, value: T) -> Result<()> {
        debug!(key = %key, "writing value through cache");
        if let Err(err) = self.backend.set(key, &value).await {
            self.entries.lock().invalidate(key.name());
            return Err(err);
        }

        let evicted = self
            .entries
            .lock()
            .insert(&key.erase(), Arc::new(value), self.clock.now());
        self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Remove from the backend, then drop the cache entry whatever happened.
    pub async fn remove<T: DataType>(&self, key: &TypedKey<T>) -> Result<()> {
        debug!(key = %key, "removing value and invalidating cache");
        let result = self.backend.remove(key).await;
        self.entries.lock().invalidate(key.name());
        result
    }

    /// Write a committed transaction buffer through to the backend as one
    /// batch, then mirror it into the cache.
    ///
    /// Every value is encoded before anything is written, so an encoding
    /// failure leaves both backend and cache untouched.
    pub(crate) async fn apply(&self, buffer: WriteBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let registry = self.backend.registry();
        let mut ops = Vec::with_capacity(buffer.len());
        for (key, staged) in buffer.iter() {
            match staged {
                Staged::Put { value, encode } => {
                    let bytes = encode(registry, key, value.as_ref())?;
                    ops.push(BatchOp::Store {
                        name: key.name.clone(),
                        bytes,
                    });
                }
                Staged::Delete => ops.push(BatchOp::Delete {
                    name: key.name.clone(),
                }),
            }
        }

        debug!(ops = ops.len(), "applying transaction buffer");
        if let Err(err) = self.backend.apply_batch(ops).await {
            let mut entries = self.entries.lock();
            for (key, _) in buffer.iter() {
                entries.invalidate(&key.name);
            }
            return Err(err);
        }

        let now = self.clock.now();
        let mut entries = self.entries.lock();
        for (key, staged) in buffer.into_entries() {
            match staged {
                Staged::Put { value, .. } => {
                    let evicted = entries.insert(&key, value, now);
                    self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                }
                Staged::Delete => entries.invalidate(&key.name),
            }
        }
        Ok(())
    }

    /// Drop every idle entry now instead of on next access.
    pub fn purge_expired(&self) -> usize {
        let purged = self.entries.lock().purge_expired(self.clock.now());
        self.counters.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn invalidate(&self, key: &ErasedKey) {
        self.entries.lock().invalidate(&key.name);
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }

    /// Whether a live entry for `key` is cached. Does not count as an access.
    pub fn contains(&self, key: &ErasedKey) -> bool {
        self.entries.lock().contains(key, self.clock.now())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            loads: self.counters.loads.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }

    /// Invalidate everything, then shut the backend down.
    pub async fn shutdown(&self) {
        debug!("cache shutdown, invalidating all entries");
        self.invalidate_all();
        self.backend.shutdown().await;
    }
}

/// An open backend read of one name. Closed on drop, so a cancelled read
/// does not leave its name tracked.
struct PendingLoad<'a> {
    entries: &'a Mutex<ExpiringLru>,
    name: &'a str,
    version: u64,
}

impl<'a> PendingLoad<'a> {
    fn begin(entries: &'a Mutex<ExpiringLru>, name: &'a str) -> Self {
        let version = entries.lock().begin_load(name);
        Self {
            entries,
            name,
            version,
        }
    }

    fn populate(&self, key: &ErasedKey, value: CachedValue, now: Instant) -> Option<usize> {
        self.entries.lock().populate(key, value, now, self.version)
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        self.entries.lock().end_load(self.name);
    }
}

impl<B> std::fmt::Debug for CacheLayer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLayer")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}
