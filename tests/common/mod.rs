//! Common test utilities and fixtures.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_store::{
    CacheConfig, DataError, DataStore, DataType, ManualClock, MemoryBackend, RelationalBackend,
    SerializerRegistry, TypedKey,
};

// =============================================================================
// Value Types
// =============================================================================

/// A record with nested and variable-length fields for structural codec tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub level: u32,
    pub titles: Vec<String>,
}

impl DataType for Profile {}

pub fn profile(name: &str, level: u32) -> Profile {
    Profile {
        name: name.to_string(),
        level,
        titles: vec!["founder".to_string()],
    }
}

// =============================================================================
// Store Fixtures
// =============================================================================

/// A store over [`MemoryBackend`] with a clock the test controls.
pub struct TestStore {
    pub store: DataStore<MemoryBackend>,
    pub clock: ManualClock,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_cache(CacheConfig::default())
    }

    pub fn with_cache(cache: CacheConfig) -> Self {
        let clock = ManualClock::new();
        let store = DataStore::with_backend(
            MemoryBackend::default(),
            &cache,
            Arc::new(clock.clone()),
        );
        Self { store, clock }
    }

    pub fn backend(&self) -> &MemoryBackend {
        self.store.backend()
    }

    pub fn advance(&self, seconds: u64) {
        self.clock.advance(Duration::from_secs(seconds));
    }
}

pub fn cache_config(max_size: u64, expiration_seconds: u64) -> CacheConfig {
    CacheConfig {
        max_size,
        expiration_seconds,
    }
}

/// Commit a single write through a transaction.
pub async fn put<B, T>(store: &DataStore<B>, key: &TypedKey<T>, value: T) -> Result<(), DataError>
where
    B: typed_store::StorageBackend,
    T: DataType,
{
    let key = key.clone();
    store
        .transaction(move |tx| {
            Box::pin(async move {
                tx.set(&key, value);
                Ok::<_, DataError>(())
            })
        })
        .await
}

/// Commit a single delete through a transaction.
pub async fn delete<B, T>(store: &DataStore<B>, key: &TypedKey<T>) -> Result<(), DataError>
where
    B: typed_store::StorageBackend,
    T: DataType,
{
    let key = key.clone();
    store
        .transaction(move |tx| {
            Box::pin(async move {
                tx.remove(&key);
                Ok::<_, DataError>(())
            })
        })
        .await
}

// =============================================================================
// SQLite Fixtures
// =============================================================================

pub async fn sqlite_memory() -> Result<RelationalBackend, DataError> {
    RelationalBackend::connect_url(
        "sqlite::memory:",
        1,
        Duration::from_secs(5),
        Arc::new(SerializerRegistry::default()),
    )
    .await
}

pub async fn sqlite_file(path: &std::path::Path) -> Result<RelationalBackend, DataError> {
    let url = format!("sqlite://{}?mode=rwc", path.display());
    RelationalBackend::connect_url(
        &url,
        4,
        Duration::from_secs(5),
        Arc::new(SerializerRegistry::default()),
    )
    .await
}
