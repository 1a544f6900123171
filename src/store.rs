//! The public data store facade.

use std::future::Future;
use std::panic::resume_unwind;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};

use crate::backend::{RelationalBackend, StorageBackend};
use crate::cache::{CacheLayer, CacheStats, Clock, SystemClock};
use crate::codec::SerializerRegistry;
use crate::config::{CacheConfig, DataConfig, ProviderKind};
use crate::error::{DataError, Result};
use crate::key::{DataType, KeyPrefix, TypedKey};
use crate::logging::{debug, info, warn};
use crate::transaction::{Transaction, TxOutcome, WriteBuffer};

/// Typed key-value store: a cache in front of a persistent backend.
///
/// Handles are cheap to clone and share one cache, one backend and one
/// commit lock.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> typed_store::Result<()> {
/// use typed_store::{DataConfig, DataError, DataStore, key};
///
/// let store = DataStore::open(DataConfig::from_file("data.toml")?).await?;
/// let visits = key::<u64>("visits");
///
/// let total = store
///     .transaction(move |tx| {
///         Box::pin(async move {
///             tx.update(&visits, |v| v.unwrap_or(0) + 1).await
///         })
///     })
///     .await?;
/// # let _: u64 = total;
/// # Ok::<(), DataError>(())
/// # }
/// ```
pub struct DataStore<B> {
    cache: Arc<CacheLayer<B>>,
    apply_lock: Arc<Mutex<()>>,
}

impl<B> Clone for DataStore<B> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            apply_lock: Arc::clone(&self.apply_lock),
        }
    }
}

impl DataStore<RelationalBackend> {
    /// Connect the configured provider with the default codecs.
    pub async fn open(config: DataConfig) -> Result<Self> {
        Self::open_with_registry(config, Arc::new(SerializerRegistry::default())).await
    }

    /// Connect the configured provider with a caller-built registry.
    ///
    /// Failing to reach the backend here is fatal: the error is returned and
    /// no store is built.
    pub async fn open_with_registry(
        config: DataConfig,
        registry: Arc<SerializerRegistry>,
    ) -> Result<Self> {
        let backend = match config.provider {
            ProviderKind::Postgres => RelationalBackend::connect(config.postgres, registry).await?,
        };
        info!(provider = ?config.provider, "data store ready");
        Ok(Self::with_backend(backend, &config.cache, Arc::new(SystemClock)))
    }
}

impl<B: StorageBackend> DataStore<B> {
    pub fn with_backend(backend: B, cache: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Arc::new(CacheLayer::new(backend, cache, clock)),
            apply_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get<T: DataType>(&self, key: &TypedKey<T>) -> Result<Option<T>> {
        self.cache.get(key).await
    }

    /// `default` if nothing is stored for `key`. Errors are not defaulted.
    pub async fn get_or_default<T: DataType>(&self, key: &TypedKey<T>, default: T) -> Result<T> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Run `block` against a fresh write buffer and apply the buffer only if
    /// the block returns `Ok`.
    ///
    /// The block runs on its own task. Dropping the returned future before the
    /// block finishes aborts that task and discards the buffer. Once the block
    /// has finished, applying the buffer runs to completion. Applies from
    /// concurrent transactions are serialized, and each one reaches the
    /// backend as a single batch.
    ///
    /// The block's own error is returned unchanged. A failure to apply is
    /// converted into `E` through `From<DataError>`.
    pub async fn transaction<R, E, F>(&self, block: F) -> Result<R, E>
    where
        F: for<'t> FnOnce(&'t mut Transaction<B>) -> BoxFuture<'t, Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: From<DataError> + Send + 'static,
    {
        let cache = Arc::clone(&self.cache);
        let task = AbortOnDrop(tokio::spawn(async move {
            let mut tx = Transaction::new(cache);
            let result = block(&mut tx).await;
            tx.conclude(result)
        }));

        match joined(task.await)? {
            TxOutcome::Abort(err) => Err(err),
            TxOutcome::Commit { value, buffer } => {
                self.commit(buffer).await?;
                Ok(value)
            }
        }
    }

    async fn commit(&self, buffer: WriteBuffer) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }

        let cache = Arc::clone(&self.cache);
        let lock = Arc::clone(&self.apply_lock);
        // Detached: dropping the handle does not stop the apply.
        let task = tokio::spawn(async move {
            let _guard = lock.lock().await;
            debug!(keys = buffer.len(), "committing transaction");
            cache.apply(buffer).await
        });
        joined(task.await)?
    }

    /// Every stored key name.
    pub async fn key_names(&self) -> Result<Vec<String>> {
        self.cache.backend().list_key_names().await
    }

    /// Keys for every stored name starting with the prefix.
    pub async fn key_names_with_prefix<T: DataType>(
        &self,
        prefix: &KeyPrefix<T>,
    ) -> Result<Vec<TypedKey<T>>> {
        let names = self.key_names().await?;
        Ok(names
            .iter()
            .filter(|name| prefix.matches(name))
            .map(|name| prefix.key_for(name))
            .collect())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache(&self) -> &CacheLayer<B> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        self.cache.backend()
    }

    /// Drop the cache and release the backend. Later operations fail.
    pub async fn shutdown(&self) {
        info!("shutting down data store");
        self.cache.shutdown().await;
    }
}

impl<B> std::fmt::Debug for DataStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Panics resume on the caller; cancellation becomes an error.
fn joined<T>(result: std::result::Result<T, JoinError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => resume_unwind(err.into_panic()),
        Err(_) => {
            warn!("transaction task cancelled, buffer discarded");
            Err(DataError::TransactionCancelled)
        }
    }
}

/// A join handle that aborts its task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::key::key;

    fn store() -> DataStore<MemoryBackend> {
        DataStore::with_backend(
            MemoryBackend::default(),
            &CacheConfig::default(),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_get_or_default() -> Result<()> {
        let store = store();
        let level = key::<u8>("level");
        assert_eq!(store.get_or_default(&level, 1).await?, 1);

        store
            .transaction(move |tx| {
                Box::pin(async move {
                    tx.set(&level, 4);
                    Ok::<_, DataError>(())
                })
            })
            .await?;
        assert_eq!(store.get_or_default(&key::<u8>("level"), 1).await?, 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_or_default_does_not_hide_errors() {
        let store = store();
        store.backend().set_failing(true);
        let result = store.get_or_default(&key::<u8>("level"), 1).await;
        assert!(result.is_err_and(|e| e.is_connectivity()));
    }

    #[tokio::test]
    async fn test_empty_transaction_writes_nothing() -> Result<()> {
        let store = store();
        let value = store
            .transaction(|_tx| Box::pin(async { Ok::<_, DataError>(7) }))
            .await?;
        assert_eq!(value, 7);
        assert_eq!(store.backend().write_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_prefix_listing() -> Result<()> {
        let store = store();
        store
            .transaction(|tx| {
                Box::pin(async move {
                    tx.set(&key::<u32>("score.alice"), 3);
                    tx.set(&key::<u32>("score.bob"), 5);
                    tx.set(&key::<String>("name"), "x".to_string());
                    Ok::<_, DataError>(())
                })
            })
            .await?;

        let keys = store
            .key_names_with_prefix(&KeyPrefix::<u32>::new("score."))
            .await?;
        let names: Vec<&str> = keys.iter().map(TypedKey::name).collect();
        assert_eq!(names, ["score.alice", "score.bob"]);
        Ok(())
    }
}
