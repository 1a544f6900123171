//! In-memory backend for tests and embedding.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{BatchOp, StorageBackend};
use crate::codec::SerializerRegistry;
use crate::error::{DataError, Result};
use crate::logging::debug;

/// A [`StorageBackend`] over a map in process memory.
///
/// Counts fetches so tests can observe how often the cache falls through, and
/// can be switched into a failing mode to simulate an unreachable backend.
pub struct MemoryBackend {
    rows: RwLock<BTreeMap<String, Vec<u8>>>,
    registry: Arc<SerializerRegistry>,
    fetches: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new(registry: Arc<SerializerRegistry>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            registry,
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of rows written or deleted so far, batches included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent operation fail as if the backend were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Raw bytes for `name`, bypassing counters and failure mode.
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.rows.read().get(name).cloned()
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.failing.load(Ordering::SeqCst) {
            return Err(DataError::Connectivity(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Arc::new(SerializerRegistry::default()))
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("rows", &self.rows.read().len())
            .finish_non_exhaustive()
    }
}

impl StorageBackend for MemoryBackend {
    type Config = ();

    async fn connect(_config: Self::Config, registry: Arc<SerializerRegistry>) -> Result<Self> {
        Ok(Self::new(registry))
    }

    fn registry(&self) -> &SerializerRegistry {
        &self.registry
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.rows.read().get(name).cloned())
    }

    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.write().insert(name.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.check()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rows.write().remove(name);
        Ok(())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.check()?;
        let mut rows = self.rows.write();
        for op in ops {
            self.writes.fetch_add(1, Ordering::SeqCst);
            match op {
                BatchOp::Store { name, bytes } => {
                    rows.insert(name, bytes);
                }
                BatchOp::Delete { name } => {
                    rows.remove(&name);
                }
            }
        }
        Ok(())
    }

    async fn list_key_names(&self) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.rows.read().keys().cloned().collect())
    }

    async fn shutdown(&self) {
        debug!("shutting down memory backend");
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::key;

    #[tokio::test]
    async fn test_typed_roundtrip_and_counters() -> Result<()> {
        let backend = MemoryBackend::default();
        let coins = key::<i64>("coins");

        backend.set(&coins, &42).await?;
        assert_eq!(backend.get(&coins).await?, Some(42));
        assert_eq!(backend.fetch_count(), 1);
        assert_eq!(backend.write_count(), 1);

        backend.remove(&coins).await?;
        assert_eq!(backend.get(&coins).await?, None);
        assert!(backend.raw("coins").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failing_mode_surfaces_connectivity() {
        let backend = MemoryBackend::default();
        backend.set_failing(true);

        let result = backend.get(&key::<i64>("coins")).await;
        assert!(result.is_err_and(|e| e.is_connectivity()));
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() -> Result<()> {
        let backend = MemoryBackend::default();
        backend
            .apply_batch(vec![
                BatchOp::Store { name: "a".into(), bytes: vec![1] },
                BatchOp::Store { name: "b".into(), bytes: vec![2] },
                BatchOp::Delete { name: "a".into() },
            ])
            .await?;

        assert_eq!(backend.list_key_names().await?, vec!["b".to_string()]);
        Ok(())
    }
}
