//! Persistence backends.
//!
//! A [`StorageBackend`] stores opaque bytes under key names. The typed
//! operations ([`get`](StorageBackend::get), [`set`](StorageBackend::set),
//! [`remove`](StorageBackend::remove)) are provided on top of the byte-level
//! ones and route every value through the backend's [`SerializerRegistry`].
//!
//! Implementations must ensure:
//!
//! - **Overwrite semantics**: `store` replaces any previous bytes for a name.
//! - **Idempotent delete**: deleting a missing name is not an error.
//! - **Batch atomicity**: `apply_batch` applies every operation or none.
//! - **Error propagation**: failures are logged and returned, never mapped to
//!   "absent".

mod memory;
mod relational;

use std::future::Future;
use std::sync::Arc;

use crate::codec::SerializerRegistry;
use crate::error::{DataError, Result};
use crate::key::{DataType, TypedKey};
use crate::logging::{debug, error};

pub use memory::MemoryBackend;
pub use relational::{DATA_TABLE, RelationalBackend};

/// One write in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Store { name: String, bytes: Vec<u8> },
    Delete { name: String },
}

impl BatchOp {
    pub fn name(&self) -> &str {
        match self {
            Self::Store { name, .. } | Self::Delete { name } => name,
        }
    }
}

/// Pluggable persistence contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// Backend-specific connection settings.
    type Config: Send;

    /// Connect, verify the backend is reachable and prepare its schema.
    fn connect(
        config: Self::Config,
        registry: Arc<SerializerRegistry>,
    ) -> impl Future<Output = Result<Self>> + Send
    where
        Self: Sized;

    /// Codecs used by the typed operations.
    fn registry(&self) -> &SerializerRegistry;

    /// Bytes stored under `name`, if any.
    fn fetch(&self, name: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Insert or replace the bytes stored under `name`.
    fn store(&self, name: &str, bytes: Vec<u8>) -> impl Future<Output = Result<()>> + Send;

    /// Delete `name`; deleting a missing name succeeds.
    fn delete(&self, name: &str) -> impl Future<Output = Result<()>> + Send;

    /// Apply `ops` in order as a single unit.
    fn apply_batch(&self, ops: Vec<BatchOp>) -> impl Future<Output = Result<()>> + Send;

    /// Every stored key name.
    fn list_key_names(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Release pooled resources. Later calls fail with a connectivity error.
    fn shutdown(&self) -> impl Future<Output = ()> + Send;

    /// Fetch and decode the value stored for `key`.
    fn get<T: DataType>(
        &self,
        key: &TypedKey<T>,
    ) -> impl Future<Output = Result<Option<T>>> + Send {
        async move {
            debug!(key = %key, "loading value from backend");
            let Some(bytes) = self.fetch(key.name()).await? else {
                debug!(key = %key, "no stored value");
                return Ok(None);
            };

            match self.registry().decode::<T>(key.descriptor(), &bytes) {
                Ok(value) => Ok(Some(value)),
                Err(source) => {
                    error!(key = %key, descriptor = %key.descriptor(), error = %source, "failed to decode stored value");
                    Err(DataError::serialization(key.erase(), source))
                }
            }
        }
    }

    /// Encode and store `value` for `key`.
    fn set<T: DataType>(
        &self,
        key: &TypedKey<T>,
        value: &T,
    ) -> impl Future<Output = Result<()>> + Send {
        async move {
            let bytes = self
                .registry()
                .encode(key.descriptor(), value)
                .map_err(|source| {
                    error!(key = %key, descriptor = %key.descriptor(), error = %source, "failed to encode value");
                    DataError::serialization(key.erase(), source)
                })?;
            debug!(key = %key, size = bytes.len(), "storing value");
            self.store(key.name(), bytes).await
        }
    }

    /// Delete the row for `key`.
    fn remove<T: DataType>(&self, key: &TypedKey<T>) -> impl Future<Output = Result<()>> + Send {
        async move {
            debug!(key = %key, "removing value");
            self.delete(key.name()).await
        }
    }
}
