//! Buffered transactions.
//!
//! A [`Transaction`] collects writes in a [`WriteBuffer`] instead of sending
//! them to the cache. Reads check the buffer first, so a transaction sees its
//! own writes, and fall through to the cache for keys it has not touched.
//! Nothing in the buffer is visible outside the transaction until it is
//! applied, which only happens when the block returns `Ok`.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::backend::StorageBackend;
use crate::cache::CacheLayer;
use crate::codec::SerializerRegistry;
use crate::error::{DataError, Result};
use crate::key::{DataType, ErasedKey, TypedKey};
use crate::logging::{debug, error, trace};

type StagedValue = Arc<dyn Any + Send + Sync>;

/// Encodes a staged value with the concrete type it was staged as.
pub(crate) type EncodeFn =
    fn(&SerializerRegistry, &ErasedKey, &(dyn Any + Send + Sync)) -> Result<Vec<u8>>;

/// A buffered write.
pub(crate) enum Staged {
    Put { value: StagedValue, encode: EncodeFn },
    /// Tombstone.
    Delete,
}

fn encode_value<T: DataType>(
    registry: &SerializerRegistry,
    key: &ErasedKey,
    value: &(dyn Any + Send + Sync),
) -> Result<Vec<u8>> {
    let value = value
        .downcast_ref::<T>()
        .ok_or_else(|| DataError::TypeMismatch {
            key: key.clone(),
            expected: type_name::<T>(),
            found: "a value of another type".to_string(),
        })?;

    registry.encode(&key.descriptor, value).map_err(|source| {
        error!(key = %key, descriptor = %key.descriptor, error = %source, "failed to encode buffered value");
        DataError::serialization(key.clone(), source)
    })
}

struct Buffered {
    key: ErasedKey,
    staged: Staged,
}

/// Insertion-ordered writes of one transaction, one entry per key name.
///
/// Entries are keyed by name because names are what the backend stores: a
/// second write to the same name replaces the first in place, whichever
/// descriptor it came through.
#[derive(Default)]
pub struct WriteBuffer {
    entries: IndexMap<String, Buffered>,
}

impl WriteBuffer {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Keys touched so far, in first-write order.
    pub fn keys(&self) -> impl Iterator<Item = &ErasedKey> {
        self.entries.values().map(|b| &b.key)
    }

    /// Whether `name` is buffered as a delete.
    pub fn is_tombstone(&self, name: &str) -> bool {
        matches!(
            self.entries.get(name),
            Some(Buffered {
                staged: Staged::Delete,
                ..
            })
        )
    }

    pub(crate) fn put<T: DataType>(&mut self, key: &TypedKey<T>, value: T) {
        self.stage(
            key.erase(),
            Staged::Put {
                value: Arc::new(value),
                encode: encode_value::<T>,
            },
        );
    }

    pub(crate) fn delete<T>(&mut self, key: &TypedKey<T>) {
        self.stage(key.erase(), Staged::Delete);
    }

    fn stage(&mut self, key: ErasedKey, staged: Staged) {
        self.entries
            .insert(key.name.clone(), Buffered { key, staged });
    }

    /// The buffered state of `key`, or `None` if the transaction never
    /// touched its name.
    pub(crate) fn read<T: DataType>(&self, key: &TypedKey<T>) -> Option<Result<Option<T>>> {
        let buffered = self.entries.get(key.name())?;
        let value = match &buffered.staged {
            Staged::Delete => return Some(Ok(None)),
            Staged::Put { value, .. } => value,
        };

        if buffered.key.descriptor != *key.descriptor() {
            return Some(Err(DataError::TypeMismatch {
                key: key.erase(),
                expected: type_name::<T>(),
                found: buffered.key.descriptor.to_string(),
            }));
        }

        Some(
            value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or_else(|| DataError::TypeMismatch {
                    key: key.erase(),
                    expected: type_name::<T>(),
                    found: "a value of another type".to_string(),
                }),
        )
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&ErasedKey, &Staged)> {
        self.entries.values().map(|b| (&b.key, &b.staged))
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = (ErasedKey, Staged)> {
        self.entries.into_values().map(|b| (b.key, b.staged))
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.values().map(|b| {
                let op = match b.staged {
                    Staged::Put { .. } => "put",
                    Staged::Delete => "delete",
                };
                (&b.key.name, op)
            }))
            .finish()
    }
}

/// How a transaction block ended.
///
/// Only a `Commit` carries a buffer, so there is no path on which an aborted
/// block's writes could be applied.
#[derive(Debug)]
pub enum TxOutcome<R, E> {
    Commit { value: R, buffer: WriteBuffer },
    Abort(E),
}

/// The handle a transaction block works through.
pub struct Transaction<B> {
    cache: Arc<CacheLayer<B>>,
    buffer: WriteBuffer,
}

impl<B: StorageBackend> Transaction<B> {
    pub(crate) fn new(cache: Arc<CacheLayer<B>>) -> Self {
        Self {
            cache,
            buffer: WriteBuffer::default(),
        }
    }

    /// The buffered value if this transaction touched the key, otherwise the
    /// committed value. A buffered delete reads as `None`.
    pub async fn get<T: DataType>(&self, key: &TypedKey<T>) -> Result<Option<T>> {
        if let Some(buffered) = self.buffer.read(key) {
            trace!(key = %key, "read from transaction buffer");
            return buffered;
        }
        self.cache.get(key).await
    }

    /// Stage `value` for `key`. Nothing is written until the block commits.
    pub fn set<T: DataType>(&mut self, key: &TypedKey<T>, value: T) {
        trace!(key = %key, "staging write");
        self.buffer.put(key, value);
    }

    /// Stage a delete for `key`.
    pub fn remove<T: DataType>(&mut self, key: &TypedKey<T>) {
        trace!(key = %key, "staging delete");
        self.buffer.delete(key);
    }

    /// Add one to a numeric value and return the result.
    ///
    /// The key must already resolve to a value inside this transaction;
    /// an absent key or a non-numeric type is a [`DataError::TypeMismatch`].
    pub async fn increment<T: DataType>(&mut self, key: &TypedKey<T>) -> Result<T> {
        let Some(current) = self.get(key).await? else {
            error!(key = %key, "increment of an absent key");
            return Err(DataError::TypeMismatch {
                key: key.erase(),
                expected: "a numeric value",
                found: "no value".to_string(),
            });
        };

        let Some(next) = current.incremented() else {
            error!(key = %key, descriptor = %key.descriptor(), "increment of a non-numeric key");
            return Err(DataError::TypeMismatch {
                key: key.erase(),
                expected: "a numeric value",
                found: key.descriptor().to_string(),
            });
        };

        self.buffer.put(key, next.clone());
        Ok(next)
    }

    /// Read-modify-write: stage `transform(current)` and return it.
    pub async fn update<T, F>(&mut self, key: &TypedKey<T>, transform: F) -> Result<T>
    where
        T: DataType,
        F: FnOnce(Option<T>) -> T,
    {
        let current = self.get(key).await?;
        let next = transform(current);
        self.buffer.put(key, next.clone());
        Ok(next)
    }

    /// Writes staged so far.
    pub fn buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    /// Pair the block's result with the buffer, dropping the buffer on error.
    pub(crate) fn conclude<R, E>(self, result: Result<R, E>) -> TxOutcome<R, E> {
        match result {
            Ok(value) => {
                debug!(staged = self.buffer.len(), "transaction block finished");
                TxOutcome::Commit {
                    value,
                    buffer: self.buffer,
                }
            }
            Err(err) => {
                debug!(discarded = self.buffer.len(), "transaction block failed, discarding buffer");
                TxOutcome::Abort(err)
            }
        }
    }
}

impl<B> fmt::Debug for Transaction<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}
