//! Unified error type for the data store.
//!
//! Every layer returns [`DataError`]. Nothing below the facade turns a failure
//! into a default value: a missing row is `Ok(None)`, anything else is an
//! error that reaches the caller with its original cause attached.

use thiserror::Error;

use crate::codec::SerializationError;
use crate::config::ConfigError;
use crate::key::ErasedKey;

/// Errors returned by data store operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// The backend could not be reached, or no pooled connection was available.
    #[error("backend unreachable: {0}")]
    Connectivity(#[source] sqlx::Error),

    /// A statement failed on an otherwise reachable backend.
    #[error("backend {operation} failed: {source}")]
    Backend {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// A value could not be encoded, or stored bytes could not be decoded
    /// as the type the key declares.
    #[error("serialization failed for {key}: {source}")]
    Serialization {
        key: ErasedKey,
        #[source]
        source: SerializationError,
    },

    /// The stored value does not have the shape an operation needs,
    /// e.g. incrementing a key that is not numeric.
    #[error("type mismatch for {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: ErasedKey,
        expected: &'static str,
        found: String,
    },

    /// The task running a transaction ended before the transaction finished.
    #[error("transaction task was cancelled")]
    TransactionCancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A [`Result`] type alias defaulting to [`DataError`].
pub type Result<T, E = DataError> = std::result::Result<T, E>;

impl DataError {
    /// Classify a sqlx error raised while running `operation`.
    pub(crate) fn backend(operation: &'static str, source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => Self::Connectivity(source),
            source => Self::Backend { operation, source },
        }
    }

    pub(crate) fn serialization(key: ErasedKey, source: SerializationError) -> Self {
        Self::Serialization { key, source }
    }

    /// Returns `true` if the backend could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }

    /// Returns `true` if this is an encode/decode failure.
    pub fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization { .. })
    }

    /// Returns `true` if this is a type mismatch.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }
}
