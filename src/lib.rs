//! Typed key-value storage with a write-through cache and buffered transactions.
//!
//! Values are stored under string-named [`TypedKey`]s. Every read goes through
//! a bounded, idle-expiring [`CacheLayer`]; every write goes through a
//! [`Transaction`] whose buffer reaches the backend in one batch, or not at
//! all. Values are encoded by a [`SerializerRegistry`] that falls back to a
//! structural codec for types without an explicit one.
//!
//! # Quick Start
//!
//! ```no_run
//! use typed_store::prelude::*;
//!
//! # async fn example() -> typed_store::Result<()> {
//! let store = DataStore::open(DataConfig::from_file("data.toml")?).await?;
//! let coins = key::<i64>("player.coins");
//!
//! store
//!     .transaction(move |tx| {
//!         Box::pin(async move {
//!             tx.set(&coins, 5);
//!             tx.increment(&coins).await
//!         })
//!     })
//!     .await?;
//!
//! assert_eq!(store.get(&key::<i64>("player.coins")).await?, Some(6));
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`key`] - Typed keys, type descriptors and the [`DataType`] trait
//! - [`codec`] - The serializer registry and built-in codecs
//! - [`backend`] - The [`StorageBackend`] contract, relational and in-memory backends
//! - [`cache`] - Cache-aside reads and write-through writes
//! - [`transaction`] - Buffered transactions
//! - [`store`] - The [`DataStore`] facade
//! - [`config`] - TOML configuration
//!
//! # Feature Flags
//!
//! - `logging` - Enable library-level tracing (consumers provide their own subscriber)
//! - `cli` - Enable the administrative command-line binary
//! - `full` - Enable all features

mod logging;
pub mod backend;
pub mod cache;
pub mod codec;
pub mod config;
pub mod key;
pub mod prelude;
pub mod store;
pub mod transaction;

mod error;

// Re-export the unified error type
pub use error::{DataError, Result};

pub use backend::{BatchOp, DATA_TABLE, MemoryBackend, RelationalBackend, StorageBackend};
pub use cache::{CacheLayer, CacheStats, Clock, ManualClock, SystemClock};
pub use codec::{Codec, SerializationError, SerializerRegistry, StructuralCodec, UuidCodec};
pub use config::{CacheConfig, ConfigError, DataConfig, PostgresConfig, ProviderKind};
pub use key::{DataType, ErasedKey, KeyPrefix, TypeDescriptor, TypedKey, key};
pub use logging::LOG_TARGET;
pub use store::DataStore;
pub use transaction::{Transaction, TxOutcome, WriteBuffer};
