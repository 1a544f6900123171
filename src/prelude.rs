//! Convenient re-exports for common usage patterns.
//!
//! # Example
//!
//! ```ignore
//! use typed_store::prelude::*;
//!
//! let store = DataStore::open(DataConfig::from_file("data.toml")?).await?;
//! let name = key::<String>("player.name");
//! let current = store.get_or_default(&name, "guest".to_string()).await?;
//! ```

// Unified error handling
pub use crate::error::{DataError, Result};

// Keys and values
pub use crate::key::{DataType, KeyPrefix, TypeDescriptor, TypedKey, key};

// Store and transactions
pub use crate::store::DataStore;
pub use crate::transaction::Transaction;

// Configuration
pub use crate::config::{CacheConfig, DataConfig};

// Backends
pub use crate::backend::{MemoryBackend, RelationalBackend, StorageBackend};
