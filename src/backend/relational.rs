//! Relational backend over a sqlx connection pool.
//!
//! Every key/value pair is one row of [`DATA_TABLE`]. PostgreSQL is the
//! production target; SQLite is accepted through the same code path for tests
//! and single-binary deployments. The backend type is detected from a pooled
//! connection at construction time.

use std::sync::Arc;
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool, Connection, Row};

use super::{BatchOp, StorageBackend};
use crate::codec::SerializerRegistry;
use crate::config::PostgresConfig;
use crate::error::{DataError, Result};
use crate::logging::{debug, error, info};

/// Name of the table holding every stored value.
pub const DATA_TABLE: &str = "framework_data_store";

const PG_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS framework_data_store (
    framework_data_key   TEXT PRIMARY KEY,
    framework_data_value BYTEA NOT NULL
);";

const SQLITE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS framework_data_store (
    framework_data_key   TEXT PRIMARY KEY,
    framework_data_value BLOB NOT NULL
);";

const SELECT_VALUE: &str =
    "SELECT framework_data_value FROM framework_data_store WHERE framework_data_key = $1";

const UPSERT_VALUE: &str = "INSERT INTO framework_data_store (framework_data_key, framework_data_value)
VALUES ($1, $2)
ON CONFLICT (framework_data_key)
DO UPDATE SET framework_data_value = EXCLUDED.framework_data_value";

const DELETE_VALUE: &str = "DELETE FROM framework_data_store WHERE framework_data_key = $1";

const SELECT_KEYS: &str =
    "SELECT framework_data_key FROM framework_data_store ORDER BY framework_data_key";

/// [`StorageBackend`] storing `(key name, bytes)` rows behind a connection pool.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> typed_store::Result<()> {
/// use std::{sync::Arc, time::Duration};
/// use typed_store::{RelationalBackend, SerializerRegistry};
///
/// let registry = Arc::new(SerializerRegistry::default());
/// let backend = RelationalBackend::connect_url(
///     "sqlite::memory:",
///     1,
///     Duration::from_secs(5),
///     registry,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RelationalBackend {
    pool: AnyPool,
    registry: Arc<SerializerRegistry>,
}

impl RelationalBackend {
    /// Wrap an existing pool: verify connectivity and create the table.
    ///
    /// Callers must have called [`sqlx::any::install_default_drivers`]
    /// before building the pool.
    pub async fn new(pool: AnyPool, registry: Arc<SerializerRegistry>) -> Result<Self> {
        let mut conn = pool.acquire().await.map_err(|e| {
            error!(error = %e, "failed to acquire a connection");
            DataError::Connectivity(e)
        })?;

        conn.ping().await.map_err(|e| {
            error!(error = %e, "backend did not answer ping");
            DataError::Connectivity(e)
        })?;
        info!(backend = conn.backend_name(), "connected to relational backend");

        let schema = match conn.backend_name() {
            "PostgreSQL" => PG_SCHEMA,
            "SQLite" => SQLITE_SCHEMA,
            other => {
                error!(backend = other, "unsupported database backend");
                return Err(DataError::Connectivity(sqlx::Error::Configuration(
                    format!("unsupported database backend: {other}").into(),
                )));
            }
        };

        debug!(table = DATA_TABLE, "ensuring data table exists");
        sqlx::query(schema)
            .execute(&mut *conn)
            .await
            .map_err(|e| DataError::backend("create table", e))?;

        Ok(Self { pool, registry })
    }

    /// Connect to `url` with a pool of at most `pool_size` connections.
    ///
    /// In-memory SQLite databases are limited to a single long-lived
    /// connection so every operation sees the same database.
    pub async fn connect_url(
        url: &str,
        pool_size: u32,
        acquire_timeout: Duration,
        registry: Arc<SerializerRegistry>,
    ) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let options = if is_in_memory(url) {
            AnyPoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(pool_size.max(1))
        };

        let pool = options
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to open connection pool");
                DataError::Connectivity(e)
            })?;

        Self::new(pool, registry).await
    }

    async fn acquire(&self) -> Result<PoolConnection<Any>> {
        self.pool.acquire().await.map_err(|e| {
            error!(error = %e, "failed to acquire a connection");
            DataError::Connectivity(e)
        })
    }
}

/// Whether `url` names an in-memory SQLite database, either `sqlite::memory:`
/// or a named one opened with `mode=memory`.
fn is_in_memory(url: &str) -> bool {
    let (location, query) = url.split_once('?').unwrap_or((url, ""));
    url.starts_with("sqlite:")
        && (location.ends_with(":memory:") || query.split('&').any(|param| param == "mode=memory"))
}

impl StorageBackend for RelationalBackend {
    type Config = PostgresConfig;

    async fn connect(config: Self::Config, registry: Arc<SerializerRegistry>) -> Result<Self> {
        let url = config.connection_url()?;
        info!(endpoint = %config.connection_target(), pool_size = config.pool_size, "connecting to PostgreSQL");
        Self::connect_url(
            url.as_str(),
            config.pool_size,
            config.connect_timeout(),
            registry,
        )
        .await
    }

    fn registry(&self) -> &SerializerRegistry {
        &self.registry
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.acquire().await?;
        let row = sqlx::query(SELECT_VALUE)
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| {
                error!(key = name, error = %e, "select failed");
                DataError::backend("select", e)
            })?;

        row.map(|r| r.try_get::<Vec<u8>, _>(0))
            .transpose()
            .map_err(|e| {
                error!(key = name, error = %e, "failed to read value column");
                DataError::backend("select", e)
            })
    }

    async fn store(&self, name: &str, bytes: Vec<u8>) -> Result<()> {
        let mut conn = self.acquire().await?;
        sqlx::query(UPSERT_VALUE)
            .bind(name)
            .bind(bytes)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                error!(key = name, error = %e, "upsert failed");
                DataError::backend("upsert", e)
            })?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut conn = self.acquire().await?;
        sqlx::query(DELETE_VALUE)
            .bind(name)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                error!(key = name, error = %e, "delete failed");
                DataError::backend("delete", e)
            })?;
        Ok(())
    }

    async fn apply_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        let mut conn = self.acquire().await?;
        let mut tx = conn
            .begin()
            .await
            .map_err(|e| DataError::backend("begin", e))?;

        // Dropping `tx` on an early return rolls the batch back.
        for op in &ops {
            let result = match op {
                BatchOp::Store { name, bytes } => {
                    sqlx::query(UPSERT_VALUE)
                        .bind(name.as_str())
                        .bind(bytes.as_slice())
                        .execute(&mut *tx)
                        .await
                }
                BatchOp::Delete { name } => {
                    sqlx::query(DELETE_VALUE)
                        .bind(name.as_str())
                        .execute(&mut *tx)
                        .await
                }
            };
            result.map_err(|e| {
                error!(key = op.name(), error = %e, "batch write failed, rolling back");
                DataError::backend("batch write", e)
            })?;
        }

        tx.commit().await.map_err(|e| {
            error!(ops = ops.len(), error = %e, "batch commit failed");
            DataError::backend("commit", e)
        })?;
        debug!(ops = ops.len(), "batch committed");
        Ok(())
    }

    async fn list_key_names(&self) -> Result<Vec<String>> {
        let mut conn = self.acquire().await?;
        let rows = sqlx::query(SELECT_KEYS)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| DataError::backend("list keys", e))?;

        rows.iter()
            .map(|r| r.try_get::<String, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| DataError::backend("list keys", e))
    }

    async fn shutdown(&self) {
        info!("closing relational backend pool");
        self.pool.close().await;
    }
}
