//! Data store configuration.
//!
//! Loaded once from TOML and handed to [`DataStore::open`](crate::DataStore::open).
//! Every option has a default, so an empty document is a valid configuration.
//!
//! ```toml
//! provider = "postgres"
//!
//! [postgres]
//! host = "db.internal"
//! port = 5432
//! database = "framework"
//! username = "framework"
//! password = "secret"
//! poolSize = 10
//!
//! [cache]
//! maxSize = 10000
//! expirationSeconds = 3600
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    Io(String, #[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid connection target '{0}'")]
    InvalidTarget(String),
}

/// Storage backend implementations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Postgres,
}

/// Top-level data store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DataConfig {
    /// Backend to use.
    pub provider: ProviderKind,
    /// PostgreSQL connection settings.
    pub postgres: PostgresConfig,
    /// In-memory cache settings.
    pub cache: CacheConfig,
}

impl DataConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// PostgreSQL connection settings.
#[derive(Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Maximum number of pooled connections.
    pub pool_size: u32,
    /// How long to wait for a pooled connection before giving up.
    pub connect_timeout_seconds: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "mydatabase".to_string(),
            username: "myuser".to_string(),
            password: "mypassword".to_string(),
            pool_size: 10,
            connect_timeout_seconds: 30,
        }
    }
}

impl PostgresConfig {
    /// `postgres://host:port/database`, without credentials. Safe to log.
    pub fn connection_target(&self) -> String {
        format!("postgres://{}:{}/{}", self.host, self.port, self.database)
    }

    /// The connection target with the credentials applied.
    pub fn connection_url(&self) -> Result<Url, ConfigError> {
        let target = self.connection_target();
        let invalid = || ConfigError::InvalidTarget(target.clone());

        let mut url = Url::parse(&target).map_err(|_| invalid())?;
        url.set_username(&self.username).map_err(|_| invalid())?;
        url.set_password(Some(&self.password)).map_err(|_| invalid())?;
        Ok(url)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("target", &self.connection_target())
            .field("username", &self.username)
            .field("pool_size", &self.pool_size)
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .finish_non_exhaustive()
    }
}

/// Cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Maximum number of cached entries.
    pub max_size: u64,
    /// Entries untouched for this long are evicted.
    pub expiration_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            expiration_seconds: 3600,
        }
    }
}

impl CacheConfig {
    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() -> Result<(), ConfigError> {
        let config = DataConfig::from_str("")?;
        assert_eq!(config.provider, ProviderKind::Postgres);
        assert_eq!(config.postgres.host, "localhost");
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.cache.max_size, 10_000);
        assert_eq!(config.cache.expiration_seconds, 3600);
        Ok(())
    }

    #[test]
    fn test_parse_config() -> Result<(), ConfigError> {
        let toml = r#"
provider = "postgres"

[postgres]
host = "db.internal"
port = 6543
database = "framework"
username = "svc"
password = "p@ss/word"
poolSize = 4

[cache]
maxSize = 250
expirationSeconds = 60
"#;
        let config = DataConfig::from_str(toml)?;
        assert_eq!(config.postgres.pool_size, 4);
        assert_eq!(config.postgres.connect_timeout_seconds, 30);
        assert_eq!(config.cache.max_size, 250);
        assert_eq!(config.cache.expiration(), Duration::from_secs(60));
        assert_eq!(
            config.postgres.connection_target(),
            "postgres://db.internal:6543/framework"
        );

        let url = config.postgres.connection_url()?;
        assert_eq!(url.username(), "svc");
        assert_eq!(url.host_str(), Some("db.internal"));
        assert_eq!(url.path(), "/framework");
        assert!(url.password().is_some_and(|p| p != "p@ss/word"));
        Ok(())
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        assert!(matches!(
            DataConfig::from_str("provider = \"mongo\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", PostgresConfig::default());
        assert!(!rendered.contains("mypassword"));
    }

    #[test]
    fn test_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.toml");
        std::fs::write(&path, "[cache]\nmaxSize = 5\n")?;

        let config = DataConfig::from_file(&path)?;
        assert_eq!(config.cache.max_size, 5);
        assert!(matches!(
            DataConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(..))
        ));
        Ok(())
    }
}
