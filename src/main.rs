//! Administrative command line for a typed-store database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use typed_store::{
    DATA_TABLE, DataConfig, DataStore, LOG_TARGET, RelationalBackend, SerializerRegistry,
    StorageBackend, SystemClock,
};

#[derive(Parser)]
#[command(name = "typed-store")]
#[command(about = "Inspect and verify a typed-store database")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "typed-store.toml", env = "TYPED_STORE_CONFIG")]
    config: PathBuf,

    /// Connect to this database URL instead of the configured PostgreSQL target.
    #[arg(long, env = "TYPED_STORE_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, verify the backend answers and create the data table if needed.
    Check,

    /// List stored key names.
    Keys {
        /// Only show names starting with this prefix.
        #[arg(short, long)]
        prefix: Option<String>,
    },

    /// Show the stored size and leading bytes of one key.
    Inspect {
        /// Key name.
        name: String,
    },
}

/// Bytes shown by `inspect`.
const PREVIEW_BYTES: usize = 32;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("warn,{LOG_TARGET}=info"))),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open(&cli).await?;

    let result = run(&store, cli.command).await;
    store.shutdown().await;
    result
}

async fn open(cli: &Cli) -> anyhow::Result<DataStore<RelationalBackend>> {
    let config = if cli.config.exists() {
        DataConfig::from_file(&cli.config)?
    } else {
        tracing::debug!(path = %cli.config.display(), "no config file, using defaults");
        DataConfig::default()
    };

    let Some(url) = &cli.url else {
        return DataStore::open(config)
            .await
            .context("failed to open the configured backend");
    };

    let backend = RelationalBackend::connect_url(
        url,
        config.postgres.pool_size,
        config.postgres.connect_timeout(),
        Arc::new(SerializerRegistry::default()),
    )
    .await
    .with_context(|| format!("failed to connect to {url}"))?;
    Ok(DataStore::with_backend(
        backend,
        &config.cache,
        Arc::new(SystemClock),
    ))
}

async fn run(store: &DataStore<RelationalBackend>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Check => {
            let count = store.key_names().await?.len();
            println!("ok: table {DATA_TABLE} holds {count} keys");
        }

        Commands::Keys { prefix } => {
            let names = store.key_names().await?;
            let prefix = prefix.unwrap_or_default();
            for name in names.iter().filter(|n| n.starts_with(&prefix)) {
                println!("{name}");
            }
        }

        Commands::Inspect { name } => {
            let Some(bytes) = store.backend().fetch(&name).await? else {
                anyhow::bail!("key '{name}' not found");
            };
            let preview: String = bytes
                .iter()
                .take(PREVIEW_BYTES)
                .map(|b| format!("{b:02x}"))
                .collect();
            let ellipsis = if bytes.len() > PREVIEW_BYTES { "..." } else { "" };
            println!("{name}: {} bytes", bytes.len());
            println!("  {preview}{ellipsis}");
        }
    }
    Ok(())
}
