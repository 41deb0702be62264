//! Subcommand implementations.

pub mod ghosts;
pub mod migrate;
pub mod refresh;
pub mod sync;

use std::sync::Arc;

use omnicrm_sync::SyncConfig;
use omnicrm_sync::db;
use omnicrm_sync::remote::{CustomerDirectory, DirectoryError, ShopifyDirectory};
use omnicrm_sync::store::PgCustomerStore;
use sqlx::PgPool;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Configuration could not be loaded or is incomplete.
    #[error("configuration error: {0}")]
    Config(#[from] omnicrm_sync::ConfigError),

    /// Database connection error.
    #[error("database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The Shopify client could not be built.
    #[error("shopify directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The batch or job aborted.
    #[error(transparent)]
    Sync(#[from] omnicrm_sync::SyncError),

    /// A store query failed outside of a batch.
    #[error("store error: {0}")]
    Store(#[from] omnicrm_sync::store::StoreError),

    /// The handles file could not be read.
    #[error("failed to read {path}: {source}")]
    HandlesFile {
        path: String,
        source: std::io::Error,
    },
}

/// Connect to the configured database.
async fn connect(config: &SyncConfig) -> Result<PgPool, CommandError> {
    let database_url = config.require_database_url()?;
    tracing::info!("Connecting to database...");
    Ok(db::create_pool(database_url).await?)
}

async fn pg_store(config: &SyncConfig) -> Result<Arc<PgCustomerStore>, CommandError> {
    Ok(Arc::new(PgCustomerStore::new(connect(config).await?)))
}

/// Build the Shopify directory, unconfigured when credentials are absent.
fn directory(config: &SyncConfig) -> Result<Arc<ShopifyDirectory>, CommandError> {
    let directory = ShopifyDirectory::new(config.shopify.as_ref())?;
    if !directory.is_configured() {
        tracing::warn!("Shopify credentials not set; remote lookups will fail");
    }
    Ok(Arc::new(directory))
}
