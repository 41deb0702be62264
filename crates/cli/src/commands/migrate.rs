//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! omnicrm migrate
//! ```
//!
//! # Environment Variables
//!
//! - `OMNICRM_DATABASE_URL` (or `DATABASE_URL`) - `PostgreSQL` connection string
//!
//! Migrations are embedded from `crates/sync/migrations/`.

use omnicrm_sync::{SyncConfig, db};

use super::{CommandError, connect};

/// Apply all pending migrations.
pub async fn run(config: &SyncConfig) -> Result<(), CommandError> {
    let pool = connect(config).await?;

    tracing::info!("Running migrations...");
    db::run_migrations(&pool).await?;

    tracing::info!("Migrations complete");
    Ok(())
}
