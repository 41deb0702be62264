//! Handle sync command.
//!
//! # Usage
//!
//! ```bash
//! omnicrm sync --channel WA 5215512345678 ana@example.com
//! omnicrm sync --handles-file handles.txt --dry-run
//! ```
//!
//! # Environment Variables
//!
//! - `OMNICRM_DATABASE_URL` (or `DATABASE_URL`) - not needed with `--dry-run`
//! - `SHOPIFY_STORE_DOMAIN`, `SHOPIFY_ADMIN_API_ACCESS_TOKEN` - Shopify Admin API
//! - `SYNC_DELAY_MS`, `SYNC_ERROR_DELAY_MS` - pause between handles
//! - `SYNC_VIP_THRESHOLD` - lifetime value above which a contact is VIP

use std::path::Path;
use std::sync::Arc;

use omnicrm_core::Channel;
use omnicrm_sync::remote::ShopifyDirectory;
use omnicrm_sync::store::{CustomerStore, MemoryCustomerStore};
use omnicrm_sync::{BatchSummary, SyncConfig, SyncOrchestrator};

use super::{CommandError, directory, pg_store};

/// Read handles from a file: one per line, blank lines and `#` comments skipped.
pub async fn read_handles_file(path: &Path) -> Result<Vec<String>, CommandError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CommandError::HandlesFile {
            path: path.display().to_string(),
            source,
        })?;
    Ok(parse_handles(&contents))
}

fn parse_handles(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

/// Sync `handles` seen on `channel`.
pub async fn run(
    config: &SyncConfig,
    handles: &[String],
    channel: &str,
    dry_run: bool,
) -> Result<(), CommandError> {
    if handles.is_empty() {
        tracing::warn!("No handles given; nothing to sync");
        return Ok(());
    }

    let channel = Channel::new(channel);
    let directory = directory(config)?;

    let summary = if dry_run {
        tracing::info!("Dry run: writing to an in-memory store");
        let store = Arc::new(MemoryCustomerStore::new());
        let summary = sync_with(config, store.clone(), directory, handles, &channel).await?;
        tracing::info!(
            customers = store.customer_count().await,
            orders = store.order_count().await,
            snapshots = store.snapshots().await.len(),
            "Dry run store contents"
        );
        summary
    } else {
        let store = pg_store(config).await?;
        sync_with(config, store, directory, handles, &channel).await?
    };

    tracing::info!(
        resolved = summary.resolved,
        skipped = summary.skipped,
        failed = summary.failed,
        orders = summary.orders_upserted,
        "Sync complete"
    );
    print_summary(&summary);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_summary(summary: &BatchSummary) {
    println!(
        "resolved {}  skipped {}  failed {}  orders upserted {}",
        summary.resolved, summary.skipped, summary.failed, summary.orders_upserted
    );
}

async fn sync_with(
    config: &SyncConfig,
    store: Arc<dyn CustomerStore>,
    directory: Arc<ShopifyDirectory>,
    handles: &[String],
    channel: &Channel,
) -> Result<BatchSummary, CommandError> {
    let orchestrator = SyncOrchestrator::from_config(config, store, directory);
    Ok(orchestrator.sync_batch(handles, channel).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handles_skips_comments_and_blanks() {
        let contents = "# exported 2026-10-01\nana@example.com\n\n  5215512345678  \n# end\n";
        assert_eq!(
            parse_handles(contents),
            vec!["ana@example.com".to_string(), "5215512345678".to_string()]
        );
    }
}
