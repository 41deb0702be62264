//! Order status catch-up command.
//!
//! Re-fetches orders whose financial or fulfillment status was never
//! recorded and rewrites them with the current remote state.

use omnicrm_sync::{RefreshSummary, SyncConfig, SyncOrchestrator};

use super::{CommandError, directory, pg_store};

/// Refresh up to `limit` orders.
pub async fn run(config: &SyncConfig, limit: i64) -> Result<(), CommandError> {
    let store = pg_store(config).await?;
    let orchestrator = SyncOrchestrator::from_config(config, store, directory(config)?);

    let summary = orchestrator.refresh_order_statuses(limit).await?;
    tracing::info!(
        updated = summary.updated,
        missing = summary.missing,
        failed = summary.failed,
        "Order refresh complete"
    );
    print_summary(&summary);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_summary(summary: &RefreshSummary) {
    println!(
        "updated {}  missing {}  failed {}",
        summary.updated, summary.missing, summary.failed
    );
}
