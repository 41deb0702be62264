//! Order status catch-up.
//!
//! Orders imported before their payment or fulfillment settled carry no
//! raw status mirror. This job re-fetches them by id and rewrites the row,
//! keeping its customer link.

use tracing::{info, instrument, warn};

use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;
use crate::store::OrderUpsert;

/// Counters for one catch-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Orders rewritten from the remote copy.
    pub updated: usize,
    /// Orders the remote no longer has.
    pub missing: usize,
    /// Orders whose refresh failed.
    pub failed: usize,
}

impl SyncOrchestrator {
    /// Re-fetch up to `limit` orders lacking a financial or fulfillment
    /// status, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotConfigured` if the remote directory has no
    /// credentials, or `SyncError::Store` if the candidate query fails.
    #[instrument(skip(self))]
    pub async fn refresh_order_statuses(&self, limit: i64) -> Result<RefreshSummary, SyncError> {
        if !self.directory.is_configured() {
            return Err(SyncError::NotConfigured);
        }

        let orders = self.store.orders_missing_status(limit).await?;
        info!(count = orders.len(), "Orders with missing status");

        let mut summary = RefreshSummary::default();

        for (i, order) in orders.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing.delay).await;
            }

            let remote = match self.directory.fetch_order_by_id(&order.external_order_id).await {
                Ok(Some(remote)) => remote,
                Ok(None) => {
                    warn!(order = %order.order_number, "Order no longer exists remotely");
                    summary.missing += 1;
                    continue;
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(order = %order.order_number, error = %e, "Order refresh failed");
                    summary.failed += 1;
                    continue;
                }
            };

            match self
                .store
                .upsert_order(OrderUpsert::from_remote(&remote, order.customer_id))
                .await
            {
                Ok(_) => {
                    info!(
                        order = %order.order_number,
                        status = %remote.status,
                        financial = remote.financial_status.as_deref().unwrap_or("-"),
                        fulfillment = remote.fulfillment_status.as_deref().unwrap_or("-"),
                        "Order status refreshed"
                    );
                    summary.updated += 1;
                }
                Err(e) => {
                    warn!(order = %order.order_number, error = %e, "Order refresh failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            updated = summary.updated,
            missing = summary.missing,
            failed = summary.failed,
            "Order status catch-up complete"
        );
        Ok(summary)
    }
}
