//! The paced, sequential sync batch.
//!
//! Each handle moves through
//! `Pending -> Resolving -> {Skipped | Importing -> Persisting -> Snapshotting -> Done | Failed}`.
//! Within a handle the customer upsert precedes the order upserts, which
//! precede the snapshot write. Every write is independently idempotent, so
//! an interrupted batch is resumed by running it again from the start.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use omnicrm_core::{Channel, Customer, CustomerId, Handle, RiskTier, SnapshotFields};

use crate::config::{PacingConfig, SyncConfig};
use crate::error::SyncError;
use crate::remote::{CustomerDirectory, RemoteCustomerRecord, RemoteOrderRecord};
use crate::resolver::{IdentityResolver, Resolution};
use crate::store::{ConflictKey, CustomerStore, CustomerUpsert, OrderUpsert, StoreError};

/// Default lifetime value above which a contact is VIP.
const DEFAULT_VIP_THRESHOLD: i64 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Pending,
    Resolving,
    Skipped,
    Importing,
    Persisting,
    Snapshotting,
    Done,
    Failed,
}

impl SyncState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Skipped => "skipped",
            Self::Importing => "importing",
            Self::Persisting => "persisting",
            Self::Snapshotting => "snapshotting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Tracks and logs one handle's state transitions.
struct Progress<'a> {
    handle: &'a str,
    state: SyncState,
}

impl<'a> Progress<'a> {
    const fn new(handle: &'a str) -> Self {
        Self {
            handle,
            state: SyncState::Pending,
        }
    }

    fn advance(&mut self, next: SyncState) {
        debug!(
            handle = self.handle,
            from = self.state.as_str(),
            state = next.as_str(),
            "Sync state transition"
        );
        self.state = next;
    }
}

/// Why a handle produced no import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The handle is neither a usable email nor a phone number.
    InvalidHandle,
    /// Nothing local or remote matches the handle.
    Unresolved,
    /// A local customer matches but the remote no longer knows the handle.
    RemoteMissing,
}

/// Result of syncing one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Synced {
        customer_id: CustomerId,
        orders_upserted: usize,
    },
    Skipped(SkipReason),
}

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub orders_upserted: usize,
}

/// Drives handle resolution, import and snapshot writes.
#[derive(Clone)]
pub struct SyncOrchestrator {
    pub(crate) store: Arc<dyn CustomerStore>,
    pub(crate) directory: Arc<dyn CustomerDirectory>,
    pub(crate) pacing: PacingConfig,
    vip_threshold: Decimal,
}

impl SyncOrchestrator {
    /// Create an orchestrator with default pacing and VIP threshold.
    #[must_use]
    pub fn new(store: Arc<dyn CustomerStore>, directory: Arc<dyn CustomerDirectory>) -> Self {
        Self {
            store,
            directory,
            pacing: PacingConfig::default(),
            vip_threshold: Decimal::from(DEFAULT_VIP_THRESHOLD),
        }
    }

    /// Create an orchestrator using the pacing and threshold from `config`.
    #[must_use]
    pub fn from_config(
        config: &SyncConfig,
        store: Arc<dyn CustomerStore>,
        directory: Arc<dyn CustomerDirectory>,
    ) -> Self {
        Self::new(store, directory)
            .with_pacing(config.pacing)
            .with_vip_threshold(config.vip_threshold)
    }

    #[must_use]
    pub const fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub const fn with_vip_threshold(mut self, threshold: Decimal) -> Self {
        self.vip_threshold = threshold;
        self
    }

    /// Sync handles one at a time, in order.
    ///
    /// Duplicate handles are processed once. A failed handle is counted and
    /// the batch moves on; only a fatal error aborts it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotConfigured` if the remote directory has no
    /// credentials.
    #[instrument(skip(self, handles), fields(channel = %channel, handles = handles.len()))]
    pub async fn sync_batch<H: AsRef<str> + Sync>(
        &self,
        handles: &[H],
        channel: &Channel,
    ) -> Result<BatchSummary, SyncError> {
        if !self.directory.is_configured() {
            error!("Remote directory is not configured");
            return Err(SyncError::NotConfigured);
        }

        let mut summary = BatchSummary::default();
        let mut seen = HashSet::new();
        let mut pause: Option<Duration> = None;

        for raw in handles {
            let raw = raw.as_ref();
            if !seen.insert(dedupe_key(raw)) {
                debug!(handle = raw, "Duplicate handle skipped");
                continue;
            }

            if let Some(delay) = pause.take() {
                tokio::time::sleep(delay).await;
            }

            match self.sync_handle(raw, channel).await {
                Ok(HandleOutcome::Synced {
                    orders_upserted, ..
                }) => {
                    summary.resolved += 1;
                    summary.orders_upserted += orders_upserted;
                    pause = Some(self.pacing.delay);
                }
                Ok(HandleOutcome::Skipped(_)) => {
                    summary.skipped += 1;
                    pause = Some(self.pacing.delay);
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Aborting sync batch");
                    return Err(e);
                }
                Err(e) => {
                    summary.failed += 1;
                    pause = Some(self.pacing.error_delay);
                    if matches!(
                        e,
                        SyncError::Store(
                            StoreError::ConflictViolation(_) | StoreError::ConstraintViolation(_)
                        )
                    ) {
                        error!(handle = raw, error = %e, "Handle sync hit a store conflict");
                    } else {
                        warn!(handle = raw, error = %e, "Handle sync failed");
                    }
                }
            }
        }

        info!(
            resolved = summary.resolved,
            skipped = summary.skipped,
            failed = summary.failed,
            orders_upserted = summary.orders_upserted,
            "Sync batch complete"
        );
        Ok(summary)
    }

    /// Sync a single raw handle.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if a remote or store call fails. Unparsable and
    /// unknown handles are not errors; they are skipped. Nothing is written
    /// when the directory is not configured.
    #[instrument(skip(self), fields(channel = %channel))]
    pub async fn sync_handle(
        &self,
        raw: &str,
        channel: &Channel,
    ) -> Result<HandleOutcome, SyncError> {
        if !self.directory.is_configured() {
            return Err(SyncError::NotConfigured);
        }

        let key = raw.trim();
        let mut progress = Progress::new(key);

        let result = self.run_handle(raw, channel, &mut progress).await;
        if result.is_err() {
            progress.advance(SyncState::Failed);
        }
        result
    }

    async fn run_handle(
        &self,
        raw: &str,
        channel: &Channel,
        progress: &mut Progress<'_>,
    ) -> Result<HandleOutcome, SyncError> {
        progress.advance(SyncState::Resolving);

        let Ok(handle) = Handle::parse(raw) else {
            progress.advance(SyncState::Skipped);
            if progress.handle.is_empty() {
                return Ok(HandleOutcome::Skipped(SkipReason::InvalidHandle));
            }
            self.write_zeroed(progress.handle, channel, progress.handle)
                .await?;
            return Ok(HandleOutcome::Skipped(SkipReason::InvalidHandle));
        };

        let resolver = IdentityResolver::new(self.store.as_ref(), self.directory.as_ref());

        let (remote, matched) = match resolver.resolve(&handle).await? {
            Resolution::Unresolved => {
                progress.advance(SyncState::Skipped);
                self.write_zeroed(handle.as_str(), channel, handle.as_str())
                    .await?;
                return Ok(HandleOutcome::Skipped(SkipReason::Unresolved));
            }
            Resolution::Importable(remote) => (remote, None),
            Resolution::Matched(id) => match resolver.lookup_remote(&handle).await? {
                Some(remote) => (remote, Some(id)),
                None => {
                    progress.advance(SyncState::Skipped);
                    let name = self
                        .store
                        .get_customer(id)
                        .await?
                        .map(|c| c.display_name)
                        .filter(|n| !n.is_empty())
                        .unwrap_or_else(|| handle.to_string());
                    self.write_zeroed(handle.as_str(), channel, &name).await?;
                    return Ok(HandleOutcome::Skipped(SkipReason::RemoteMissing));
                }
            },
        };

        progress.advance(SyncState::Importing);
        let orders = self.directory.fetch_orders(&remote.id).await?;

        progress.advance(SyncState::Persisting);
        let customer_id = self.persist(&remote, matched, &orders).await?;

        progress.advance(SyncState::Snapshotting);
        self.store
            .update_snapshot(handle.as_str(), channel, self.snapshot_fields(&remote, &orders))
            .await?;

        progress.advance(SyncState::Done);
        info!(
            handle = %handle,
            customer_id = %customer_id,
            remote_id = %remote.id,
            orders = orders.len(),
            "Handle synced"
        );
        Ok(HandleOutcome::Synced {
            customer_id,
            orders_upserted: orders.len(),
        })
    }

    /// Write the customer and its orders, adopting an existing local row
    /// when one represents the same person.
    async fn persist(
        &self,
        remote: &RemoteCustomerRecord,
        matched: Option<CustomerId>,
        orders: &[RemoteOrderRecord],
    ) -> Result<CustomerId, SyncError> {
        if let Some(email) = &remote.email {
            if let Some(owner) = self.store.find_customer_by_email(email).await? {
                self.link_email_owner(&owner, &remote.id).await?;
            }
        }

        if let Some(id) = matched {
            if !self.store.attach_external_id(id, &remote.id).await? {
                debug!(
                    customer_id = %id,
                    remote_id = %remote.id,
                    "Local row is linked to another remote customer"
                );
            }
        }

        let last_order_at = orders.iter().filter_map(|o| o.created_at).max();
        let customer_id = self
            .store
            .upsert_customer(
                CustomerUpsert::from_remote(remote, last_order_at),
                ConflictKey::ExternalId,
            )
            .await?;

        for order in orders {
            self.store
                .upsert_order(OrderUpsert::from_remote(order, Some(customer_id)))
                .await?;
        }

        Ok(customer_id)
    }

    /// Point the row owning the remote email at `remote_id`.
    ///
    /// The remote can merge or re-create a customer, handing the same email
    /// a new id. The email row follows the new id so the external id upsert
    /// lands on it instead of colliding on the email.
    async fn link_email_owner(
        &self,
        owner: &Customer,
        remote_id: &str,
    ) -> Result<(), StoreError> {
        match owner.external_id.as_deref() {
            Some(current) if current == remote_id => {}
            None => {
                if !self.store.attach_external_id(owner.id, remote_id).await? {
                    debug!(
                        customer_id = %owner.id,
                        remote_id,
                        "Remote id already belongs to another row"
                    );
                }
            }
            Some(previous) => {
                if self.store.relink_external_id(owner.id, remote_id).await? {
                    info!(
                        customer_id = %owner.id,
                        previous,
                        remote_id,
                        "Customer relinked to new remote id"
                    );
                } else {
                    warn!(
                        customer_id = %owner.id,
                        previous,
                        remote_id,
                        "Remote id already belongs to another row; relink skipped"
                    );
                }
            }
        }
        Ok(())
    }

    fn snapshot_fields(
        &self,
        remote: &RemoteCustomerRecord,
        orders: &[RemoteOrderRecord],
    ) -> SnapshotFields {
        let average_ticket =
            SnapshotFields::average_ticket(remote.total_spent, remote.orders_count);
        let last_fulfillment_status = orders
            .iter()
            .max_by_key(|o| o.created_at)
            .and_then(|o| o.fulfillment_status.clone());
        SnapshotFields {
            display_name: remote.display_name.clone(),
            lifetime_value: remote.total_spent,
            order_count: remote.orders_count,
            average_ticket,
            risk_tier: self.risk_tier(remote.total_spent),
            tags: remote.tags.clone(),
            last_fulfillment_status,
        }
    }

    fn risk_tier(&self, lifetime_value: Decimal) -> RiskTier {
        if lifetime_value > self.vip_threshold {
            RiskTier::Vip
        } else {
            RiskTier::Low
        }
    }

    async fn write_zeroed(
        &self,
        handle: &str,
        channel: &Channel,
        display_name: &str,
    ) -> Result<(), StoreError> {
        self.store
            .update_snapshot(handle, channel, SnapshotFields::zeroed(display_name))
            .await
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("pacing", &self.pacing)
            .field("vip_threshold", &self.vip_threshold)
            .finish_non_exhaustive()
    }
}

/// Normalized form used to drop repeated handles within a batch.
fn dedupe_key(raw: &str) -> String {
    Handle::parse(raw).map_or_else(|_| raw.trim().to_string(), |h| h.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::{TimeZone, Utc};
    use omnicrm_core::{ContactSnapshot, Email, Money, Order, OrderId, OrderStatus, Phone};

    use super::*;
    use crate::remote::{DirectoryError, MemoryDirectory, ShopifyDirectory};
    use crate::store::MemoryCustomerStore;

    fn remote_customer(id: &str, email: Option<&str>, phone: Option<&str>) -> RemoteCustomerRecord {
        RemoteCustomerRecord {
            id: id.to_string(),
            email: email.map(|e| Email::parse(e).unwrap()),
            phone: phone.map(|p| Phone::parse(p).unwrap()),
            display_name: "Ana Torres".to_string(),
            tags: vec!["vip".to_string(), "repeat".to_string()],
            total_spent: Decimal::new(15000, 2),
            orders_count: 2,
        }
    }

    fn remote_order(id: &str, customer: &str, status: OrderStatus, day: u32) -> RemoteOrderRecord {
        let (financial, fulfillment) = match status {
            OrderStatus::Fulfilled => (Some("paid"), Some("fulfilled")),
            OrderStatus::Paid => (Some("paid"), None),
            _ => (Some("pending"), None),
        };
        RemoteOrderRecord {
            id: id.to_string(),
            customer_id: Some(customer.to_string()),
            order_number: format!("#{id}"),
            status,
            financial_status: financial.map(ToString::to_string),
            fulfillment_status: fulfillment.map(ToString::to_string),
            total: Money::new(Decimal::new(7500, 2), "MXN"),
            line_items: Vec::new(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()),
            updated_at: None,
        }
    }

    fn standard_directory() -> MemoryDirectory {
        MemoryDirectory::new().with_customer(
            remote_customer("42", Some("a@example.com"), Some("+52 1 55 1234 5678")),
            vec![
                remote_order("900", "42", OrderStatus::Paid, 10),
                remote_order("901", "42", OrderStatus::Fulfilled, 12),
            ],
        )
    }

    fn orchestrator(
        store: &Arc<MemoryCustomerStore>,
        directory: &Arc<MemoryDirectory>,
    ) -> SyncOrchestrator {
        SyncOrchestrator::new(store.clone(), directory.clone()).with_pacing(PacingConfig::none())
    }

    #[tokio::test]
    async fn test_end_to_end_email_import() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(standard_directory());
        let sync = orchestrator(&store, &directory);
        let channel = Channel::new("EMAIL");

        let summary = sync.sync_batch(&["a@example.com"], &channel).await.unwrap();
        assert_eq!(
            summary,
            BatchSummary {
                resolved: 1,
                skipped: 0,
                failed: 0,
                orders_upserted: 2
            }
        );

        let customer = store.find_customer_by_external_id("42").await.unwrap().unwrap();
        assert_eq!(customer.lifetime_value, Decimal::new(15000, 2));
        assert_eq!(customer.email.as_ref().unwrap().as_str(), "a@example.com");
        assert_eq!(
            customer.last_order_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 12, 12, 0, 0).unwrap())
        );

        let orders = store.orders_for_customer(customer.id).await.unwrap();
        let ids: Vec<_> = orders.iter().map(|o| o.external_order_id.as_str()).collect();
        assert_eq!(ids, vec!["901", "900"]);
        assert_eq!(orders[0].status, OrderStatus::Fulfilled);
        assert_eq!(orders[1].status, OrderStatus::Paid);

        let snapshot = store
            .get_snapshot("a@example.com", &channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.fields.lifetime_value, Decimal::new(15000, 2));
        assert_eq!(snapshot.fields.order_count, 2);
        assert_eq!(snapshot.fields.tags, vec!["vip", "repeat"]);
        assert_eq!(snapshot.fields.risk_tier, RiskTier::Low);
        assert_eq!(snapshot.fields.average_ticket, Decimal::new(7500, 2));
        assert_eq!(
            snapshot.fields.last_fulfillment_status.as_deref(),
            Some("fulfilled")
        );
    }

    #[tokio::test]
    async fn test_batch_is_idempotent() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(standard_directory());
        let sync = orchestrator(&store, &directory);
        let channel = Channel::new("WA");
        let handles = ["a@example.com", "5512345678"];

        sync.sync_batch(&handles, &channel).await.unwrap();
        let first: Vec<_> = {
            let mut s = store.snapshots().await;
            s.sort_by(|a, b| a.handle.cmp(&b.handle));
            s.into_iter().map(|s| s.fields).collect()
        };

        let summary = sync.sync_batch(&handles, &channel).await.unwrap();
        let second: Vec<_> = {
            let mut s = store.snapshots().await;
            s.sort_by(|a, b| a.handle.cmp(&b.handle));
            s.into_iter().map(|s| s.fields).collect()
        };

        assert_eq!(summary.resolved, 2);
        assert_eq!(store.customer_count().await, 1);
        assert_eq!(store.order_count().await, 2);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_remote_disappearance_zeroes_snapshot() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(standard_directory());
        let sync = orchestrator(&store, &directory);
        let channel = Channel::new("EMAIL");

        sync.sync_batch(&["a@example.com"], &channel).await.unwrap();
        directory.remove_customer("42").await;

        let outcome = sync.sync_handle("a@example.com", &channel).await.unwrap();
        assert_eq!(outcome, HandleOutcome::Skipped(SkipReason::RemoteMissing));

        let snapshot = store
            .get_snapshot("a@example.com", &channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.fields.lifetime_value, Decimal::ZERO);
        assert_eq!(snapshot.fields.order_count, 0);
        assert!(snapshot.fields.tags.is_empty());
        assert_eq!(snapshot.fields.display_name, "Ana Torres");

        assert!(store.find_customer_by_external_id("42").await.unwrap().is_some());
        assert_eq!(store.order_count().await, 2);
    }

    #[tokio::test]
    async fn test_unresolved_handle_writes_zeroed_snapshot() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let sync = orchestrator(&store, &directory);
        let channel = Channel::new("WA");

        let summary = sync.sync_batch(&["+52 55 0000 0000"], &channel).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.customer_count().await, 0);

        let snapshot = store
            .get_snapshot("525500000000", &channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.fields, SnapshotFields::zeroed("525500000000"));
    }

    #[tokio::test]
    async fn test_invalid_handles_are_skipped() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let sync = orchestrator(&store, &directory);

        let summary = sync
            .sync_batch(&["   ", "@nobody", "no digits here"], &Channel::default())
            .await
            .unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.failed, 0);
        assert!(directory.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_not_configured_aborts_batch() {
        let store = Arc::new(MemoryCustomerStore::new());
        let sync = SyncOrchestrator::new(store.clone(), Arc::new(ShopifyDirectory::unconfigured()))
            .with_pacing(PacingConfig::none());

        let result = sync
            .sync_batch(&["a@example.com", "b@example.com"], &Channel::default())
            .await;
        assert!(matches!(result, Err(SyncError::NotConfigured)));
        assert!(store.snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_not_configured_writes_nothing_for_invalid_handles() {
        let store = Arc::new(MemoryCustomerStore::new());
        let sync = SyncOrchestrator::new(store.clone(), Arc::new(ShopifyDirectory::unconfigured()))
            .with_pacing(PacingConfig::none());

        let result = sync
            .sync_batch(&["bad@", "a@example.com"], &Channel::default())
            .await;
        assert!(matches!(result, Err(SyncError::NotConfigured)));

        let result = sync.sync_handle("bad@", &Channel::default()).await;
        assert!(matches!(result, Err(SyncError::NotConfigured)));
        assert!(store.snapshots().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_handle_does_not_stop_batch() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(standard_directory().with_failure(
            "b@example.com",
            DirectoryError::RateLimited {
                retry_after_secs: 2,
            },
        ));
        let sync = orchestrator(&store, &directory);

        let summary = sync
            .sync_batch(&["b@example.com", "a@example.com"], &Channel::default())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.resolved, 1);
        assert!(
            store
                .get_snapshot("b@example.com", &Channel::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_duplicate_handles_processed_once() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(standard_directory());
        let sync = orchestrator(&store, &directory);

        let summary = sync
            .sync_batch(&["a@example.com", "A@Example.com "], &Channel::default())
            .await
            .unwrap();
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.skipped, 0);
    }

    #[tokio::test]
    async fn test_phone_handle_adopts_existing_email_row() {
        let store = Arc::new(MemoryCustomerStore::new());
        let existing = store
            .upsert_customer(
                CustomerUpsert {
                    external_id: None,
                    email: Some(Email::parse("a@example.com").unwrap()),
                    phone: None,
                    display_name: "Ana".to_string(),
                    tags: Vec::new(),
                    lifetime_value: Decimal::ZERO,
                    order_count: 0,
                    last_order_at: None,
                },
                ConflictKey::Email,
            )
            .await
            .unwrap();
        let directory = Arc::new(standard_directory());
        let sync = orchestrator(&store, &directory);

        let outcome = sync
            .sync_handle("5215512345678", &Channel::new("WA"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            HandleOutcome::Synced {
                customer_id: existing,
                orders_upserted: 2
            }
        );
        assert_eq!(store.customer_count().await, 1);
        let customer = store.get_customer(existing).await.unwrap().unwrap();
        assert_eq!(customer.external_id.as_deref(), Some("42"));
        assert_eq!(customer.phone.unwrap().as_str(), "5215512345678");
    }

    #[tokio::test]
    async fn test_vip_tier_above_threshold() {
        let mut big = remote_customer("77", Some("vip@example.com"), None);
        big.total_spent = Decimal::new(6000, 0);
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(MemoryDirectory::new().with_customer(big, Vec::new()));
        let sync = orchestrator(&store, &directory);
        let channel = Channel::default();

        sync.sync_handle("vip@example.com", &channel).await.unwrap();
        let snapshot = store
            .get_snapshot("vip@example.com", &channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.fields.risk_tier, RiskTier::Vip);

        let strict = sync.clone().with_vip_threshold(Decimal::new(6000, 0));
        strict.sync_handle("vip@example.com", &channel).await.unwrap();
        let snapshot = store
            .get_snapshot("vip@example.com", &channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.fields.risk_tier, RiskTier::Low);
    }

    #[tokio::test]
    async fn test_email_owner_relinked_to_new_remote_id() {
        let store = Arc::new(MemoryCustomerStore::new());
        let channel = Channel::new("EMAIL");
        let first = orchestrator(&store, &Arc::new(standard_directory()));
        first.sync_batch(&["a@example.com"], &channel).await.unwrap();

        let mut recreated = remote_customer("43", Some("a@example.com"), None);
        recreated.total_spent = Decimal::new(999, 0);
        let directory = Arc::new(MemoryDirectory::new().with_customer(
            recreated,
            vec![remote_order("950", "43", OrderStatus::Paid, 20)],
        ));
        let sync = orchestrator(&store, &directory);

        for _ in 0..2 {
            let summary = sync.sync_batch(&["a@example.com"], &channel).await.unwrap();
            assert_eq!(summary.resolved, 1);
            assert_eq!(summary.failed, 0);

            let snapshot = store
                .get_snapshot("a@example.com", &channel)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(snapshot.fields.lifetime_value, Decimal::new(999, 0));
            assert_eq!(store.customer_count().await, 1);
        }

        let customer = store.find_customer_by_external_id("43").await.unwrap().unwrap();
        assert_eq!(customer.email.unwrap().as_str(), "a@example.com");
        assert!(store.find_customer_by_external_id("42").await.unwrap().is_none());
        assert_eq!(store.orders_for_customer(customer.id).await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_between_handles() {
        let store = Arc::new(MemoryCustomerStore::new());
        let directory = Arc::new(standard_directory().with_failure(
            "b@example.com",
            DirectoryError::Unavailable("timeout".to_string()),
        ));
        let sync = SyncOrchestrator::new(store.clone(), directory.clone()).with_pacing(
            PacingConfig {
                delay: Duration::from_secs(1),
                error_delay: Duration::from_secs(2),
            },
        );

        let start = tokio::time::Instant::now();
        let summary = sync
            .sync_batch(&["b@example.com"], &Channel::default())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);

        let start = tokio::time::Instant::now();
        let summary = sync
            .sync_batch(
                &["a@example.com", "b@example.com", "c@example.com"],
                &Channel::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        // 1s after the synced handle, 2s after the failed one, none trailing.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    /// Store that refuses customer writes for one email.
    struct FailingStore {
        inner: MemoryCustomerStore,
        email: String,
        error: fn() -> StoreError,
    }

    #[async_trait::async_trait]
    impl CustomerStore for FailingStore {
        async fn upsert_customer(
            &self,
            record: CustomerUpsert,
            key: ConflictKey,
        ) -> Result<CustomerId, StoreError> {
            if record.email.as_ref().map(Email::as_str) == Some(self.email.as_str()) {
                return Err((self.error)());
            }
            self.inner.upsert_customer(record, key).await
        }

        async fn upsert_order(&self, record: OrderUpsert) -> Result<OrderId, StoreError> {
            self.inner.upsert_order(record).await
        }

        async fn update_snapshot(
            &self,
            handle: &str,
            channel: &Channel,
            fields: SnapshotFields,
        ) -> Result<(), StoreError> {
            self.inner.update_snapshot(handle, channel, fields).await
        }

        async fn attach_external_id(
            &self,
            id: CustomerId,
            external_id: &str,
        ) -> Result<bool, StoreError> {
            self.inner.attach_external_id(id, external_id).await
        }

        async fn relink_external_id(
            &self,
            id: CustomerId,
            external_id: &str,
        ) -> Result<bool, StoreError> {
            self.inner.relink_external_id(id, external_id).await
        }

        async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
            self.inner.get_customer(id).await
        }

        async fn find_customer_by_email(
            &self,
            email: &Email,
        ) -> Result<Option<Customer>, StoreError> {
            self.inner.find_customer_by_email(email).await
        }

        async fn find_customer_by_phone(
            &self,
            phone: &Phone,
        ) -> Result<Vec<Customer>, StoreError> {
            self.inner.find_customer_by_phone(phone).await
        }

        async fn find_customer_by_phone_suffix(
            &self,
            suffix: &str,
        ) -> Result<Vec<Customer>, StoreError> {
            self.inner.find_customer_by_phone_suffix(suffix).await
        }

        async fn find_customer_by_external_id(
            &self,
            external_id: &str,
        ) -> Result<Option<Customer>, StoreError> {
            self.inner.find_customer_by_external_id(external_id).await
        }

        async fn get_snapshot(
            &self,
            handle: &str,
            channel: &Channel,
        ) -> Result<Option<ContactSnapshot>, StoreError> {
            self.inner.get_snapshot(handle, channel).await
        }

        async fn orders_for_customer(&self, id: CustomerId) -> Result<Vec<Order>, StoreError> {
            self.inner.orders_for_customer(id).await
        }

        async fn orders_missing_status(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
            self.inner.orders_missing_status(limit).await
        }

        async fn customers_with_orders(&self) -> Result<Vec<Customer>, StoreError> {
            self.inner.customers_with_orders().await
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_to_handle() {
        let directory = Arc::new(standard_directory().with_customer(
            remote_customer("55", Some("b@example.com"), None),
            Vec::new(),
        ));

        let errors: [fn() -> StoreError; 2] = [
            || StoreError::StorageUnavailable("connection reset".to_string()),
            || StoreError::ConstraintViolation("customers_email_key".to_string()),
        ];
        for error in errors {
            let store = Arc::new(FailingStore {
                inner: MemoryCustomerStore::new(),
                email: "b@example.com".to_string(),
                error,
            });
            let sync = SyncOrchestrator::new(store.clone(), directory.clone())
                .with_pacing(PacingConfig::none());

            let summary = sync
                .sync_batch(&["b@example.com", "a@example.com"], &Channel::default())
                .await
                .unwrap();
            assert_eq!(summary.failed, 1);
            assert_eq!(summary.resolved, 1);
            assert!(
                store
                    .get_snapshot("a@example.com", &Channel::default())
                    .await
                    .unwrap()
                    .is_some()
            );
            assert!(
                store
                    .get_snapshot("b@example.com", &Channel::default())
                    .await
                    .unwrap()
                    .is_none()
            );
        }
    }
}
