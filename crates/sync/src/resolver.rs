//! Handle to customer resolution.
//!
//! Local rows are consulted first; the remote directory only when nothing
//! local matches. Email handles never touch phone matching.
//!
//! # Ranking
//!
//! Several candidates can match one phone handle. Ties are never reported
//! as ambiguous; they are ranked:
//!
//! - local rows: specificity, then an external id being present, then order
//!   count, then lowest id
//! - remote records: specificity, then remote order count, then remote id
//!   (numeric-aware, ascending)

use std::cmp::{Ordering, Reverse};

use tracing::{debug, instrument};

use omnicrm_core::{Customer, CustomerId, Email, Handle, Phone, PhoneMatch};

use crate::error::SyncError;
use crate::remote::{CustomerDirectory, RemoteCustomerRecord};
use crate::store::CustomerStore;

/// Outcome of resolving one handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A local customer already represents the handle.
    Matched(CustomerId),
    /// No local row, but the remote directory knows the customer.
    Importable(RemoteCustomerRecord),
    /// Nobody is known for this handle.
    Unresolved,
}

/// Resolves handles against a store and a directory.
pub struct IdentityResolver<'a, S: ?Sized, D: ?Sized> {
    store: &'a S,
    directory: &'a D,
}

impl<'a, S, D> IdentityResolver<'a, S, D>
where
    S: CustomerStore + ?Sized,
    D: CustomerDirectory + ?Sized,
{
    /// Create a resolver borrowing both backends.
    #[must_use]
    pub const fn new(store: &'a S, directory: &'a D) -> Self {
        Self { store, directory }
    }

    /// Resolve a handle to a local customer, a remote record, or nothing.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the store or the directory fails.
    #[instrument(skip(self), fields(handle = %handle))]
    pub async fn resolve(&self, handle: &Handle) -> Result<Resolution, SyncError> {
        if let Some(id) = self.resolve_local(handle).await? {
            debug!(customer_id = %id, "Matched local customer");
            return Ok(Resolution::Matched(id));
        }

        Ok(match self.lookup_remote(handle).await? {
            Some(record) => {
                debug!(remote_id = %record.id, "Found remote customer");
                Resolution::Importable(record)
            }
            None => Resolution::Unresolved,
        })
    }

    /// Best local customer for the handle, if any.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Store` if a lookup fails.
    pub async fn resolve_local(&self, handle: &Handle) -> Result<Option<CustomerId>, SyncError> {
        match handle {
            Handle::Email(email) => Ok(self
                .store
                .find_customer_by_email(email)
                .await?
                .map(|c| c.id)),
            Handle::Phone(phone) => self.resolve_local_phone(phone).await,
        }
    }

    async fn resolve_local_phone(&self, phone: &Phone) -> Result<Option<CustomerId>, SyncError> {
        let mut candidates = self.store.find_customer_by_phone(phone).await?;
        for customer in self.store.find_customer_by_phone_suffix(phone.suffix()).await? {
            if !candidates.iter().any(|c| c.id == customer.id) {
                candidates.push(customer);
            }
        }

        let best = candidates
            .into_iter()
            .filter_map(|c| {
                let specificity = c.phone.as_ref()?.match_against(phone);
                (specificity != PhoneMatch::None).then_some((specificity, c))
            })
            .min_by(|(sa, a), (sb, b)| rank_local(*sa, a, *sb, b));

        Ok(best.map(|(_, c)| c.id))
    }

    /// Best remote customer for the handle, if any.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the directory fails.
    pub async fn lookup_remote(
        &self,
        handle: &Handle,
    ) -> Result<Option<RemoteCustomerRecord>, SyncError> {
        match handle {
            Handle::Email(email) => self.lookup_remote_email(email).await,
            Handle::Phone(phone) => {
                let candidates = self.directory.find_by_phone(phone).await?;
                debug!(candidates = candidates.len(), "Remote phone candidates");
                Ok(pick_remote(phone, candidates))
            }
        }
    }

    async fn lookup_remote_email(
        &self,
        email: &Email,
    ) -> Result<Option<RemoteCustomerRecord>, SyncError> {
        Ok(self.directory.find_by_email(email).await?)
    }
}

/// Ascending order puts the preferred local candidate first.
fn rank_local(sa: PhoneMatch, a: &Customer, sb: PhoneMatch, b: &Customer) -> Ordering {
    sb.cmp(&sa)
        .then_with(|| b.external_id.is_some().cmp(&a.external_id.is_some()))
        .then_with(|| b.order_count.cmp(&a.order_count))
        .then_with(|| a.id.cmp(&b.id))
}

/// Pick the preferred remote candidate for a phone handle.
fn pick_remote(
    phone: &Phone,
    candidates: Vec<RemoteCustomerRecord>,
) -> Option<RemoteCustomerRecord> {
    candidates.into_iter().min_by(|a, b| {
        let sa = specificity(phone, a);
        let sb = specificity(phone, b);
        Reverse(sa)
            .cmp(&Reverse(sb))
            .then_with(|| b.orders_count.cmp(&a.orders_count))
            .then_with(|| compare_remote_ids(&a.id, &b.id))
    })
}

fn specificity(phone: &Phone, record: &RemoteCustomerRecord) -> PhoneMatch {
    record
        .phone
        .as_ref()
        .map_or(PhoneMatch::None, |p| p.match_against(phone))
}

/// Numeric comparison when both ids are numbers, lexical otherwise.
fn compare_remote_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}
