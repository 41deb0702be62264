//! Local customer store: customers, orders and contact snapshots.
//!
//! Every write is an atomic insert-or-update keyed on a natural key, so a
//! sync pass can be re-run from the start at any time without creating
//! duplicates.
//!
//! # Implementations
//!
//! - [`PgCustomerStore`] - `PostgreSQL` via sqlx
//! - [`MemoryCustomerStore`] - maps behind a mutex, same unique keys

mod memory;
mod postgres;

pub use memory::MemoryCustomerStore;
pub use postgres::PgCustomerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use omnicrm_core::{
    Channel, ContactSnapshot, Customer, CustomerId, Email, LineItem, Money, Order, OrderId,
    OrderStatus, Phone, SnapshotFields,
};

use crate::remote::{RemoteCustomerRecord, RemoteOrderRecord};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The conflict key value is missing or empty.
    #[error("conflict violation: {0}")]
    ConflictViolation(String),

    /// A unique, foreign-key or check constraint rejected the write.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Transport or database failure.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored row could not be decoded into a domain record.
    #[error("data corruption: {0}")]
    DataCorruption(String),
}

/// `PostgreSQL` `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";
/// `PostgreSQL` `foreign_key_violation`.
const FOREIGN_KEY_VIOLATION: &str = "23503";
/// `PostgreSQL` `check_violation`.
const CHECK_VIOLATION: &str = "23514";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if matches!(
                db.code().as_deref(),
                Some(UNIQUE_VIOLATION | FOREIGN_KEY_VIOLATION | CHECK_VIOLATION)
            ) {
                return Self::ConstraintViolation(db.message().to_string());
            }
        }
        Self::StorageUnavailable(err.to_string())
    }
}

/// Column a customer upsert resolves conflicts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKey {
    ExternalId,
    Email,
}

impl ConflictKey {
    /// External id when present, otherwise email.
    #[must_use]
    pub const fn for_record(record: &CustomerUpsert) -> Self {
        if record.external_id.is_some() {
            Self::ExternalId
        } else {
            Self::Email
        }
    }

    /// Column name.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::ExternalId => "external_id",
            Self::Email => "email",
        }
    }
}

/// Desired state of a customer row.
///
/// On conflict, identity columns (`external_id`, `email`, `phone`) are only
/// overwritten with present values; everything else is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerUpsert {
    pub external_id: Option<String>,
    pub email: Option<Email>,
    pub phone: Option<Phone>,
    pub display_name: String,
    pub tags: Vec<String>,
    pub lifetime_value: Decimal,
    pub order_count: i64,
    pub last_order_at: Option<DateTime<Utc>>,
}

impl CustomerUpsert {
    /// Build from a remote customer. Lifetime value is taken verbatim.
    #[must_use]
    pub fn from_remote(
        record: &RemoteCustomerRecord,
        last_order_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            external_id: Some(record.id.clone()),
            email: record.email.clone(),
            phone: record.phone.clone(),
            display_name: record.display_name.clone(),
            tags: record.tags.clone(),
            lifetime_value: record.total_spent,
            order_count: record.orders_count,
            last_order_at,
        }
    }

    /// Value of the given conflict key, if present and non-empty.
    fn key_value(&self, key: ConflictKey) -> Option<&str> {
        let value = match key {
            ConflictKey::ExternalId => self.external_id.as_deref(),
            ConflictKey::Email => self.email.as_ref().map(Email::as_str),
        };
        value.filter(|v| !v.trim().is_empty())
    }

    /// Check the write can be applied with `key`.
    ///
    /// # Errors
    ///
    /// Returns `ConflictViolation` if the key value is absent.
    pub fn validate(&self, key: ConflictKey) -> Result<(), StoreError> {
        if self.key_value(key).is_none() {
            return Err(StoreError::ConflictViolation(format!(
                "customer upsert has no {} to resolve conflicts on",
                key.column()
            )));
        }
        Ok(())
    }
}

/// Desired state of an order row, keyed on `external_order_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpsert {
    pub external_order_id: String,
    pub customer_id: Option<CustomerId>,
    pub order_number: String,
    pub status: OrderStatus,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub total: Money,
    pub line_items: Vec<LineItem>,
    pub remote_created_at: Option<DateTime<Utc>>,
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl OrderUpsert {
    /// Build from a remote order owned by `customer_id`.
    #[must_use]
    pub fn from_remote(record: &RemoteOrderRecord, customer_id: Option<CustomerId>) -> Self {
        Self {
            external_order_id: record.id.clone(),
            customer_id,
            order_number: record.order_number.clone(),
            status: record.status,
            financial_status: record.financial_status.clone(),
            fulfillment_status: record.fulfillment_status.clone(),
            total: record.total.clone(),
            line_items: record.line_items.clone(),
            remote_created_at: record.created_at,
            remote_updated_at: record.updated_at,
        }
    }

    /// # Errors
    ///
    /// Returns `ConflictViolation` if the external order id is empty.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.external_order_id.trim().is_empty() {
            return Err(StoreError::ConflictViolation(
                "order upsert has no external_order_id".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persistence operations used by the resolver, orchestrator and jobs.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Insert or update a customer, returning its id.
    async fn upsert_customer(
        &self,
        record: CustomerUpsert,
        key: ConflictKey,
    ) -> Result<CustomerId, StoreError>;

    /// Insert or update an order keyed on its external id.
    async fn upsert_order(&self, record: OrderUpsert) -> Result<OrderId, StoreError>;

    /// Overwrite the snapshot for `(handle, channel)`.
    async fn update_snapshot(
        &self,
        handle: &str,
        channel: &Channel,
        fields: SnapshotFields,
    ) -> Result<(), StoreError>;

    /// Give a row without an external id the given one.
    ///
    /// Returns `true` if the row now carries `external_id`, `false` if it
    /// already has a different one or another row owns it.
    async fn attach_external_id(
        &self,
        id: CustomerId,
        external_id: &str,
    ) -> Result<bool, StoreError>;

    /// Point a row at a new remote id, replacing the one it carries.
    ///
    /// Used when the remote customer behind a row was merged or re-created.
    /// Returns `false` if the row does not exist or another row already
    /// owns `external_id`.
    async fn relink_external_id(
        &self,
        id: CustomerId,
        external_id: &str,
    ) -> Result<bool, StoreError>;

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError>;

    /// Rows whose phone is exactly `phone`, ordered by id.
    async fn find_customer_by_phone(&self, phone: &Phone) -> Result<Vec<Customer>, StoreError>;

    /// Rows whose phone ends with `suffix`, ordered by id.
    async fn find_customer_by_phone_suffix(
        &self,
        suffix: &str,
    ) -> Result<Vec<Customer>, StoreError>;

    async fn find_customer_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Customer>, StoreError>;

    async fn get_snapshot(
        &self,
        handle: &str,
        channel: &Channel,
    ) -> Result<Option<ContactSnapshot>, StoreError>;

    /// Orders of a customer, newest first.
    async fn orders_for_customer(&self, id: CustomerId) -> Result<Vec<Order>, StoreError>;

    // -------------------------------------------------------------------------
    // Catch-up and scans
    // -------------------------------------------------------------------------

    /// Up to `limit` orders lacking a financial or fulfillment status,
    /// newest first.
    async fn orders_missing_status(&self, limit: i64) -> Result<Vec<Order>, StoreError>;

    /// Every customer with at least one order date, ordered by id.
    async fn customers_with_orders(&self) -> Result<Vec<Customer>, StoreError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn upsert(external_id: Option<&str>, email: Option<&str>) -> CustomerUpsert {
        CustomerUpsert {
            external_id: external_id.map(ToString::to_string),
            email: email.map(|e| Email::parse(e).unwrap()),
            phone: None,
            display_name: String::new(),
            tags: Vec::new(),
            lifetime_value: Decimal::ZERO,
            order_count: 0,
            last_order_at: None,
        }
    }

    #[test]
    fn test_conflict_key_prefers_external_id() {
        assert_eq!(
            ConflictKey::for_record(&upsert(Some("42"), Some("a@example.com"))),
            ConflictKey::ExternalId
        );
        assert_eq!(
            ConflictKey::for_record(&upsert(None, Some("a@example.com"))),
            ConflictKey::Email
        );
    }

    #[test]
    fn test_validate_requires_key_value() {
        let record = upsert(None, None);
        assert!(matches!(
            record.validate(ConflictKey::Email),
            Err(StoreError::ConflictViolation(_))
        ));
        assert!(upsert(Some("42"), None).validate(ConflictKey::ExternalId).is_ok());
        assert!(upsert(Some("  "), None).validate(ConflictKey::ExternalId).is_err());
    }
}
