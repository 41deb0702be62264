//! Local customer, order and snapshot records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::email::Email;
use super::handle::Channel;
use super::id::{CustomerId, OrderId};
use super::money::Money;
use super::phone::Phone;
use super::status::{OrderStatus, RiskTier};

/// A customer as stored locally.
///
/// At least one of `email`, `phone` or `external_id` is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    /// Remote platform customer id, unique when present.
    pub external_id: Option<String>,
    /// Unique when present.
    pub email: Option<Email>,
    pub phone: Option<Phone>,
    pub display_name: String,
    pub tags: Vec<String>,
    /// Total spend as reported by the remote platform.
    pub lifetime_value: Decimal,
    pub order_count: i64,
    pub last_order_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_ref: Option<String>,
    pub variant_ref: Option<String>,
    pub title: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// An order as stored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// May be absent when the order was observed before its customer.
    pub customer_id: Option<CustomerId>,
    /// Idempotency key.
    pub external_order_id: String,
    /// Display label, e.g. `#1042`.
    pub order_number: String,
    pub status: OrderStatus,
    /// Raw remote financial status, kept for status catch-up.
    pub financial_status: Option<String>,
    /// Raw remote fulfillment status, kept for status catch-up.
    pub fulfillment_status: Option<String>,
    pub total: Money,
    pub line_items: Vec<LineItem>,
    pub remote_created_at: Option<DateTime<Utc>>,
    pub remote_updated_at: Option<DateTime<Utc>>,
}

/// Derived per-handle summary fields.
///
/// Always written as a whole; there is no partial update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFields {
    pub display_name: String,
    pub lifetime_value: Decimal,
    pub order_count: i64,
    pub risk_tier: RiskTier,
    pub tags: Vec<String>,
    /// Lifetime value divided by order count, rounded to cents.
    pub average_ticket: Decimal,
    /// Raw fulfillment status of the newest order.
    pub last_fulfillment_status: Option<String>,
}

impl SnapshotFields {
    /// The reset state written when a handle no longer maps to a remote
    /// customer.
    #[must_use]
    pub fn zeroed(display_name: &str) -> Self {
        Self {
            display_name: display_name.to_string(),
            lifetime_value: Decimal::ZERO,
            order_count: 0,
            risk_tier: RiskTier::Low,
            tags: Vec::new(),
            average_ticket: Decimal::ZERO,
            last_fulfillment_status: None,
        }
    }

    /// Average spend per order; zero when there are no orders.
    #[must_use]
    pub fn average_ticket(lifetime_value: Decimal, order_count: i64) -> Decimal {
        if order_count <= 0 {
            return Decimal::ZERO;
        }
        (lifetime_value / Decimal::from(order_count)).round_dp(2)
    }
}

/// Cached contact summary keyed by `(handle, channel)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub handle: String,
    pub channel: Channel,
    #[serde(flatten)]
    pub fields: SnapshotFields,
    pub updated_at: DateTime<Utc>,
}
