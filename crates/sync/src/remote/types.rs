//! Remote record types and the Shopify REST wire payloads they come from.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use omnicrm_core::{Email, LineItem, Money, OrderStatus, Phone};

use super::DirectoryError;

/// A customer as reported by the remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCustomerRecord {
    pub id: String,
    pub email: Option<Email>,
    pub phone: Option<Phone>,
    pub display_name: String,
    pub tags: Vec<String>,
    /// Lifetime spend, authoritative for the local lifetime value.
    pub total_spent: Decimal,
    pub orders_count: i64,
}

/// An order as reported by the remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOrderRecord {
    pub id: String,
    /// Remote customer the order belongs to, if any.
    pub customer_id: Option<String>,
    pub order_number: String,
    pub status: OrderStatus,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub total: Money,
    pub line_items: Vec<LineItem>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct CustomersEnvelope {
    #[serde(default)]
    pub customers: Vec<WireCustomer>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OrdersEnvelope {
    #[serde(default)]
    pub orders: Vec<WireOrder>,
}

#[derive(Debug, Deserialize)]
pub(super) struct OrderEnvelope {
    pub order: WireOrder,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireCustomer {
    pub id: u64,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default)]
    pub tags: String,
    pub total_spent: Option<String>,
    #[serde(default)]
    pub orders_count: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireCustomerRef {
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireOrder {
    pub id: u64,
    pub name: Option<String>,
    pub order_number: Option<u64>,
    pub financial_status: Option<String>,
    pub fulfillment_status: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub total_price: String,
    pub currency: String,
    pub customer: Option<WireCustomerRef>,
    #[serde(default)]
    pub line_items: Vec<WireLineItem>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireLineItem {
    pub product_id: Option<u64>,
    pub variant_id: Option<u64>,
    #[serde(default)]
    pub title: String,
    pub quantity: i64,
    pub price: String,
}

// =============================================================================
// Conversions
// =============================================================================

fn parse_amount(field: &str, raw: &str) -> Result<Decimal, DirectoryError> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|e| DirectoryError::InvalidPayload(format!("{field} {raw:?}: {e}")))
}

/// Split Shopify's comma-joined tag string.
fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl TryFrom<WireCustomer> for RemoteCustomerRecord {
    type Error = DirectoryError;

    /// Unparsable emails and phones are dropped rather than rejected;
    /// Shopify stores whatever the checkout form accepted.
    fn try_from(wire: WireCustomer) -> Result<Self, Self::Error> {
        let email = non_blank(wire.email).and_then(|e| Email::parse(&e).ok());
        let phone = non_blank(wire.phone).and_then(|p| Phone::parse(&p).ok());

        let name = [wire.first_name, wire.last_name]
            .into_iter()
            .filter_map(non_blank)
            .collect::<Vec<_>>()
            .join(" ");
        let display_name = if name.is_empty() {
            email
                .as_ref()
                .map(ToString::to_string)
                .or_else(|| phone.as_ref().map(ToString::to_string))
                .unwrap_or_default()
        } else {
            name
        };

        let total_spent = match non_blank(wire.total_spent) {
            Some(raw) => parse_amount("total_spent", &raw)?,
            None => Decimal::ZERO,
        };

        Ok(Self {
            id: wire.id.to_string(),
            email,
            phone,
            display_name,
            tags: split_tags(&wire.tags),
            total_spent,
            orders_count: wire.orders_count,
        })
    }
}

impl TryFrom<WireLineItem> for LineItem {
    type Error = DirectoryError;

    fn try_from(wire: WireLineItem) -> Result<Self, Self::Error> {
        Ok(Self {
            product_ref: wire.product_id.map(|id| id.to_string()),
            variant_ref: wire.variant_id.map(|id| id.to_string()),
            title: wire.title,
            quantity: wire.quantity,
            unit_price: parse_amount("line item price", &wire.price)?,
        })
    }
}

impl TryFrom<WireOrder> for RemoteOrderRecord {
    type Error = DirectoryError;

    fn try_from(wire: WireOrder) -> Result<Self, Self::Error> {
        let financial_status = non_blank(wire.financial_status);
        let fulfillment_status = non_blank(wire.fulfillment_status);
        let status = OrderStatus::derive(
            financial_status.as_deref(),
            fulfillment_status.as_deref(),
            wire.cancelled_at.is_some(),
        );

        let order_number = non_blank(wire.name)
            .or_else(|| wire.order_number.map(|n| format!("#{n}")))
            .unwrap_or_else(|| format!("#{}", wire.id));

        let line_items = wire
            .line_items
            .into_iter()
            .map(LineItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: wire.id.to_string(),
            customer_id: wire.customer.map(|c| c.id.to_string()),
            order_number,
            status,
            financial_status,
            fulfillment_status,
            total: Money::new(parse_amount("total_price", &wire.total_price)?, &wire.currency),
            line_items,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_conversion() {
        let envelope: CustomersEnvelope = serde_json::from_str(
            r#"{"customers":[{
                "id": 42,
                "email": "A@Example.com",
                "phone": "+52 55 1234 5678",
                "first_name": "Ana",
                "last_name": null,
                "tags": "vip, repeat, ",
                "total_spent": "150.00",
                "orders_count": 2
            }]}"#,
        )
        .unwrap();

        let wire = envelope.customers.into_iter().next().unwrap();
        let record = RemoteCustomerRecord::try_from(wire).unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(record.email.unwrap().as_str(), "a@example.com");
        assert_eq!(record.phone.unwrap().as_str(), "525512345678");
        assert_eq!(record.display_name, "Ana");
        assert_eq!(record.tags, vec!["vip", "repeat"]);
        assert_eq!(record.total_spent, Decimal::new(15000, 2));
        assert_eq!(record.orders_count, 2);
    }

    #[test]
    fn test_customer_display_name_falls_back_to_email() {
        let wire: WireCustomer = serde_json::from_str(
            r#"{"id": 7, "email": "b@example.com", "phone": "", "total_spent": null}"#,
        )
        .unwrap();
        let record = RemoteCustomerRecord::try_from(wire).unwrap();
        assert_eq!(record.display_name, "b@example.com");
        assert!(record.phone.is_none());
        assert_eq!(record.total_spent, Decimal::ZERO);
        assert!(record.tags.is_empty());
    }

    #[test]
    fn test_invalid_total_spent_is_rejected() {
        let wire: WireCustomer =
            serde_json::from_str(r#"{"id": 7, "total_spent": "lots"}"#).unwrap();
        assert!(matches!(
            RemoteCustomerRecord::try_from(wire),
            Err(DirectoryError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_order_conversion_derives_status() {
        let envelope: OrderEnvelope = serde_json::from_str(
            r##"{"order": {
                "id": 901,
                "name": "#1042",
                "financial_status": "paid",
                "fulfillment_status": "fulfilled",
                "cancelled_at": null,
                "total_price": "75.00",
                "currency": "mxn",
                "customer": {"id": 42},
                "line_items": [
                    {"product_id": 1, "variant_id": 11, "title": "Tincture", "quantity": 3, "price": "25.00"}
                ],
                "created_at": "2024-01-10T10:00:00-06:00",
                "updated_at": "2024-01-11T10:00:00-06:00"
            }}"##,
        )
        .unwrap();

        let record = RemoteOrderRecord::try_from(envelope.order).unwrap();

        assert_eq!(record.id, "901");
        assert_eq!(record.customer_id.as_deref(), Some("42"));
        assert_eq!(record.order_number, "#1042");
        assert_eq!(record.status, OrderStatus::Fulfilled);
        assert_eq!(record.total, Money::new(Decimal::new(7500, 2), "MXN"));
        assert_eq!(record.line_items.len(), 1);
        assert_eq!(record.line_items[0].unit_price, Decimal::new(2500, 2));
        assert_eq!(record.line_items[0].variant_ref.as_deref(), Some("11"));
        assert_eq!(
            record.created_at.unwrap().to_rfc3339(),
            "2024-01-10T16:00:00+00:00"
        );
    }

    #[test]
    fn test_cancelled_order() {
        let wire: WireOrder = serde_json::from_str(
            r#"{"id": 5, "order_number": 1005, "financial_status": "paid",
                "cancelled_at": "2024-02-01T00:00:00Z", "total_price": "10", "currency": "MXN"}"#,
        )
        .unwrap();
        let record = RemoteOrderRecord::try_from(wire).unwrap();
        assert_eq!(record.status, OrderStatus::Cancelled);
        assert_eq!(record.order_number, "#1005");
        assert!(record.customer_id.is_none());
    }
}
