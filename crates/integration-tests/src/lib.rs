//! Integration tests for OmniCRM sync.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory tests run with the rest of the workspace
//! cargo test -p omnicrm-integration-tests
//!
//! # PostgreSQL tests need a database
//! DATABASE_URL=postgres://localhost/omnicrm_test \
//!     cargo test -p omnicrm-integration-tests -- --ignored
//! ```
//!
//! # Test Categories
//!
//! - `pg_store` - `PgCustomerStore` upsert and lookup semantics
//! - `sync_end_to_end` - Full sync passes against the in-memory and `PostgreSQL` stores
//!
//! Every test uses fresh identifiers from [`unique_suffix`], so the suites
//! can share one database without cleanup between runs.

use chrono::{DateTime, TimeZone, Utc};
use omnicrm_core::{Email, Money, OrderStatus, Phone};
use omnicrm_sync::db;
use omnicrm_sync::remote::{RemoteCustomerRecord, RemoteOrderRecord};
use omnicrm_sync::store::PgCustomerStore;
use rust_decimal::Decimal;
use secrecy::SecretString;

/// Connect to `DATABASE_URL` and apply migrations.
///
/// # Panics
///
/// Panics if `DATABASE_URL` is unset, the database is unreachable, or a
/// migration fails.
pub async fn pg_store() -> PgCustomerStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = db::create_pool(&SecretString::from(url))
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    PgCustomerStore::new(pool)
}

/// Twelve random digits, usable in emails, phone numbers and remote ids.
#[must_use]
pub fn unique_suffix() -> String {
    format!("{:012}", uuid::Uuid::new_v4().as_u128() % 1_000_000_000_000)
}

/// A fixed timestamp on the given day of January 2024.
///
/// # Panics
///
/// Panics if `day` is not a valid day of January.
#[must_use]
pub fn jan_2024(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0)
        .single()
        .expect("valid January date")
}

/// A remote customer with two orders' worth of spend (150.00).
///
/// # Panics
///
/// Panics if `email` or `phone` are not valid handles.
#[must_use]
pub fn remote_customer(id: &str, email: Option<&str>, phone: Option<&str>) -> RemoteCustomerRecord {
    RemoteCustomerRecord {
        id: id.to_string(),
        email: email.map(|e| Email::parse(e).expect("valid email")),
        phone: phone.map(|p| Phone::parse(p).expect("valid phone")),
        display_name: "Ana Torres".to_string(),
        tags: vec!["vip".to_string(), "repeat".to_string()],
        total_spent: Decimal::new(15000, 2),
        orders_count: 2,
    }
}

/// A 75.00 MXN order owned by remote customer `customer`.
#[must_use]
pub fn remote_order(id: &str, customer: &str, status: OrderStatus, day: u32) -> RemoteOrderRecord {
    let (financial, fulfillment) = match status {
        OrderStatus::Fulfilled => (Some("paid"), Some("fulfilled")),
        OrderStatus::Paid => (Some("paid"), None),
        OrderStatus::Cancelled => (Some("refunded"), None),
        OrderStatus::Created => (Some("pending"), None),
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
        created_at: Some(jan_2024(day)),
        updated_at: None,
    }
}
