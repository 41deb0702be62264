//! Inactive customer ("ghost") scan.
//!
//! Classifies every customer with a known last order date by how long they
//! have been quiet and how valuable they were. Produces a report only; no
//! outreach is sent from here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use omnicrm_core::{Customer, CustomerId, Email, GhostLevel, Phone};

use crate::store::{CustomerStore, StoreError};

const SECONDS_PER_DAY: i64 = 86_400;

/// One inactive customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ghost {
    pub customer_id: CustomerId,
    pub display_name: String,
    pub email: Option<Email>,
    pub phone: Option<Phone>,
    pub level: GhostLevel,
    pub days_inactive: i64,
    pub order_count: i64,
    pub lifetime_value: Decimal,
}

/// Result of a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GhostReport {
    /// Inactive customers, longest inactive first.
    pub ghosts: Vec<Ghost>,
}

impl GhostReport {
    /// Number of customers at each non-active level, in priority order.
    #[must_use]
    pub fn counts(&self) -> Vec<(GhostLevel, usize)> {
        GhostLevel::ALL
            .into_iter()
            .filter(|level| *level != GhostLevel::Active)
            .map(|level| (level, self.ghosts.iter().filter(|g| g.level == level).count()))
            .collect()
    }
}

/// Whole days between `last` and `now`, rounded up.
#[must_use]
pub fn days_inactive(last: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let seconds = (now - last).num_seconds().abs();
    (seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
}

fn classify(customer: &Customer, now: DateTime<Utc>) -> Option<Ghost> {
    let days = days_inactive(customer.last_order_at?, now);
    let level = GhostLevel::classify(days, customer.order_count, customer.lifetime_value);
    (level != GhostLevel::Active).then(|| Ghost {
        customer_id: customer.id,
        display_name: customer.display_name.clone(),
        email: customer.email.clone(),
        phone: customer.phone.clone(),
        level,
        days_inactive: days,
        order_count: customer.order_count,
        lifetime_value: customer.lifetime_value,
    })
}

/// Classify every customer with a last order date.
///
/// # Errors
///
/// Returns `StoreError` if the customer query fails.
#[instrument(skip(store))]
pub async fn scan_ghosts(
    store: &dyn CustomerStore,
    now: DateTime<Utc>,
) -> Result<GhostReport, StoreError> {
    let customers = store.customers_with_orders().await?;

    let mut ghosts: Vec<Ghost> = customers.iter().filter_map(|c| classify(c, now)).collect();
    ghosts.sort_by(|a, b| {
        b.days_inactive
            .cmp(&a.days_inactive)
            .then_with(|| a.customer_id.cmp(&b.customer_id))
    });

    info!(
        scanned = customers.len(),
        ghosts = ghosts.len(),
        "Ghost scan complete"
    );
    Ok(GhostReport { ghosts })
}
