//! In-memory [`CustomerStore`].
//!
//! Enforces the same unique keys as the `PostgreSQL` schema so tests and dry
//! runs observe the same conflicts a real database would raise.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use omnicrm_core::{
    Channel, ContactSnapshot, Customer, CustomerId, Email, Order, OrderId, Phone, SnapshotFields,
};

use super::{ConflictKey, CustomerStore, CustomerUpsert, OrderUpsert, StoreError};

#[derive(Debug, Default)]
struct StoreState {
    next_customer_id: i64,
    next_order_id: i64,
    customers: BTreeMap<CustomerId, Customer>,
    orders: BTreeMap<OrderId, Order>,
    snapshots: HashMap<(String, String), ContactSnapshot>,
}

impl StoreState {
    fn customer_by_key(&self, key: ConflictKey, record: &CustomerUpsert) -> Option<CustomerId> {
        self.customers
            .values()
            .find(|c| match key {
                ConflictKey::ExternalId => {
                    c.external_id.is_some() && c.external_id == record.external_id
                }
                ConflictKey::Email => c.email.is_some() && c.email == record.email,
            })
            .map(|c| c.id)
    }

    /// Reject a write that would give `id` an external id or email another
    /// row already holds.
    fn check_unique(
        &self,
        id: Option<CustomerId>,
        external_id: Option<&str>,
        email: Option<&Email>,
    ) -> Result<(), StoreError> {
        for other in self.customers.values().filter(|c| Some(c.id) != id) {
            if external_id.is_some() && other.external_id.as_deref() == external_id {
                return Err(StoreError::ConstraintViolation(format!(
                    "external_id {} already belongs to customer {}",
                    external_id.unwrap_or_default(),
                    other.id
                )));
            }
            if email.is_some() && other.email.as_ref() == email {
                return Err(StoreError::ConstraintViolation(format!(
                    "email already belongs to customer {}",
                    other.id
                )));
            }
        }
        Ok(())
    }
}

/// Customer store backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryCustomerStore {
    state: Mutex<StoreState>,
}

impl MemoryCustomerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of customer rows.
    pub async fn customer_count(&self) -> usize {
        self.state.lock().await.customers.len()
    }

    /// Number of order rows.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Every snapshot, in no particular order.
    pub async fn snapshots(&self) -> Vec<ContactSnapshot> {
        self.state.lock().await.snapshots.values().cloned().collect()
    }
}

/// Newest first by remote creation time, undated last, then by id.
fn newest_first(a: &Order, b: &Order) -> std::cmp::Ordering {
    match (a.remote_created_at, b.remote_created_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| b.id.cmp(&a.id))
}

#[async_trait]
impl CustomerStore for MemoryCustomerStore {
    async fn upsert_customer(
        &self,
        record: CustomerUpsert,
        key: ConflictKey,
    ) -> Result<CustomerId, StoreError> {
        record.validate(key)?;
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let existing = state.customer_by_key(key, &record);
        let external_id = record.external_id.as_deref();
        state.check_unique(existing, external_id, record.email.as_ref())?;

        if let Some(id) = existing {
            if let Some(customer) = state.customers.get_mut(&id) {
                if record.external_id.is_some() {
                    customer.external_id = record.external_id;
                }
                if record.email.is_some() {
                    customer.email = record.email;
                }
                if record.phone.is_some() {
                    customer.phone = record.phone;
                }
                customer.display_name = record.display_name;
                customer.tags = record.tags;
                customer.lifetime_value = record.lifetime_value;
                customer.order_count = record.order_count;
                customer.last_order_at = record.last_order_at;
                customer.updated_at = now;
            }
            return Ok(id);
        }

        state.next_customer_id += 1;
        let id = CustomerId::new(state.next_customer_id);
        state.customers.insert(
            id,
            Customer {
                id,
                external_id: record.external_id,
                email: record.email,
                phone: record.phone,
                display_name: record.display_name,
                tags: record.tags,
                lifetime_value: record.lifetime_value,
                order_count: record.order_count,
                last_order_at: record.last_order_at,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn upsert_order(&self, record: OrderUpsert) -> Result<OrderId, StoreError> {
        record.validate()?;
        let mut state = self.state.lock().await;

        if let Some(customer_id) = record.customer_id {
            if !state.customers.contains_key(&customer_id) {
                return Err(StoreError::ConstraintViolation(format!(
                    "customer {customer_id} does not exist"
                )));
            }
        }

        let existing = state
            .orders
            .values_mut()
            .find(|o| o.external_order_id == record.external_order_id);

        if let Some(order) = existing {
            order.customer_id = record.customer_id.or(order.customer_id);
            order.order_number = record.order_number;
            order.status = record.status;
            order.financial_status = record.financial_status;
            order.fulfillment_status = record.fulfillment_status;
            order.total = record.total;
            order.line_items = record.line_items;
            order.remote_created_at = record.remote_created_at;
            order.remote_updated_at = record.remote_updated_at;
            return Ok(order.id);
        }

        state.next_order_id += 1;
        let id = OrderId::new(state.next_order_id);
        state.orders.insert(
            id,
            Order {
                id,
                customer_id: record.customer_id,
                external_order_id: record.external_order_id,
                order_number: record.order_number,
                status: record.status,
                financial_status: record.financial_status,
                fulfillment_status: record.fulfillment_status,
                total: record.total,
                line_items: record.line_items,
                remote_created_at: record.remote_created_at,
                remote_updated_at: record.remote_updated_at,
            },
        );
        Ok(id)
    }

    async fn update_snapshot(
        &self,
        handle: &str,
        channel: &Channel,
        fields: SnapshotFields,
    ) -> Result<(), StoreError> {
        let snapshot = ContactSnapshot {
            handle: handle.to_string(),
            channel: channel.clone(),
            fields,
            updated_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .snapshots
            .insert((handle.to_string(), channel.to_string()), snapshot);
        Ok(())
    }

    async fn attach_external_id(
        &self,
        id: CustomerId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;

        let taken = state
            .customers
            .values()
            .any(|c| c.id != id && c.external_id.as_deref() == Some(external_id));
        if taken {
            return Ok(false);
        }

        let Some(customer) = state.customers.get_mut(&id) else {
            return Ok(false);
        };
        match customer.external_id.as_deref() {
            Some(current) => Ok(current == external_id),
            None => {
                customer.external_id = Some(external_id.to_string());
                customer.updated_at = Utc::now();
                Ok(true)
            }
        }
    }

    async fn relink_external_id(
        &self,
        id: CustomerId,
        external_id: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;

        let taken = state
            .customers
            .values()
            .any(|c| c.id != id && c.external_id.as_deref() == Some(external_id));
        if taken {
            return Ok(false);
        }

        let Some(customer) = state.customers.get_mut(&id) else {
            return Ok(false);
        };
        customer.external_id = Some(external_id.to_string());
        customer.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError> {
        Ok(self.state.lock().await.customers.get(&id).cloned())
    }

    async fn find_customer_by_email(&self, email: &Email) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .customers
            .values()
            .find(|c| c.email.as_ref() == Some(email))
            .cloned())
    }

    async fn find_customer_by_phone(&self, phone: &Phone) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .customers
            .values()
            .filter(|c| c.phone.as_ref() == Some(phone))
            .cloned()
            .collect())
    }

    async fn find_customer_by_phone_suffix(
        &self,
        suffix: &str,
    ) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .customers
            .values()
            .filter(|c| c.phone.as_ref().is_some_and(|p| p.ends_with(suffix)))
            .cloned()
            .collect())
    }

    async fn find_customer_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .customers
            .values()
            .find(|c| c.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn get_snapshot(
        &self,
        handle: &str,
        channel: &Channel,
    ) -> Result<Option<ContactSnapshot>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .snapshots
            .get(&(handle.to_string(), channel.to_string()))
            .cloned())
    }

    async fn orders_for_customer(&self, id: CustomerId) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.customer_id == Some(id))
            .cloned()
            .collect();
        orders.sort_by(newest_first);
        Ok(orders)
    }

    async fn orders_missing_status(&self, limit: i64) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .state
            .lock()
            .await
            .orders
            .values()
            .filter(|o| o.financial_status.is_none() || o.fulfillment_status.is_none())
            .cloned()
            .collect();
        orders.sort_by(newest_first);
        orders.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(orders)
    }

    async fn customers_with_orders(&self) -> Result<Vec<Customer>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .customers
            .values()
            .filter(|c| c.last_order_at.is_some())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::{Duration, TimeZone};
    use omnicrm_core::{Money, OrderStatus, RiskTier};
    use rust_decimal::Decimal;

    use super::*;

    fn customer(
        external_id: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> CustomerUpsert {
        CustomerUpsert {
            external_id: external_id.map(ToString::to_string),
            email: email.map(|e| Email::parse(e).unwrap()),
            phone: phone.map(|p| Phone::parse(p).unwrap()),
            display_name: "Ana".to_string(),
            tags: vec!["vip".to_string()],
            lifetime_value: Decimal::new(15000, 2),
            order_count: 2,
            last_order_at: None,
        }
    }

    fn order(external_id: &str, customer_id: Option<CustomerId>) -> OrderUpsert {
        OrderUpsert {
            external_order_id: external_id.to_string(),
            customer_id,
            order_number: format!("#{external_id}"),
            status: OrderStatus::Paid,
            financial_status: Some("paid".to_string()),
            fulfillment_status: None,
            total: Money::new(Decimal::new(7500, 2), "MXN"),
            line_items: Vec::new(),
            remote_created_at: None,
            remote_updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_customer_is_idempotent() {
        let store = MemoryCustomerStore::new();
        let record = customer(Some("42"), Some("a@example.com"), None);

        let first = store
            .upsert_customer(record.clone(), ConflictKey::ExternalId)
            .await
            .unwrap();
        let second = store
            .upsert_customer(record, ConflictKey::ExternalId)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.customer_count().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_columns() {
        let store = MemoryCustomerStore::new();
        let id = store
            .upsert_customer(
                customer(Some("42"), Some("a@example.com"), Some("5512345678")),
                ConflictKey::ExternalId,
            )
            .await
            .unwrap();

        let mut update = customer(Some("42"), None, None);
        update.lifetime_value = Decimal::ZERO;
        store
            .upsert_customer(update, ConflictKey::ExternalId)
            .await
            .unwrap();

        let stored = store.get_customer(id).await.unwrap().unwrap();
        assert_eq!(stored.email.unwrap().as_str(), "a@example.com");
        assert_eq!(stored.phone.unwrap().as_str(), "5512345678");
        assert_eq!(stored.lifetime_value, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_upsert_without_key_value_is_a_conflict() {
        let store = MemoryCustomerStore::new();
        let result = store
            .upsert_customer(customer(None, None, Some("5512345678")), ConflictKey::Email)
            .await;
        assert!(matches!(result, Err(StoreError::ConflictViolation(_))));
        assert_eq!(store.customer_count().await, 0);
    }

    #[tokio::test]
    async fn test_email_collision_violates_constraint() {
        let store = MemoryCustomerStore::new();
        store
            .upsert_customer(customer(None, Some("a@example.com"), None), ConflictKey::Email)
            .await
            .unwrap();

        let result = store
            .upsert_customer(
                customer(Some("42"), Some("a@example.com"), None),
                ConflictKey::ExternalId,
            )
            .await;
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_attach_external_id_adopts_row() {
        let store = MemoryCustomerStore::new();
        let id = store
            .upsert_customer(customer(None, Some("a@example.com"), None), ConflictKey::Email)
            .await
            .unwrap();

        assert!(store.attach_external_id(id, "42").await.unwrap());
        assert!(store.attach_external_id(id, "42").await.unwrap());
        assert!(!store.attach_external_id(id, "43").await.unwrap());

        let adopted = store
            .upsert_customer(
                customer(Some("42"), Some("a@example.com"), None),
                ConflictKey::ExternalId,
            )
            .await
            .unwrap();
        assert_eq!(adopted, id);
        assert_eq!(store.customer_count().await, 1);
    }

    #[tokio::test]
    async fn test_relink_replaces_stale_external_id() {
        let store = MemoryCustomerStore::new();
        let id = store
            .upsert_customer(
                customer(Some("42"), Some("a@example.com"), None),
                ConflictKey::ExternalId,
            )
            .await
            .unwrap();
        let other = store
            .upsert_customer(
                customer(Some("50"), Some("b@example.com"), None),
                ConflictKey::ExternalId,
            )
            .await
            .unwrap();

        assert!(store.relink_external_id(id, "43").await.unwrap());
        assert!(!store.relink_external_id(id, "50").await.unwrap());
        assert!(!store.relink_external_id(CustomerId::new(99), "44").await.unwrap());

        let stored = store.get_customer(id).await.unwrap().unwrap();
        assert_eq!(stored.external_id.as_deref(), Some("43"));
        assert!(store.find_customer_by_external_id("42").await.unwrap().is_none());
        let untouched = store.get_customer(other).await.unwrap().unwrap();
        assert_eq!(untouched.external_id.as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn test_one_order_row_per_external_id() {
        let store = MemoryCustomerStore::new();
        let customer_id = store
            .upsert_customer(customer(Some("42"), None, None), ConflictKey::ExternalId)
            .await
            .unwrap();

        let first = store.upsert_order(order("900", Some(customer_id))).await.unwrap();
        let second = store.upsert_order(order("900", None)).await.unwrap();
        store.upsert_order(order("900", Some(customer_id))).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.order_count().await, 1);
        let orders = store.orders_for_customer(customer_id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].customer_id, Some(customer_id));
    }

    #[tokio::test]
    async fn test_order_for_unknown_customer_is_rejected() {
        let store = MemoryCustomerStore::new();
        let result = store.upsert_order(order("900", Some(CustomerId::new(99)))).await;
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_phone_suffix_lookup() {
        let store = MemoryCustomerStore::new();
        store
            .upsert_customer(
                customer(Some("1"), None, Some("5215512345678")),
                ConflictKey::ExternalId,
            )
            .await
            .unwrap();

        assert_eq!(
            store
                .find_customer_by_phone_suffix("5512345678")
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(
            store
                .find_customer_by_phone_suffix("9999999999")
                .await
                .unwrap()
                .is_empty()
        );
        assert!(store.find_customer_by_phone_suffix("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_is_overwritten() {
        let store = MemoryCustomerStore::new();
        let channel = Channel::new("WA");
        let mut fields = SnapshotFields::zeroed("Ana");
        fields.lifetime_value = Decimal::new(9000, 0);
        fields.risk_tier = RiskTier::Vip;
        store
            .update_snapshot("5512345678", &channel, fields)
            .await
            .unwrap();
        store
            .update_snapshot("5512345678", &channel, SnapshotFields::zeroed("Ana"))
            .await
            .unwrap();

        let snapshot = store
            .get_snapshot("5512345678", &channel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.fields, SnapshotFields::zeroed("Ana"));
        assert_eq!(store.snapshots().await.len(), 1);
    }

    #[tokio::test]
    async fn test_orders_missing_status_newest_first() {
        let store = MemoryCustomerStore::new();
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        for (i, external_id) in ["1", "2", "3"].iter().enumerate() {
            let mut record = order(external_id, None);
            record.remote_created_at = Some(base + Duration::days(i64::try_from(i).unwrap()));
            store.upsert_order(record).await.unwrap();
        }
        let mut complete = order("4", None);
        complete.fulfillment_status = Some("fulfilled".to_string());
        store.upsert_order(complete).await.unwrap();

        let missing = store.orders_missing_status(2).await.unwrap();
        let ids: Vec<_> = missing.iter().map(|o| o.external_order_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }
}
