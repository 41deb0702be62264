//! In-memory [`CustomerDirectory`] holding a fixed set of records.
//!
//! Every lookup is recorded so tests can assert which remote calls a sync
//! pass made (e.g. that an email handle never triggers a phone search).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use omnicrm_core::{Email, Phone, PhoneMatch};

use super::{CustomerDirectory, DirectoryError, RemoteCustomerRecord, RemoteOrderRecord};

/// A recorded directory call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryCall {
    FindByEmail(String),
    FindByPhone(String),
    FetchOrders(String),
    FetchOrderById(String),
}

#[derive(Debug, Default)]
struct DirectoryState {
    customers: Vec<RemoteCustomerRecord>,
    orders: HashMap<String, Vec<RemoteOrderRecord>>,
    /// Errors returned for a given lookup key (email or phone digits).
    failures: HashMap<String, DirectoryError>,
    calls: Vec<DirectoryCall>,
}

/// Fixed-record directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a customer and the orders it owns.
    #[must_use]
    pub fn with_customer(
        mut self,
        customer: RemoteCustomerRecord,
        orders: Vec<RemoteOrderRecord>,
    ) -> Self {
        let state = self.state.get_mut();
        state.orders.insert(customer.id.clone(), orders);
        state.customers.push(customer);
        self
    }

    /// Make every lookup for `key` (email or phone digits) fail.
    #[must_use]
    pub fn with_failure(mut self, key: &str, error: DirectoryError) -> Self {
        self.state.get_mut().failures.insert(key.to_string(), error);
        self
    }

    /// Remove a customer, as if it had been deleted remotely.
    pub async fn remove_customer(&self, remote_id: &str) {
        let mut state = self.state.lock().await;
        state.customers.retain(|c| c.id != remote_id);
        state.orders.remove(remote_id);
    }

    /// Replace a single order in place, matched by id.
    pub async fn replace_order(&self, order: RemoteOrderRecord) {
        let mut state = self.state.lock().await;
        for orders in state.orders.values_mut() {
            if let Some(existing) = orders.iter_mut().find(|o| o.id == order.id) {
                *existing = order;
                return;
            }
        }
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<DirectoryCall> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl CustomerDirectory for MemoryDirectory {
    async fn find_by_email(
        &self,
        email: &Email,
    ) -> Result<Option<RemoteCustomerRecord>, DirectoryError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(DirectoryCall::FindByEmail(email.to_string()));
        if let Some(error) = state.failures.get(email.as_str()) {
            return Err(error.clone());
        }

        Ok(state
            .customers
            .iter()
            .find(|c| c.email.as_ref() == Some(email))
            .cloned())
    }

    async fn find_by_phone(
        &self,
        phone: &Phone,
    ) -> Result<Vec<RemoteCustomerRecord>, DirectoryError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(DirectoryCall::FindByPhone(phone.to_string()));
        if let Some(error) = state.failures.get(phone.as_str()) {
            return Err(error.clone());
        }

        Ok(state
            .customers
            .iter()
            .filter(|c| {
                c.phone
                    .as_ref()
                    .is_some_and(|p| p.match_against(phone) != PhoneMatch::None)
            })
            .cloned()
            .collect())
    }

    async fn fetch_orders(
        &self,
        remote_customer_id: &str,
    ) -> Result<Vec<RemoteOrderRecord>, DirectoryError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(DirectoryCall::FetchOrders(remote_customer_id.to_string()));
        if let Some(error) = state.failures.get(remote_customer_id) {
            return Err(error.clone());
        }

        Ok(state
            .orders
            .get(remote_customer_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_order_by_id(
        &self,
        remote_order_id: &str,
    ) -> Result<Option<RemoteOrderRecord>, DirectoryError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(DirectoryCall::FetchOrderById(remote_order_id.to_string()));
        if let Some(error) = state.failures.get(remote_order_id) {
            return Err(error.clone());
        }

        Ok(state
            .orders
            .values()
            .flatten()
            .find(|o| o.id == remote_order_id)
            .cloned())
    }
}
