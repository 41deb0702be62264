//! Read-only view of the remote customer directory (Shopify Admin REST API).
//!
//! Handles are looked up by email or phone, and a matched customer's full
//! order history is fetched page by page. Every payload is validated once,
//! at the boundary, into [`RemoteCustomerRecord`] / [`RemoteOrderRecord`].
//!
//! # Implementations
//!
//! - [`ShopifyDirectory`] - live Admin REST API client
//! - [`MemoryDirectory`] - fixed records for tests and offline replays

mod memory;
mod shopify;
mod types;

pub use memory::{DirectoryCall, MemoryDirectory};
pub use shopify::ShopifyDirectory;
pub use types::{RemoteCustomerRecord, RemoteOrderRecord};

use async_trait::async_trait;
use omnicrm_core::{Email, Phone};
use thiserror::Error;

/// Errors that can occur when querying the remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// No store domain or access token is configured.
    #[error("remote directory is not configured")]
    NotConfigured,

    /// Rate limited by the remote API.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Transport failure or server-side error.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The remote refused the request (e.g. invalid token).
    #[error("remote rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The response body failed validation.
    #[error("invalid remote payload: {0}")]
    InvalidPayload(String),
}

/// Lookup operations against the remote customer base.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Whether lookups can be made at all. An unconfigured directory fails
    /// every call with [`DirectoryError::NotConfigured`].
    fn is_configured(&self) -> bool {
        true
    }

    /// Find the customer whose email matches exactly (case-insensitive).
    async fn find_by_email(
        &self,
        email: &Email,
    ) -> Result<Option<RemoteCustomerRecord>, DirectoryError>;

    /// Find every candidate for a phone number, unranked.
    async fn find_by_phone(&self, phone: &Phone)
    -> Result<Vec<RemoteCustomerRecord>, DirectoryError>;

    /// Fetch the complete order history of a remote customer.
    async fn fetch_orders(
        &self,
        remote_customer_id: &str,
    ) -> Result<Vec<RemoteOrderRecord>, DirectoryError>;

    /// Fetch a single order; `None` when the remote no longer has it.
    async fn fetch_order_by_id(
        &self,
        remote_order_id: &str,
    ) -> Result<Option<RemoteOrderRecord>, DirectoryError>;
}
