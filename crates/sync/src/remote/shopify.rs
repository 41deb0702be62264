//! Shopify Admin REST API implementation of [`CustomerDirectory`].
//!
//! # API Reference
//!
//! - Base URL: `https://{store}/admin/api/{version}/`
//! - Authentication: `X-Shopify-Access-Token: <token>`
//! - Pagination: cursor-based via the `Link` header (`page_info`)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use omnicrm_core::{Email, Phone};

use super::types::{CustomersEnvelope, OrderEnvelope, OrdersEnvelope};
use super::{CustomerDirectory, DirectoryError, RemoteCustomerRecord, RemoteOrderRecord};
use crate::config::ShopifyConfig;

/// Request timeout for every Admin API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest page size the REST API accepts.
const PAGE_LIMIT: &str = "250";

/// Fallback when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;

/// Shopify Admin REST API client.
///
/// Built from an optional configuration: without credentials every lookup
/// fails with [`DirectoryError::NotConfigured`].
#[derive(Clone)]
pub struct ShopifyDirectory {
    inner: Option<Arc<ShopifyDirectoryInner>>,
}

struct ShopifyDirectoryInner {
    client: reqwest::Client,
    base_url: Url,
}

/// One decoded response plus the cursor to the next page, if any.
struct Page<T> {
    body: T,
    next: Option<Url>,
}

impl ShopifyDirectory {
    /// Create a client for the configured store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store domain or token cannot be used to build
    /// a request.
    pub fn new(config: Option<&ShopifyConfig>) -> Result<Self, DirectoryError> {
        let Some(config) = config else {
            return Ok(Self::unconfigured());
        };

        let base_url = Url::parse(&format!(
            "https://{}/admin/api/{}/",
            config.store.trim_end_matches('/'),
            config.api_version
        ))
        .map_err(|e| DirectoryError::Rejected {
            status: 0,
            message: format!("invalid store domain: {e}"),
        })?;

        Self::with_base_url(base_url, &config.access_token)
    }

    /// Create a client against an explicit API base URL (proxies, replays).
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not a valid header value or the HTTP
    /// client fails to build.
    pub fn with_base_url(
        base_url: Url,
        access_token: &SecretString,
    ) -> Result<Self, DirectoryError> {
        let mut headers = HeaderMap::new();
        let mut token = HeaderValue::from_str(access_token.expose_secret()).map_err(|e| {
            DirectoryError::Rejected {
                status: 0,
                message: format!("invalid access token format: {e}"),
            }
        })?;
        token.set_sensitive(true);
        headers.insert("X-Shopify-Access-Token", token);
        headers.insert("Accept", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DirectoryError::Unavailable(format!("failed to build client: {e}")))?;

        Ok(Self {
            inner: Some(Arc::new(ShopifyDirectoryInner { client, base_url })),
        })
    }

    /// A client with no credentials.
    #[must_use]
    pub const fn unconfigured() -> Self {
        Self { inner: None }
    }

    fn inner(&self) -> Result<&ShopifyDirectoryInner, DirectoryError> {
        self.inner.as_deref().ok_or(DirectoryError::NotConfigured)
    }

    /// Build an endpoint URL from path segments, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.inner()?.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::Unavailable("base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn search_customers(
        &self,
        query: &str,
    ) -> Result<Vec<RemoteCustomerRecord>, DirectoryError> {
        let mut url = self.endpoint(&["customers", "search.json"])?;
        url.query_pairs_mut()
            .append_pair("query", query)
            .append_pair("limit", PAGE_LIMIT);

        let Some(page) = self.get::<CustomersEnvelope>(url).await? else {
            return Ok(Vec::new());
        };

        page.body
            .customers
            .into_iter()
            .map(RemoteCustomerRecord::try_from)
            .collect()
    }

    /// Execute a GET request. A 404 yields `Ok(None)`.
    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<Option<Page<T>>, DirectoryError> {
        let inner = self.inner()?;
        debug!(url = %url, "GET");

        let response = inner
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::parse_error(response).await);
        }

        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_url)
            .filter(|next| next.host_str() == url.host_str() && *next != url);

        let body = response
            .json::<T>()
            .await
            .map_err(|e| DirectoryError::InvalidPayload(format!("failed to parse response: {e}")))?;

        Ok(Some(Page { body, next }))
    }

    /// Map a non-success response to a [`DirectoryError`].
    async fn parse_error(response: reqwest::Response) -> DirectoryError {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            warn!(retry_after_secs, "Shopify rate limit hit");
            return DirectoryError::RateLimited { retry_after_secs };
        }

        if status.is_server_error() {
            return DirectoryError::Unavailable(format!("HTTP {status}"));
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        DirectoryError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl CustomerDirectory for ShopifyDirectory {
    fn is_configured(&self) -> bool {
        self.inner.is_some()
    }

    #[instrument(skip(self), fields(email = %email))]
    async fn find_by_email(
        &self,
        email: &Email,
    ) -> Result<Option<RemoteCustomerRecord>, DirectoryError> {
        let candidates = self.search_customers(&format!("email:{email}")).await?;
        Ok(candidates
            .into_iter()
            .find(|c| c.email.as_ref() == Some(email)))
    }

    #[instrument(skip(self), fields(phone = %phone))]
    async fn find_by_phone(
        &self,
        phone: &Phone,
    ) -> Result<Vec<RemoteCustomerRecord>, DirectoryError> {
        self.search_customers(&format!("phone:{phone}")).await
    }

    #[instrument(skip(self))]
    async fn fetch_orders(
        &self,
        remote_customer_id: &str,
    ) -> Result<Vec<RemoteOrderRecord>, DirectoryError> {
        let mut url = self.endpoint(&["customers", remote_customer_id, "orders.json"])?;
        url.query_pairs_mut()
            .append_pair("status", "any")
            .append_pair("limit", PAGE_LIMIT);

        let mut orders = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            let Some(page) = self.get::<OrdersEnvelope>(url).await? else {
                break;
            };
            for wire in page.body.orders {
                orders.push(RemoteOrderRecord::try_from(wire)?);
            }
            next = page.next;
        }

        debug!(count = orders.len(), "Fetched remote orders");
        Ok(orders)
    }

    #[instrument(skip(self))]
    async fn fetch_order_by_id(
        &self,
        remote_order_id: &str,
    ) -> Result<Option<RemoteOrderRecord>, DirectoryError> {
        let file = format!("{remote_order_id}.json");
        let url = self.endpoint(&["orders", &file])?;

        match self.get::<OrderEnvelope>(url).await? {
            Some(page) => RemoteOrderRecord::try_from(page.body.order).map(Some),
            None => Ok(None),
        }
    }
}

impl std::fmt::Debug for ShopifyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyDirectory")
            .field(
                "base_url",
                &self.inner.as_ref().map(|i| i.base_url.as_str()),
            )
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Header Parsing
// =============================================================================

/// Extract the `rel="next"` target from a `Link` header.
fn next_page_url(link: &str) -> Option<Url> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

/// Parse `Retry-After` seconds; Shopify sends fractional values like `2.0`.
fn parse_retry_after(raw: &str) -> Option<u64> {
    raw.trim().split('.').next()?.parse().ok()
}
