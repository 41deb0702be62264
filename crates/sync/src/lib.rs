//! OmniCRM sync - customer identity reconciliation and order synchronization.
//!
//! Maps contact handles (email or phone) to customers on the Shopify store,
//! imports them and their orders into `PostgreSQL` with idempotent upserts,
//! and rewrites the per-handle contact snapshot used by the CRM inbox.
//!
//! # Components
//!
//! - [`remote::CustomerDirectory`] - read-only view of the Shopify customer base
//! - [`store::CustomerStore`] - local customers, orders and contact snapshots
//! - [`resolver::IdentityResolver`] - handle to customer matching and ranking
//! - [`orchestrator::SyncOrchestrator`] - the paced, sequential sync batch
//! - [`SyncOrchestrator::refresh_order_statuses`] - re-fetch orders with stale statuses
//! - [`ghosts::scan_ghosts`] - inactive customer classification

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod catchup;
pub mod config;
pub mod db;
pub mod error;
pub mod ghosts;
pub mod orchestrator;
pub mod remote;
pub mod resolver;
pub mod store;

pub use catchup::RefreshSummary;
pub use config::{ConfigError, PacingConfig, ShopifyConfig, SyncConfig};
pub use error::SyncError;
pub use ghosts::{Ghost, GhostReport, scan_ghosts};
pub use orchestrator::{BatchSummary, HandleOutcome, SkipReason, SyncOrchestrator};
pub use resolver::{IdentityResolver, Resolution};
