//! OmniCRM Core - Shared types library.
//!
//! This crate provides the types shared by every OmniCRM component:
//! - `sync` - Customer identity reconciliation and order synchronization
//! - `cli` - Command-line tools for migrations and sync runs
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, contact handles, money, statuses
//!   and the local customer/order/snapshot records

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
