//! Core types for OmniCRM.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod email;
pub mod handle;
pub mod id;
pub mod money;
pub mod phone;
pub mod records;
pub mod status;

pub use email::{Email, EmailError};
pub use handle::{Channel, Handle, HandleError};
pub use id::*;
pub use money::Money;
pub use phone::{Phone, PhoneError, PhoneMatch};
pub use records::{ContactSnapshot, Customer, LineItem, Order, SnapshotFields};
pub use status::*;
