//! Contact handles and the channels they arrive on.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::email::{Email, EmailError};
use super::phone::{Phone, PhoneError};

/// Errors that can occur when parsing a [`Handle`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The handle contains `@` but is not a usable email.
    #[error("invalid email handle: {0}")]
    Email(#[from] EmailError),
    /// The handle is not a usable phone number.
    #[error("invalid phone handle: {0}")]
    Phone(#[from] PhoneError),
}

/// A contact identifier used as a join key between systems.
///
/// Anything containing `@` is an email; everything else is a phone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Handle {
    Email(Email),
    Phone(Phone),
}

impl Handle {
    /// Parse a raw handle string.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError`] if the email or phone form is invalid.
    pub fn parse(raw: &str) -> Result<Self, HandleError> {
        if raw.contains('@') {
            Ok(Self::Email(Email::parse(raw)?))
        } else {
            Ok(Self::Phone(Phone::parse(raw)?))
        }
    }

    /// Normalized string form, used as the snapshot key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email(email) => email.as_str(),
            Self::Phone(phone) => phone.as_str(),
        }
    }

    /// Returns `true` for email handles.
    #[must_use]
    pub const fn is_email(&self) -> bool {
        matches!(self, Self::Email(_))
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Handle {
    type Err = HandleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Messaging channel a handle was seen on (e.g. `WA`, `EMAIL`, `IG`).
///
/// Free-form upstream, stored upper-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    /// Channel used when the caller does not know where a handle came from.
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// Create a channel tag, normalizing case. Blank input becomes `UNKNOWN`.
    #[must_use]
    pub fn new(tag: &str) -> Self {
        let tag = tag.trim();
        if tag.is_empty() {
            Self(Self::UNKNOWN.to_string())
        } else {
            Self(tag.to_uppercase())
        }
    }

    /// Returns the channel tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(Self::UNKNOWN)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
