//! Phone number type and suffix matching.
//!
//! Phone numbers arrive in every shape (`+52 1 55 1234 5678`,
//! `(55) 1234-5678`, `5215512345678`). Only digits are kept. Two numbers
//! whose last ten digits agree are treated as the same line, which absorbs
//! country-code and mobile-prefix differences between systems.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Phone`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneError {
    /// The input contains no digits at all.
    #[error("phone number must contain at least one digit")]
    NoDigits,
}

/// How specifically two phone numbers match.
///
/// Ordered so that a more specific match compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhoneMatch {
    /// The national suffixes differ (or a number is too short to compare).
    None,
    /// The last [`Phone::SUFFIX_LEN`] digits agree.
    Suffix,
    /// Digit strings are identical.
    Exact,
}

/// A phone number normalized to its digit string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Phone(String);

impl Phone {
    /// Number of trailing digits compared by suffix matching.
    pub const SUFFIX_LEN: usize = 10;

    /// Parse a phone number, dropping every non-digit character.
    ///
    /// # Errors
    ///
    /// Returns [`PhoneError::NoDigits`] if nothing is left after normalization.
    pub fn parse(s: &str) -> Result<Self, PhoneError> {
        let digits: String = s.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(PhoneError::NoDigits);
        }
        Ok(Self(digits))
    }

    /// Returns the normalized digit string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the trailing national suffix, or the whole number when it is
    /// shorter than [`Self::SUFFIX_LEN`].
    #[must_use]
    pub fn suffix(&self) -> &str {
        let start = self.0.len().saturating_sub(Self::SUFFIX_LEN);
        self.0.get(start..).unwrap_or(&self.0)
    }

    /// Whether this number ends with the given digit suffix.
    #[must_use]
    pub fn ends_with(&self, suffix: &str) -> bool {
        !suffix.is_empty() && self.0.ends_with(suffix)
    }

    /// Compare two numbers and report how specifically they match.
    #[must_use]
    pub fn match_against(&self, other: &Self) -> PhoneMatch {
        if self.0 == other.0 {
            return PhoneMatch::Exact;
        }
        let comparable =
            self.0.len() >= Self::SUFFIX_LEN && other.0.len() >= Self::SUFFIX_LEN;
        if comparable && self.suffix() == other.suffix() {
            PhoneMatch::Suffix
        } else {
            PhoneMatch::None
        }
    }
}

impl fmt::Display for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Phone {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Phone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
