//! Unified error type for sync operations.

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::DirectoryError;
use crate::store::StoreError;

/// Errors surfaced by the resolver, orchestrator and catch-up jobs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote directory has no credentials; nothing can be synced.
    #[error("remote directory is not configured")]
    NotConfigured,

    /// Remote lookup failed.
    #[error("directory error: {0}")]
    Directory(DirectoryError),

    /// Local store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<DirectoryError> for SyncError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotConfigured => Self::NotConfigured,
            other => Self::Directory(other),
        }
    }
}

impl SyncError {
    /// Whether the error should abort a whole batch rather than one handle.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }
}
