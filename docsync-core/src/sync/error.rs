//! Sync error types.

use thiserror::Error;

use crate::store::StoreError;

/// Errors raised by sync coordinator operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The store could not be reached or refused the request
    #[error("Connection error: {0}")]
    Connection(#[from] StoreError),

    /// The write was rejected, merged, and rejected again
    #[error("Conflict on {path}: write still rejected after merge and retry")]
    ConflictExhausted { path: String },

    /// A remote document could not be deleted
    #[error("Failed to delete {path}: {source}")]
    Deletion {
        path: String,
        #[source]
        source: StoreError,
    },

    /// The user id cannot be used as a path segment
    #[error("Invalid user id: {0}")]
    InvalidUser(String),

    #[error("No user is signed in")]
    NotSignedIn,
}

impl SyncError {
    /// Maps path construction failures to [`SyncError::InvalidUser`].
    pub(crate) fn from_path(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath(id) => SyncError::InvalidUser(id),
            other => SyncError::Connection(other),
        }
    }
}
