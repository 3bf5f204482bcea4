//! Document store adapter.
//!
//! The remote store is modelled as a handful of path-addressed operations:
//! point reads, real-time subscriptions, atomic read-modify-write
//! transactions and unconditional deletes. Implementations:
//!
//! - [`MemoryStore`]: in-process, instrumented
//! - [`FileStore`]: one JSON file per document under a data directory

mod file;
mod hub;
mod memory;

pub use file::FileStore;
pub use hub::{ChangeHub, StoreEvent};
pub use memory::{MemoryStore, StoreStats};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Stored fields of one document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Called with the current fields (`None` if absent) on every change.
pub type ChangeCallback = Arc<dyn Fn(Option<Fields>, SnapshotMeta) + Send + Sync>;

/// Transaction body: sees the current fields and decides what to store.
pub type TxFn<'a> = dyn Fn(Option<&Fields>) -> TxDecision + Send + Sync + 'a;

/// Liveness indicators attached to a subscription push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// The snapshot includes local writes that the backend has not confirmed
    pub has_pending_writes: bool,
    /// The snapshot was served from a local cache
    pub from_cache: bool,
}

/// Result of a point read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub fields: Option<Fields>,
}

impl Snapshot {
    pub fn exists(&self) -> bool {
        self.fields.is_some()
    }
}

/// What a transaction body wants to happen.
#[derive(Debug, Clone, PartialEq)]
pub enum TxDecision {
    /// Replace the document with these fields
    Commit(Fields),
    /// Leave the document untouched
    Reject,
}

/// Result of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    /// Stored fields, with server timestamps resolved
    Committed(Fields),
    Rejected,
}

/// Errors raised by document stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid document path: {0}")]
    InvalidPath(String),

    #[error("I/O error for {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] io::Error),

    #[error("Malformed stored document: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Handle for an active subscription.
///
/// The release hook runs exactly once: on [`Subscription::unsubscribe`] or
/// on drop, whichever comes first.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// The remote document store contract.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read.
    async fn read(&self, path: &str) -> Result<Snapshot, StoreError>;

    /// Subscribes to a document. The callback fires once with the current
    /// state and then after every change until the handle is released.
    /// Pushes arrive in commit order, so the last one seen is the latest.
    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, StoreError>;

    /// Atomic read-modify-write.
    async fn transaction(&self, path: &str, body: &TxFn<'_>) -> Result<TxOutcome, StoreError>;

    /// Unconditional delete. Deleting an absent document succeeds.
    async fn delete(&self, path: &str) -> Result<(), StoreError>;
}
