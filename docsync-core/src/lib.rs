//! docsync Core Library
//!
//! Keeps a small fixed set of text documents consistent between a local
//! editing buffer and a shared remote document store.
//!
//! Writes are guarded by an optimistic revision check. When a write loses a
//! race, the local edit is re-based onto the current remote text with a
//! three-way merge and retried once.

pub mod config;
pub mod merge;
pub mod mode;
pub mod record;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
pub mod tracker;

pub use config::SyncSettings;
pub use merge::{merge, MergePolicy, MergeResult};
pub use mode::WritingMode;
pub use record::{account_path, document_path, DocumentRecord, RemoteDocument};
pub use session::SyncSession;
pub use state::{LocalDocumentState, SharedSyncState, SyncState};
pub use store::{
    ChangeCallback, ChangeHub, DocumentStore, Fields, FileStore, MemoryStore, Snapshot,
    SnapshotMeta, StoreError, Subscription, TxDecision, TxOutcome,
};
pub use sync::{
    Dispatcher, StateAccessor, SyncCoordinator, SyncError, SyncEvent, SyncOperation, SyncPhase,
};
pub use tracker::{RevisionTracker, SyncBase};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
