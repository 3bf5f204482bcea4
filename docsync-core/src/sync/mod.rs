//! Sync coordination between the local buffers and the document store.

mod coordinator;
mod error;
mod events;
mod write;

pub use coordinator::{SyncCoordinator, SyncPhase};
pub use error::SyncError;
pub use events::{Dispatcher, StateAccessor, SyncEvent, SyncOperation};
