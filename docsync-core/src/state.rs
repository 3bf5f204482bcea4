//! Host-side sync state.
//!
//! [`SyncState`] is a plain reducer over [`SyncEvent`]s. [`SharedSyncState`]
//! wraps it for use as both the [`StateAccessor`] and the [`Dispatcher`] a
//! coordinator talks to.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::mode::WritingMode;
use crate::store::SnapshotMeta;
use crate::sync::{Dispatcher, StateAccessor, SyncEvent};
use crate::tracker::{RevisionTracker, SyncBase};

/// One mode's editing buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDocumentState {
    pub text: String,
    /// Cursor as a character index into `text`
    pub cursor_position: usize,
}

/// Clamps a cursor to the character length of `text`.
pub fn clamp_cursor(cursor: usize, text: &str) -> usize {
    cursor.min(text.chars().count())
}

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    documents: HashMap<WritingMode, LocalDocumentState>,
    tracker: RevisionTracker,
    meta: HashMap<WritingMode, SnapshotMeta>,
    last_error: Option<String>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, mode: WritingMode) -> LocalDocumentState {
        self.documents.get(&mode).cloned().unwrap_or_default()
    }

    pub fn sync_base(&self, mode: WritingMode) -> SyncBase {
        self.tracker.get(mode)
    }

    pub fn snapshot_meta(&self, mode: WritingMode) -> SnapshotMeta {
        self.meta.get(&mode).copied().unwrap_or_default()
    }

    /// The most recent sync failure, if no base update has happened since.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Replaces a buffer, clamping the cursor.
    pub fn set_local_text(&mut self, mode: WritingMode, text: impl Into<String>, cursor: usize) {
        let text = text.into();
        let cursor_position = clamp_cursor(cursor, &text);
        self.documents.insert(
            mode,
            LocalDocumentState {
                text,
                cursor_position,
            },
        );
    }

    /// Zeroes bases, metadata and the last error. Buffers are kept.
    pub fn reset_sync(&mut self) {
        self.tracker.reset();
        self.meta.clear();
        self.last_error = None;
    }

    pub fn apply(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::DocBaseUpdated { mode, base } => {
                self.tracker
                    .set(*mode, base.base_revision, base.base_text.clone());
                self.last_error = None;
            }
            SyncEvent::SnapshotMetaUpdated { mode, meta } => {
                self.meta.insert(*mode, *meta);
            }
            SyncEvent::LocalTextReplaced {
                mode,
                text,
                cursor_position,
            } => {
                self.set_local_text(*mode, text.clone(), *cursor_position);
            }
            SyncEvent::SyncErrorRaised { message, .. } => {
                self.last_error = Some(message.clone());
            }
        }
    }
}

/// Thread-safe handle to a [`SyncState`].
///
/// Events are applied first and then forwarded to the optional observer.
#[derive(Debug, Clone, Default)]
pub struct SharedSyncState {
    inner: Arc<RwLock<SyncState>>,
    observer: Option<UnboundedSender<SyncEvent>>,
}

impl SharedSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards every dispatched event to `observer` after applying it.
    pub fn with_observer(mut self, observer: UnboundedSender<SyncEvent>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> SyncState {
        self.inner.read().clone()
    }

    pub fn document(&self, mode: WritingMode) -> LocalDocumentState {
        self.inner.read().document(mode)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error().map(String::from)
    }

    pub fn set_local_text(&self, mode: WritingMode, text: impl Into<String>, cursor: usize) {
        self.inner.write().set_local_text(mode, text, cursor);
    }

    pub fn reset_sync(&self) {
        self.inner.write().reset_sync();
    }
}

impl StateAccessor for SharedSyncState {
    fn local_text(&self, mode: WritingMode) -> String {
        self.inner.read().document(mode).text
    }

    fn cursor_position(&self, mode: WritingMode) -> usize {
        self.inner.read().document(mode).cursor_position
    }

    fn sync_base(&self, mode: WritingMode) -> SyncBase {
        self.inner.read().sync_base(mode)
    }
}

impl Dispatcher for SharedSyncState {
    fn dispatch(&self, event: SyncEvent) {
        self.inner.write().apply(&event);
        if let Some(observer) = &self.observer {
            observer.dispatch(event);
        }
    }
}
