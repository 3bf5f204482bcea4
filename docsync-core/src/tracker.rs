//! Per-mode record of the last reconciled remote state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mode::WritingMode;

/// The last text and revision believed common to local and remote.
///
/// Used as the merge ancestor and as the expected revision of the next
/// conditioned write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBase {
    pub base_revision: u64,
    pub base_text: String,
}

impl SyncBase {
    pub fn new(base_revision: u64, base_text: impl Into<String>) -> Self {
        Self {
            base_revision,
            base_text: base_text.into(),
        }
    }
}

/// Holds one [`SyncBase`] per mode. No validation; callers only ever store
/// revisions the store handed back.
#[derive(Debug, Clone, Default)]
pub struct RevisionTracker {
    bases: HashMap<WritingMode, SyncBase>,
}

impl RevisionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the base for a mode, zeroed if never set.
    pub fn get(&self, mode: WritingMode) -> SyncBase {
        self.bases.get(&mode).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, mode: WritingMode, revision: u64, text: impl Into<String>) {
        self.bases.insert(mode, SyncBase::new(revision, text));
    }

    /// Forgets every base.
    pub fn reset(&mut self) {
        self.bases.clear();
    }
}
