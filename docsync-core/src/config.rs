//! Tunable sync settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::merge::MergePolicy;
use crate::mode::WritingMode;

/// Default quiet period before a scheduled save is written.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;

/// Default poll interval for stores that watch files.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Settings for the sync coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Debounce window for outbound saves, in milliseconds
    pub debounce_ms: u64,
    /// Minimum fraction of hunks that must apply for a merge to be kept
    pub merge_threshold: f64,
    /// Modes tracked by the coordinator
    pub modes: Vec<WritingMode>,
    /// How often file-backed subscriptions re-check the disk, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            merge_threshold: MergePolicy::DEFAULT_THRESHOLD,
            modes: WritingMode::ALL.to_vec(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy::new(self.merge_threshold)
    }
}
