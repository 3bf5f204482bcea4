//! The boundary between the coordinator and the host application.
//!
//! The coordinator never owns editor state. It reads through a
//! [`StateAccessor`] and reports every change as a [`SyncEvent`] through a
//! [`Dispatcher`]; the host decides how to apply them.

use crate::mode::WritingMode;
use crate::store::SnapshotMeta;
use crate::tracker::SyncBase;

/// Which coordinator operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOperation {
    InitialSync,
    ScheduledSave,
    Listen,
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncOperation::InitialSync => write!(f, "initial sync"),
            SyncOperation::ScheduledSave => write!(f, "scheduled save"),
            SyncOperation::Listen => write!(f, "listening"),
        }
    }
}

/// Changes the coordinator asks the host to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// New reconciled base for a mode
    DocBaseUpdated { mode: WritingMode, base: SyncBase },
    /// Liveness indicators from a subscription push
    SnapshotMetaUpdated {
        mode: WritingMode,
        meta: SnapshotMeta,
    },
    /// Replace the editing buffer; the cursor is already clamped
    LocalTextReplaced {
        mode: WritingMode,
        text: String,
        cursor_position: usize,
    },
    /// A sync attempt failed; editing and later attempts are unaffected
    SyncErrorRaised {
        operation: SyncOperation,
        mode: Option<WritingMode>,
        message: String,
    },
}

impl SyncEvent {
    pub fn mode(&self) -> Option<WritingMode> {
        match self {
            SyncEvent::DocBaseUpdated { mode, .. }
            | SyncEvent::SnapshotMetaUpdated { mode, .. }
            | SyncEvent::LocalTextReplaced { mode, .. } => Some(*mode),
            SyncEvent::SyncErrorRaised { mode, .. } => *mode,
        }
    }
}

/// Read access to host state.
pub trait StateAccessor: Send + Sync {
    fn local_text(&self, mode: WritingMode) -> String;
    fn cursor_position(&self, mode: WritingMode) -> usize;
    fn sync_base(&self, mode: WritingMode) -> SyncBase;
}

/// Sink for coordinator events.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: SyncEvent);
}

impl Dispatcher for tokio::sync::mpsc::UnboundedSender<SyncEvent> {
    fn dispatch(&self, event: SyncEvent) {
        // A closed receiver means nobody is interested any more
        let _ = self.send(event);
    }
}
