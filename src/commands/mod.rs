mod config_cmd;
mod delete;
mod edit;
mod status;
mod watch;

pub use config_cmd::ConfigCommand;
pub use delete::DeleteCommand;
pub use edit::EditCommand;
pub use status::{ShowCommand, StatusCommand};
pub use watch::WatchCommand;

use docsync_core::{FileStore, StoreError, SyncError, SyncEvent};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, ConfigError};

/// Opens the file store configured for this invocation.
fn open_store(config: &Config) -> Arc<FileStore> {
    let poll_interval = config.settings().poll_interval();
    Arc::new(FileStore::new(config.data_dir.value.clone()).with_poll_interval(poll_interval))
}

/// One-line description of a sync event.
fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::DocBaseUpdated { mode, base } => format!(
            "{}: revision {} ({} chars)",
            mode,
            base.base_revision,
            base.base_text.chars().count()
        ),
        SyncEvent::SnapshotMetaUpdated { mode, meta } => {
            let mut flags = Vec::new();
            if meta.has_pending_writes {
                flags.push("pending writes");
            }
            if meta.from_cache {
                flags.push("from cache");
            }
            if flags.is_empty() {
                format!("{}: snapshot", mode)
            } else {
                format!("{}: snapshot ({})", mode, flags.join(", "))
            }
        }
        SyncEvent::LocalTextReplaced {
            mode,
            text,
            cursor_position,
        } => format!(
            "{}: text replaced ({} chars, cursor {})",
            mode,
            text.chars().count(),
            cursor_position
        ),
        SyncEvent::SyncErrorRaised { message, .. } => format!("error: {}", message),
    }
}

/// Errors from document commands
#[derive(Debug)]
pub enum CommandError {
    Config(ConfigError),
    Sync(SyncError),
    Store(StoreError),
    ReadError(PathBuf, std::io::Error),
    MissingText,
    SyncDisabled,
    Timeout(u64),
    SaveFailed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Config(e) => write!(f, "{}", e),
            CommandError::Sync(e) => write!(f, "{}", e),
            CommandError::Store(e) => write!(f, "{}", e),
            CommandError::ReadError(path, e) => {
                write!(f, "Failed to read '{}': {}", path.display(), e)
            }
            CommandError::MissingText => write!(f, "Provide the new text or --file"),
            CommandError::SyncDisabled => {
                write!(f, "Sync is disabled (sync.enabled or DOCSYNC_SYNC_ENABLED)")
            }
            CommandError::Timeout(secs) => {
                write!(f, "Timed out after {}s waiting for the save", secs)
            }
            CommandError::SaveFailed(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Config(e) => Some(e),
            CommandError::Sync(e) => Some(e),
            CommandError::Store(e) => Some(e),
            CommandError::ReadError(_, e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        CommandError::Config(e)
    }
}

impl From<SyncError> for CommandError {
    fn from(e: SyncError) -> Self {
        CommandError::Sync(e)
    }
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}
