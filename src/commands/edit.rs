use clap::Args;
use docsync_core::{SharedSyncState, SyncEvent, SyncOperation, SyncSession, WritingMode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use super::{describe_event, open_store, CommandError};
use crate::config::Config;

/// Replace a document's text and sync it
#[derive(Debug, Args)]
pub struct EditCommand {
    /// Document to edit (editor or todo)
    pub mode: WritingMode,

    /// New text
    #[arg(conflicts_with = "file")]
    pub text: Option<String>,

    /// Read the new text from a file
    #[arg(long, short)]
    pub file: Option<PathBuf>,

    /// Seconds to wait for the save to land
    #[arg(long, default_value_t = 10)]
    pub timeout: u64,
}

impl EditCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        if !config.sync.enabled.value {
            return Err(CommandError::SyncDisabled);
        }
        let text = self.read_text()?;
        let user_id = config.require_user()?;

        let (tx, mut events) = unbounded_channel();
        let state = SharedSyncState::new().with_observer(tx);
        let mut session = SyncSession::with_state(open_store(config), config.settings(), state);

        session.sign_in(user_id).await?;
        // Reconciliation happened during sign-in; report anything it hit.
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::SyncErrorRaised { .. } = event {
                eprintln!("  {}", describe_event(&event));
            }
        }

        let before = session.state().snapshot().sync_base(self.mode).base_revision;
        let cursor = text.chars().count();
        session.edit(self.mode, text.clone(), cursor);

        let result = tokio::time::timeout(
            Duration::from_secs(self.timeout),
            wait_for_save(&mut events, self.mode, before),
        )
        .await;
        session.sign_out().await;

        let (revision, saved) = result.map_err(|_| CommandError::Timeout(self.timeout))??;
        if saved == text {
            println!("Saved {} at revision {}", self.mode, revision);
        } else {
            println!(
                "Saved {} at revision {} (merged with remote changes)",
                self.mode, revision
            );
        }
        Ok(())
    }

    fn read_text(&self) -> Result<String, CommandError> {
        match (&self.text, &self.file) {
            (Some(text), _) => Ok(text.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map_err(|e| CommandError::ReadError(path.clone(), e)),
            (None, None) => Err(CommandError::MissingText),
        }
    }
}

/// Waits until the mode's base moves past `before`, or its save fails.
async fn wait_for_save(
    events: &mut UnboundedReceiver<SyncEvent>,
    mode: WritingMode,
    before: u64,
) -> Result<(u64, String), CommandError> {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::DocBaseUpdated { mode: m, base }
                if m == mode && base.base_revision > before =>
            {
                return Ok((base.base_revision, base.base_text));
            }
            SyncEvent::SyncErrorRaised {
                operation: SyncOperation::ScheduledSave,
                mode: Some(m),
                message,
            } if m == mode => {
                return Err(CommandError::SaveFailed(message));
            }
            _ => {}
        }
    }
    Err(CommandError::SaveFailed("sync stopped before saving".to_string()))
}
