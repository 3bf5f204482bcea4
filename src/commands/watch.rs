use clap::Args;
use docsync_core::{SharedSyncState, SyncSession};
use tokio::sync::mpsc::unbounded_channel;

use super::{describe_event, open_store, CommandError};
use crate::config::Config;

/// Print sync events until interrupted
#[derive(Debug, Args)]
pub struct WatchCommand {}

impl WatchCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        if !config.sync.enabled.value {
            return Err(CommandError::SyncDisabled);
        }
        let user_id = config.require_user()?;

        let (tx, mut events) = unbounded_channel();
        let state = SharedSyncState::new().with_observer(tx);
        let mut session = SyncSession::with_state(open_store(config), config.settings(), state);

        session.sign_in(user_id.clone()).await?;
        println!("Watching documents for {} (Ctrl-C to stop)", user_id);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        let stamp = chrono::Local::now().format("%H:%M:%S");
                        println!("[{}] {}", stamp, describe_event(&event));
                    }
                    None => break,
                },
            }
        }

        session.sign_out().await;
        println!("Stopped.");
        Ok(())
    }
}
