use clap::Args;
use docsync_core::SyncCoordinator;

use super::{open_store, CommandError};
use crate::config::Config;

/// Delete all remote documents of the configured user
#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Confirm deletion
    #[arg(long)]
    pub yes: bool,
}

impl DeleteCommand {
    pub async fn run(&self, config: &Config) -> Result<(), CommandError> {
        let user_id = config.require_user()?;

        if !self.yes {
            println!("This deletes every document stored for {}.", user_id);
            println!("Run again with --yes to confirm.");
            return Ok(());
        }

        let coordinator = SyncCoordinator::new(open_store(config), config.settings());
        coordinator.delete_user_documents(&user_id).await?;
        println!("Deleted all documents for {}.", user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::temp_config;
    use docsync_core::store::TxDecision;
    use docsync_core::{DocumentRecord, DocumentStore};

    #[tokio::test]
    async fn test_delete_requires_confirmation() {
        let (config, _temp) = temp_config();
        let store = open_store(&config);
        let path = "users/u1/doc/editor";
        store
            .transaction(path, &|_| {
                TxDecision::Commit(DocumentRecord::write_fields("keep", 1))
            })
            .await
            .unwrap();

        DeleteCommand { yes: false }.run(&config).await.unwrap();
        assert!(store.read(path).await.unwrap().exists());

        DeleteCommand { yes: true }.run(&config).await.unwrap();
        assert!(!store.read(path).await.unwrap().exists());
    }
}
