//! Sign-in and enablement lifecycle around a [`SyncCoordinator`].
//!
//! Sync runs only while a user is signed in and sync is enabled. Entering
//! that state resets the host's sync state, reconciles every mode and starts
//! listening. Leaving it stops listening and resets the sync state again.

use std::sync::Arc;

use crate::config::SyncSettings;
use crate::mode::WritingMode;
use crate::record::validate_user_id;
use crate::state::SharedSyncState;
use crate::store::DocumentStore;
use crate::sync::{Dispatcher, StateAccessor, SyncCoordinator, SyncError};

#[derive(Debug)]
pub struct SyncSession {
    coordinator: SyncCoordinator,
    state: SharedSyncState,
    user_id: Option<String>,
    enabled: bool,
    active: bool,
}

impl SyncSession {
    pub fn new(store: Arc<dyn DocumentStore>, settings: SyncSettings) -> Self {
        Self::with_state(store, settings, SharedSyncState::new())
    }

    /// Uses an existing host state, e.g. one with an observer attached.
    pub fn with_state(
        store: Arc<dyn DocumentStore>,
        settings: SyncSettings,
        state: SharedSyncState,
    ) -> Self {
        Self {
            coordinator: SyncCoordinator::new(store, settings),
            state,
            user_id: None,
            enabled: true,
            active: false,
        }
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }

    pub fn state(&self) -> &SharedSyncState {
        &self.state
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True while the coordinator is listening for this session.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Signs a user in, replacing any previous one.
    pub async fn sign_in(&mut self, user_id: impl Into<String>) -> Result<(), SyncError> {
        let user_id = user_id.into();
        validate_user_id(&user_id).map_err(SyncError::from_path)?;

        if self.user_id.as_deref() == Some(user_id.as_str()) {
            return Ok(());
        }
        self.deactivate();
        tracing::info!("signed in as {}", user_id);
        self.user_id = Some(user_id);
        self.refresh().await;
        Ok(())
    }

    pub async fn sign_out(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            tracing::info!("signed out {}", user_id);
        }
        self.refresh().await;
    }

    pub async fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.refresh().await;
    }

    /// Updates a buffer and, while active, schedules a save of it.
    pub fn edit(&self, mode: WritingMode, text: impl Into<String>, cursor: usize) {
        let text = text.into();
        self.state.set_local_text(mode, text.clone(), cursor);

        if let (true, Some(user_id)) = (self.active, self.user_id.as_deref()) {
            self.coordinator.schedule_document_save(
                user_id,
                mode,
                text,
                self.accessor(),
                self.dispatcher(),
            );
        }
    }

    /// Stops sync and deletes every remote document of the signed-in user.
    ///
    /// On success the user is signed out. On failure sync resumes and the
    /// error is returned.
    pub async fn delete_account(&mut self) -> Result<(), SyncError> {
        let user_id = self.user_id.clone().ok_or(SyncError::NotSignedIn)?;
        self.deactivate();

        match self.coordinator.delete_user_documents(&user_id).await {
            Ok(()) => {
                self.user_id = None;
                Ok(())
            }
            Err(e) => {
                self.refresh().await;
                Err(e)
            }
        }
    }

    fn accessor(&self) -> Arc<dyn StateAccessor> {
        Arc::new(self.state.clone())
    }

    fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        Arc::new(self.state.clone())
    }

    async fn refresh(&mut self) {
        let user_id = match (self.enabled, self.user_id.clone()) {
            (true, Some(user_id)) => user_id,
            _ => {
                self.deactivate();
                return;
            }
        };
        if self.active {
            return;
        }

        tracing::info!("starting sync for {}", user_id);
        self.state.reset_sync();
        self.coordinator
            .perform_initial_sync(&user_id, self.accessor(), self.dispatcher())
            .await;
        self.coordinator
            .start_listening(&user_id, self.accessor(), self.dispatcher())
            .await;
        self.active = true;
    }

    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        tracing::info!("stopping sync");
        self.coordinator.stop_listening();
        self.state.reset_sync();
        self.active = false;
    }
}
