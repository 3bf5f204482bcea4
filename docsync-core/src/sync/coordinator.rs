//! Sync coordinator.
//!
//! Owns the per-mode subscription and debounce tables. All document state
//! lives with the host and is reached through [`StateAccessor`] and
//! [`Dispatcher`].

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::SyncSettings;
use crate::mode::WritingMode;
use crate::record::{account_path, decode_record, document_path};
use crate::state::clamp_cursor;
use crate::store::{ChangeCallback, DocumentStore, Fields, SnapshotMeta, Subscription};
use crate::tracker::SyncBase;

use super::error::SyncError;
use super::events::{Dispatcher, StateAccessor, SyncEvent, SyncOperation};
use super::write::{conditioned_write, WriteOutcome};

/// Where a mode is in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Idle,
    Listening,
    Saving,
    ReceivingSnapshot,
    Stopped,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Listening => "listening",
            SyncPhase::Saving => "saving",
            SyncPhase::ReceivingSnapshot => "receiving",
            SyncPhase::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

type PhaseTable = Arc<Mutex<HashMap<WritingMode, SyncPhase>>>;

struct PendingSave {
    id: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    settings: SyncSettings,
    subscriptions: Mutex<HashMap<WritingMode, Subscription>>,
    timers: Mutex<HashMap<WritingMode, PendingSave>>,
    phases: PhaseTable,
    next_timer_id: AtomicU64,
    stopped: AtomicBool,
}

/// Keeps the tracked modes in sync with a [`DocumentStore`].
///
/// Cheap to clone; clones share the same tables.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("settings", &self.inner.settings)
            .field("subscriptions", &self.inner.subscriptions.lock().len())
            .field("pending_saves", &self.inner.timers.lock().len())
            .finish()
    }
}

impl SyncCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, settings: SyncSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                settings,
                subscriptions: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                phases: Arc::new(Mutex::new(HashMap::new())),
                next_timer_id: AtomicU64::new(0),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    pub fn phase(&self, mode: WritingMode) -> SyncPhase {
        self.inner
            .phases
            .lock()
            .get(&mode)
            .copied()
            .unwrap_or(SyncPhase::Idle)
    }

    /// Modes with an active subscription.
    pub fn listening_modes(&self) -> Vec<WritingMode> {
        let mut modes: Vec<_> = self.inner.subscriptions.lock().keys().copied().collect();
        modes.sort();
        modes
    }

    /// Debounce timers that have not fired yet.
    pub fn pending_saves(&self) -> usize {
        self.inner.timers.lock().len()
    }

    /// Subscribes every tracked mode, replacing any previous subscription.
    pub async fn start_listening(
        &self,
        user_id: &str,
        state: Arc<dyn StateAccessor>,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        self.inner.stopped.store(false, Ordering::SeqCst);

        for &mode in &self.inner.settings.modes {
            let previous = self.inner.subscriptions.lock().remove(&mode);
            if let Some(previous) = previous {
                tracing::debug!("replacing {} subscription", mode);
                previous.unsubscribe();
            }

            let path = match document_path(user_id, mode) {
                Ok(path) => path,
                Err(e) => {
                    report(
                        &*dispatcher,
                        SyncOperation::Listen,
                        Some(mode),
                        SyncError::from_path(e),
                    );
                    continue;
                }
            };

            let callback = snapshot_callback(
                mode,
                self.inner.phases.clone(),
                state.clone(),
                dispatcher.clone(),
            );
            match self.inner.store.subscribe(&path, callback).await {
                Ok(subscription) => {
                    let previous = self.inner.subscriptions.lock().insert(mode, subscription);
                    if let Some(previous) = previous {
                        previous.unsubscribe();
                    }
                    self.inner.set_phase(mode, SyncPhase::Listening);
                    tracing::info!("listening on {}", path);
                }
                Err(e) => {
                    report(&*dispatcher, SyncOperation::Listen, Some(mode), e.into());
                }
            }
        }
    }

    /// Releases every subscription and cancels every pending debounce
    /// timer. Saves that already fired run to completion.
    pub fn stop_listening(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);

        let subscriptions: Vec<_> = self.inner.subscriptions.lock().drain().collect();
        for (mode, subscription) in subscriptions {
            subscription.unsubscribe();
            tracing::debug!("stopped listening on {}", mode);
        }

        let timers: Vec<_> = self.inner.timers.lock().drain().collect();
        for (mode, pending) in timers {
            pending.handle.abort();
            tracing::debug!("cancelled pending {} save", mode);
        }

        let mut phases = self.inner.phases.lock();
        for &mode in &self.inner.settings.modes {
            if phases.get(&mode) != Some(&SyncPhase::Saving) {
                phases.insert(mode, SyncPhase::Stopped);
            }
        }
    }

    /// Reconciles every tracked mode with the store, concurrently.
    ///
    /// A mode whose remote text is empty or absent gets the local buffer
    /// pushed; otherwise the remote record becomes the new base. Failures
    /// are reported per mode.
    pub async fn perform_initial_sync(
        &self,
        user_id: &str,
        state: Arc<dyn StateAccessor>,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        let tasks = self.inner.settings.modes.iter().map(|&mode| {
            let state = state.clone();
            let dispatcher = dispatcher.clone();
            async move {
                if let Err(e) = self
                    .inner
                    .initial_sync_mode(user_id, mode, &*state, &*dispatcher)
                    .await
                {
                    report(&*dispatcher, SyncOperation::InitialSync, Some(mode), e);
                }
            }
        });
        join_all(tasks).await;
    }

    /// Debounces a save of `text` for `mode`. A later call for the same
    /// mode replaces the pending one.
    pub fn schedule_document_save(
        &self,
        user_id: &str,
        mode: WritingMode,
        text: impl Into<String>,
        state: Arc<dyn StateAccessor>,
        dispatcher: Arc<dyn Dispatcher>,
    ) {
        let id = self.inner.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        let user_id = user_id.to_string();
        let text = text.into();
        let debounce = self.inner.settings.debounce();

        // Held while spawning so the task cannot look itself up before it
        // is registered.
        let mut timers = self.inner.timers.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                let mut timers = inner.timers.lock();
                if timers.get(&mode).map(|pending| pending.id) != Some(id) {
                    return;
                }
                timers.remove(&mode);
            }
            inner
                .run_save(&user_id, mode, &text, &*state, &*dispatcher)
                .await;
        });

        if let Some(previous) = timers.insert(mode, PendingSave { id, handle }) {
            previous.handle.abort();
            tracing::debug!("coalesced pending {} save", mode);
        }
    }

    /// Deletes every mode record and the account root for a user.
    pub async fn delete_user_documents(&self, user_id: &str) -> Result<(), SyncError> {
        let mut paths = Vec::with_capacity(WritingMode::ALL.len() + 1);
        for mode in WritingMode::ALL {
            paths.push(document_path(user_id, mode).map_err(SyncError::from_path)?);
        }
        paths.push(account_path(user_id).map_err(SyncError::from_path)?);

        let store = &self.inner.store;
        let results = join_all(paths.iter().map(|path| store.delete(path))).await;

        for (path, result) in paths.iter().zip(results) {
            if let Err(source) = result {
                tracing::error!("failed to delete {}: {}", path, source);
                return Err(SyncError::Deletion {
                    path: path.clone(),
                    source,
                });
            }
        }

        tracing::info!("deleted remote documents for {}", user_id);
        Ok(())
    }
}

impl Inner {
    fn set_phase(&self, mode: WritingMode, phase: SyncPhase) {
        self.phases.lock().insert(mode, phase);
    }

    /// Phase a mode returns to when a save finishes.
    fn resting_phase(&self, mode: WritingMode) -> SyncPhase {
        if self.subscriptions.lock().contains_key(&mode) {
            SyncPhase::Listening
        } else if self.stopped.load(Ordering::SeqCst) {
            SyncPhase::Stopped
        } else {
            SyncPhase::Idle
        }
    }

    async fn initial_sync_mode(
        &self,
        user_id: &str,
        mode: WritingMode,
        state: &dyn StateAccessor,
        dispatcher: &dyn Dispatcher,
    ) -> Result<(), SyncError> {
        let path = document_path(user_id, mode).map_err(SyncError::from_path)?;
        let snapshot = self.store.read(&path).await?;
        let remote = decode_record(snapshot.fields.as_ref());

        if remote.has_text() {
            let text = remote.text.unwrap_or_default();
            tracing::debug!("{} at revision {}", path, remote.revision);
            dispatcher.dispatch(SyncEvent::DocBaseUpdated {
                mode,
                base: SyncBase::new(remote.revision, text),
            });
            return Ok(());
        }

        tracing::info!("{} is empty; pushing local text", path);
        let local_text = state.local_text(mode);
        let base = state.sync_base(mode);
        let outcome = conditioned_write(
            &*self.store,
            &path,
            &base,
            &local_text,
            self.settings.merge_policy(),
        )
        .await?;
        publish_write(mode, outcome, state, dispatcher);
        Ok(())
    }

    async fn run_save(
        &self,
        user_id: &str,
        mode: WritingMode,
        text: &str,
        state: &dyn StateAccessor,
        dispatcher: &dyn Dispatcher,
    ) {
        self.set_phase(mode, SyncPhase::Saving);

        match self.save(user_id, mode, text, state).await {
            Ok(outcome) => publish_write(mode, outcome, state, dispatcher),
            Err(e) => report(dispatcher, SyncOperation::ScheduledSave, Some(mode), e),
        }

        let phase = self.resting_phase(mode);
        self.set_phase(mode, phase);
    }

    async fn save(
        &self,
        user_id: &str,
        mode: WritingMode,
        text: &str,
        state: &dyn StateAccessor,
    ) -> Result<WriteOutcome, SyncError> {
        let path = document_path(user_id, mode).map_err(SyncError::from_path)?;
        let base = state.sync_base(mode);
        conditioned_write(
            &*self.store,
            &path,
            &base,
            text,
            self.settings.merge_policy(),
        )
        .await
    }
}

fn snapshot_callback(
    mode: WritingMode,
    phases: PhaseTable,
    state: Arc<dyn StateAccessor>,
    dispatcher: Arc<dyn Dispatcher>,
) -> ChangeCallback {
    Arc::new(move |fields: Option<Fields>, meta: SnapshotMeta| {
        let listening = {
            let mut phases = phases.lock();
            let listening = phases.get(&mode) == Some(&SyncPhase::Listening);
            if listening {
                phases.insert(mode, SyncPhase::ReceivingSnapshot);
            }
            listening
        };

        handle_snapshot(mode, fields, meta, &*state, &*dispatcher);

        if listening {
            let mut phases = phases.lock();
            if phases.get(&mode) == Some(&SyncPhase::ReceivingSnapshot) {
                phases.insert(mode, SyncPhase::Listening);
            }
        }
    })
}

fn handle_snapshot(
    mode: WritingMode,
    fields: Option<Fields>,
    meta: SnapshotMeta,
    state: &dyn StateAccessor,
    dispatcher: &dyn Dispatcher,
) {
    dispatcher.dispatch(SyncEvent::SnapshotMetaUpdated { mode, meta });

    let remote = decode_record(fields.as_ref());
    let text = match remote.text {
        Some(text) => text,
        None => {
            tracing::debug!("{} snapshot without text", mode);
            return;
        }
    };

    dispatcher.dispatch(SyncEvent::DocBaseUpdated {
        mode,
        base: SyncBase::new(remote.revision, text.clone()),
    });
    replace_if_changed(mode, text, state, dispatcher);
}

fn publish_write(
    mode: WritingMode,
    outcome: WriteOutcome,
    state: &dyn StateAccessor,
    dispatcher: &dyn Dispatcher,
) {
    dispatcher.dispatch(SyncEvent::DocBaseUpdated {
        mode,
        base: SyncBase::new(outcome.revision, outcome.text.clone()),
    });
    if outcome.merged {
        replace_if_changed(mode, outcome.text, state, dispatcher);
    }
}

fn replace_if_changed(
    mode: WritingMode,
    text: String,
    state: &dyn StateAccessor,
    dispatcher: &dyn Dispatcher,
) {
    if state.local_text(mode) == text {
        return;
    }
    let cursor_position = clamp_cursor(state.cursor_position(mode), &text);
    dispatcher.dispatch(SyncEvent::LocalTextReplaced {
        mode,
        text,
        cursor_position,
    });
}

fn report(
    dispatcher: &dyn Dispatcher,
    operation: SyncOperation,
    mode: Option<WritingMode>,
    error: SyncError,
) {
    let message = match mode {
        Some(mode) => format!("Failed to sync {} during {}: {}", mode, operation, error),
        None => format!("Failed to sync during {}: {}", operation, error),
    };
    tracing::warn!("{}", message);
    dispatcher.dispatch(SyncEvent::SyncErrorRaised {
        operation,
        mode,
        message,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SharedSyncState;
    use crate::store::{MemoryStore, Snapshot, StoreError, TxFn, TxOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    const USER: &str = "u1";
    const EDITOR: &str = "users/u1/doc/editor";
    const TODO: &str = "users/u1/doc/todo";

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn settings(modes: &[WritingMode], debounce_ms: u64) -> SyncSettings {
        SyncSettings {
            debounce_ms,
            modes: modes.to_vec(),
            ..SyncSettings::default()
        }
    }

    struct Harness {
        coordinator: SyncCoordinator,
        state: SharedSyncState,
        events: UnboundedReceiver<SyncEvent>,
    }

    impl Harness {
        fn new(store: Arc<dyn DocumentStore>, settings: SyncSettings) -> Self {
            let (tx, events) = unbounded_channel();
            Self {
                coordinator: SyncCoordinator::new(store, settings),
                state: SharedSyncState::new().with_observer(tx),
                events,
            }
        }

        fn accessor(&self) -> Arc<dyn StateAccessor> {
            Arc::new(self.state.clone())
        }

        fn dispatcher(&self) -> Arc<dyn Dispatcher> {
            Arc::new(self.state.clone())
        }

        async fn listen(&self) {
            self.coordinator
                .start_listening(USER, self.accessor(), self.dispatcher())
                .await;
        }

        async fn initial_sync(&self) {
            self.coordinator
                .perform_initial_sync(USER, self.accessor(), self.dispatcher())
                .await;
        }

        fn schedule(&self, mode: WritingMode, text: &str) {
            self.coordinator.schedule_document_save(
                USER,
                mode,
                text,
                self.accessor(),
                self.dispatcher(),
            );
        }

        fn drain(&mut self) -> Vec<SyncEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                events.push(event);
            }
            events
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Delegating store that can fail or race chosen paths.
    struct ScriptedStore {
        inner: MemoryStore,
        failing: Vec<&'static str>,
        racing: bool,
        delay: Option<Duration>,
        bumps: AtomicU64,
    }

    impl ScriptedStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                failing: Vec::new(),
                racing: false,
                delay: None,
                bumps: AtomicU64::new(100),
            }
        }

        fn check(&self, path: &str) -> Result<(), StoreError> {
            if self.failing.iter().any(|failing| *failing == path) {
                return Err(StoreError::PermissionDenied(path.to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentStore for ScriptedStore {
        async fn read(&self, path: &str) -> Result<Snapshot, StoreError> {
            self.check(path)?;
            self.inner.read(path).await
        }

        async fn subscribe(
            &self,
            path: &str,
            on_change: ChangeCallback,
        ) -> Result<Subscription, StoreError> {
            self.check(path)?;
            self.inner.subscribe(path, on_change).await
        }

        async fn transaction(
            &self,
            path: &str,
            body: &TxFn<'_>,
        ) -> Result<TxOutcome, StoreError> {
            self.check(path)?;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.racing {
                // Another writer always lands first.
                let rev = self.bumps.fetch_add(1, Ordering::SeqCst);
                self.inner
                    .set(path, fields(json!({"text": format!("other {}", rev), "rev": rev})))
                    .await;
            }
            self.inner.transaction(path, body).await
        }

        async fn delete(&self, path: &str) -> Result<(), StoreError> {
            self.check(path)?;
            self.inner.delete(path).await
        }
    }

    #[tokio::test]
    async fn test_unchanged_remote_saves_without_merge() {
        let store = Arc::new(MemoryStore::new());
        store.set(EDITOR, fields(json!({"text": "X", "rev": 1}))).await;
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));

        h.initial_sync().await;
        h.state.set_local_text(WritingMode::Editor, "XY", 2);
        h.schedule(WritingMode::Editor, "XY");
        settle().await;

        let stats = store.stats();
        assert_eq!(stats.transactions, 1);
        assert_eq!(stats.rejections, 0);
        assert_eq!(
            h.state.snapshot().sync_base(WritingMode::Editor),
            SyncBase::new(2, "XY")
        );
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, SyncEvent::LocalTextReplaced { .. })));
    }

    #[tokio::test]
    async fn test_listening_pushes_remote_text_into_buffer() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(EDITOR, fields(json!({"text": "remote", "rev": 3})))
            .await;
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));

        h.listen().await;
        settle().await;

        let events = h.drain();
        assert_eq!(
            events,
            vec![
                SyncEvent::SnapshotMetaUpdated {
                    mode: WritingMode::Editor,
                    meta: SnapshotMeta::default(),
                },
                SyncEvent::DocBaseUpdated {
                    mode: WritingMode::Editor,
                    base: SyncBase::new(3, "remote"),
                },
                SyncEvent::LocalTextReplaced {
                    mode: WritingMode::Editor,
                    text: "remote".to_string(),
                    cursor_position: 0,
                },
            ]
        );
        assert_eq!(h.state.document(WritingMode::Editor).text, "remote");
        assert_eq!(h.coordinator.phase(WritingMode::Editor), SyncPhase::Listening);
        h.coordinator.stop_listening();
    }

    #[tokio::test]
    async fn test_incoming_text_clamps_cursor() {
        let store = Arc::new(MemoryStore::new());
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));
        h.state.set_local_text(WritingMode::Editor, "hello world", 11);

        h.listen().await;
        settle().await;
        store.set(EDITOR, fields(json!({"text": "hi", "rev": 1}))).await;
        settle().await;

        let replaced: Vec<_> = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, SyncEvent::LocalTextReplaced { .. }))
            .collect();
        assert_eq!(
            replaced,
            vec![SyncEvent::LocalTextReplaced {
                mode: WritingMode::Editor,
                text: "hi".to_string(),
                cursor_position: 2,
            }]
        );
        h.coordinator.stop_listening();
    }

    #[tokio::test]
    async fn test_metadata_only_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));

        h.listen().await;
        settle().await;
        let meta = SnapshotMeta {
            has_pending_writes: true,
            from_cache: true,
        };
        store
            .push_event(EDITOR, Some(fields(json!({"rev": 4}))), meta)
            .await;
        settle().await;

        let events = h.drain();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, SyncEvent::SnapshotMetaUpdated { .. })));
        assert_eq!(h.state.snapshot().snapshot_meta(WritingMode::Editor), meta);
        assert_eq!(
            h.state.snapshot().sync_base(WritingMode::Editor),
            SyncBase::default()
        );
        h.coordinator.stop_listening();
    }

    #[tokio::test]
    async fn test_start_listening_twice_keeps_one_subscription_per_mode() {
        let store = Arc::new(MemoryStore::new());
        let h = Harness::new(store.clone(), SyncSettings::default());

        h.listen().await;
        h.listen().await;

        let stats = store.stats();
        assert_eq!(stats.subscribes, 4);
        assert_eq!(stats.unsubscribes, 2);
        assert_eq!(stats.active_subscriptions(), WritingMode::ALL.len());
        assert_eq!(h.coordinator.listening_modes(), WritingMode::ALL.to_vec());

        h.coordinator.stop_listening();
        assert_eq!(store.stats().active_subscriptions(), 0);
        assert_eq!(h.coordinator.phase(WritingMode::Todo), SyncPhase::Stopped);
    }

    #[tokio::test]
    async fn test_stop_listening_without_activity() {
        let store = Arc::new(MemoryStore::new());
        let h = Harness::new(store.clone(), SyncSettings::default());

        assert_eq!(h.coordinator.phase(WritingMode::Editor), SyncPhase::Idle);
        h.coordinator.stop_listening();
        h.coordinator.stop_listening();
        assert_eq!(store.stats().unsubscribes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_saves() {
        let store = Arc::new(MemoryStore::new());
        let h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 1000));

        h.schedule(WritingMode::Editor, "a");
        tokio::time::sleep(Duration::from_millis(400)).await;
        h.schedule(WritingMode::Editor, "ab");
        assert_eq!(h.coordinator.pending_saves(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(store.stats().transactions, 1);
        assert_eq!(store.get(EDITOR).await.unwrap()["text"], "ab");
        assert_eq!(h.coordinator.pending_saves(), 0);
        assert_eq!(h.coordinator.phase(WritingMode::Editor), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_listening_cancels_pending_saves() {
        let store = Arc::new(MemoryStore::new());
        let h = Harness::new(store.clone(), SyncSettings::default());

        h.schedule(WritingMode::Editor, "draft");
        h.schedule(WritingMode::Todo, "milk");
        h.coordinator.stop_listening();
        tokio::time::sleep(Duration::from_millis(3000)).await;

        assert_eq!(store.stats().transactions, 0);
        assert_eq!(h.coordinator.pending_saves(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_save_completes_after_stop() {
        let mut store = ScriptedStore::new();
        store.delay = Some(Duration::from_millis(200));
        let store = Arc::new(store);
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 100));

        h.schedule(WritingMode::Editor, "late");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.coordinator.pending_saves(), 0);
        assert_eq!(h.coordinator.phase(WritingMode::Editor), SyncPhase::Saving);

        h.coordinator.stop_listening();
        assert_eq!(h.coordinator.phase(WritingMode::Editor), SyncPhase::Saving);
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(h.drain().contains(&SyncEvent::DocBaseUpdated {
            mode: WritingMode::Editor,
            base: SyncBase::new(1, "late"),
        }));
        assert_eq!(store.inner.get(EDITOR).await.unwrap()["text"], "late");
        assert_eq!(h.coordinator.phase(WritingMode::Editor), SyncPhase::Stopped);
    }

    #[tokio::test]
    async fn test_conflicting_save_is_merged_into_buffer() {
        let store = Arc::new(MemoryStore::new());
        store.set(EDITOR, fields(json!({"text": "X", "rev": 1}))).await;
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));

        h.initial_sync().await;
        h.state.set_local_text(WritingMode::Editor, "XY", 2);
        // Someone else appends while our save is pending.
        store.set(EDITOR, fields(json!({"text": "XZ", "rev": 2}))).await;
        h.schedule(WritingMode::Editor, "XY");
        settle().await;

        let stats = store.stats();
        assert_eq!(stats.transactions, 2);
        assert_eq!(stats.rejections, 1);
        let stored = store.get(EDITOR).await.unwrap();
        assert_eq!(stored["text"], "XYZ");
        assert_eq!(stored["rev"], 3);

        let events = h.drain();
        assert!(events.contains(&SyncEvent::DocBaseUpdated {
            mode: WritingMode::Editor,
            base: SyncBase::new(3, "XYZ"),
        }));
        assert!(events.contains(&SyncEvent::LocalTextReplaced {
            mode: WritingMode::Editor,
            text: "XYZ".to_string(),
            cursor_position: 2,
        }));
        assert_eq!(h.state.document(WritingMode::Editor).text, "XYZ");
    }

    #[tokio::test]
    async fn test_initial_sync_pushes_local_draft() {
        let store = Arc::new(MemoryStore::new());
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));
        h.state.set_local_text(WritingMode::Editor, "draft", 5);

        h.initial_sync().await;

        assert_eq!(store.stats().transactions, 1);
        let stored = store.get(EDITOR).await.unwrap();
        assert_eq!(stored["text"], "draft");
        assert_eq!(stored["rev"], 1);
        assert_eq!(
            h.drain(),
            vec![SyncEvent::DocBaseUpdated {
                mode: WritingMode::Editor,
                base: SyncBase::new(1, "draft"),
            }]
        );
    }

    #[tokio::test]
    async fn test_initial_sync_pushes_draft_over_empty_record() {
        // An empty record at our base revision is written directly; at any
        // other revision the write is rejected, merged and retried.
        for (rev, transactions) in [(0u64, 1usize), (4, 2)] {
            let store = Arc::new(MemoryStore::new());
            store.set(EDITOR, fields(json!({"text": "", "rev": rev}))).await;
            let h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));
            h.state.set_local_text(WritingMode::Editor, "draft", 5);

            h.initial_sync().await;

            assert_eq!(store.stats().transactions, transactions);
            let stored = store.get(EDITOR).await.unwrap();
            assert_eq!(stored["text"], "draft");
            assert_eq!(stored["rev"], rev + 1);
            assert_eq!(
                h.state.snapshot().sync_base(WritingMode::Editor),
                SyncBase::new(rev + 1, "draft")
            );
            assert_eq!(h.state.document(WritingMode::Editor).text, "draft");
        }
    }

    #[tokio::test]
    async fn test_initial_sync_adopts_remote_text() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(EDITOR, fields(json!({"text": "remote", "rev": 7})))
            .await;
        let h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));
        h.state.set_local_text(WritingMode::Editor, "local", 0);

        h.initial_sync().await;

        assert_eq!(store.stats().transactions, 0);
        assert_eq!(
            h.state.snapshot().sync_base(WritingMode::Editor),
            SyncBase::new(7, "remote")
        );
        assert_eq!(h.state.document(WritingMode::Editor).text, "local");
    }

    #[tokio::test]
    async fn test_malformed_revision_reads_as_zero() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(EDITOR, fields(json!({"text": "hello", "rev": "bad"})))
            .await;
        let h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));

        h.initial_sync().await;

        assert_eq!(
            h.state.snapshot().sync_base(WritingMode::Editor),
            SyncBase::new(0, "hello")
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_each_mode() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let mut h = Harness::new(store.clone(), SyncSettings::default());

        h.initial_sync().await;

        let mut failed: Vec<_> = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::SyncErrorRaised {
                    operation: SyncOperation::InitialSync,
                    mode,
                    ..
                } => mode,
                _ => None,
            })
            .collect();
        failed.sort();
        assert_eq!(failed, WritingMode::ALL.to_vec());
        assert!(h.state.last_error().is_some());
    }

    #[tokio::test]
    async fn test_initial_sync_isolates_failing_mode() {
        let mut store = ScriptedStore::new();
        store.failing.push(TODO);
        let store = Arc::new(store);
        let mut h = Harness::new(store.clone(), SyncSettings::default());
        h.state.set_local_text(WritingMode::Editor, "draft", 0);

        h.initial_sync().await;

        let events = h.drain();
        assert!(events.contains(&SyncEvent::DocBaseUpdated {
            mode: WritingMode::Editor,
            base: SyncBase::new(1, "draft"),
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            SyncEvent::SyncErrorRaised {
                operation: SyncOperation::InitialSync,
                mode: Some(WritingMode::Todo),
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_failed_listen_is_reported() {
        let mut store = ScriptedStore::new();
        store.failing.push(EDITOR);
        let store = Arc::new(store);
        let mut h = Harness::new(store.clone(), SyncSettings::default());

        h.listen().await;

        assert_eq!(h.coordinator.listening_modes(), vec![WritingMode::Todo]);
        assert!(h.drain().iter().any(|e| matches!(
            e,
            SyncEvent::SyncErrorRaised {
                operation: SyncOperation::Listen,
                mode: Some(WritingMode::Editor),
                ..
            }
        )));
        h.coordinator.stop_listening();
    }

    #[tokio::test]
    async fn test_repeated_rejection_exhausts_retry() {
        let mut store = ScriptedStore::new();
        store.racing = true;
        let store = Arc::new(store);
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));
        h.state.set_local_text(WritingMode::Editor, "draft", 0);

        h.initial_sync().await;

        let events = h.drain();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SyncEvent::SyncErrorRaised {
                operation, message, ..
            } => {
                assert_eq!(*operation, SyncOperation::InitialSync);
                assert!(message.contains("rejected after merge"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(store.inner.stats().transactions, 2);
    }

    #[tokio::test]
    async fn test_invalid_user_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let mut h = Harness::new(store.clone(), settings(&[WritingMode::Editor], 10));

        h.coordinator
            .perform_initial_sync("../etc", h.accessor(), h.dispatcher())
            .await;

        assert_eq!(store.stats().reads, 0);
        assert!(matches!(
            h.drain().as_slice(),
            [SyncEvent::SyncErrorRaised { .. }]
        ));
    }

    #[tokio::test]
    async fn test_delete_user_documents() {
        let store = Arc::new(MemoryStore::new());
        store.set(EDITOR, fields(json!({"text": "a", "rev": 1}))).await;
        store.set(TODO, fields(json!({"text": "b", "rev": 1}))).await;
        store.set("users/u1", fields(json!({"plan": "free"}))).await;
        let h = Harness::new(store.clone(), SyncSettings::default());

        h.coordinator.delete_user_documents(USER).await.unwrap();

        assert_eq!(store.stats().deletes, 3);
        assert!(store.get(EDITOR).await.is_none());
        assert!(store.get(TODO).await.is_none());
        assert!(store.get("users/u1").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_failure_propagates() {
        let mut store = ScriptedStore::new();
        store.failing.push("users/u1");
        let store = Arc::new(store);
        let h = Harness::new(store.clone(), SyncSettings::default());

        let err = h.coordinator.delete_user_documents(USER).await.unwrap_err();
        match err {
            SyncError::Deletion { path, source } => {
                assert_eq!(path, "users/u1");
                assert!(matches!(source, StoreError::PermissionDenied(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}
