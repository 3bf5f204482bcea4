//! File-backed document store.
//!
//! Each document lives in its own JSON file:
//! ```text
//! <DATA_DIR>/
//!   users/
//!     <user_id>.json
//!     <user_id>/
//!       doc/
//!         editor.json
//!         todo.json
//! ```
//!
//! Writes go through a temp file and a rename. Transactions are serialized
//! within one process; other processes are only observed through polling,
//! so concurrent writers in separate processes are not atomic with respect
//! to each other.

use async_trait::async_trait;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;

use super::hub::{ChangeHub, StoreEvent};
use super::{
    ChangeCallback, DocumentStore, Fields, Snapshot, SnapshotMeta, StoreError, Subscription,
    TxDecision, TxFn, TxOutcome,
};
use crate::config::DEFAULT_POLL_INTERVAL_MS;
use crate::record::resolve_server_timestamps;

const DOC_EXTENSION: &str = "json";

/// Document store persisting to a local directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
    hub: Arc<ChangeHub>,
    write_lock: Arc<Mutex<()>>,
    poll_interval: Duration,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            hub: Arc::new(ChangeHub::new()),
            write_lock: Arc::new(Mutex::new(())),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    /// Sets how often subscriptions re-read their file.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the file for a document path, rejecting traversal.
    pub fn file_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments
            .iter()
            .any(|s| s.is_empty() || s.contains('\\') || s.starts_with('.'))
        {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let (last, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(StoreError::InvalidPath(path.to_string())),
        };
        let mut file = self.data_dir.clone();
        file.extend(parents);
        file.push(format!("{}.{}", last, DOC_EXTENSION));
        Ok(file)
    }

    async fn notify(&self, path: &str, fields: Option<Fields>) {
        self.hub
            .broadcast(
                path,
                StoreEvent {
                    fields,
                    meta: SnapshotMeta::default(),
                },
            )
            .await;
    }
}

fn io_error(path: &Path, e: io::Error) -> StoreError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        StoreError::PermissionDenied(path.display().to_string())
    } else {
        StoreError::Io(path.to_path_buf(), e)
    }
}

/// Loads a document file; `Ok(None)` if it does not exist.
fn load_fields(file: &Path) -> Result<Option<Fields>, StoreError> {
    match fs::read(file) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(file, e)),
    }
}

/// Writes a document file atomically using temp file + rename.
fn save_fields(file: &Path, fields: &Fields) -> Result<(), StoreError> {
    if let Some(dir) = file.parent() {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
    }

    let bytes = serde_json::to_vec_pretty(fields)?;
    let temp = file.with_extension("json.tmp");

    let mut out = File::create(&temp).map_err(|e| io_error(&temp, e))?;
    out.write_all(&bytes).map_err(|e| io_error(&temp, e))?;
    out.sync_all().map_err(|e| io_error(&temp, e))?;

    fs::rename(&temp, file).map_err(|e| io_error(file, e))?;
    Ok(())
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn read(&self, path: &str) -> Result<Snapshot, StoreError> {
        let file = self.file_path(path)?;
        Ok(Snapshot {
            fields: load_fields(&file)?,
        })
    }

    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, StoreError> {
        let file = self.file_path(path)?;
        let mut rx = self.hub.subscribe(path).await;
        let current = load_fields(&file)?;
        let poll_interval = self.poll_interval;
        let task_path = path.to_string();

        let task = tokio::spawn(async move {
            let mut last = current.clone();
            on_change(current, SnapshotMeta::default());

            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    event = rx.recv() => match event {
                        Ok(event) => {
                            if event.fields != last {
                                last = event.fields.clone();
                                on_change(event.fields, event.meta);
                            }
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => match load_fields(&file) {
                        Ok(fields) => {
                            if fields != last {
                                last = fields.clone();
                                on_change(fields, SnapshotMeta::default());
                            }
                        }
                        Err(e) => {
                            tracing::debug!("poll of {} failed: {}", task_path, e);
                        }
                    },
                }
            }
        });

        let hub = self.hub.clone();
        Ok(Subscription::new(move || {
            task.abort();
            // Prune needs the async lock; run it off the caller's path.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { hub.prune().await });
            }
        }))
    }

    async fn transaction(&self, path: &str, body: &TxFn<'_>) -> Result<TxOutcome, StoreError> {
        let file = self.file_path(path)?;
        let _guard = self.write_lock.lock().await;

        let current = load_fields(&file)?;
        match body(current.as_ref()) {
            TxDecision::Reject => Ok(TxOutcome::Rejected),
            TxDecision::Commit(mut fields) => {
                resolve_server_timestamps(&mut fields);
                save_fields(&file, &fields)?;
                self.notify(path, Some(fields.clone())).await;
                Ok(TxOutcome::Committed(fields))
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        let file = self.file_path(path)?;
        let _guard = self.write_lock.lock().await;

        match fs::remove_file(&file) {
            Ok(()) => {
                self.notify(path, None).await;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&file, e)),
        }
    }
}
