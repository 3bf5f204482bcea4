//! In-process document store.
//!
//! Holds documents in a map behind an async lock. Transactions run under
//! the write lock, so they are atomic with respect to each other and to
//! [`MemoryStore::set`]. Counters record every call for inspection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;

use super::hub::{ChangeHub, StoreEvent};
use super::{
    ChangeCallback, DocumentStore, Fields, Snapshot, SnapshotMeta, StoreError, Subscription,
    TxDecision, TxFn, TxOutcome,
};
use crate::record::resolve_server_timestamps;

/// Call counts for a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: usize,
    pub transactions: usize,
    pub commits: usize,
    pub rejections: usize,
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub deletes: usize,
}

impl StoreStats {
    /// Subscriptions that have not been released.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribes - self.unsubscribes
    }
}

#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    transactions: AtomicUsize,
    commits: AtomicUsize,
    rejections: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    deletes: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<String, Fields>>,
    hub: Arc<ChangeHub>,
    counters: Arc<Counters>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored fields for a path.
    pub async fn get(&self, path: &str) -> Option<Fields> {
        self.docs.read().await.get(path).cloned()
    }

    /// Writes a document unconditionally and notifies subscribers, as
    /// another client would.
    pub async fn set(&self, path: &str, mut fields: Fields) {
        resolve_server_timestamps(&mut fields);
        let mut docs = self.docs.write().await;
        docs.insert(path.to_string(), fields.clone());
        self.hub
            .broadcast(
                path,
                StoreEvent {
                    fields: Some(fields),
                    meta: SnapshotMeta::default(),
                },
            )
            .await;
    }

    /// Pushes an arbitrary event to subscribers without touching storage.
    pub async fn push_event(&self, path: &str, fields: Option<Fields>, meta: SnapshotMeta) {
        self.hub.broadcast(path, StoreEvent { fields, meta }).await;
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            reads: c.reads.load(Ordering::SeqCst),
            transactions: c.transactions.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rejections: c.rejections.load(Ordering::SeqCst),
            subscribes: c.subscribes.load(Ordering::SeqCst),
            unsubscribes: c.unsubscribes.load(Ordering::SeqCst),
            deletes: c.deletes.load(Ordering::SeqCst),
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Snapshot, StoreError> {
        self.check_available()?;
        bump(&self.counters.reads);
        Ok(Snapshot {
            fields: self.get(path).await,
        })
    }

    async fn subscribe(
        &self,
        path: &str,
        on_change: ChangeCallback,
    ) -> Result<Subscription, StoreError> {
        self.check_available()?;

        // Subscribe before reading so no change falls between the two.
        let mut rx = self.hub.subscribe(path).await;
        let current = self.get(path).await;
        bump(&self.counters.subscribes);

        let task_path = path.to_string();
        let task = tokio::spawn(async move {
            on_change(current, SnapshotMeta::default());
            loop {
                match rx.recv().await {
                    Ok(event) => on_change(event.fields, event.meta),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("subscriber for {} skipped {} events", task_path, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let counters = self.counters.clone();
        let hub = self.hub.clone();
        Ok(Subscription::new(move || {
            task.abort();
            bump(&counters.unsubscribes);
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { hub.prune().await });
            }
        }))
    }

    async fn transaction(&self, path: &str, body: &TxFn<'_>) -> Result<TxOutcome, StoreError> {
        self.check_available()?;
        bump(&self.counters.transactions);

        let mut docs = self.docs.write().await;
        match body(docs.get(path)) {
            TxDecision::Reject => {
                bump(&self.counters.rejections);
                Ok(TxOutcome::Rejected)
            }
            TxDecision::Commit(mut fields) => {
                resolve_server_timestamps(&mut fields);
                docs.insert(path.to_string(), fields.clone());
                bump(&self.counters.commits);
                // Broadcast under the guard so pushes follow commit order.
                self.hub
                    .broadcast(
                        path,
                        StoreEvent {
                            fields: Some(fields.clone()),
                            meta: SnapshotMeta::default(),
                        },
                    )
                    .await;
                Ok(TxOutcome::Committed(fields))
            }
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.check_available()?;
        bump(&self.counters.deletes);

        let mut docs = self.docs.write().await;
        if docs.remove(path).is_some() {
            self.hub
                .broadcast(
                    path,
                    StoreEvent {
                        fields: None,
                        meta: SnapshotMeta::default(),
                    },
                )
                .await;
        }
        Ok(())
    }
}
