//! Broadcast fan-out of document changes to subscribers.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use super::{Fields, SnapshotMeta};

/// Buffered events per path before slow subscribers start lagging.
const CHANNEL_CAPACITY: usize = 16;

/// A full snapshot pushed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub fields: Option<Fields>,
    pub meta: SnapshotMeta,
}

/// Tracks broadcast channels per document path.
#[derive(Debug, Default)]
pub struct ChangeHub {
    channels: RwLock<HashMap<String, broadcast::Sender<StoreEvent>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to updates for a path.
    pub async fn subscribe(&self, path: &str) -> broadcast::Receiver<StoreEvent> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(path) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(CHANNEL_CAPACITY);
            channels.insert(path.to_string(), sender);
            receiver
        }
    }

    /// Broadcasts an event to every subscriber of a path.
    pub async fn broadcast(&self, path: &str, event: StoreEvent) {
        let channels = self.channels.read().await;

        if let Some(sender) = channels.get(path) {
            // No receivers is fine
            let _ = sender.send(event);
        }
    }

    /// Drops channels whose receivers are all gone.
    pub async fn prune(&self) {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    /// Number of paths with an open channel.
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Number of live receivers for a path.
    pub async fn receiver_count(&self, path: &str) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(path)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}
