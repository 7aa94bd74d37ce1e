//! Progress hub.
//!
//! Tracks progress subscribers and fans out every [`SyncProgress`] snapshot
//! the sync loop publishes. Owned by the engine context and cleared on
//! shutdown, so no listener outlives its session.

use dashmap::DashMap;
use fieldsync_engine::SyncProgress;
use tokio::sync::{mpsc, watch};

/// Receiving end of a progress subscription.
pub type ProgressReceiver = mpsc::UnboundedReceiver<SyncProgress>;

/// Sender for progress snapshots.
pub type ProgressSender = mpsc::UnboundedSender<SyncProgress>;

#[derive(Debug)]
pub struct ProgressHub {
    /// Active subscribers, keyed by subscription ID.
    subscribers: DashMap<String, ProgressSender>,
    latest: watch::Sender<SyncProgress>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(SyncProgress::default());
        Self {
            subscribers: DashMap::new(),
            latest,
        }
    }

    /// Register a subscriber.
    ///
    /// Returns the subscription ID and a receiver primed with the latest
    /// snapshot.
    pub fn subscribe(&self) -> (String, ProgressReceiver) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let _ = tx.send(self.latest());
        self.subscribers.insert(id.clone(), tx);

        tracing::debug!(subscription = %id, "Progress subscriber registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: &str) {
        if self.subscribers.remove(id).is_some() {
            tracing::debug!(subscription = %id, "Progress subscriber removed");
        }
    }

    /// Record a snapshot and send it to every subscriber.
    ///
    /// Subscribers whose receiver is gone are dropped. Returns the number
    /// of subscribers reached.
    pub fn publish(&self, progress: SyncProgress) -> usize {
        self.latest.send_replace(progress.clone());

        let mut sent = 0;
        self.subscribers.retain(|_, tx| {
            let alive = tx.send(progress.clone()).is_ok();
            if alive {
                sent += 1;
            }
            alive
        });
        sent
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> SyncProgress {
        self.latest.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop every subscriber; their receivers see the stream end.
    pub fn clear(&self) {
        self.subscribers.clear();
    }
}
