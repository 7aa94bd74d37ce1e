//! Quota monitor: tracks how full the local store is.

use fieldsync_engine::{QuotaLevel, StorageEstimate};
use tokio::sync::watch;

use crate::db::LocalStore;
use crate::error::StorageError;

#[derive(Debug)]
pub struct QuotaMonitor {
    store: LocalStore,
    level: watch::Sender<QuotaLevel>,
}

impl QuotaMonitor {
    pub fn new(store: LocalStore) -> Self {
        let (level, _) = watch::channel(QuotaLevel::Ok);
        Self { store, level }
    }

    pub fn level(&self) -> QuotaLevel {
        *self.level.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QuotaLevel> {
        self.level.subscribe()
    }

    /// Re-estimate usage and publish the level if it moved.
    pub async fn check(&self) -> Result<StorageEstimate, StorageError> {
        let estimate = self.store.estimate_usage().await?;
        let next = estimate.level();

        let changed = self.level.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            match next {
                QuotaLevel::Ok => tracing::info!(
                    used = estimate.used,
                    limit = estimate.limit,
                    "Storage usage back to normal"
                ),
                QuotaLevel::Warning => tracing::warn!(
                    used = estimate.used,
                    limit = estimate.limit,
                    "Storage usage above warning threshold"
                ),
                QuotaLevel::Critical => tracing::error!(
                    used = estimate.used,
                    limit = estimate.limit,
                    "Storage critically full; derived writes are rejected"
                ),
            }
        }

        Ok(estimate)
    }
}
