//! Sync queue manager.
//!
//! [`SyncEngine`] is the per-session engine context. It owns the store
//! handle, the remote client, the timers and the cancellation token, and it
//! drives the replay loop:
//!
//! ```text
//!   online edge ─┐
//!   interval ────┼──► run_cycle ──► snapshot queue (priority, createdAt)
//!   manual ──────┘        │
//!                         ├─► per item: evidence ─► conflict check ─► remote call
//!                         │        success / already applied → delete
//!                         │        transient                 → backoff, keep
//!                         │        conflict / permanent / N_max → conflict log
//!                         ├─► flush breadcrumbs
//!                         └─► retention sweep, quota check
//! ```
//!
//! Exactly one cycle runs at a time; a trigger while syncing is a no-op.

mod capture;
mod cycle;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fieldsync_engine::{Backoff, SyncProgress, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::LocalStore;
use crate::network::{NetworkMonitor, NetworkState};
use crate::photos::PhotoPipeline;
use crate::progress::ProgressHub;
use crate::quota::QuotaMonitor;
use crate::remote::RemoteApi;
use crate::resolver::ConflictResolver;

/// Synced breadcrumbs are kept this long.
pub const LOCATION_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// Whether a delivery completion may be sent before its photos are uploaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidencePolicy {
    #[default]
    Require,
    AllowMissing,
}

impl FromStr for EvidencePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "require" => Ok(EvidencePolicy::Require),
            "allow_missing" => Ok(EvidencePolicy::AllowMissing),
            other => Err(format!("unknown evidence policy: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Periodic resync interval
    pub interval: Duration,
    pub backoff: Backoff,
    pub evidence_policy: EvidencePolicy,
    /// Breadcrumbs per ingestion request
    pub location_batch_size: usize,
    /// Connectivity probe interval; `None` leaves the network state to the platform
    pub probe_interval: Option<Duration>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            backoff: Backoff::default(),
            evidence_policy: EvidencePolicy::Require,
            location_batch_size: 200,
            probe_interval: None,
        }
    }
}

/// What a call to run a cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle ran; final counters attached
    Finished(SyncProgress),
    /// Another cycle was already running
    AlreadyRunning,
    Offline,
    ShuttingDown,
    /// The queue could not be read
    Aborted(String),
}

/// The per-session engine context.
pub struct SyncEngine {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    resolver: ConflictResolver,
    photos: Arc<PhotoPipeline>,
    network: Arc<NetworkMonitor>,
    quota: QuotaMonitor,
    progress: Arc<ProgressHub>,
    options: SyncOptions,
    syncing: AtomicBool,
    last_created_at: AtomicU64,
    trigger: Notify,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build a context for one session. Nothing runs until [`start`](Self::start).
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteApi>, options: SyncOptions) -> Arc<Self> {
        Arc::new(Self {
            resolver: ConflictResolver::new(Arc::clone(&remote)),
            photos: Arc::new(PhotoPipeline::new(store.clone(), Arc::clone(&remote))),
            network: Arc::new(NetworkMonitor::new(NetworkState::Online)),
            quota: QuotaMonitor::new(store.clone()),
            progress: Arc::new(ProgressHub::new()),
            store,
            remote,
            options,
            syncing: AtomicBool::new(false),
            last_created_at: AtomicU64::new(0),
            trigger: Notify::new(),
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    pub fn progress(&self) -> &Arc<ProgressHub> {
        &self.progress
    }

    pub fn photos(&self) -> &Arc<PhotoPipeline> {
        &self.photos
    }

    pub fn quota(&self) -> &QuotaMonitor {
        &self.quota
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Ask the loop for a cycle.
    ///
    /// Returns false, and asks for nothing, while a cycle is running.
    pub fn trigger(&self) -> bool {
        if self.is_syncing() {
            tracing::debug!("Sync already running, trigger ignored");
            return false;
        }
        self.trigger.notify_one();
        true
    }

    /// Run a cycle now, stamped with the wall clock.
    pub async fn sync_now(&self) -> CycleOutcome {
        self.run_cycle_at(now_millis()).await
    }

    /// Spawn the sync loop, the photo pipeline and, if configured, the
    /// connectivity probe.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            tracing::warn!("Sync engine already started");
            return;
        }

        tasks.push(self.photos.spawn(self.token.child_token()));

        if let Some(interval) = self.options.probe_interval {
            tasks.push(self.network.spawn_probe(
                Arc::clone(&self.remote),
                interval,
                self.token.child_token(),
            ));
        }

        let engine = Arc::clone(self);
        tasks.push(tokio::spawn(async move { engine.run_loop().await }));

        tracing::info!(
            interval_secs = self.options.interval.as_secs(),
            max_retries = self.options.backoff.max_retries(),
            "Sync engine started"
        );
    }

    async fn run_loop(self: Arc<Self>) {
        let mut network = self.network.subscribe();
        let mut ticker = tokio::time::interval(self.options.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *network.borrow_and_update();
                    if state == NetworkState::Online {
                        tracing::info!("Back online, syncing");
                        self.sync_now().await;
                    }
                }
                _ = ticker.tick() => {
                    self.sync_now().await;
                }
                _ = self.trigger.notified() => {
                    tracing::debug!("Manual sync requested");
                    self.sync_now().await;
                }
            }
        }

        tracing::debug!("Sync loop stopped");
    }

    /// Number of background tasks still running.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Tear the session down: cancel in-flight calls, stop every timer and
    /// task, and drop all progress subscribers.
    pub async fn shutdown(&self) {
        self.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }

        self.progress.clear();
        tracing::info!("Sync engine stopped");
    }

    /// Creation time for a new operation, strictly after the previous one.
    fn next_created_at(&self) -> Timestamp {
        let now = now_millis();
        let previous = self
            .last_created_at
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last.saturating_add(1)))
            })
            .unwrap_or(now);
        now.max(previous.saturating_add(1))
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Clears the syncing flag when a cycle ends, however it ends.
struct SyncingGuard<'a>(&'a AtomicBool);

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
