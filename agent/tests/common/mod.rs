//! Shared fixtures for the agent integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fieldsync_agent::{
    CycleOutcome, LocalStore, NetworkMonitor, NetworkState, RemoteApi, RemoteError, SyncEngine,
    SyncOptions,
};
use fieldsync_engine::{
    CapturedPhoto, DeliveryCompletion, OrderUpdate, RemoteOrder, RemoteRoute, RemoteStop,
    RouteAction, RouteState, RouteStatus, SamplePayload, StopState, SyncProgress, Timestamp,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

pub const STORAGE_LIMIT: u64 = 512 * 1024 * 1024;

/// A mutating call the fake server accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub key: String,
    pub entity: String,
    pub photo_refs: Vec<String>,
}

/// In-memory stand-in for the delivery API.
///
/// Stops, routes and orders start out untouched. Mutating calls update that
/// state the way the real server would, so a replay after a lost
/// acknowledgment sees its own earlier write.
///
/// Order updates are stamped with the device's `capturedAt` unless
/// [`stamp_orders_at`](Self::stamp_orders_at) gives the server its own
/// clock. With a server clock ahead of the device, a second queued edit of
/// the same order conflicts with the first one under last-write-wins.
#[derive(Default)]
pub struct FakeRemote {
    pub stops: Mutex<HashMap<String, RemoteStop>>,
    pub routes: Mutex<HashMap<String, RemoteRoute>>,
    pub orders: Mutex<HashMap<String, RemoteOrder>>,
    applied: Mutex<Vec<Applied>>,
    batches: Mutex<Vec<Vec<SamplePayload>>>,
    ingest_calls: AtomicUsize,
    refused_samples: Mutex<HashSet<String>>,
    uploads: Mutex<Vec<String>>,
    refuse_uploads: AtomicBool,
    server_clock: Mutex<Option<Timestamp>>,
    failures: Mutex<VecDeque<RemoteError>>,
    lose_next_ack: AtomicBool,
    reject_uploads: AtomicBool,
    offline_after: Mutex<Option<(usize, Arc<NetworkMonitor>)>>,
    /// Held by a test to keep a mutating call in flight
    pub gate: tokio::sync::Mutex<()>,
    /// Signalled when a mutating call starts
    pub entered: Notify,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next mutating call with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Apply the next mutating call but answer as if the connection dropped.
    pub fn lose_next_ack(&self) {
        self.lose_next_ack.store(true, Ordering::SeqCst);
    }

    /// Fail every upload with a retryable error.
    pub fn reject_uploads(&self) {
        self.reject_uploads.store(true, Ordering::SeqCst);
    }

    /// Refuse every upload for good.
    pub fn refuse_uploads(&self) {
        self.refuse_uploads.store(true, Ordering::SeqCst);
    }

    /// Refuse any breadcrumb batch that contains `sample_id`.
    pub fn refuse_sample(&self, sample_id: &str) {
        self.refused_samples
            .lock()
            .unwrap()
            .insert(sample_id.to_string());
    }

    /// Stamp order writes with `at` instead of the device's capture time.
    pub fn stamp_orders_at(&self, at: Timestamp) {
        *self.server_clock.lock().unwrap() = Some(at);
    }

    pub fn ingest_calls(&self) -> usize {
        self.ingest_calls.load(Ordering::SeqCst)
    }

    /// Flip `network` offline once `count` calls have been applied.
    pub fn go_offline_after(&self, count: usize, network: Arc<NetworkMonitor>) {
        *self.offline_after.lock().unwrap() = Some((count, network));
    }

    pub fn complete_stop_at(&self, stop_id: &str, completed_at: Timestamp) {
        self.stops.lock().unwrap().insert(
            stop_id.to_string(),
            RemoteStop {
                stop_id: stop_id.to_string(),
                status: StopState::Completed,
                completed_at: Some(completed_at),
            },
        );
    }

    pub fn applied(&self) -> Vec<Applied> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_entities(&self) -> Vec<String> {
        self.applied().into_iter().map(|a| a.entity).collect()
    }

    pub fn batches(&self) -> Vec<Vec<SamplePayload>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    async fn mutate(
        &self,
        key: &str,
        entity: String,
        photo_refs: &[String],
        apply: impl FnOnce(&Self) + Send,
    ) -> Result<(), RemoteError> {
        self.entered.notify_one();
        let _open = self.gate.lock().await;

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        apply(self);
        let count = {
            let mut applied = self.applied.lock().unwrap();
            applied.push(Applied {
                key: key.to_string(),
                entity,
                photo_refs: photo_refs.to_vec(),
            });
            applied.len()
        };

        let hook = {
            let mut offline_after = self.offline_after.lock().unwrap();
            let due = matches!(offline_after.as_ref(), Some((after, _)) if count >= *after);
            if due {
                offline_after.take()
            } else {
                None
            }
        };
        if let Some((_, network)) = hook {
            network.set(NetworkState::Offline);
        }

        if self.lose_next_ack.swap(false, Ordering::SeqCst) {
            return Err(RemoteError::Transient(
                "connection reset before acknowledgment".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn health(&self) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn fetch_stop(&self, stop_id: &str) -> Result<RemoteStop, RemoteError> {
        if stop_id.starts_with("missing") {
            return Err(RemoteError::Permanent(
                "remote answered 404 Not Found: no such stop".into(),
            ));
        }
        Ok(self
            .stops
            .lock()
            .unwrap()
            .get(stop_id)
            .cloned()
            .unwrap_or_else(|| RemoteStop {
                stop_id: stop_id.to_string(),
                status: StopState::Pending,
                completed_at: None,
            }))
    }

    async fn fetch_route(&self, route_id: &str) -> Result<RemoteRoute, RemoteError> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .get(route_id)
            .cloned()
            .unwrap_or_else(|| RemoteRoute {
                route_id: route_id.to_string(),
                status: RouteState::Planned,
                started_at: None,
                completed_at: None,
            }))
    }

    async fn fetch_order(&self, order_id: &str) -> Result<RemoteOrder, RemoteError> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .unwrap_or_else(|| RemoteOrder {
                order_id: order_id.to_string(),
                updated_at: 0,
            }))
    }

    async fn complete_stop(
        &self,
        idempotency_key: &str,
        completion: &DeliveryCompletion,
        photo_refs: &[String],
    ) -> Result<(), RemoteError> {
        let entity = format!("stop:{}", completion.stop_id);
        self.mutate(idempotency_key, entity, photo_refs, |remote| {
            remote.complete_stop_at(&completion.stop_id, completion.completed_at)
        })
        .await
    }

    async fn ingest_locations(
        &self,
        _idempotency_key: &str,
        samples: &[SamplePayload],
    ) -> Result<(), RemoteError> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);
        let refused = self.refused_samples.lock().unwrap();
        if let Some(bad) = samples.iter().find(|s| refused.contains(&s.id)) {
            return Err(RemoteError::Permanent(format!(
                "remote answered 422 Unprocessable Entity: sample {} out of range",
                bad.id
            )));
        }
        drop(refused);

        self.batches.lock().unwrap().push(samples.to_vec());
        Ok(())
    }

    async fn update_route(
        &self,
        idempotency_key: &str,
        status: &RouteStatus,
    ) -> Result<(), RemoteError> {
        let entity = format!("route:{}", status.route_id);
        self.mutate(idempotency_key, entity, &[], |remote| {
            let mut routes = remote.routes.lock().unwrap();
            let route = routes
                .entry(status.route_id.clone())
                .or_insert_with(|| RemoteRoute {
                    route_id: status.route_id.clone(),
                    status: RouteState::Planned,
                    started_at: None,
                    completed_at: None,
                });
            match status.action {
                RouteAction::Start => {
                    route.status = RouteState::InProgress;
                    route.started_at = Some(status.at);
                }
                RouteAction::Complete => {
                    route.status = RouteState::Completed;
                    route.completed_at = Some(status.at);
                }
            }
        })
        .await
    }

    async fn update_order(
        &self,
        idempotency_key: &str,
        update: &OrderUpdate,
    ) -> Result<(), RemoteError> {
        let entity = format!("order:{}", update.order_id);
        self.mutate(idempotency_key, entity, &[], |remote| {
            let stamped = remote
                .server_clock
                .lock()
                .unwrap()
                .unwrap_or(update.captured_at);
            remote.orders.lock().unwrap().insert(
                update.order_id.clone(),
                RemoteOrder {
                    order_id: update.order_id.clone(),
                    updated_at: stamped,
                },
            );
        })
        .await
    }

    async fn upload_photo(&self, photo: &CapturedPhoto) -> Result<String, RemoteError> {
        if self.refuse_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Permanent(
                "remote answered 413 Payload Too Large".into(),
            ));
        }
        if self.reject_uploads.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("remote answered 503".into()));
        }
        self.uploads.lock().unwrap().push(photo.id.clone());
        Ok(format!("photos/{}", photo.id))
    }
}

pub async fn engine(remote: Arc<FakeRemote>) -> Arc<SyncEngine> {
    engine_with(remote, SyncOptions::default(), STORAGE_LIMIT).await
}

pub async fn engine_with(
    remote: Arc<FakeRemote>,
    options: SyncOptions,
    storage_limit: u64,
) -> Arc<SyncEngine> {
    let store = LocalStore::in_memory(storage_limit).await.unwrap();
    SyncEngine::new(store, remote, options)
}

pub fn finished(outcome: CycleOutcome) -> SyncProgress {
    match outcome {
        CycleOutcome::Finished(progress) => progress,
        other => panic!("expected a finished cycle, got {other:?}"),
    }
}

pub fn completion(stop_id: &str, completed_at: Timestamp) -> Value {
    json!({"stopId": stop_id, "completedAt": completed_at})
}

pub fn order_update(order_id: &str, captured_at: Timestamp) -> Value {
    json!({
        "orderId": order_id,
        "capturedAt": captured_at,
        "changes": {"notes": "leave at door"}
    })
}

pub fn route_start(route_id: &str, at: Timestamp) -> Value {
    json!({"routeId": route_id, "action": "start", "at": at})
}
