//! Queue, conflict and connectivity endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use fieldsync_engine::{ConflictRecord, Priority, QuotaLevel, StorageEstimate, SyncProgress};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::network::NetworkState;
use crate::AppState;

/// Create status routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/progress", get(progress))
        .route("/conflicts", get(conflicts))
        .route("/queue", get(queue))
        .route("/sync", post(trigger_sync))
        .route("/network", post(report_network))
}

/// Queue depth and storage pressure.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub high: u64,
    pub normal: u64,
    pub low: u64,
    pub total: u64,
    pub storage: StorageEstimate,
    pub quota: QuotaLevel,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAccepted {
    pub already_running: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NetworkReport {
    pub online: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub state: NetworkState,
    pub changed: bool,
}

/// Latest progress snapshot.
async fn progress(State(state): State<AppState>) -> Json<SyncProgress> {
    Json(state.engine.progress().latest())
}

/// Read-only conflict log.
async fn conflicts(State(state): State<AppState>) -> Result<Json<Vec<ConflictRecord>>> {
    Ok(Json(state.engine.conflicts().await?))
}

async fn queue(State(state): State<AppState>) -> Result<Json<QueueStatus>> {
    let store = state.engine.store();
    let mut status = QueueStatus {
        high: 0,
        normal: 0,
        low: 0,
        total: 0,
        storage: store.estimate_usage().await?,
        quota: QuotaLevel::Ok,
    };
    status.quota = status.storage.level();

    for (priority, count) in store.queue_depth().await? {
        match priority {
            Priority::High => status.high = count,
            Priority::Normal => status.normal = count,
            Priority::Low => status.low = count,
        }
        status.total += count;
    }

    Ok(Json(status))
}

/// Manual trigger. A request while a cycle runs is acknowledged and ignored.
async fn trigger_sync(State(state): State<AppState>) -> (StatusCode, Json<SyncAccepted>) {
    let already_running = !state.engine.trigger();

    tracing::info!(already_running, "Manual sync requested over status surface");
    (StatusCode::ACCEPTED, Json(SyncAccepted { already_running }))
}

/// Platform connectivity signal.
async fn report_network(
    State(state): State<AppState>,
    report: std::result::Result<Json<NetworkReport>, JsonRejection>,
) -> Result<Json<NetworkStatus>> {
    let Json(report) = report.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let network = state.engine.network();
    let changed = network.set(NetworkState::from_online(report.online));

    Ok(Json(NetworkStatus {
        state: network.state(),
        changed,
    }))
}
