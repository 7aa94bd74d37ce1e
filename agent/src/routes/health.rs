//! Liveness of the agent and a one-line view of its sync state.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::network::NetworkState;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the local store cannot be read
    pub status: &'static str,
    pub version: &'static str,
    pub network: NetworkState,
    pub syncing: bool,
    /// Operations waiting for replay
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued: Option<u64>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = &state.engine;

    let queued = match engine.store().queue_depth().await {
        Ok(depth) => Some(depth.iter().map(|(_, count)| count).sum::<u64>()),
        Err(e) => {
            tracing::warn!("Health check could not read the queue: {}", e);
            None
        }
    };

    Json(HealthResponse {
        status: if queued.is_some() { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        network: engine.network().state(),
        syncing: engine.is_syncing(),
        queued,
    })
}
