//! Remote delivery API, as consumed by the agent.
//!
//! The agent does not own the server contract. [`RemoteApi`] is the seam the
//! sync loop talks through; [`HttpRemote`] is the production client. All
//! mutating calls carry an idempotency key so a replay after a lost
//! acknowledgment is a no-op on the server.

mod http;

pub use http::HttpRemote;

use async_trait::async_trait;
use fieldsync_engine::{
    payload::{DeliveryCompletion, OrderUpdate, RouteStatus, SamplePayload},
    CapturedPhoto, Payload, RemoteOrder, RemoteRoute, RemoteSnapshot, RemoteStop,
    SnapshotRequest,
};

/// Classified remote failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    /// Worth retrying: timeouts, dropped connections, 5xx, 408, 429
    #[error("transient: {0}")]
    Transient(String),

    /// The server holds state that contradicts the operation
    #[error("conflict: {message}")]
    Conflict {
        message: String,
        remote: Option<serde_json::Value>,
    },

    /// Can never succeed: unknown entity, rejected payload
    #[error("permanent: {0}")]
    Permanent(String),

    /// The session was torn down while the call was in flight
    #[error("cancelled")]
    Cancelled,
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

/// Endpoints of the remote delivery API.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Reachability probe.
    async fn health(&self) -> Result<(), RemoteError>;

    async fn fetch_stop(&self, stop_id: &str) -> Result<RemoteStop, RemoteError>;

    async fn fetch_route(&self, route_id: &str) -> Result<RemoteRoute, RemoteError>;

    async fn fetch_order(&self, order_id: &str) -> Result<RemoteOrder, RemoteError>;

    /// Complete a stop. Answers with a conflict carrying the current stop
    /// when someone else completed it first.
    async fn complete_stop(
        &self,
        idempotency_key: &str,
        completion: &DeliveryCompletion,
        photo_refs: &[String],
    ) -> Result<(), RemoteError>;

    /// Batch upsert of breadcrumbs, keyed by sample id.
    async fn ingest_locations(
        &self,
        idempotency_key: &str,
        samples: &[SamplePayload],
    ) -> Result<(), RemoteError>;

    async fn update_route(
        &self,
        idempotency_key: &str,
        status: &RouteStatus,
    ) -> Result<(), RemoteError>;

    async fn update_order(
        &self,
        idempotency_key: &str,
        update: &OrderUpdate,
    ) -> Result<(), RemoteError>;

    /// Upload a photo and return its stable remote reference.
    async fn upload_photo(&self, photo: &CapturedPhoto) -> Result<String, RemoteError>;
}

/// Fetch whatever remote state a conflict check needs.
pub async fn fetch_snapshot(
    remote: &dyn RemoteApi,
    request: &SnapshotRequest,
) -> Result<RemoteSnapshot, RemoteError> {
    Ok(match request {
        SnapshotRequest::Stop(id) => RemoteSnapshot::Stop(remote.fetch_stop(id).await?),
        SnapshotRequest::Route(id) => RemoteSnapshot::Route(remote.fetch_route(id).await?),
        SnapshotRequest::Order(id) => RemoteSnapshot::Order(remote.fetch_order(id).await?),
        SnapshotRequest::Nothing => RemoteSnapshot::None,
    })
}

/// Send a decoded operation to its endpoint.
pub async fn apply(
    remote: &dyn RemoteApi,
    operation_id: &str,
    payload: &Payload,
    photo_refs: &[String],
) -> Result<(), RemoteError> {
    match payload {
        Payload::DeliveryCompletion(p) => remote.complete_stop(operation_id, p, photo_refs).await,
        Payload::LocationUpdate(p) => remote.ingest_locations(operation_id, &p.samples).await,
        Payload::RouteStatus(p) => remote.update_route(operation_id, p).await,
        Payload::OrderUpdate(p) => remote.update_order(operation_id, p).await,
    }
}
