//! Conflict resolver: fetch remote state and judge a queued operation.

use std::sync::Arc;

use fieldsync_engine::{conflict, Payload, RemoteSnapshot, SnapshotRequest, Verdict};

use crate::remote::{fetch_snapshot, RemoteApi, RemoteError};

/// Runs the per-type check right before an operation is replayed.
#[derive(Clone)]
pub struct ConflictResolver {
    remote: Arc<dyn RemoteApi>,
}

impl ConflictResolver {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }

    /// The verdict for `payload`, with the snapshot it was based on.
    ///
    /// Location updates never fetch anything. A missing remote entity
    /// surfaces as [`RemoteError::Permanent`].
    pub async fn check(&self, payload: &Payload) -> Result<(Verdict, RemoteSnapshot), RemoteError> {
        let request = SnapshotRequest::for_payload(payload);
        let snapshot = fetch_snapshot(self.remote.as_ref(), &request).await?;
        let verdict = conflict::evaluate(payload, &snapshot);

        if let Verdict::Conflict { reason } = &verdict {
            tracing::info!(reason = %reason, "Conflict detected against remote state");
        }

        Ok((verdict, snapshot))
    }
}
