//! Capture path: what the UI and background capture write into the store.
//!
//! Writes land locally whether or not the device is online.

use fieldsync_engine::{
    payload, CapturedPhoto, ConflictRecord, LocationSample, OperationType, PendingOperation,
    Priority, Timestamp,
};

use super::{now_millis, SyncEngine};
use crate::error::StorageError;

impl SyncEngine {
    /// Queue a mutation at the moment of intent.
    ///
    /// The payload is checked here only to warn early; a malformed payload
    /// is still stored and ends up in the conflict log at replay, so the
    /// agent's action is never lost.
    pub async fn enqueue(
        &self,
        kind: OperationType,
        payload: serde_json::Value,
        priority: Option<Priority>,
    ) -> Result<PendingOperation, StorageError> {
        if let Err(e) = payload::validate(kind, &payload) {
            tracing::warn!(kind = %kind, "Queued payload will be rejected at replay: {}", e);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut op = PendingOperation::new(id, kind, payload, self.next_created_at());
        if let Some(priority) = priority {
            op = op.with_priority(priority);
        }

        self.store.put_operation(&op).await?;
        tracing::info!(
            op_id = %op.id,
            kind = %op.kind,
            priority = op.priority.as_str(),
            entity = %op.entity_key(),
            "Operation queued"
        );
        Ok(op)
    }

    /// Store a GPS breadcrumb. Refused when storage is critically full.
    pub async fn record_location(
        &self,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        captured_at: Option<Timestamp>,
    ) -> Result<LocationSample, StorageError> {
        let sample = LocationSample::new(
            uuid::Uuid::new_v4().to_string(),
            latitude,
            longitude,
            accuracy,
            captured_at.unwrap_or_else(now_millis),
        );

        self.store.put_location(&sample).await?;
        Ok(sample)
    }

    /// Attach photographic evidence to a queued operation and schedule its
    /// upload.
    pub async fn attach_photo(
        &self,
        operation_id: &str,
        blob: Vec<u8>,
        mime_type: &str,
    ) -> Result<CapturedPhoto, StorageError> {
        if self.store.get_operation(operation_id).await?.is_none() {
            return Err(StorageError::NotFound(format!("operation {operation_id}")));
        }

        let photo = CapturedPhoto::new(
            uuid::Uuid::new_v4().to_string(),
            operation_id,
            blob,
            mime_type,
            now_millis(),
        );

        self.store.put_photo(&photo).await?;
        tracing::info!(
            photo_id = %photo.id,
            op_id = %operation_id,
            bytes = photo.size_bytes,
            "Photo captured"
        );

        self.photos.kick();
        Ok(photo)
    }

    /// The conflict log, oldest first.
    pub async fn conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        self.store.all_conflicts().await
    }
}
