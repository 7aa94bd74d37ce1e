//! Record kinds kept alongside the operation queue.

use crate::{error::Result, payload::SamplePayload, Error, OperationId, Timestamp};
use serde::{Deserialize, Serialize};

/// A GPS breadcrumb. Append-only; never conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    pub captured_at: Timestamp,
    pub synced: bool,
}

impl LocationSample {
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        captured_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            accuracy,
            captured_at,
            synced: false,
        }
    }
}

impl From<&LocationSample> for SamplePayload {
    fn from(sample: &LocationSample) -> Self {
        SamplePayload {
            id: sample.id.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            accuracy: sample.accuracy,
            captured_at: sample.captured_at,
        }
    }
}

/// Photographic proof attached to a pending operation.
///
/// The blob is dropped once the upload succeeds; the row itself stays until
/// the parent operation leaves the queue so the remote reference can travel
/// with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPhoto {
    pub id: String,
    /// Parent operation
    pub operation_id: OperationId,
    /// Image bytes; empty after a successful upload
    #[serde(skip)]
    pub blob: Vec<u8>,
    pub mime_type: String,
    pub size_bytes: u64,
    pub captured_at: Timestamp,
    pub synced: bool,
    /// Reference returned by the upload endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ref: Option<String>,
}

impl CapturedPhoto {
    pub fn new(
        id: impl Into<String>,
        operation_id: impl Into<OperationId>,
        blob: Vec<u8>,
        mime_type: impl Into<String>,
        captured_at: Timestamp,
    ) -> Self {
        let size_bytes = blob.len() as u64;
        Self {
            id: id.into(),
            operation_id: operation_id.into(),
            blob,
            mime_type: mime_type.into(),
            size_bytes,
            captured_at,
            synced: false,
            remote_ref: None,
        }
    }

    /// Record a successful upload and release the local blob.
    ///
    /// `synced` only moves from false to true.
    pub fn mark_uploaded(&mut self, remote_ref: impl Into<String>) -> Result<()> {
        if self.synced {
            return Err(Error::PhotoAlreadySynced(self.id.clone()));
        }
        self.synced = true;
        self.remote_ref = Some(remote_ref.into());
        self.blob = Vec::new();
        Ok(())
    }
}

/// A TTL-bound cache value. Not part of the sync protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub cached_at: Timestamp,
    /// Time to live in milliseconds
    pub ttl: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: serde_json::Value,
        cached_at: Timestamp,
        ttl: u64,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            cached_at,
            ttl,
        }
    }

    /// An entry is expired once `now - cached_at > ttl`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.saturating_sub(self.cached_at) > self.ttl
    }

    /// The value if still fresh at `now`.
    pub fn value_at(&self, now: Timestamp) -> Result<&serde_json::Value> {
        if self.is_expired(now) {
            Err(Error::Expired(self.cached_at.saturating_add(self.ttl)))
        } else {
            Ok(&self.value)
        }
    }
}
