//! Photo upload pipeline.
//!
//! Runs on its own task so a slow or failing upload never stalls the
//! replay loop. The loop only asks whether an operation's evidence is
//! ready and kicks the pipeline once per cycle.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{LocalStore, PhotoIndex, PhotoStatus};
use crate::error::StorageError;
use crate::remote::{RemoteApi, RemoteError};
use crate::sync::now_millis;

/// Upload state of the photos attached to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    /// No photos attached
    None,
    /// Every photo uploaded; remote references in capture order
    Ready(Vec<String>),
    /// Some photos still hold local blobs
    Pending {
        uploaded: Vec<String>,
        missing: usize,
    },
    /// The server refused a photo for good
    Rejected {
        uploaded: Vec<String>,
        photo_id: String,
        reason: String,
    },
}

/// Outcome of one pass over unsynced photos.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadPass {
    pub uploaded: usize,
    /// Left for a later pass
    pub failed: usize,
    /// Refused by the server; never retried
    pub rejected: usize,
}

pub struct PhotoPipeline {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    wake: Notify,
    pass: Mutex<()>,
}

impl PhotoPipeline {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            store,
            remote,
            wake: Notify::new(),
            pass: Mutex::new(()),
        }
    }

    /// Ask the pipeline task for a pass.
    pub fn kick(&self) {
        self.wake.notify_one();
    }

    /// Upload every unsynced photo, oldest first.
    ///
    /// Blobs are loaded one at a time. A transient failure keeps the blob
    /// for a later pass; a permanent one marks the photo rejected.
    pub async fn run_once(&self, token: &CancellationToken) -> Result<UploadPass, StorageError> {
        let _pass = self.pass.lock().await;
        let mut result = UploadPass::default();

        for pending in self.store.photos_by(&PhotoIndex::Synced(false)).await? {
            if pending.rejection.is_some() {
                continue;
            }
            let Some(photo) = self.store.get_photo(&pending.id).await? else {
                continue;
            };

            let outcome = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.remote.upload_photo(&photo) => outcome,
            };

            match outcome {
                Ok(remote_ref) => {
                    self.store.mark_photo_uploaded(&photo.id, &remote_ref).await?;
                    tracing::info!(
                        photo_id = %photo.id,
                        op_id = %photo.operation_id,
                        bytes = photo.size_bytes,
                        "Photo uploaded"
                    );
                    result.uploaded += 1;
                }
                Err(e @ (RemoteError::Permanent(_) | RemoteError::Conflict { .. })) => {
                    let reason = e.to_string();
                    self.store
                        .mark_photo_rejected(&photo.id, &reason, now_millis())
                        .await?;
                    tracing::warn!(photo_id = %photo.id, op_id = %photo.operation_id, "Photo refused: {}", reason);
                    result.rejected += 1;
                }
                Err(e) => {
                    tracing::warn!(photo_id = %photo.id, op_id = %photo.operation_id, "Photo upload failed: {}", e);
                    result.failed += 1;
                }
            }
        }

        Ok(result)
    }

    /// Upload state of an operation's evidence.
    pub async fn evidence(&self, operation_id: &str) -> Result<Evidence, StorageError> {
        let photos = self
            .store
            .photos_by(&PhotoIndex::Operation(operation_id.to_string()))
            .await?;
        Ok(evidence_of(&photos))
    }

    /// Run passes on demand until the token is cancelled.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = pipeline.wake.notified() => {}
                }

                match pipeline.run_once(&token).await {
                    Ok(pass) if pass.uploaded + pass.failed + pass.rejected > 0 => {
                        tracing::debug!(
                            uploaded = pass.uploaded,
                            failed = pass.failed,
                            rejected = pass.rejected,
                            "Photo pass finished"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Photo pass aborted: {}", e),
                }
            }

            tracing::debug!("Photo pipeline stopped");
        })
    }
}

fn evidence_of(photos: &[PhotoStatus]) -> Evidence {
    if photos.is_empty() {
        return Evidence::None;
    }

    let uploaded: Vec<String> = photos
        .iter()
        .filter(|p| p.synced)
        .filter_map(|p| p.remote_ref.clone())
        .collect();

    if let Some(refused) = photos.iter().find(|p| p.rejection.is_some()) {
        return Evidence::Rejected {
            uploaded,
            photo_id: refused.id.clone(),
            reason: refused.rejection.clone().unwrap_or_default(),
        };
    }

    let missing = photos.len() - uploaded.len();
    if missing == 0 {
        Evidence::Ready(uploaded)
    } else {
        Evidence::Pending { uploaded, missing }
    }
}
