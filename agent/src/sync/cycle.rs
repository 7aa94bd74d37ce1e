//! One pass over the queue.

use std::future::Future;
use std::sync::atomic::Ordering;

use fieldsync_engine::{
    ConflictRecord, FailureOutcome, Payload, PendingOperation, ReplayPlan, SamplePayload, Step,
    SyncProgress, Timestamp, Verdict,
};

use super::{CycleOutcome, EvidencePolicy, SyncEngine, SyncingGuard, LOCATION_RETENTION_MS};
use crate::error::StorageError;
use crate::photos::Evidence;
use crate::remote::{self, RemoteError};

pub(crate) const EVIDENCE_PENDING: &str = "evidence upload pending";

/// What to do with a delivery completion given its evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EvidenceStep {
    /// Send with these references
    Send(Vec<String>),
    /// Required photos are still uploading
    Wait,
    /// A required photo was refused by the server
    Refuse(String),
}

/// What happened to one dispatched item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    /// Applied (or found applied) and removed
    Completed,
    /// Moved to the conflict log
    Failed,
    /// Still queued
    Queued,
    /// Left the queue behind our back
    Gone,
}

impl SyncEngine {
    /// Run one cycle with `now` as the clock reading.
    pub async fn run_cycle_at(&self, now: Timestamp) -> CycleOutcome {
        if self.token.is_cancelled() {
            return CycleOutcome::ShuttingDown;
        }
        if !self.network.is_online() {
            tracing::debug!("Offline, sync skipped");
            return CycleOutcome::Offline;
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Sync already running, trigger ignored");
            return CycleOutcome::AlreadyRunning;
        }
        let _guard = SyncingGuard(&self.syncing);

        self.photos.kick();

        let queue = match self.store.all_operations().await {
            Ok(queue) => queue,
            Err(e) => {
                tracing::error!("Failed to read the queue: {}", e);
                return CycleOutcome::Aborted(e.to_string());
            }
        };

        let mut plan = ReplayPlan::new(queue);
        let mut progress = SyncProgress::begin(plan.total(), self.progress.latest().last_sync_time);
        self.progress.publish(progress.clone());
        tracing::info!(total = plan.total(), "Sync cycle started");

        let mut halted = false;
        loop {
            if !self.is_live() {
                halted = true;
                tracing::info!(
                    remaining = plan.remaining(),
                    "Sync halted; remaining items stay queued"
                );
                break;
            }

            let Some(step) = plan.next_step(now, &self.options.backoff) else {
                break;
            };

            match step {
                Step::Skip { op, reason } => {
                    tracing::debug!(op_id = %op.id, reason = ?reason, "Item skipped this cycle");
                }
                Step::Dispatch(op) => match self.process(op, &mut plan, now).await {
                    ItemOutcome::Completed => progress.record_completed(),
                    ItemOutcome::Failed => progress.record_failed(),
                    ItemOutcome::Queued | ItemOutcome::Gone => {}
                },
            }

            self.progress.publish(progress.clone());
        }

        if !halted {
            self.flush_locations(now).await;
            self.sweep(now).await;
        }
        if let Err(e) = self.quota.check().await {
            tracing::warn!("Storage estimate unavailable: {}", e);
        }

        if halted {
            progress.in_progress = false;
        } else {
            progress.finish(now);
        }
        self.progress.publish(progress.clone());

        tracing::info!(
            completed = progress.completed,
            failed = progress.failed,
            pending = progress.pending(),
            "Sync cycle finished"
        );
        CycleOutcome::Finished(progress)
    }

    /// Dispatch may continue: the session is alive and the device online.
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.network.is_online()
    }

    /// Race a remote call against session teardown.
    async fn guarded<T, F>(&self, call: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        tokio::select! {
            _ = self.token.cancelled() => Err(RemoteError::Cancelled),
            result = call => result,
        }
    }

    async fn process(
        &self,
        mut op: PendingOperation,
        plan: &mut ReplayPlan,
        now: Timestamp,
    ) -> ItemOutcome {
        let payload = match Payload::decode(op.kind, &op.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(op_id = %op.id, kind = %op.kind, "Malformed payload: {}", e);
                return self.evict(&op, None, format!("permanent: {e}"), plan, now).await;
            }
        };

        let photo_refs = match self.photo_refs(&op, &payload).await {
            Ok(EvidenceStep::Send(refs)) => refs,
            Ok(EvidenceStep::Wait) => {
                op.record_wait(EVIDENCE_PENDING);
                self.save_retry_state(&op).await;
                plan.hold(op.entity_key());
                return ItemOutcome::Queued;
            }
            Ok(EvidenceStep::Refuse(reason)) => {
                return self.evict(&op, None, reason, plan, now).await;
            }
            Err(e) => {
                tracing::error!(op_id = %op.id, "Failed to read evidence: {}", e);
                plan.hold(op.entity_key());
                return ItemOutcome::Queued;
            }
        };

        match self.guarded(self.resolver.check(&payload)).await {
            Ok((Verdict::Proceed, _)) => {}
            Ok((Verdict::AlreadyApplied, _)) => {
                tracing::info!(op_id = %op.id, kind = %op.kind, "Already applied remotely");
                return self.complete(&op, plan).await;
            }
            Ok((Verdict::Conflict { reason }, snapshot)) => {
                return self.evict(&op, snapshot.to_value(), reason, plan, now).await;
            }
            Err(e) => return self.fail(op, e, plan, now).await,
        }

        let call = remote::apply(self.remote.as_ref(), &op.id, &payload, &photo_refs);
        match self.guarded(call).await {
            Ok(()) => {
                tracing::info!(op_id = %op.id, kind = %op.kind, "Operation applied");
                self.complete(&op, plan).await
            }
            Err(e) => self.fail(op, e, plan, now).await,
        }
    }

    /// Evidence references to send, or why the completion cannot go yet.
    async fn photo_refs(
        &self,
        op: &PendingOperation,
        payload: &Payload,
    ) -> Result<EvidenceStep, StorageError> {
        if !matches!(payload, Payload::DeliveryCompletion(_)) {
            return Ok(EvidenceStep::Send(Vec::new()));
        }

        let policy = self.options.evidence_policy;
        Ok(match self.photos.evidence(&op.id).await? {
            Evidence::None => EvidenceStep::Send(Vec::new()),
            Evidence::Ready(refs) => EvidenceStep::Send(refs),
            Evidence::Pending { uploaded, missing } => match policy {
                EvidencePolicy::AllowMissing => {
                    tracing::warn!(op_id = %op.id, missing, "Completing without all evidence");
                    EvidenceStep::Send(uploaded)
                }
                EvidencePolicy::Require => {
                    tracing::info!(op_id = %op.id, missing, "Waiting for evidence upload");
                    EvidenceStep::Wait
                }
            },
            Evidence::Rejected {
                uploaded,
                photo_id,
                reason,
            } => match policy {
                EvidencePolicy::AllowMissing => {
                    tracing::warn!(op_id = %op.id, photo_id = %photo_id, "Completing without refused photo");
                    EvidenceStep::Send(uploaded)
                }
                EvidencePolicy::Require => {
                    EvidenceStep::Refuse(format!("evidence photo {photo_id} refused: {reason}"))
                }
            },
        })
    }

    async fn fail(
        &self,
        mut op: PendingOperation,
        error: RemoteError,
        plan: &mut ReplayPlan,
        now: Timestamp,
    ) -> ItemOutcome {
        match error {
            RemoteError::Cancelled => {
                tracing::debug!(op_id = %op.id, "Call cancelled by shutdown");
                plan.hold(op.entity_key());
                ItemOutcome::Queued
            }
            RemoteError::Transient(message) => {
                match op.record_failure(message, now, &self.options.backoff) {
                    FailureOutcome::Retry {
                        attempt,
                        next_attempt_at,
                    } => {
                        tracing::warn!(
                            op_id = %op.id,
                            kind = %op.kind,
                            retry = attempt,
                            next_attempt_at,
                            error = op.last_error.as_deref().unwrap_or_default(),
                            "Transient failure, backing off"
                        );
                        self.save_retry_state(&op).await;
                        plan.hold(op.entity_key());
                        ItemOutcome::Queued
                    }
                    FailureOutcome::Exhausted { attempts } => {
                        tracing::warn!(op_id = %op.id, attempts, "Retries exhausted");
                        let last_error = op.last_error.clone().unwrap_or_default();
                        self.evict(&op, None, last_error, plan, now).await
                    }
                }
            }
            RemoteError::Conflict { message, remote } => {
                self.evict(&op, remote, message, plan, now).await
            }
            RemoteError::Permanent(message) => {
                self.evict(&op, None, format!("permanent: {message}"), plan, now)
                    .await
            }
        }
    }

    async fn complete(&self, op: &PendingOperation, plan: &mut ReplayPlan) -> ItemOutcome {
        match self.store.complete_operation(&op.id).await {
            Ok(true) => ItemOutcome::Completed,
            Ok(false) => {
                tracing::warn!(op_id = %op.id, "Operation left the queue during replay");
                ItemOutcome::Gone
            }
            Err(e) => {
                // applied remotely; the next cycle replays it idempotently
                tracing::error!(op_id = %op.id, "Failed to remove applied operation: {}", e);
                plan.hold(op.entity_key());
                ItemOutcome::Queued
            }
        }
    }

    async fn evict(
        &self,
        op: &PendingOperation,
        remote_snapshot: Option<serde_json::Value>,
        error: String,
        plan: &mut ReplayPlan,
        now: Timestamp,
    ) -> ItemOutcome {
        let record = ConflictRecord::from_operation(op, remote_snapshot, error, now);

        match self.store.evict_operation(&record).await {
            Ok(true) => {
                tracing::warn!(
                    op_id = %op.id,
                    kind = %op.kind,
                    retry = op.retry_count,
                    error = %record.error,
                    "Operation moved to conflict log"
                );
                ItemOutcome::Failed
            }
            Ok(false) => ItemOutcome::Gone,
            Err(e) => {
                tracing::error!(op_id = %op.id, "Failed to write conflict record: {}", e);
                plan.hold(op.entity_key());
                ItemOutcome::Queued
            }
        }
    }

    async fn save_retry_state(&self, op: &PendingOperation) {
        if let Err(e) = self.store.put_operation(op).await {
            tracing::error!(op_id = %op.id, "Failed to persist retry state: {}", e);
        }
    }

    /// Send unsynced breadcrumbs in capture order, one batch at a time.
    ///
    /// A batch the server refuses is moved to the conflict log and settled
    /// so later samples are not stuck behind it.
    async fn flush_locations(&self, now: Timestamp) -> usize {
        let batch_size = self.options.location_batch_size.max(1);
        let mut flushed = 0;

        while self.is_live() {
            let batch = match self.store.locations_by_synced(false, batch_size).await {
                Ok(batch) if batch.is_empty() => break,
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!("Failed to read breadcrumbs: {}", e);
                    break;
                }
            };

            let samples: Vec<SamplePayload> = batch.iter().map(SamplePayload::from).collect();
            let key = batch_key(&samples);
            let ids: Vec<String> = batch.into_iter().map(|s| s.id).collect();

            let settled = match self
                .guarded(self.remote.ingest_locations(&key, &samples))
                .await
            {
                Ok(()) => self.store.mark_locations_synced(&ids).await,
                Err(e @ (RemoteError::Transient(_) | RemoteError::Cancelled)) => {
                    tracing::warn!(samples = samples.len(), "Breadcrumb flush failed: {}", e);
                    break;
                }
                Err(RemoteError::Permanent(message)) => {
                    let error = format!("permanent: {message}");
                    self.refuse_batch(&key, &samples, &ids, None, error, now)
                        .await
                }
                Err(RemoteError::Conflict { message, remote }) => {
                    self.refuse_batch(&key, &samples, &ids, remote, message, now)
                        .await
                }
            };

            if let Err(e) = settled {
                tracing::error!("Failed to settle breadcrumbs: {}", e);
                break;
            }
            flushed += ids.len();

            if ids.len() < batch_size {
                break;
            }
        }

        if flushed > 0 {
            tracing::debug!(samples = flushed, "Breadcrumbs flushed");
        }
        flushed
    }

    async fn refuse_batch(
        &self,
        key: &str,
        samples: &[SamplePayload],
        ids: &[String],
        remote_snapshot: Option<serde_json::Value>,
        error: String,
        now: Timestamp,
    ) -> Result<u64, StorageError> {
        tracing::warn!(batch = %key, samples = samples.len(), error = %error, "Breadcrumb batch refused");
        let record = ConflictRecord::from_location_batch(key, samples, remote_snapshot, error, now);
        self.store.reject_locations(&record, ids).await
    }

    async fn sweep(&self, now: Timestamp) {
        let cutoff = now.saturating_sub(LOCATION_RETENTION_MS);
        match self.store.sweep(now, cutoff).await {
            Ok(report) => tracing::debug!(
                cache_entries = report.cache_entries,
                locations = report.locations,
                photos = report.photos,
                "Retention sweep"
            ),
            Err(e) => tracing::warn!("Retention sweep failed: {}", e),
        }
    }
}

/// Idempotency key for a breadcrumb batch.
fn batch_key(samples: &[SamplePayload]) -> String {
    match (samples.first(), samples.last()) {
        (Some(first), Some(last)) => {
            format!("locations:{}:{}:{}", first.id, last.id, samples.len())
        }
        _ => "locations:empty".to_string(),
    }
}
