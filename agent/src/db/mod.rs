//! Local store: SQLite persistence for the offline queue.
//!
//! Five collections live here: pending operations, location samples,
//! captured photos, the TTL cache and the conflict log. Every `put` is a
//! single statement, so a partially written record is never observable.
//! Writes are checked against the storage quota by class: derived data is
//! refused once the store is critically full, user-committed actions never
//! are.

mod cache;
mod conflicts;
mod locations;
mod operations;
mod photos;
mod pool;

pub use cache::*;
pub use conflicts::*;
pub use locations::*;
pub use operations::*;
pub use photos::*;
pub use pool::*;

use fieldsync_engine::{
    CacheEntry, CapturedPhoto, ConflictRecord, LocationSample, OperationType, PendingOperation,
    Priority, StorageEstimate, Timestamp, WriteClass,
};

use crate::error::StorageError;

pub(crate) fn to_ts(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_ts(value: i64) -> u64 {
    value.max(0) as u64
}

/// Handle to the local store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: Pool,
    storage_limit: u64,
}

impl LocalStore {
    /// Open (creating if needed) and migrate the store.
    pub async fn open(database_url: &str, storage_limit: u64) -> Result<Self, StorageError> {
        let pool = create_pool(database_url).await?;

        tracing::info!("Running local store migrations...");
        run_migrations(&pool).await?;

        Ok(Self {
            pool,
            storage_limit,
        })
    }

    /// A fresh store that lives in memory.
    pub async fn in_memory(storage_limit: u64) -> Result<Self, StorageError> {
        Self::open("sqlite::memory:", storage_limit).await
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn storage_limit(&self) -> u64 {
        self.storage_limit
    }

    /// Current usage against the configured limit.
    pub async fn estimate_usage(&self) -> Result<StorageEstimate, StorageError> {
        let used = allocated_bytes(&self.pool).await?;
        Ok(StorageEstimate::new(used, self.storage_limit))
    }

    async fn admit(&self, class: WriteClass) -> Result<(), StorageError> {
        if class == WriteClass::UserCommitted {
            return Ok(());
        }
        self.estimate_usage().await?.admit(class)?;
        Ok(())
    }

    // --- pending operations -------------------------------------------------

    /// Persist an operation or its updated retry state.
    pub async fn put_operation(&self, op: &PendingOperation) -> Result<(), StorageError> {
        self.admit(WriteClass::UserCommitted).await?;
        upsert_operation(&self.pool, op).await
    }

    pub async fn get_operation(&self, id: &str) -> Result<Option<PendingOperation>, StorageError> {
        get_operation(&self.pool, id).await
    }

    /// The whole queue in replay order: priority tier, then creation time.
    pub async fn all_operations(&self) -> Result<Vec<PendingOperation>, StorageError> {
        list_operations(&self.pool).await
    }

    pub async fn operations_by(
        &self,
        index: &OperationIndex,
    ) -> Result<Vec<PendingOperation>, StorageError> {
        list_operations_by(&self.pool, index).await
    }

    pub async fn delete_operation(&self, id: &str) -> Result<bool, StorageError> {
        delete_operation(&self.pool, id).await
    }

    pub async fn queue_depth(&self) -> Result<Vec<(Priority, u64)>, StorageError> {
        count_by_priority(&self.pool).await
    }

    /// Remove an applied operation together with its uploaded evidence.
    ///
    /// Returns false if the operation had already left the queue.
    pub async fn complete_operation(&self, id: &str) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;

        let removed = delete_operation(&mut *tx, id).await?;
        if removed {
            delete_synced_photos_for(&mut *tx, id).await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Move an operation to the conflict log.
    ///
    /// Deletion and the conflict write commit together; an operation that
    /// already left the queue is not recorded twice.
    pub async fn evict_operation(&self, record: &ConflictRecord) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await?;

        let removed = delete_operation(&mut *tx, &record.operation_id).await?;
        if removed {
            insert_conflict(&mut *tx, record).await?;
        }

        tx.commit().await?;
        Ok(removed)
    }

    // --- location samples ---------------------------------------------------

    /// Background breadcrumbs are derived data.
    pub async fn put_location(&self, sample: &LocationSample) -> Result<(), StorageError> {
        self.admit(WriteClass::Derived).await?;
        upsert_location(&self.pool, sample).await
    }

    pub async fn get_location(&self, id: &str) -> Result<Option<LocationSample>, StorageError> {
        get_location(&self.pool, id).await
    }

    pub async fn all_locations(&self) -> Result<Vec<LocationSample>, StorageError> {
        list_locations(&self.pool).await
    }

    pub async fn locations_by_synced(
        &self,
        synced: bool,
        limit: usize,
    ) -> Result<Vec<LocationSample>, StorageError> {
        list_locations_by_synced(&self.pool, synced, limit).await
    }

    pub async fn mark_locations_synced(&self, ids: &[String]) -> Result<u64, StorageError> {
        mark_locations_synced(&self.pool, ids).await
    }

    /// Settle a batch the server refused: record it in the conflict log and
    /// mark its samples synced, in one transaction.
    ///
    /// Returns the number of samples settled.
    pub async fn reject_locations(
        &self,
        record: &ConflictRecord,
        ids: &[String],
    ) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;

        insert_conflict(&mut *tx, record).await?;
        let settled = mark_synced_in(&mut *tx, ids).await?;

        tx.commit().await?;
        Ok(settled)
    }

    pub async fn delete_location(&self, id: &str) -> Result<bool, StorageError> {
        delete_location(&self.pool, id).await
    }

    // --- photos -------------------------------------------------------------

    /// Evidence for a committed action; always accepted.
    pub async fn put_photo(&self, photo: &CapturedPhoto) -> Result<(), StorageError> {
        self.admit(WriteClass::UserCommitted).await?;
        upsert_photo(&self.pool, photo).await
    }

    pub async fn get_photo(&self, id: &str) -> Result<Option<CapturedPhoto>, StorageError> {
        get_photo(&self.pool, id).await
    }

    pub async fn all_photos(&self) -> Result<Vec<PhotoStatus>, StorageError> {
        list_photos(&self.pool).await
    }

    /// Photo metadata by index; blobs stay on disk.
    pub async fn photos_by(&self, index: &PhotoIndex) -> Result<Vec<PhotoStatus>, StorageError> {
        list_photos_by(&self.pool, index).await
    }

    pub async fn mark_photo_uploaded(
        &self,
        id: &str,
        remote_ref: &str,
    ) -> Result<bool, StorageError> {
        mark_photo_uploaded(&self.pool, id, remote_ref).await
    }

    pub async fn mark_photo_rejected(
        &self,
        id: &str,
        rejection: &str,
        at: Timestamp,
    ) -> Result<bool, StorageError> {
        mark_photo_rejected(&self.pool, id, rejection, at).await
    }

    /// Deletes only photos that were uploaded or refused.
    pub async fn delete_photo(&self, id: &str) -> Result<bool, StorageError> {
        delete_settled_photo(&self.pool, id).await
    }

    // --- cache --------------------------------------------------------------

    pub async fn put_cache(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        self.admit(WriteClass::Derived).await?;
        upsert_cache(&self.pool, entry).await
    }

    /// A fresh cache value; an expired entry is deleted and reported missing.
    pub async fn get_cache(
        &self,
        key: &str,
        now: Timestamp,
    ) -> Result<Option<CacheEntry>, StorageError> {
        match get_cache(&self.pool, key).await? {
            Some(entry) if entry.is_expired(now) => {
                delete_cache(&self.pool, key).await?;
                tracing::debug!(key = %key, "Evicted expired cache entry");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub async fn all_cache(&self) -> Result<Vec<CacheEntry>, StorageError> {
        list_cache(&self.pool).await
    }

    pub async fn delete_cache(&self, key: &str) -> Result<bool, StorageError> {
        delete_cache(&self.pool, key).await
    }

    // --- conflicts ----------------------------------------------------------

    pub async fn put_conflict(&self, record: &ConflictRecord) -> Result<bool, StorageError> {
        self.admit(WriteClass::UserCommitted).await?;
        insert_conflict(&self.pool, record).await
    }

    pub async fn get_conflict(
        &self,
        operation_id: &str,
    ) -> Result<Option<ConflictRecord>, StorageError> {
        get_conflict(&self.pool, operation_id).await
    }

    pub async fn all_conflicts(&self) -> Result<Vec<ConflictRecord>, StorageError> {
        list_conflicts(&self.pool).await
    }

    pub async fn conflicts_by_type(
        &self,
        kind: OperationType,
    ) -> Result<Vec<ConflictRecord>, StorageError> {
        list_conflicts_by_type(&self.pool, kind).await
    }

    pub async fn delete_conflict(&self, operation_id: &str) -> Result<bool, StorageError> {
        delete_conflict(&self.pool, operation_id).await
    }

    // --- retention ----------------------------------------------------------

    /// Purge expired cache entries, synced samples captured before
    /// `location_cutoff` and settled photos left behind by finished
    /// operations.
    pub async fn sweep(
        &self,
        now: Timestamp,
        location_cutoff: Timestamp,
    ) -> Result<SweepReport, StorageError> {
        Ok(SweepReport {
            cache_entries: purge_expired_cache(&self.pool, now).await?,
            locations: purge_synced_locations(&self.pool, location_cutoff).await?,
            photos: purge_orphaned_photos(&self.pool).await?,
        })
    }
}

/// Rows removed by a retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub cache_entries: u64,
    pub locations: u64,
    pub photos: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_engine::SamplePayload;
    use serde_json::json;

    const LIMIT: u64 = 64 * 1024 * 1024;

    async fn store() -> LocalStore {
        LocalStore::in_memory(LIMIT).await.unwrap()
    }

    fn completion(id: &str, stop: &str, at: u64) -> PendingOperation {
        PendingOperation::new(
            id,
            OperationType::DeliveryCompletion,
            json!({"stopId": stop, "completedAt": at}),
            at,
        )
    }

    #[tokio::test]
    async fn operation_round_trip_keeps_retry_state() {
        let store = store().await;
        let mut op = completion("op-1", "S1", 100);
        op.retry_count = 2;
        op.last_attempt_at = Some(150);
        op.last_error = Some("timeout".into());

        store.put_operation(&op).await.unwrap();
        let loaded = store.get_operation("op-1").await.unwrap().unwrap();
        assert_eq!(loaded, op);
    }

    #[tokio::test]
    async fn all_operations_are_in_replay_order() {
        let store = store().await;
        let order = PendingOperation::new(
            "op-order",
            OperationType::OrderUpdate,
            json!({"orderId": "O1", "capturedAt": 1, "changes": {}}),
            1,
        );
        store.put_operation(&order).await.unwrap();
        store.put_operation(&completion("op-late", "S2", 30)).await.unwrap();
        store.put_operation(&completion("op-early", "S1", 20)).await.unwrap();

        let ids: Vec<_> = store
            .all_operations()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec!["op-early", "op-late", "op-order"]);
    }

    #[tokio::test]
    async fn operations_by_index() {
        let store = store().await;
        store.put_operation(&completion("op-1", "S1", 1)).await.unwrap();
        store.put_operation(&completion("op-2", "S1", 2)).await.unwrap();
        store.put_operation(&completion("op-3", "S2", 3)).await.unwrap();

        let by_entity = store
            .operations_by(&OperationIndex::Entity("stop:S1".into()))
            .await
            .unwrap();
        assert_eq!(by_entity.len(), 2);

        let low = store
            .operations_by(&OperationIndex::Priority(Priority::Low))
            .await
            .unwrap();
        assert!(low.is_empty());

        let depth = store.queue_depth().await.unwrap();
        assert_eq!(depth, vec![(Priority::High, 3)]);
    }

    #[tokio::test]
    async fn eviction_happens_once() {
        let store = store().await;
        let op = completion("op-1", "S1", 1);
        store.put_operation(&op).await.unwrap();

        let record = ConflictRecord::from_operation(&op, None, "boom", 5);
        assert!(store.evict_operation(&record).await.unwrap());
        assert!(!store.evict_operation(&record).await.unwrap());

        assert!(store.get_operation("op-1").await.unwrap().is_none());
        let conflicts = store.all_conflicts().await.unwrap();
        assert_eq!(conflicts, vec![record]);
    }

    #[tokio::test]
    async fn completing_removes_only_uploaded_photos() {
        let store = store().await;
        store.put_operation(&completion("op-1", "S1", 1)).await.unwrap();
        store
            .put_photo(&CapturedPhoto::new("ph-1", "op-1", vec![1; 16], "image/jpeg", 1))
            .await
            .unwrap();
        store
            .put_photo(&CapturedPhoto::new("ph-2", "op-1", vec![2; 16], "image/jpeg", 2))
            .await
            .unwrap();
        assert!(store.mark_photo_uploaded("ph-1", "remote/ph-1").await.unwrap());

        assert!(store.complete_operation("op-1").await.unwrap());
        assert!(store.get_photo("ph-1").await.unwrap().is_none());
        assert!(store.get_photo("ph-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn photo_upload_is_one_way_and_drops_blob() {
        let store = store().await;
        let photo = CapturedPhoto::new("ph-1", "op-1", vec![7; 32], "image/png", 10);
        store.put_photo(&photo).await.unwrap();

        assert!(!store.delete_photo("ph-1").await.unwrap());
        assert!(store.mark_photo_uploaded("ph-1", "r1").await.unwrap());
        assert!(!store.mark_photo_uploaded("ph-1", "r2").await.unwrap());

        // a late re-put must not resurrect the blob or unsync the row
        store.put_photo(&photo).await.unwrap();
        let stored = store.get_photo("ph-1").await.unwrap().unwrap();
        assert!(stored.synced);
        assert!(stored.blob.is_empty());
        assert_eq!(stored.remote_ref.as_deref(), Some("r1"));
        assert_eq!(stored.size_bytes, 32);

        let unsynced = store.photos_by(&PhotoIndex::Synced(false)).await.unwrap();
        assert!(unsynced.is_empty());
        assert!(store.delete_photo("ph-1").await.unwrap());
    }

    #[tokio::test]
    async fn cache_is_evicted_on_read_after_ttl() {
        let store = store().await;
        store
            .put_cache(&CacheEntry::new("route:R1", json!({"stops": 3}), 1_000, 500))
            .await
            .unwrap();

        let fresh = store.get_cache("route:R1", 1_500).await.unwrap();
        assert_eq!(fresh.map(|e| e.value), Some(json!({"stops": 3})));

        assert!(store.get_cache("route:R1", 1_501).await.unwrap().is_none());
        assert!(store.all_cache().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn location_batches_are_marked_together() {
        let store = store().await;
        for i in 0..5u64 {
            store
                .put_location(&LocationSample::new(format!("loc-{i}"), 1.0, 2.0, 3.0, 100 - i))
                .await
                .unwrap();
        }

        let batch = store.locations_by_synced(false, 3).await.unwrap();
        let ids: Vec<_> = batch.iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["loc-4", "loc-3", "loc-2"]);

        assert_eq!(store.mark_locations_synced(&ids).await.unwrap(), 3);
        assert_eq!(store.locations_by_synced(false, 10).await.unwrap().len(), 2);
        assert_eq!(store.locations_by_synced(true, 10).await.unwrap().len(), 3);

        // synced only ever moves forward
        store
            .put_location(&LocationSample::new("loc-4", 1.0, 2.0, 3.0, 96))
            .await
            .unwrap();
        assert!(store.get_location("loc-4").await.unwrap().unwrap().synced);
    }

    #[tokio::test]
    async fn refused_location_batch_is_logged_and_settled() {
        let store = store().await;
        let sample = LocationSample::new("loc-1", 1.0, 2.0, 3.0, 10);
        store.put_location(&sample).await.unwrap();

        let samples = vec![SamplePayload::from(&sample)];
        let record =
            ConflictRecord::from_location_batch("locations:loc-1:loc-1:1", &samples, None, "422", 20);
        let ids = vec!["loc-1".to_string()];

        assert_eq!(store.reject_locations(&record, &ids).await.unwrap(), 1);
        assert!(store.locations_by_synced(false, 10).await.unwrap().is_empty());
        assert_eq!(store.all_conflicts().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn rejected_photo_is_kept_while_its_conflict_is() {
        let store = store().await;
        let op = completion("op-1", "S1", 1);
        store.put_operation(&op).await.unwrap();
        store
            .put_photo(&CapturedPhoto::new("ph-1", "op-1", vec![9; 8], "image/heic", 1))
            .await
            .unwrap();

        assert!(store.mark_photo_rejected("ph-1", "415", 5).await.unwrap());
        assert!(!store.mark_photo_rejected("ph-1", "415", 6).await.unwrap());

        let listed = store.photos_by(&PhotoIndex::Operation("op-1".into())).await.unwrap();
        assert_eq!(listed[0].rejection.as_deref(), Some("415"));
        assert!(!listed[0].synced);

        let record = ConflictRecord::from_operation(&op, None, "photo refused", 7);
        assert!(store.evict_operation(&record).await.unwrap());
        assert_eq!(store.sweep(10, 0).await.unwrap().photos, 0);
        assert_eq!(store.get_photo("ph-1").await.unwrap().unwrap().blob, vec![9; 8]);

        assert!(store.delete_conflict("op-1").await.unwrap());
        assert_eq!(store.sweep(10, 0).await.unwrap().photos, 1);
    }

    #[tokio::test]
    async fn sweep_purges_expired_cache_and_old_synced_samples() {
        let store = store().await;
        store
            .put_cache(&CacheEntry::new("old", json!(1), 0, 10))
            .await
            .unwrap();
        store
            .put_cache(&CacheEntry::new("new", json!(2), 990, 100))
            .await
            .unwrap();
        store
            .put_location(&LocationSample::new("a", 0.0, 0.0, 1.0, 10))
            .await
            .unwrap();
        store
            .put_location(&LocationSample::new("b", 0.0, 0.0, 1.0, 20))
            .await
            .unwrap();
        store.mark_locations_synced(&["a".to_string()]).await.unwrap();

        let report = store.sweep(1_000, 500).await.unwrap();
        assert_eq!(report.cache_entries, 1);
        assert_eq!(report.locations, 1);
        assert!(store.get_location("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn critical_quota_rejects_derived_writes_only() {
        // any real database is far beyond a 1 byte limit
        let store = LocalStore::in_memory(1).await.unwrap();
        assert!(store.estimate_usage().await.unwrap().used > 1);

        let cache = store
            .put_cache(&CacheEntry::new("k", json!(1), 0, 10))
            .await;
        assert!(matches!(cache, Err(StorageError::QuotaExceeded { .. })));

        let sample = store
            .put_location(&LocationSample::new("loc", 0.0, 0.0, 1.0, 0))
            .await;
        assert!(matches!(sample, Err(StorageError::QuotaExceeded { .. })));

        store.put_operation(&completion("op-1", "S1", 1)).await.unwrap();
        store
            .put_conflict(&ConflictRecord::from_operation(
                &completion("op-2", "S2", 2),
                None,
                "x",
                3,
            ))
            .await
            .unwrap();
    }
}
