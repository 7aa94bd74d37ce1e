//! Database operations for the captured_photos table.

use fieldsync_engine::{CapturedPhoto, Timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::{from_ts, to_ts, Pool};
use crate::error::StorageError;

/// Secondary indexes over stored photos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoIndex {
    Operation(String),
    Synced(bool),
}

#[derive(Debug)]
pub struct StoredPhoto {
    pub id: String,
    pub operation_id: String,
    pub blob: Option<Vec<u8>>,
    pub mime_type: String,
    pub size_bytes: i64,
    pub captured_at: i64,
    pub synced: bool,
    pub remote_ref: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredPhoto {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredPhoto {
            id: row.try_get("id")?,
            operation_id: row.try_get("operation_id")?,
            blob: row.try_get("blob")?,
            mime_type: row.try_get("mime_type")?,
            size_bytes: row.try_get("size_bytes")?,
            captured_at: row.try_get("captured_at")?,
            synced: row.try_get("synced")?,
            remote_ref: row.try_get("remote_ref")?,
        })
    }
}

impl From<StoredPhoto> for CapturedPhoto {
    fn from(row: StoredPhoto) -> Self {
        CapturedPhoto {
            id: row.id,
            operation_id: row.operation_id,
            blob: row.blob.unwrap_or_default(),
            mime_type: row.mime_type,
            size_bytes: row.size_bytes.max(0) as u64,
            captured_at: from_ts(row.captured_at),
            synced: row.synced,
            remote_ref: row.remote_ref,
        }
    }
}

/// A photo row without its blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoStatus {
    pub id: String,
    pub operation_id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub captured_at: Timestamp,
    pub synced: bool,
    pub remote_ref: Option<String>,
    /// Why the server refused the upload, once it has
    pub rejection: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for PhotoStatus {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(PhotoStatus {
            id: row.try_get("id")?,
            operation_id: row.try_get("operation_id")?,
            mime_type: row.try_get("mime_type")?,
            size_bytes: from_ts(row.try_get("size_bytes")?),
            captured_at: from_ts(row.try_get("captured_at")?),
            synced: row.try_get("synced")?,
            remote_ref: row.try_get("remote_ref")?,
            rejection: row.try_get("rejection")?,
        })
    }
}

const SELECT_STATUS: &str = r#"
    SELECT id, operation_id, mime_type, size_bytes, captured_at, synced, remote_ref, rejection
    FROM captured_photos
"#;

/// Insert a photo. An already uploaded row keeps its reference and stays blob-free.
pub async fn upsert_photo(pool: &Pool, photo: &CapturedPhoto) -> Result<(), StorageError> {
    let blob = (!photo.synced).then_some(photo.blob.as_slice());

    sqlx::query(
        r#"
        INSERT INTO captured_photos (
            id, operation_id, blob, mime_type, size_bytes, captured_at, synced, remote_ref
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO UPDATE SET
            operation_id = excluded.operation_id,
            mime_type = excluded.mime_type,
            size_bytes = excluded.size_bytes,
            captured_at = excluded.captured_at,
            blob = CASE WHEN captured_photos.synced = 1 THEN NULL ELSE excluded.blob END,
            remote_ref = COALESCE(captured_photos.remote_ref, excluded.remote_ref),
            synced = MAX(captured_photos.synced, excluded.synced)
        "#,
    )
    .bind(&photo.id)
    .bind(&photo.operation_id)
    .bind(blob)
    .bind(&photo.mime_type)
    .bind(to_ts(photo.size_bytes))
    .bind(to_ts(photo.captured_at))
    .bind(photo.synced)
    .bind(photo.remote_ref.as_deref())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one photo with its blob.
pub async fn get_photo(pool: &Pool, id: &str) -> Result<Option<CapturedPhoto>, StorageError> {
    let row: Option<StoredPhoto> = sqlx::query_as(
        r#"
        SELECT id, operation_id, blob, mime_type, size_bytes, captured_at, synced, remote_ref
        FROM captured_photos
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(CapturedPhoto::from))
}

pub async fn list_photos(pool: &Pool) -> Result<Vec<PhotoStatus>, StorageError> {
    let sql = format!("{SELECT_STATUS} ORDER BY captured_at ASC, id ASC");
    let rows: Vec<PhotoStatus> = sqlx::query_as(&sql).fetch_all(pool).await?;

    Ok(rows)
}

pub async fn list_photos_by(
    pool: &Pool,
    index: &PhotoIndex,
) -> Result<Vec<PhotoStatus>, StorageError> {
    let rows: Vec<PhotoStatus> = match index {
        PhotoIndex::Operation(operation_id) => {
            let sql =
                format!("{SELECT_STATUS} WHERE operation_id = $1 ORDER BY captured_at ASC, id ASC");
            sqlx::query_as(&sql)
                .bind(operation_id)
                .fetch_all(pool)
                .await?
        }
        PhotoIndex::Synced(synced) => {
            let sql =
                format!("{SELECT_STATUS} WHERE synced = $1 ORDER BY captured_at ASC, id ASC");
            sqlx::query_as(&sql).bind(*synced).fetch_all(pool).await?
        }
    };

    Ok(rows)
}

/// Record an upload: set the reference, flip `synced` and drop the blob.
///
/// Returns false when the photo is unknown or was already uploaded.
pub async fn mark_photo_uploaded(
    pool: &Pool,
    id: &str,
    remote_ref: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE captured_photos
        SET synced = 1, remote_ref = $2, blob = NULL
        WHERE id = $1 AND synced = 0
        "#,
    )
    .bind(id)
    .bind(remote_ref)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record that the server refused an upload for good. The blob stays.
///
/// Returns false when the photo is unknown, uploaded or already rejected.
pub async fn mark_photo_rejected(
    pool: &Pool,
    id: &str,
    rejection: &str,
    at: Timestamp,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        r#"
        UPDATE captured_photos
        SET rejected_at = $2, rejection = $3
        WHERE id = $1 AND synced = 0 AND rejected_at IS NULL
        "#,
    )
    .bind(id)
    .bind(to_ts(at))
    .bind(rejection)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete a photo. Only rows the server has settled (uploaded or
/// rejected) can go.
pub async fn delete_settled_photo(pool: &Pool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "DELETE FROM captured_photos WHERE id = $1 AND (synced = 1 OR rejected_at IS NOT NULL)",
    )
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete the uploaded photos of an operation. Unsynced rows are kept.
pub async fn delete_synced_photos_for<'e, E>(
    executor: E,
    operation_id: &str,
) -> Result<u64, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM captured_photos WHERE operation_id = $1 AND synced = 1")
        .bind(operation_id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Delete settled photos whose parent operation left both the queue and
/// the conflict log.
pub async fn purge_orphaned_photos(pool: &Pool) -> Result<u64, StorageError> {
    let result = sqlx::query(
        r#"
        DELETE FROM captured_photos
        WHERE (synced = 1 OR rejected_at IS NOT NULL)
          AND operation_id NOT IN (SELECT id FROM pending_operations)
          AND operation_id NOT IN (SELECT operation_id FROM conflict_records)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
