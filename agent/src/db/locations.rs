//! Database operations for the location_samples table.

use fieldsync_engine::{LocationSample, Timestamp};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

use super::{from_ts, to_ts, Pool};
use crate::error::StorageError;

#[derive(Debug)]
pub struct StoredLocation {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: i64,
    pub synced: bool,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredLocation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredLocation {
            id: row.try_get("id")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            accuracy: row.try_get("accuracy")?,
            captured_at: row.try_get("captured_at")?,
            synced: row.try_get("synced")?,
        })
    }
}

impl From<StoredLocation> for LocationSample {
    fn from(row: StoredLocation) -> Self {
        LocationSample {
            id: row.id,
            latitude: row.latitude,
            longitude: row.longitude,
            accuracy: row.accuracy,
            captured_at: from_ts(row.captured_at),
            synced: row.synced,
        }
    }
}

/// Insert a sample. Re-inserting a known id never clears its synced flag.
pub async fn upsert_location(pool: &Pool, sample: &LocationSample) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO location_samples (id, latitude, longitude, accuracy, captured_at, synced)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO UPDATE SET
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            accuracy = excluded.accuracy,
            captured_at = excluded.captured_at,
            synced = MAX(location_samples.synced, excluded.synced)
        "#,
    )
    .bind(&sample.id)
    .bind(sample.latitude)
    .bind(sample.longitude)
    .bind(sample.accuracy)
    .bind(to_ts(sample.captured_at))
    .bind(sample.synced)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get_location(pool: &Pool, id: &str) -> Result<Option<LocationSample>, StorageError> {
    let row: Option<StoredLocation> = sqlx::query_as(
        "SELECT id, latitude, longitude, accuracy, captured_at, synced FROM location_samples WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(LocationSample::from))
}

pub async fn list_locations(pool: &Pool) -> Result<Vec<LocationSample>, StorageError> {
    let rows: Vec<StoredLocation> = sqlx::query_as(
        r#"
        SELECT id, latitude, longitude, accuracy, captured_at, synced
        FROM location_samples
        ORDER BY captured_at ASC, id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(LocationSample::from).collect())
}

/// Samples by synced flag, oldest first, at most `limit`.
pub async fn list_locations_by_synced(
    pool: &Pool,
    synced: bool,
    limit: usize,
) -> Result<Vec<LocationSample>, StorageError> {
    let rows: Vec<StoredLocation> = sqlx::query_as(
        r#"
        SELECT id, latitude, longitude, accuracy, captured_at, synced
        FROM location_samples
        WHERE synced = $1
        ORDER BY captured_at ASC, id ASC
        LIMIT $2
        "#,
    )
    .bind(synced)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(LocationSample::from).collect())
}

/// Mark a batch synced in one transaction.
pub async fn mark_locations_synced(pool: &Pool, ids: &[String]) -> Result<u64, StorageError> {
    let mut tx = pool.begin().await?;
    let updated = mark_synced_in(&mut *tx, ids).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Mark samples synced on an open connection or transaction.
pub async fn mark_synced_in(
    conn: &mut SqliteConnection,
    ids: &[String],
) -> Result<u64, StorageError> {
    let mut updated = 0;

    for id in ids {
        let result =
            sqlx::query("UPDATE location_samples SET synced = 1 WHERE id = $1 AND synced = 0")
                .bind(id)
                .execute(&mut *conn)
                .await?;
        updated += result.rows_affected();
    }

    Ok(updated)
}

pub async fn delete_location(pool: &Pool, id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM location_samples WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Drop synced samples captured before `cutoff`.
pub async fn purge_synced_locations(pool: &Pool, cutoff: Timestamp) -> Result<u64, StorageError> {
    let result = sqlx::query("DELETE FROM location_samples WHERE synced = 1 AND captured_at < $1")
        .bind(to_ts(cutoff))
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
