//! Database operations for the cache_entries table.

use fieldsync_engine::{CacheEntry, Timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{from_ts, to_ts, Pool};
use crate::error::StorageError;

#[derive(Debug)]
pub struct StoredCacheEntry {
    pub key: String,
    pub value: String,
    pub cached_at: i64,
    pub ttl: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredCacheEntry {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredCacheEntry {
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            cached_at: row.try_get("cached_at")?,
            ttl: row.try_get("ttl")?,
        })
    }
}

impl StoredCacheEntry {
    pub fn to_entry(&self) -> Result<CacheEntry, StorageError> {
        Ok(CacheEntry::new(
            self.key.clone(),
            serde_json::from_str(&self.value)?,
            from_ts(self.cached_at),
            from_ts(self.ttl),
        ))
    }
}

pub async fn upsert_cache(pool: &Pool, entry: &CacheEntry) -> Result<(), StorageError> {
    let value = serde_json::to_string(&entry.value)?;

    sqlx::query(
        r#"
        INSERT INTO cache_entries (key, value, cached_at, ttl)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (key) DO UPDATE SET
            value = excluded.value,
            cached_at = excluded.cached_at,
            ttl = excluded.ttl
        "#,
    )
    .bind(&entry.key)
    .bind(value)
    .bind(to_ts(entry.cached_at))
    .bind(to_ts(entry.ttl))
    .execute(pool)
    .await?;

    Ok(())
}

/// Raw lookup; expiry is decided by the caller.
pub async fn get_cache(pool: &Pool, key: &str) -> Result<Option<CacheEntry>, StorageError> {
    let row: Option<StoredCacheEntry> =
        sqlx::query_as("SELECT key, value, cached_at, ttl FROM cache_entries WHERE key = $1")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    row.map(|r| r.to_entry()).transpose()
}

pub async fn list_cache(pool: &Pool) -> Result<Vec<CacheEntry>, StorageError> {
    let rows: Vec<StoredCacheEntry> =
        sqlx::query_as("SELECT key, value, cached_at, ttl FROM cache_entries ORDER BY key")
            .fetch_all(pool)
            .await?;

    rows.iter().map(StoredCacheEntry::to_entry).collect()
}

pub async fn delete_cache(pool: &Pool, key: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE key = $1")
        .bind(key)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete every entry with `now - cached_at > ttl`.
pub async fn purge_expired_cache(pool: &Pool, now: Timestamp) -> Result<u64, StorageError> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE $1 - cached_at > ttl")
        .bind(to_ts(now))
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
