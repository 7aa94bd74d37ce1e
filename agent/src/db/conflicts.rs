//! Database operations for the conflict_records table.

use fieldsync_engine::{ConflictRecord, OperationType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::{from_ts, to_ts, Pool};
use crate::error::StorageError;

#[derive(Debug)]
pub struct StoredConflict {
    pub operation_id: String,
    pub op_type: String,
    pub local_payload: String,
    pub remote_snapshot: Option<String>,
    pub detected_at: i64,
    pub error: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredConflict {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredConflict {
            operation_id: row.try_get("operation_id")?,
            op_type: row.try_get("op_type")?,
            local_payload: row.try_get("local_payload")?,
            remote_snapshot: row.try_get("remote_snapshot")?,
            detected_at: row.try_get("detected_at")?,
            error: row.try_get("error")?,
        })
    }
}

impl StoredConflict {
    pub fn to_record(&self) -> Result<ConflictRecord, StorageError> {
        let remote_snapshot = self
            .remote_snapshot
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(ConflictRecord {
            operation_id: self.operation_id.clone(),
            kind: self.op_type.parse()?,
            local_payload: serde_json::from_str(&self.local_payload)?,
            remote_snapshot,
            detected_at: from_ts(self.detected_at),
            error: self.error.clone(),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT operation_id, op_type, local_payload, remote_snapshot, detected_at, error
    FROM conflict_records
"#;

/// Write a conflict record. Records are immutable: a second write for the
/// same operation is ignored.
pub async fn insert_conflict<'e, E>(executor: E, record: &ConflictRecord) -> Result<bool, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let local_payload = serde_json::to_string(&record.local_payload)?;
    let remote_snapshot = record
        .remote_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        INSERT INTO conflict_records (
            operation_id, op_type, local_payload, remote_snapshot, detected_at, error
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (operation_id) DO NOTHING
        "#,
    )
    .bind(&record.operation_id)
    .bind(record.kind.as_str())
    .bind(local_payload)
    .bind(remote_snapshot)
    .bind(to_ts(record.detected_at))
    .bind(&record.error)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_conflict(
    pool: &Pool,
    operation_id: &str,
) -> Result<Option<ConflictRecord>, StorageError> {
    let sql = format!("{SELECT_COLUMNS} WHERE operation_id = $1");
    let row: Option<StoredConflict> = sqlx::query_as(&sql)
        .bind(operation_id)
        .fetch_optional(pool)
        .await?;

    row.map(|r| r.to_record()).transpose()
}

/// All conflicts, oldest first.
pub async fn list_conflicts(pool: &Pool) -> Result<Vec<ConflictRecord>, StorageError> {
    let sql = format!("{SELECT_COLUMNS} ORDER BY detected_at ASC, operation_id ASC");
    let rows: Vec<StoredConflict> = sqlx::query_as(&sql).fetch_all(pool).await?;

    rows.iter().map(StoredConflict::to_record).collect()
}

pub async fn list_conflicts_by_type(
    pool: &Pool,
    kind: OperationType,
) -> Result<Vec<ConflictRecord>, StorageError> {
    let sql = format!("{SELECT_COLUMNS} WHERE op_type = $1 ORDER BY detected_at ASC, operation_id ASC");
    let rows: Vec<StoredConflict> = sqlx::query_as(&sql)
        .bind(kind.as_str())
        .fetch_all(pool)
        .await?;

    rows.iter().map(StoredConflict::to_record).collect()
}

/// Remove a record once it has been reviewed.
pub async fn delete_conflict(pool: &Pool, operation_id: &str) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM conflict_records WHERE operation_id = $1")
        .bind(operation_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
