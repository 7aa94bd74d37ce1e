//! Database operations for the pending_operations table.

use fieldsync_engine::{OperationType, PendingOperation, Priority};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite};

use super::{from_ts, to_ts, Pool};
use crate::error::StorageError;

/// Secondary indexes over the replay queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationIndex {
    Priority(Priority),
    Entity(String),
    Type(OperationType),
}

/// A stored operation row from the database.
#[derive(Debug)]
pub struct StoredOperation {
    pub id: String,
    pub op_type: String,
    pub payload: String,
    pub created_at: i64,
    pub priority_rank: i64,
    pub retry_count: i64,
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredOperation {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(StoredOperation {
            id: row.try_get("id")?,
            op_type: row.try_get("op_type")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            priority_rank: row.try_get("priority_rank")?,
            retry_count: row.try_get("retry_count")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
            last_error: row.try_get("last_error")?,
        })
    }
}

impl StoredOperation {
    /// Convert a database row to an engine operation.
    pub fn to_operation(&self) -> Result<PendingOperation, StorageError> {
        let kind: OperationType = self.op_type.parse()?;
        let rank = u8::try_from(self.priority_rank)
            .map_err(|_| StorageError::Corrupt(format!("priority rank {}", self.priority_rank)))?;

        Ok(PendingOperation {
            id: self.id.clone(),
            kind,
            payload: serde_json::from_str(&self.payload)?,
            created_at: from_ts(self.created_at),
            priority: Priority::from_rank(rank)?,
            retry_count: u32::try_from(self.retry_count.max(0)).unwrap_or(u32::MAX),
            last_attempt_at: self.last_attempt_at.map(from_ts),
            last_error: self.last_error.clone(),
        })
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, op_type, payload, created_at, priority_rank,
           retry_count, last_attempt_at, last_error
    FROM pending_operations
"#;

const REPLAY_ORDER: &str = " ORDER BY priority_rank ASC, created_at ASC, id ASC";

/// Insert or replace an operation, including its retry state.
pub async fn upsert_operation<'e, E>(executor: E, op: &PendingOperation) -> Result<(), StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let payload = serde_json::to_string(&op.payload)?;

    sqlx::query(
        r#"
        INSERT INTO pending_operations (
            id, op_type, payload, created_at, priority_rank,
            entity_key, retry_count, last_attempt_at, last_error
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (id) DO UPDATE SET
            op_type = excluded.op_type,
            payload = excluded.payload,
            created_at = excluded.created_at,
            priority_rank = excluded.priority_rank,
            entity_key = excluded.entity_key,
            retry_count = excluded.retry_count,
            last_attempt_at = excluded.last_attempt_at,
            last_error = excluded.last_error
        "#,
    )
    .bind(&op.id)
    .bind(op.kind.as_str())
    .bind(payload)
    .bind(to_ts(op.created_at))
    .bind(i64::from(op.priority.rank()))
    .bind(op.entity_key())
    .bind(i64::from(op.retry_count))
    .bind(op.last_attempt_at.map(to_ts))
    .bind(op.last_error.as_deref())
    .execute(executor)
    .await?;

    Ok(())
}

/// Fetch a single operation.
pub async fn get_operation(pool: &Pool, id: &str) -> Result<Option<PendingOperation>, StorageError> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = $1");
    let row: Option<StoredOperation> = sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;

    row.map(|r| r.to_operation()).transpose()
}

/// All queued operations in replay order.
pub async fn list_operations(pool: &Pool) -> Result<Vec<PendingOperation>, StorageError> {
    let sql = format!("{SELECT_COLUMNS}{REPLAY_ORDER}");
    let rows: Vec<StoredOperation> = sqlx::query_as(&sql).fetch_all(pool).await?;

    rows.iter().map(StoredOperation::to_operation).collect()
}

/// Queued operations matching an index, in replay order.
pub async fn list_operations_by(
    pool: &Pool,
    index: &OperationIndex,
) -> Result<Vec<PendingOperation>, StorageError> {
    let rows: Vec<StoredOperation> = match index {
        OperationIndex::Priority(priority) => {
            let sql = format!("{SELECT_COLUMNS} WHERE priority_rank = $1{REPLAY_ORDER}");
            sqlx::query_as(&sql)
                .bind(i64::from(priority.rank()))
                .fetch_all(pool)
                .await?
        }
        OperationIndex::Entity(key) => {
            let sql = format!("{SELECT_COLUMNS} WHERE entity_key = $1{REPLAY_ORDER}");
            sqlx::query_as(&sql).bind(key).fetch_all(pool).await?
        }
        OperationIndex::Type(kind) => {
            let sql = format!("{SELECT_COLUMNS} WHERE op_type = $1{REPLAY_ORDER}");
            sqlx::query_as(&sql).bind(kind.as_str()).fetch_all(pool).await?
        }
    };

    rows.iter().map(StoredOperation::to_operation).collect()
}

/// Delete an operation. Returns whether a row was removed.
pub async fn delete_operation<'e, E>(executor: E, id: &str) -> Result<bool, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM pending_operations WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Queue depth per priority tier.
pub async fn count_by_priority(pool: &Pool) -> Result<Vec<(Priority, u64)>, StorageError> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
        SELECT priority_rank, COUNT(*)
        FROM pending_operations
        GROUP BY priority_rank
        ORDER BY priority_rank
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(rank, count)| {
            let rank = u8::try_from(rank)
                .map_err(|_| StorageError::Corrupt(format!("priority rank {rank}")))?;
            Ok((Priority::from_rank(rank)?, count.max(0) as u64))
        })
        .collect()
}
