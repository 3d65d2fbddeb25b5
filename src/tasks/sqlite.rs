//! SQLite-backed task store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{AttemptOutcome, TaskRecord, TaskStatus, TaskStore};
use crate::error::StoreError;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id              TEXT    NOT NULL PRIMARY KEY,
    project_id      TEXT    NOT NULL,
    status          TEXT    NOT NULL DEFAULT 'TODO',
    attempt_count   INTEGER NOT NULL DEFAULT 0,
    updated_at      TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
"#;

#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    /// Opens (creating if needed) the database at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self::with_pool(pool).await?;
        tracing::info!(path = path, "Task store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        // Each in-memory connection is its own database; keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Inserts or replaces a task.
    pub async fn insert(&self, task: &TaskRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tasks (id, project_id, status, attempt_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                project_id = excluded.project_id,
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                updated_at = excluded.updated_at",
        )
        .bind(task.id.to_string())
        .bind(&task.project_id)
        .bind(task.status.as_str())
        .bind(i64::from(task.attempt_count))
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(TaskRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| StoreError::InvalidValue(format!("task id '{}': {}", id, e)))?,
        project_id: row.try_get("project_id")?,
        status: status.parse()?,
        attempt_count: attempt_count(row)?,
        updated_at,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn get_task(&self, id: Uuid) -> Result<TaskRecord, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;

        record_from_row(&row)
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE tasks SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id.to_string())
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn increment_attempt_below(
        &self,
        id: Uuid,
        ceiling: u32,
    ) -> Result<AttemptOutcome, StoreError> {
        let updated = sqlx::query(
            "UPDATE tasks SET attempt_count = attempt_count + 1, updated_at = ?3
             WHERE id = ?1 AND attempt_count < ?2
             RETURNING attempt_count",
        )
        .bind(id.to_string())
        .bind(i64::from(ceiling))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(AttemptOutcome::Recorded(attempt_count(&row)?));
        }

        let row = sqlx::query("SELECT attempt_count FROM tasks WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(id.to_string()))?;
        Ok(AttemptOutcome::Exhausted(attempt_count(&row)?))
    }
}

fn attempt_count(row: &SqliteRow) -> Result<u32, StoreError> {
    let attempts: i64 = row.try_get("attempt_count")?;
    u32::try_from(attempts).map_err(|_| StoreError::InvalidValue(format!("attempt_count {}", attempts)))
}
