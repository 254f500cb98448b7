//! Queue task repository.
//!
//! Instants are passed in by the caller so the queue decides what "now" is.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{TaskDbModel, TaskState};

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert_task(&self, task: &TaskDbModel) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<Option<TaskDbModel>>;

    /// Make a delayed task eligible at `now_ms`. False if it is no longer pending.
    async fn promote_task(&self, id: &str, now_ms: i64) -> Result<bool>;

    /// Atomically lock the oldest eligible task.
    ///
    /// Eligible means waiting or delayed with `available_at <= now_ms`, or
    /// active with a lock that expired before `now_ms`.
    async fn claim_next(
        &self,
        now_ms: i64,
        lock_token: &str,
        locked_until: i64,
    ) -> Result<Option<TaskDbModel>>;

    /// Push the lock deadline out. False if the lock is no longer held.
    async fn extend_lock(&self, id: &str, lock_token: &str, locked_until: i64) -> Result<bool>;

    /// Release the lock into a finished state and scrub the payload.
    async fn finish_task(
        &self,
        id: &str,
        lock_token: &str,
        state: TaskState,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<bool>;

    /// Delete a task nobody holds a live lock on.
    async fn discard_task(&self, id: &str, now_ms: i64) -> Result<bool>;
}

/// SQLx implementation of TaskRepository.
pub struct SqlxTaskRepository {
    pool: SqlitePool,
}

impl SqlxTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn insert_task(&self, task: &TaskDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relay_tasks (
                id, payload, state, available_at, lock_token, locked_until,
                attempts, last_error, created_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.id)
        .bind(&task.payload)
        .bind(task.state)
        .bind(task.available_at)
        .bind(&task.lock_token)
        .bind(task.locked_until)
        .bind(task.attempts)
        .bind(&task.last_error)
        .bind(task.created_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskDbModel>> {
        let task = sqlx::query_as::<_, TaskDbModel>("SELECT * FROM relay_tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn promote_task(&self, id: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE relay_tasks SET state = 'waiting', available_at = MIN(available_at, ?)
            WHERE id = ? AND state IN ('delayed', 'waiting')
            "#,
        )
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_next(
        &self,
        now_ms: i64,
        lock_token: &str,
        locked_until: i64,
    ) -> Result<Option<TaskDbModel>> {
        let task = sqlx::query_as::<_, TaskDbModel>(
            r#"
            UPDATE relay_tasks
            SET state = 'active', lock_token = ?, locked_until = ?, attempts = attempts + 1
            WHERE id = (
                SELECT id FROM relay_tasks
                WHERE (state IN ('waiting', 'delayed') AND available_at <= ?)
                   OR (state = 'active' AND locked_until < ?)
                ORDER BY available_at, created_at
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(lock_token)
        .bind(locked_until)
        .bind(now_ms)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?;
        Ok(task)
    }

    async fn extend_lock(&self, id: &str, lock_token: &str, locked_until: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE relay_tasks SET locked_until = ?
            WHERE id = ? AND lock_token = ? AND state = 'active'
            "#,
        )
        .bind(locked_until)
        .bind(id)
        .bind(lock_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish_task(
        &self,
        id: &str,
        lock_token: &str,
        state: TaskState,
        error: Option<&str>,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE relay_tasks
            SET state = ?, payload = 'null', lock_token = NULL, locked_until = NULL,
                last_error = ?, finished_at = ?
            WHERE id = ? AND lock_token = ? AND state = 'active'
            "#,
        )
        .bind(state)
        .bind(error)
        .bind(now_ms)
        .bind(id)
        .bind(lock_token)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn discard_task(&self, id: &str, now_ms: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM relay_tasks
            WHERE id = ? AND (state != 'active' OR locked_until < ?)
            "#,
        )
        .bind(id)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
