//! Relay job repository.
//!
//! Every status write is a single conditional `UPDATE ... WHERE status IN (...)`
//! whose allowed sources come from [`RelayStatus::sources_of`]. Concurrent
//! writers therefore cannot move a record along an edge the state machine
//! does not have; the loser sees zero affected rows.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::RelayJobDbModel;
use crate::database::time::now_ms;
use crate::domain::RelayStatus;
use crate::{Error, Result};

/// Relay job repository trait.
#[async_trait]
pub trait RelayJobRepository: Send + Sync {
    async fn create_job(&self, job: &RelayJobDbModel) -> Result<()>;
    async fn find_job(&self, id: &str) -> Result<Option<RelayJobDbModel>>;
    async fn get_owned_job(&self, owner_id: &str, id: &str) -> Result<RelayJobDbModel>;
    /// Newest first.
    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<RelayJobDbModel>>;
    async fn count_jobs_in_status(&self, owner_id: &str, statuses: &[RelayStatus]) -> Result<u32>;

    /// Move a job to `to`. `pid` is written only when entering `streaming`.
    async fn transition(
        &self,
        id: &str,
        to: RelayStatus,
        pid: Option<u32>,
        message: Option<&str>,
    ) -> Result<RelayJobDbModel>;

    /// `scheduled -> pending`, clearing `scheduled_at`.
    async fn mark_promoted(&self, owner_id: &str, id: &str) -> Result<RelayJobDbModel>;

    /// Settle a streaming job after its process exited: `stopped` when a stop
    /// was requested, `completed` otherwise.
    async fn finalize_exit(&self, id: &str, exit_code: Option<i32>) -> Result<RelayJobDbModel>;

    /// Persist the stop intent of a running job.
    async fn request_stop(&self, owner_id: &str, id: &str) -> Result<RelayJobDbModel>;

    async fn rename_job(&self, owner_id: &str, id: &str, name: &str) -> Result<RelayJobDbModel>;

    /// Remove a job that is not running.
    async fn delete_idle_job(&self, owner_id: &str, id: &str) -> Result<()>;
}

/// SQLx implementation of RelayJobRepository.
pub struct SqlxRelayJobRepository {
    pool: SqlitePool,
}

impl SqlxRelayJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn explain_miss(&self, id: &str, to: RelayStatus) -> Error {
        match self.find_job(id).await {
            Ok(Some(job)) => Error::invalid_transition(job.status, to),
            Ok(None) => Error::not_found("RelayJob", id),
            Err(e) => e,
        }
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[async_trait]
impl RelayJobRepository for SqlxRelayJobRepository {
    async fn create_job(&self, job: &RelayJobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relay_jobs (
                id, owner_id, name, source_link, stream_key_partial, status, pid,
                scheduled_at, ends_at, stop_requested_at, exit_code, message,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner_id)
        .bind(&job.name)
        .bind(&job.source_link)
        .bind(&job.stream_key_partial)
        .bind(job.status.as_str())
        .bind(job.pid)
        .bind(job.scheduled_at)
        .bind(job.ends_at)
        .bind(job.stop_requested_at)
        .bind(job.exit_code)
        .bind(&job.message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_job(&self, id: &str) -> Result<Option<RelayJobDbModel>> {
        let job = sqlx::query_as::<_, RelayJobDbModel>("SELECT * FROM relay_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn get_owned_job(&self, owner_id: &str, id: &str) -> Result<RelayJobDbModel> {
        sqlx::query_as::<_, RelayJobDbModel>(
            "SELECT * FROM relay_jobs WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("RelayJob", id))
    }

    async fn list_jobs_for_owner(&self, owner_id: &str) -> Result<Vec<RelayJobDbModel>> {
        let jobs = sqlx::query_as::<_, RelayJobDbModel>(
            "SELECT * FROM relay_jobs WHERE owner_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn count_jobs_in_status(&self, owner_id: &str, statuses: &[RelayStatus]) -> Result<u32> {
        if statuses.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM relay_jobs WHERE owner_id = ? AND status IN ({})",
            placeholders(statuses.len())
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(owner_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn transition(
        &self,
        id: &str,
        to: RelayStatus,
        pid: Option<u32>,
        message: Option<&str>,
    ) -> Result<RelayJobDbModel> {
        let pid = if to.holds_pid() {
            match pid {
                Some(pid) => Some(i64::from(pid)),
                None => return Err(Error::validation("a streaming job requires a pid")),
            }
        } else {
            None
        };

        let sources = RelayStatus::sources_of(to);
        if sources.is_empty() {
            return Err(self.explain_miss(id, to).await);
        }

        let sql = format!(
            r#"
            UPDATE relay_jobs
            SET status = ?, pid = ?, message = COALESCE(?, message), updated_at = ?
            WHERE id = ? AND status IN ({})
            RETURNING *
            "#,
            placeholders(sources.len())
        );
        let mut query = sqlx::query_as::<_, RelayJobDbModel>(&sql)
            .bind(to.as_str())
            .bind(pid)
            .bind(message)
            .bind(now_ms())
            .bind(id);
        for source in &sources {
            query = query.bind(source.as_str());
        }

        match query.fetch_optional(&self.pool).await? {
            Some(job) => Ok(job),
            None => Err(self.explain_miss(id, to).await),
        }
    }

    async fn mark_promoted(&self, owner_id: &str, id: &str) -> Result<RelayJobDbModel> {
        let updated = sqlx::query_as::<_, RelayJobDbModel>(
            r#"
            UPDATE relay_jobs
            SET status = 'pending', scheduled_at = NULL, updated_at = ?
            WHERE id = ? AND owner_id = ? AND status = 'scheduled'
            RETURNING *
            "#,
        )
        .bind(now_ms())
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(job) => Ok(job),
            None => {
                let job = self.get_owned_job(owner_id, id).await?;
                Err(Error::invalid_transition(job.status, RelayStatus::Pending))
            }
        }
    }

    async fn finalize_exit(&self, id: &str, exit_code: Option<i32>) -> Result<RelayJobDbModel> {
        let updated = sqlx::query_as::<_, RelayJobDbModel>(
            r#"
            UPDATE relay_jobs
            SET status = CASE WHEN stop_requested_at IS NULL THEN 'completed' ELSE 'stopped' END,
                pid = NULL,
                exit_code = ?,
                updated_at = ?
            WHERE id = ? AND status = 'streaming'
            RETURNING *
            "#,
        )
        .bind(exit_code)
        .bind(now_ms())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(job) => Ok(job),
            None => Err(self.explain_miss(id, RelayStatus::Completed).await),
        }
    }

    async fn request_stop(&self, owner_id: &str, id: &str) -> Result<RelayJobDbModel> {
        let now = now_ms();
        sqlx::query_as::<_, RelayJobDbModel>(
            r#"
            UPDATE relay_jobs
            SET stop_requested_at = COALESCE(stop_requested_at, ?), updated_at = ?
            WHERE id = ? AND owner_id = ? AND status IN ('downloading', 'streaming')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("RelayJob", id))
    }

    async fn rename_job(&self, owner_id: &str, id: &str, name: &str) -> Result<RelayJobDbModel> {
        sqlx::query_as::<_, RelayJobDbModel>(
            r#"
            UPDATE relay_jobs SET name = ?, updated_at = ?
            WHERE id = ? AND owner_id = ?
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(now_ms())
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("RelayJob", id))
    }

    async fn delete_idle_job(&self, owner_id: &str, id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            DELETE FROM relay_jobs
            WHERE id = ? AND owner_id = ? AND status NOT IN ('downloading', 'streaming')
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        let job = self.get_owned_job(owner_id, id).await?;
        Err(Error::validation(format!(
            "cannot delete a relay job while it is {}",
            job.status
        )))
    }
}
