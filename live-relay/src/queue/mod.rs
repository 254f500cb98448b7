//! Database-backed delayed task queue.
//!
//! Delivery is at-least-once: a claimed task carries a lock that expires
//! after `lock_duration_secs`, and an expired lock makes the task claimable
//! again. Workers running long jobs renew the lock while they hold it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::database::models::{TaskDbModel, TaskState};
use crate::database::repositories::TaskRepository;
use crate::database::time::{ms_to_datetime, now_ms};
use crate::domain::RelayPayload;
use crate::{Error, Result};

/// Configuration for the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// How long a claim stays exclusive without renewal.
    pub lock_duration_secs: u64,
    /// Fallback poll interval for idle workers, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lock_duration_secs: 3600,
            poll_interval_ms: 1000,
        }
    }
}

/// A task locked by the caller.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: String,
    pub payload: RelayPayload,
    pub attempts: u32,
    pub lock_token: String,
}

/// Queue-side view of a task, without its payload.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub state: TaskState,
    pub available_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl From<TaskDbModel> for TaskInfo {
    fn from(task: TaskDbModel) -> Self {
        Self {
            id: task.id,
            state: task.state,
            available_at: ms_to_datetime(task.available_at),
            attempts: u32::try_from(task.attempts).unwrap_or(0),
            last_error: task.last_error,
        }
    }
}

/// Persistent delayed task queue.
pub struct TaskQueue {
    repository: Arc<dyn TaskRepository>,
    config: QueueConfig,
    /// Wakes idle workers when work becomes eligible.
    notify: Arc<Notify>,
}

impl TaskQueue {
    pub fn new(repository: Arc<dyn TaskRepository>, config: QueueConfig) -> Self {
        Self {
            repository,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_secs(self.config.lock_duration_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Store a task that becomes eligible after `delay`. Returns the task id.
    pub async fn enqueue(&self, payload: &RelayPayload, delay: Duration) -> Result<String> {
        let now = now_ms();
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let state = if delay_ms > 0 {
            TaskState::Delayed
        } else {
            TaskState::Waiting
        };
        let task = TaskDbModel {
            id: uuid::Uuid::new_v4().to_string(),
            payload: serde_json::to_string(payload)?,
            state,
            available_at: now.saturating_add(delay_ms),
            lock_token: None,
            locked_until: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            finished_at: None,
        };
        self.repository.insert_task(&task).await?;
        debug!(task_id = %task.id, delay_ms, "Task enqueued");

        if state == TaskState::Waiting {
            self.notify.notify_one();
        }
        Ok(task.id)
    }

    pub async fn lookup(&self, id: &str) -> Result<Option<TaskInfo>> {
        Ok(self.repository.get_task(id).await?.map(TaskInfo::from))
    }

    /// Make a delayed task eligible immediately.
    pub async fn promote(&self, id: &str) -> Result<()> {
        if self.repository.promote_task(id, now_ms()).await? {
            self.notify.notify_one();
            return Ok(());
        }
        match self.repository.get_task(id).await? {
            Some(task) => Err(Error::invalid_transition(task.state, TaskState::Waiting)),
            None => Err(Error::not_found("Task", id)),
        }
    }

    /// Lock the oldest eligible task, if any.
    ///
    /// A task whose payload cannot be decoded is failed on the spot and the
    /// decode error is returned.
    pub async fn claim(&self) -> Result<Option<ClaimedTask>> {
        let now = now_ms();
        let token = uuid::Uuid::new_v4().to_string();
        let locked_until = now.saturating_add(self.lock_duration_ms());

        let Some(task) = self.repository.claim_next(now, &token, locked_until).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<RelayPayload>(&task.payload) {
            Ok(payload) => Ok(Some(ClaimedTask {
                id: task.id,
                payload,
                attempts: u32::try_from(task.attempts).unwrap_or(u32::MAX),
                lock_token: token,
            })),
            Err(e) => {
                warn!(task_id = %task.id, "Discarding task with unreadable payload: {}", e);
                self.repository
                    .finish_task(&task.id, &token, TaskState::Failed, Some(&e.to_string()), now)
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Renew the claim. `false` means the lock was lost to another worker.
    pub async fn extend_lock(&self, task: &ClaimedTask) -> Result<bool> {
        let locked_until = now_ms().saturating_add(self.lock_duration_ms());
        self.repository
            .extend_lock(&task.id, &task.lock_token, locked_until)
            .await
    }

    pub async fn complete(&self, task: &ClaimedTask) -> Result<()> {
        self.finish(task, TaskState::Completed, None).await
    }

    pub async fn fail(&self, task: &ClaimedTask, error: &str) -> Result<()> {
        self.finish(task, TaskState::Failed, Some(error)).await
    }

    /// Remove a task that is not held by a live lock. Returns whether a row went away.
    pub async fn discard(&self, id: &str) -> Result<bool> {
        self.repository.discard_task(id, now_ms()).await
    }

    async fn finish(&self, task: &ClaimedTask, state: TaskState, error: Option<&str>) -> Result<()> {
        let released = self
            .repository
            .finish_task(&task.id, &task.lock_token, state, error, now_ms())
            .await?;
        if !released {
            warn!(task_id = %task.id, "Task lock was lost before finishing as {}", state);
        }
        Ok(())
    }

    fn lock_duration_ms(&self) -> i64 {
        i64::try_from(self.config.lock_duration_secs)
            .unwrap_or(i64::MAX / 1000)
            .saturating_mul(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repositories::SqlxTaskRepository;
    use crate::database::test_support::migrated_pool;
    use crate::domain::StreamKey;

    fn payload() -> RelayPayload {
        RelayPayload {
            owner_id: "owner-1".into(),
            source: "https://drive.google.com/file/d/abc/view".into(),
            stream_key: StreamKey::new("key-123"),
            loop_forever: true,
            scheduled_at: None,
            ends_at: None,
        }
    }

    async fn queue(lock_duration_secs: u64) -> (TaskQueue, sqlx::SqlitePool, tempfile::TempDir) {
        let (pool, dir) = migrated_pool().await;
        let repo = Arc::new(SqlxTaskRepository::new(pool.clone()));
        let queue = TaskQueue::new(
            repo,
            QueueConfig {
                lock_duration_secs,
                poll_interval_ms: 50,
            },
        );
        (queue, pool, dir)
    }

    #[tokio::test]
    async fn test_immediate_task_is_claimed_once() {
        let (queue, _pool, _dir) = queue(60).await;
        let id = queue.enqueue(&payload(), Duration::ZERO).await.unwrap();

        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.payload.stream_key.expose(), "key-123");

        assert!(queue.claim().await.unwrap().is_none(), "live lock blocks reclaim");
    }

    #[tokio::test]
    async fn test_delayed_task_waits_until_promoted() {
        let (queue, _pool, _dir) = queue(60).await;
        let id = queue
            .enqueue(&payload(), Duration::from_secs(300))
            .await
            .unwrap();

        let info = queue.lookup(&id).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Delayed);
        assert!(queue.claim().await.unwrap().is_none());

        queue.promote(&id).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
    }

    #[tokio::test]
    async fn test_promote_missing_or_running_task() {
        let (queue, _pool, _dir) = queue(60).await;
        let err = queue.promote("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        queue.enqueue(&payload(), Duration::ZERO).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        let err = queue.promote(&claimed.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimable() {
        let (queue, pool, _dir) = queue(60).await;
        queue.enqueue(&payload(), Duration::ZERO).await.unwrap();
        let first = queue.claim().await.unwrap().unwrap();

        sqlx::query("UPDATE relay_tasks SET locked_until = ? WHERE id = ?")
            .bind(now_ms() - 1)
            .bind(&first.id)
            .execute(&pool)
            .await
            .unwrap();

        let second = queue.claim().await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);
        assert_ne!(second.lock_token, first.lock_token);

        assert!(!queue.extend_lock(&first).await.unwrap(), "stale holder lost the lock");
        assert!(queue.extend_lock(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_finish_releases_and_scrubs_payload() {
        let (queue, pool, _dir) = queue(60).await;
        queue.enqueue(&payload(), Duration::ZERO).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();

        queue.fail(&claimed, "fetch failed").await.unwrap();

        let info = queue.lookup(&claimed.id).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Failed);
        assert_eq!(info.last_error.as_deref(), Some("fetch failed"));

        let (stored,): (String,) = sqlx::query_as("SELECT payload FROM relay_tasks WHERE id = ?")
            .bind(&claimed.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!stored.contains("key-123"));
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discard_spares_locked_tasks() {
        let (queue, _pool, _dir) = queue(60).await;
        let idle = queue
            .enqueue(&payload(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(queue.discard(&idle).await.unwrap());
        assert!(queue.lookup(&idle).await.unwrap().is_none());

        queue.enqueue(&payload(), Duration::ZERO).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        assert!(!queue.discard(&claimed.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_payload_fails_task() {
        let (queue, pool, _dir) = queue(60).await;
        let id = queue.enqueue(&payload(), Duration::ZERO).await.unwrap();
        sqlx::query("UPDATE relay_tasks SET payload = '{}' WHERE id = ?")
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();

        let err = queue.claim().await.unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        let info = queue.lookup(&id).await.unwrap().unwrap();
        assert_eq!(info.state, TaskState::Failed);
    }
}
