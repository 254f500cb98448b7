//! Queue task model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Queue-side state of a task.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    sqlx::Type,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    /// Waiting for `available_at`.
    Delayed,
    /// Eligible now.
    Waiting,
    /// Locked by a worker.
    Active,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One row of `relay_tasks`.
#[derive(Debug, Clone, FromRow)]
pub struct TaskDbModel {
    pub id: String,
    /// JSON-encoded [`crate::domain::RelayPayload`].
    pub payload: String,
    pub state: TaskState,
    pub available_at: i64,
    pub lock_token: Option<String>,
    pub locked_until: Option<i64>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}
