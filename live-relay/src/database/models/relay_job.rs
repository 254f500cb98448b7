//! Relay job record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, now_ms, opt_ms_to_datetime};
use crate::domain::{RelayRequest, RelayStatus};

/// One row of `relay_jobs`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RelayJobDbModel {
    /// Shared with the queue task that executes this job.
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub source_link: String,
    /// First four key characters plus `...`.
    pub stream_key_partial: String,
    pub status: RelayStatus,
    /// Set only while the relay process is live.
    pub pid: Option<i64>,
    pub scheduled_at: Option<i64>,
    pub ends_at: Option<i64>,
    /// Persisted stop intent.
    pub stop_requested_at: Option<i64>,
    pub exit_code: Option<i64>,
    pub message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RelayJobDbModel {
    /// Record for a freshly admitted request.
    ///
    /// Passing a `scheduled_at` makes the job `scheduled`, otherwise it is `pending`.
    pub fn admitted(
        id: impl Into<String>,
        request: &RelayRequest,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Self {
        let now = now_ms();
        let scheduled_at = scheduled_at.map(datetime_to_ms);
        let status = if scheduled_at.is_some() {
            RelayStatus::Scheduled
        } else {
            RelayStatus::Pending
        };
        Self {
            id: id.into(),
            owner_id: request.owner_id.clone(),
            name: request.name.trim().to_string(),
            source_link: request.source.trim().to_string(),
            stream_key_partial: request.key.partial(),
            status,
            pid: None,
            scheduled_at,
            ends_at: request.requested_end().map(datetime_to_ms),
            stop_requested_at: None,
            exit_code: None,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested_at.is_some()
    }

    pub fn ends_at_datetime(&self) -> Option<DateTime<Utc>> {
        opt_ms_to_datetime(self.ends_at)
    }
}
