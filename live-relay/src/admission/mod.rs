//! Admission control and the client-facing job boundaries.
//!
//! Admission computes the owner's quota from active subscriptions, counts
//! the owner's live jobs, and either rejects the request or enqueues a task
//! and creates the matching record. Admissions for one owner are serialised
//! so two concurrent requests cannot both pass the count.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::database::models::RelayJobDbModel;
use crate::database::repositories::{RelayJobRepository, SubscriptionRepository};
use crate::domain::{RelayRequest, RelayStatus, account_quota};
use crate::queue::TaskQueue;
use crate::supervisor::StopSignals;
use crate::{Error, Result};

/// Result of a successful admission.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub job_id: String,
    pub status: RelayStatus,
    #[serde(skip)]
    pub delay: Duration,
}

/// An owner's jobs, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct OwnerJobs {
    pub streams: Vec<RelayJobDbModel>,
    /// Jobs currently downloading or streaming.
    pub active_count: usize,
}

/// Delay until `start`, clamped at zero. No start means no delay.
pub fn schedule_delay(start: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    start
        .and_then(|start| (start - now).to_std().ok())
        .unwrap_or(Duration::ZERO)
}

pub struct AdmissionController {
    jobs: Arc<dyn RelayJobRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    queue: Arc<TaskQueue>,
    signals: StopSignals,
    owner_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AdmissionController {
    pub fn new(
        jobs: Arc<dyn RelayJobRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        queue: Arc<TaskQueue>,
        signals: StopSignals,
    ) -> Self {
        Self {
            jobs,
            subscriptions,
            queue,
            signals,
            owner_locks: DashMap::new(),
        }
    }

    /// Concurrent relay capacity of an owner at `now`.
    pub async fn quota(&self, owner_id: &str, now: DateTime<Utc>) -> Result<u32> {
        let subscriptions = self.subscriptions.list_for_owner(owner_id).await?;
        Ok(account_quota(&subscriptions, now))
    }

    pub async fn admit(&self, request: &RelayRequest) -> Result<Admission> {
        self.admit_at(request, Utc::now()).await
    }

    /// Admit a request as if the current instant were `now`.
    pub async fn admit_at(&self, request: &RelayRequest, now: DateTime<Utc>) -> Result<Admission> {
        request.validate(now)?;
        let owner_id = request.owner_id.as_str();

        let lock = self.owner_lock(owner_id);
        let admission = {
            let _guard = lock.lock().await;
            self.admit_locked(request, now).await
        };
        drop(lock);
        self.owner_locks
            .remove_if(owner_id, |_, lock| Arc::strong_count(lock) == 1);

        admission
    }

    async fn admit_locked(&self, request: &RelayRequest, now: DateTime<Utc>) -> Result<Admission> {
        let owner_id = request.owner_id.as_str();
        let limit = self.quota(owner_id, now).await?;
        let active = self
            .jobs
            .count_jobs_in_status(owner_id, &RelayStatus::QUOTA_COUNTED)
            .await?;
        if active >= limit {
            info!(owner_id, active, limit, "Relay request rejected by quota");
            return Err(Error::AdmissionRejected { limit });
        }

        let start = request.requested_start();
        let delay = schedule_delay(start, now);
        let scheduled_at = start.filter(|_| !delay.is_zero());

        let job_id = self.queue.enqueue(&request.payload(), delay).await?;
        let record = RelayJobDbModel::admitted(&job_id, request, scheduled_at);

        if let Err(e) = self.jobs.create_job(&record).await {
            match self.queue.discard(&job_id).await {
                Ok(_) => {}
                Err(discard_err) => warn!(
                    job_id = %job_id,
                    "Orphaned task left behind after record creation failed: {}",
                    discard_err
                ),
            }
            return Err(e);
        }

        info!(
            job_id = %job_id,
            owner_id,
            status = %record.status,
            delay_secs = delay.as_secs(),
            "Relay job admitted"
        );
        Ok(Admission {
            job_id,
            status: record.status,
            delay,
        })
    }

    fn owner_lock(&self, owner_id: &str) -> Arc<Mutex<()>> {
        self.owner_locks
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist a stop intent for a running job and signal its worker.
    pub async fn stop(&self, owner_id: &str, job_id: &str) -> Result<RelayJobDbModel> {
        let job = self.jobs.request_stop(owner_id, job_id).await?;
        let signalled = self.signals.signal(job_id);
        info!(job_id, owner_id, signalled, "Stop requested");
        Ok(job)
    }

    /// Start a scheduled job now.
    pub async fn promote(&self, owner_id: &str, job_id: &str) -> Result<RelayJobDbModel> {
        if self.queue.lookup(job_id).await?.is_none() {
            return Err(Error::not_found("Task", job_id));
        }
        let job = self.jobs.get_owned_job(owner_id, job_id).await?;
        if job.status != RelayStatus::Scheduled {
            return Err(Error::invalid_transition(job.status, RelayStatus::Pending));
        }

        match self.queue.promote(job_id).await {
            Ok(()) => {}
            // The task became due and was claimed after the record was read.
            Err(Error::InvalidStateTransition { .. }) => {
                debug!(job_id, owner_id, "Task already left the delayed set");
                return self.jobs.get_owned_job(owner_id, job_id).await;
            }
            Err(e) => return Err(e),
        }
        match self.jobs.mark_promoted(owner_id, job_id).await {
            Ok(job) => {
                info!(job_id, owner_id, "Scheduled relay job promoted");
                Ok(job)
            }
            // A worker picked the task up between the two writes.
            Err(Error::InvalidStateTransition { .. }) => {
                self.jobs.get_owned_job(owner_id, job_id).await
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, owner_id: &str) -> Result<OwnerJobs> {
        let streams = self.jobs.list_jobs_for_owner(owner_id).await?;
        let active_count = streams.iter().filter(|j| j.status.is_running()).count();
        Ok(OwnerJobs {
            streams,
            active_count,
        })
    }

    pub async fn rename(&self, owner_id: &str, job_id: &str, name: &str) -> Result<RelayJobDbModel> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("name must not be empty"));
        }
        self.jobs.rename_job(owner_id, job_id, name).await
    }

    /// Delete a job that is not running, together with its task.
    pub async fn delete(&self, owner_id: &str, job_id: &str) -> Result<()> {
        self.jobs.delete_idle_job(owner_id, job_id).await?;
        if let Err(e) = self.queue.discard(job_id).await {
            warn!(job_id, "Failed to discard task of deleted job: {}", e);
        }
        info!(job_id, owner_id, "Relay job deleted");
        Ok(())
    }
}
