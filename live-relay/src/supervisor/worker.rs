//! Per-job pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{StagingArea, StopSignals, SupervisorConfig};
use crate::database::models::RelayJobDbModel;
use crate::database::repositories::RelayJobRepository;
use crate::domain::{RelayStatus, StreamKey};
use crate::fetcher::AssetFetcher;
use crate::queue::{ClaimedTask, TaskQueue};
use crate::relay::{
    FfmpegConfig, ProcessHandle, ProcessState, RelayPlan, RelayProcess, build_invocation,
    duration_until,
};
use crate::{Error, Result};

const RECORD_MISSING: &str = "relay job record missing";
const WORKER_LOST: &str = "worker lost";
const SHUTDOWN_MESSAGE: &str = "supervisor shutdown";
const STOPPED_BEFORE_STREAMING: &str = "stopped before streaming";

/// What happened to a claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The task had nothing left to run.
    Skipped,
    /// The job ran and its record ended in this status.
    Finished(RelayStatus),
}

/// Runs one claimed task at a time.
pub struct RelayWorker {
    jobs: Arc<dyn RelayJobRepository>,
    queue: Arc<TaskQueue>,
    fetcher: Arc<dyn AssetFetcher>,
    ffmpeg: FfmpegConfig,
    staging: StagingArea,
    signals: StopSignals,
    config: SupervisorConfig,
}

impl RelayWorker {
    pub fn new(
        jobs: Arc<dyn RelayJobRepository>,
        queue: Arc<TaskQueue>,
        fetcher: Arc<dyn AssetFetcher>,
        ffmpeg: FfmpegConfig,
        staging: StagingArea,
        signals: StopSignals,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            jobs,
            queue,
            fetcher,
            ffmpeg,
            staging,
            signals,
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run a claimed task to completion.
    ///
    /// Pipeline errors are recorded on the job and the task before being
    /// returned; the caller only needs to log them.
    pub async fn process(
        &self,
        task: ClaimedTask,
        shutdown: &CancellationToken,
    ) -> Result<JobOutcome> {
        let job_id = task.id.clone();

        let Some(record) = self.jobs.find_job(&job_id).await? else {
            warn!(job_id = %job_id, "No relay job record for task, failing it");
            self.queue.fail(&task, RECORD_MISSING).await?;
            return Ok(JobOutcome::Skipped);
        };

        if record.status.is_terminal() {
            debug!(job_id = %job_id, status = %record.status, "Task re-delivered after finalisation");
            self.queue.complete(&task).await?;
            return Ok(JobOutcome::Skipped);
        }

        if record.status.is_running() {
            warn!(
                job_id = %job_id,
                status = %record.status,
                attempts = task.attempts,
                "Task lock expired while the job was running; not re-running it"
            );
            self.record_failure(&job_id, WORKER_LOST).await;
            self.queue.fail(&task, WORKER_LOST).await?;
            return Ok(JobOutcome::Finished(RelayStatus::Failed));
        }

        let registration = self.signals.register(&job_id);
        let result = self
            .run(&task, &record, registration.token(), shutdown)
            .await;
        drop(registration);
        self.staging.cleanup(&job_id).await;

        match result {
            Ok(status) => {
                self.queue.complete(&task).await?;
                info!(job_id = %job_id, status = %status, "Relay job finished");
                Ok(JobOutcome::Finished(status))
            }
            Err(e) => {
                let message = failure_message(&e, &task.payload.stream_key);
                error!(job_id = %job_id, "Relay job failed: {}", message);
                self.record_failure(&job_id, &message).await;
                if let Err(queue_err) = self.queue.fail(&task, &message).await {
                    warn!(job_id = %job_id, "Failed to mark task failed: {}", queue_err);
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        task: &ClaimedTask,
        record: &RelayJobDbModel,
        stop: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<RelayStatus> {
        let job_id = task.id.as_str();
        let payload = &task.payload;

        self.jobs
            .transition(job_id, RelayStatus::Downloading, None, None)
            .await?;

        let resource_id = self.fetcher.resolve(&payload.source)?;
        self.staging.ensure_exists().await?;
        let staged = self.staging.path_for(job_id);

        info!(job_id, fetcher = self.fetcher.name(), "Fetching source asset");
        {
            let fetch = self.fetcher.fetch(&resource_id, &staged);
            tokio::pin!(fetch);
            let mut renew = self.renew_ticker();
            loop {
                tokio::select! {
                    fetched = &mut fetch => {
                        fetched?;
                        break;
                    }
                    _ = renew.tick() => {
                        if !self.renew_lock(task).await {
                            return Err(Error::Other("queue lock lost".into()));
                        }
                    }
                    _ = stop.cancelled() => {
                        return self.stop_before_streaming(job_id).await;
                    }
                    _ = shutdown.cancelled() => return Err(Error::Shutdown),
                }
            }
        }

        let current = self
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found("RelayJob", job_id))?;
        if current.stop_requested() || stop.is_cancelled() {
            return self.stop_before_streaming(job_id).await;
        }
        if shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let ends_at = payload.ends_at.or_else(|| record.ends_at_datetime());
        let duration_secs = ends_at.and_then(|end| duration_until(end, Utc::now()));
        let invocation = build_invocation(
            &self.ffmpeg,
            &RelayPlan {
                input: &staged,
                stream_key: &payload.stream_key,
                loop_forever: payload.loop_forever,
                duration_secs,
            },
        );
        debug!(job_id, command = %invocation.display_redacted(), "Spawning relay");

        let mut process = RelayProcess::spawn(&invocation)?;
        let pid = process.pid();
        if let Err(e) = self
            .jobs
            .transition(job_id, RelayStatus::Streaming, Some(pid), None)
            .await
        {
            process.handle().kill();
            process.wait().await;
            return Err(e);
        }
        info!(job_id, pid, duration_secs, loop_forever = payload.loop_forever, "Relay streaming");

        if let Some(stderr) = process.take_stderr() {
            tokio::spawn(pump_stderr(
                stderr,
                job_id.to_string(),
                payload.stream_key.clone(),
            ));
        }

        let end_deadline = ends_at.map(|end| {
            let remaining = (end - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            Instant::now() + remaining + self.config.end_grace()
        });

        self.supervise(task, process, end_deadline, stop, shutdown)
            .await
    }

    /// Wait for the relay to exit while watching for stop requests, the end
    /// deadline, lock renewal and shutdown.
    async fn supervise(
        &self,
        task: &ClaimedTask,
        process: RelayProcess,
        mut end_deadline: Option<Instant>,
        stop: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> Result<RelayStatus> {
        let job_id = task.id.as_str();
        let handle = process.handle();
        let exit = process.wait();
        tokio::pin!(exit);

        let period = self.config.monitor_interval();
        let mut monitor = interval_at(Instant::now() + period, period);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut renew = self.renew_ticker();

        let mut polling = true;
        let mut stop_seen = false;
        let mut escalate_at: Option<Instant> = None;
        let mut failure: Option<Error> = None;

        let outcome = loop {
            tokio::select! {
                outcome = &mut exit => break outcome,

                _ = stop.cancelled(), if !stop_seen => {
                    info!(job_id, "Stop signalled, interrupting relay");
                    stop_seen = true;
                    polling = false;
                    self.begin_stop(&handle, &mut escalate_at);
                }

                _ = monitor.tick(), if polling => {
                    match self.jobs.find_job(job_id).await {
                        Ok(Some(record)) if record.stop_requested() => {
                            info!(job_id, "Stop intent found, interrupting relay");
                            stop_seen = true;
                            polling = false;
                            self.begin_stop(&handle, &mut escalate_at);
                        }
                        Ok(Some(_)) => {}
                        Ok(None) => warn!(job_id, "Relay job record vanished while streaming"),
                        Err(e) => warn!(job_id, "Failed to poll relay job record: {}", e),
                    }
                }

                _ = renew.tick() => {
                    if !self.renew_lock(task).await && failure.is_none() {
                        failure = Some(Error::Other("queue lock lost".into()));
                        polling = false;
                        self.begin_stop(&handle, &mut escalate_at);
                    }
                }

                _ = sleep_until_opt(end_deadline) => {
                    info!(job_id, "End time passed, interrupting relay");
                    end_deadline = None;
                    self.begin_stop(&handle, &mut escalate_at);
                }

                _ = sleep_until_opt(escalate_at) => {
                    warn!(
                        job_id,
                        pid = handle.pid(),
                        grace_secs = self.config.stop_grace_secs,
                        "Relay ignored interrupt, killing it"
                    );
                    escalate_at = None;
                    handle.kill();
                }

                _ = shutdown.cancelled(), if failure.is_none() => {
                    info!(job_id, "Supervisor shutting down, interrupting relay");
                    failure = Some(Error::Shutdown);
                    polling = false;
                    self.begin_stop(&handle, &mut escalate_at);
                }
            }
        };

        if let Some(err) = failure {
            return Err(err);
        }

        let record = self.jobs.finalize_exit(job_id, outcome.code).await?;
        if record.status == RelayStatus::Completed && outcome.state == ProcessState::Crashed {
            warn!(job_id, exit_code = ?outcome.code, "Relay exited with a failure status");
        }
        Ok(record.status)
    }

    fn begin_stop(&self, handle: &ProcessHandle, escalate_at: &mut Option<Instant>) {
        handle.interrupt();
        if escalate_at.is_none() {
            *escalate_at = Some(Instant::now() + self.config.stop_grace());
        }
    }

    async fn stop_before_streaming(&self, job_id: &str) -> Result<RelayStatus> {
        info!(job_id, "Stop requested before the relay started");
        self.jobs
            .transition(
                job_id,
                RelayStatus::Stopped,
                None,
                Some(STOPPED_BEFORE_STREAMING),
            )
            .await?;
        Ok(RelayStatus::Stopped)
    }

    /// Renew the task lock. Returns `false` only when the lock is gone;
    /// transient errors are logged and retried on the next tick.
    async fn renew_lock(&self, task: &ClaimedTask) -> bool {
        match self.queue.extend_lock(task).await {
            Ok(held) => {
                if !held {
                    warn!(task_id = %task.id, "Queue lock was taken over by another worker");
                }
                held
            }
            Err(e) => {
                warn!(task_id = %task.id, "Failed to renew queue lock: {}", e);
                true
            }
        }
    }

    fn renew_ticker(&self) -> Interval {
        let period = (self.queue.lock_duration() / 2).max(Duration::from_millis(100));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    async fn record_failure(&self, job_id: &str, message: &str) {
        if let Err(e) = self
            .jobs
            .transition(job_id, RelayStatus::Failed, None, Some(message))
            .await
        {
            warn!(job_id, "Could not mark relay job failed: {}", e);
        }
    }
}

fn failure_message(err: &Error, key: &StreamKey) -> String {
    match err {
        Error::Shutdown => SHUTDOWN_MESSAGE.to_string(),
        other => key.redact(&other.to_string()),
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn pump_stderr(stderr: ChildStderr, job_id: String, key: StreamKey) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = key.redact(&line);
                if line.contains("Error") || line.contains("error") {
                    warn!(job_id = %job_id, "relay: {}", line);
                } else {
                    debug!(job_id = %job_id, "relay: {}", line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(job_id = %job_id, "Stopped reading relay output: {}", e);
                break;
            }
        }
    }
}
