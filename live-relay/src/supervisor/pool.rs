//! Worker loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::RelayWorker;
use crate::queue::TaskQueue;

/// Runs `worker_concurrency` loops, each claiming and running one task at a time.
pub struct Supervisor {
    worker: Arc<RelayWorker>,
    queue: Arc<TaskQueue>,
    /// Jobs currently being processed.
    active_jobs: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Supervisor {
    pub fn new(worker: Arc<RelayWorker>, queue: Arc<TaskQueue>) -> Self {
        Self {
            worker,
            queue,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the worker loops.
    pub fn start(&self) {
        let concurrency = self.worker.config().worker_concurrency.max(1);
        let poll_interval = self.queue.poll_interval();
        info!("Starting relay supervisor with {} workers", concurrency);

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };

        for i in 0..concurrency {
            let worker = self.worker.clone();
            let queue = self.queue.clone();
            let notifier = queue.notifier();
            let active_jobs = self.active_jobs.clone();
            let cancellation_token = self.cancellation_token.clone();

            join_set.spawn(async move {
                debug!("Relay worker {} started", i);

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    match queue.claim().await {
                        Ok(Some(task)) => {
                            let task_id = task.id.clone();
                            debug!(task_id = %task_id, worker = i, "Claimed task");
                            active_jobs.fetch_add(1, Ordering::SeqCst);
                            let result = worker.process(task, &cancellation_token).await;
                            active_jobs.fetch_sub(1, Ordering::SeqCst);
                            if let Err(e) = result {
                                error!(task_id = %task_id, "Relay task ended with error: {}", e);
                            }
                            continue;
                        }
                        Ok(None) => {}
                        Err(e) => error!("Error claiming task: {}", e),
                    }

                    tokio::select! {
                        _ = cancellation_token.cancelled() => break,
                        _ = notifier.notified() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }

                debug!("Relay worker {} shutting down", i);
            });
        }
    }

    /// Stop claiming, interrupt running jobs and wait for every loop to exit.
    pub async fn stop(&self) {
        info!("Stopping relay supervisor");
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Relay supervisor stopped");
    }

    pub fn active_count(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}
