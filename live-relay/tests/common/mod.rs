//! Shared harness for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;

use live_relay::config::RelayConfig;
use live_relay::database::models::{RelayJobDbModel, SubscriptionDbModel};
use live_relay::database::{DbPool, init_pool, run_migrations};
use live_relay::domain::{RelayRequest, RelayStatus, StreamKey, parse_drive_file_id};
use live_relay::fetcher::AssetFetcher;
use live_relay::services::ServiceContainer;
use live_relay::{Error, Result};

pub const OWNER: &str = "owner-1";

/// Relay that exits cleanly on SIGINT.
pub const COOPERATIVE_RELAY: &str = "trap 'exit 0' INT; sleep 30 & wait $!";
/// Relay that ignores SIGINT and has to be killed.
pub const STUBBORN_RELAY: &str = "trap '' INT; sleep 30 & wait $!";

/// File-backed database with migrations applied.
pub async fn setup_test_db() -> (DbPool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("relay.db").display());
    let pool = init_pool(&url).await.expect("Failed to create test pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (pool, dir)
}

/// Configuration that runs `script` through `/bin/sh` as the relay binary.
pub fn relay_config(dir: &Path, script: &str) -> RelayConfig {
    let mut config = RelayConfig {
        staging_dir: dir.join("staging"),
        ..RelayConfig::default()
    };
    config.ffmpeg.binary_path = "/bin/sh".into();
    config.ffmpeg.launcher_args = vec!["-c".into(), script.into(), "relay".into()];
    config.ffmpeg.ingest_base_url = "rtmp://127.0.0.1/live2".into();
    config.supervisor.worker_concurrency = 1;
    config.supervisor.monitor_interval_ms = 100;
    config.supervisor.stop_grace_secs = 1;
    config.supervisor.end_grace_secs = 0;
    config.queue.poll_interval_ms = 50;
    config
}

/// Fetcher that writes a few bytes after an optional delay.
pub struct StubFetcher {
    pub delay: Duration,
    pub fail: bool,
    pub fetches: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for StubFetcher {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn resolve(&self, source_link: &str) -> Result<String> {
        parse_drive_file_id(source_link)
    }

    async fn fetch(&self, resource_id: &str, dest: &Path) -> Result<u64> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(Error::fetch_failed(format!("{resource_id}: 404 Not Found")));
        }
        tokio::fs::write(dest, b"not really a video").await?;
        Ok(18)
    }
}

pub struct Harness {
    pub container: ServiceContainer,
    pub fetcher: Arc<StubFetcher>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn start(script: &str, configure: impl FnOnce(&mut RelayConfig)) -> Self {
        Self::start_with_fetcher(script, StubFetcher::new(), configure).await
    }

    pub async fn start_with_fetcher(
        script: &str,
        fetcher: StubFetcher,
        configure: impl FnOnce(&mut RelayConfig),
    ) -> Self {
        let harness = Self::build(script, fetcher, configure).await;
        harness
            .container
            .initialize()
            .await
            .expect("Failed to initialize services");
        harness
    }

    /// Wire services without starting the workers.
    pub async fn build(
        script: &str,
        fetcher: StubFetcher,
        configure: impl FnOnce(&mut RelayConfig),
    ) -> Self {
        let (pool, dir) = setup_test_db().await;
        let mut config = relay_config(dir.path(), script);
        configure(&mut config);

        let fetcher = Arc::new(fetcher);
        let container = ServiceContainer::with_fetcher(pool, &config, fetcher.clone());
        Self {
            container,
            fetcher,
            dir,
        }
    }

    pub async fn subscribe(&self, plan_id: &str) {
        let expires = Utc::now() + chrono::Duration::days(30);
        self.container
            .subscriptions
            .add_subscription(&SubscriptionDbModel::new(OWNER, plan_id, expires))
            .await
            .expect("Failed to add subscription");
    }

    pub async fn job(&self, id: &str) -> RelayJobDbModel {
        self.container
            .jobs
            .find_job(id)
            .await
            .expect("Failed to load job")
            .expect("Job missing")
    }

    /// Poll until the job reaches `status` or `timeout` elapses.
    pub async fn wait_for_status(
        &self,
        id: &str,
        status: RelayStatus,
        timeout: Duration,
    ) -> RelayJobDbModel {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.job(id).await;
            if job.status == status {
                return job;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "job {id} stuck in {} (message: {:?}), expected {status}",
                    job.status, job.message
                );
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Wait until no worker holds a job, so queue and staging side effects
    /// of a finished job have landed.
    pub async fn wait_until_idle(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.container.supervisor.active_count() > 0 {
            assert!(
                tokio::time::Instant::now() < deadline,
                "workers still busy after {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn shutdown(self) {
        self.container.shutdown().await;
    }
}

pub fn request(name: &str) -> RelayRequest {
    RelayRequest {
        owner_id: OWNER.into(),
        name: name.into(),
        source: "https://drive.google.com/file/d/1AbC-dEf_123/view?usp=sharing".into(),
        key: StreamKey::new("abcd-1234-efgh-5678"),
        loop_forever: false,
        is_scheduled: false,
        start_time: None,
        is_end_scheduled: false,
        end_time: None,
    }
}

pub fn scheduled_request(name: &str, start: DateTime<Utc>) -> RelayRequest {
    RelayRequest {
        is_scheduled: true,
        start_time: Some(start),
        ..request(name)
    }
}
