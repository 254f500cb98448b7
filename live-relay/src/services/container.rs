//! Service container for dependency injection.
//!
//! Builds repositories, the queue, the fetcher, the supervisor and the
//! admission controller from a [`RelayConfig`] and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::Result;
use crate::admission::AdmissionController;
use crate::api::AppState;
use crate::config::{DriveCredentials, RelayConfig};
use crate::database::repositories::{
    RelayJobRepository, SqlxRelayJobRepository, SqlxSubscriptionRepository, SqlxTaskRepository,
    SubscriptionRepository,
};
use crate::fetcher::{
    AccessTokenProvider, AssetFetcher, GoogleDriveFetcher, ServiceAccountKey,
    ServiceAccountTokenProvider, StaticTokenProvider, UnconfiguredTokenProvider,
    build_http_client,
};
use crate::queue::TaskQueue;
use crate::supervisor::{RelayWorker, StagingArea, StopSignals, Supervisor};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ServiceContainer {
    pub pool: SqlitePool,
    pub jobs: Arc<dyn RelayJobRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub queue: Arc<TaskQueue>,
    pub signals: StopSignals,
    pub staging: StagingArea,
    pub supervisor: Arc<Supervisor>,
    pub admission: Arc<AdmissionController>,
}

impl ServiceContainer {
    /// Wire every service, building the Drive fetcher from the configured
    /// credentials.
    pub async fn new(pool: SqlitePool, config: &RelayConfig) -> Result<Self> {
        let fetcher = build_drive_fetcher(config).await?;
        Ok(Self::with_fetcher(pool, config, fetcher))
    }

    /// Wire every service around a caller-supplied fetcher.
    pub fn with_fetcher(
        pool: SqlitePool,
        config: &RelayConfig,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Self {
        info!("Initializing service container");

        let jobs: Arc<dyn RelayJobRepository> = Arc::new(SqlxRelayJobRepository::new(pool.clone()));
        let subscriptions: Arc<dyn SubscriptionRepository> =
            Arc::new(SqlxSubscriptionRepository::new(pool.clone()));
        let queue = Arc::new(TaskQueue::new(
            Arc::new(SqlxTaskRepository::new(pool.clone())),
            config.queue.clone(),
        ));
        let signals = StopSignals::new();
        let staging = StagingArea::new(config.staging_dir.clone());

        let worker = Arc::new(RelayWorker::new(
            jobs.clone(),
            queue.clone(),
            fetcher,
            config.ffmpeg.clone(),
            staging.clone(),
            signals.clone(),
            config.supervisor.clone(),
        ));
        let supervisor = Arc::new(Supervisor::new(worker, queue.clone()));
        let admission = Arc::new(AdmissionController::new(
            jobs.clone(),
            subscriptions.clone(),
            queue.clone(),
            signals.clone(),
        ));

        Self {
            pool,
            jobs,
            subscriptions,
            queue,
            signals,
            staging,
            supervisor,
            admission,
        }
    }

    /// Prepare the staging area and start the worker loops.
    pub async fn initialize(&self) -> Result<()> {
        self.staging.ensure_exists().await?;
        self.supervisor.start();
        info!(
            staging_dir = %self.staging.root().display(),
            "Services initialized"
        );
        Ok(())
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.admission.clone())
    }

    /// Stop the workers, interrupting running relays, then close the pool.
    pub async fn shutdown(&self) {
        info!("Shutting down services");
        self.supervisor.stop().await;
        self.pool.close().await;
        info!("Services shut down");
    }
}

async fn build_drive_fetcher(config: &RelayConfig) -> Result<Arc<dyn AssetFetcher>> {
    let client = build_http_client(HTTP_CONNECT_TIMEOUT)?;

    let tokens: Arc<dyn AccessTokenProvider> = match &config.drive.credentials {
        DriveCredentials::ServiceAccountJson(json) => {
            let key = ServiceAccountKey::from_json(json)?;
            Arc::new(ServiceAccountTokenProvider::new(client.clone(), key)?)
        }
        DriveCredentials::ServiceAccountFile(path) => {
            let json = tokio::fs::read_to_string(path).await.map_err(|e| {
                crate::Error::config(format!(
                    "failed to read credentials file {}: {e}",
                    path.display()
                ))
            })?;
            let key = ServiceAccountKey::from_json(&json)?;
            Arc::new(ServiceAccountTokenProvider::new(client.clone(), key)?)
        }
        DriveCredentials::AccessToken(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        DriveCredentials::None => {
            warn!("No Drive credentials configured; relay jobs will fail to fetch");
            Arc::new(UnconfiguredTokenProvider)
        }
    };

    Ok(Arc::new(GoogleDriveFetcher::new(
        client,
        config.drive.api_base.clone(),
        tokens,
    )))
}
