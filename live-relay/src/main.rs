use std::sync::Arc;

use live_relay::api::ApiServer;
use live_relay::config::RelayConfig;
use live_relay::services::ServiceContainer;
use live_relay::{database, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env_or_default();
    let _log_guard = logging::init(config.log_dir.as_deref())?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(pool, &config).await?;
    container.initialize().await?;

    let server = Arc::new(ApiServer::new(config.api.clone(), container.app_state()));
    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tracing::info!("live-relay started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => tracing::warn!("API server exited"),
                Ok(Err(e)) => tracing::error!("API server failed: {}", e),
                Err(e) => tracing::error!("API server task panicked: {}", e),
            }
        }
    }

    server.shutdown();
    container.shutdown().await;

    Ok(())
}
