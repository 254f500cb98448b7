//! Process configuration read from the environment.
//!
//! Every setting has a default, so an empty environment yields a runnable
//! configuration (apart from Drive credentials, without which fetches fail).

use std::path::PathBuf;

use crate::api::ApiServerConfig;
use crate::fetcher::DEFAULT_DRIVE_API_BASE;
use crate::queue::QueueConfig;
use crate::relay::FfmpegConfig;
use crate::supervisor::SupervisorConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:live-relay.db?mode=rwc";
pub const DEFAULT_STAGING_DIR: &str = "staging";

/// Where Drive access tokens come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveCredentials {
    /// Service-account key JSON given inline.
    ServiceAccountJson(String),
    /// Path to a service-account key file.
    ServiceAccountFile(PathBuf),
    /// Fixed bearer token, mostly for local testing.
    AccessToken(String),
    None,
}

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub credentials: DriveCredentials,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub api: ApiServerConfig,
    pub staging_dir: PathBuf,
    pub ffmpeg: FfmpegConfig,
    pub drive: DriveConfig,
    pub supervisor: SupervisorConfig,
    pub queue: QueueConfig,
    pub log_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            api: ApiServerConfig::default(),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            ffmpeg: FfmpegConfig::default(),
            drive: DriveConfig {
                credentials: DriveCredentials::None,
                api_base: DEFAULT_DRIVE_API_BASE.to_string(),
            },
            supervisor: SupervisorConfig::default(),
            queue: QueueConfig::default(),
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Read configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| var(key).and_then(|v| v.trim().parse::<u64>().ok());

        let mut config = Self::default();

        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(address) = var("API_BIND_ADDRESS") {
            config.api.bind_address = address;
        }
        if let Some(port) = var("API_PORT").and_then(|p| p.trim().parse().ok()) {
            config.api.port = port;
        }
        if let Some(dir) = var("STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }

        if let Some(path) = var("FFMPEG_PATH") {
            config.ffmpeg.binary_path = path;
        }
        if let Some(args) = var("FFMPEG_LAUNCHER_ARGS") {
            config.ffmpeg.launcher_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(base) = var("INGEST_BASE_URL") {
            config.ffmpeg.ingest_base_url = base.trim_end_matches('/').to_string();
        }

        config.drive.credentials = if let Some(json) = var("GOOGLE_CREDENTIALS_JSON") {
            DriveCredentials::ServiceAccountJson(json)
        } else if let Some(path) = var("GOOGLE_CREDENTIALS_FILE") {
            DriveCredentials::ServiceAccountFile(PathBuf::from(path))
        } else if let Some(token) = var("DRIVE_ACCESS_TOKEN") {
            DriveCredentials::AccessToken(token)
        } else {
            DriveCredentials::None
        };
        if let Some(base) = var("DRIVE_API_BASE") {
            config.drive.api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(n) = parsed("WORKER_CONCURRENCY") {
            config.supervisor.worker_concurrency = (n as usize).max(1);
        }
        if let Some(ms) = parsed("MONITOR_INTERVAL_MS") {
            config.supervisor.monitor_interval_ms = ms;
        }
        if let Some(secs) = parsed("STOP_GRACE_SECS") {
            config.supervisor.stop_grace_secs = secs;
        }
        if let Some(secs) = parsed("END_GRACE_SECS") {
            config.supervisor.end_grace_secs = secs;
        }
        if let Some(ms) = parsed("QUEUE_POLL_INTERVAL_MS") {
            config.queue.poll_interval_ms = ms;
        }
        if let Some(secs) = parsed("QUEUE_LOCK_DURATION_SECS") {
            config.queue.lock_duration_secs = secs.max(1);
        }

        config.log_dir = var("LOG_DIR").map(PathBuf::from);

        config
    }
}
