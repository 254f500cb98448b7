//! Worker supervisor: pulls ready tasks and drives each relay job through
//! fetch, spawn, monitor and finalize.

mod pool;
mod signals;
mod staging;
mod worker;

pub use pool::Supervisor;
pub use signals::{StopRegistration, StopSignals};
pub use staging::StagingArea;
pub use worker::{JobOutcome, RelayWorker};

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the worker supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Number of worker loops. Each runs one job end-to-end at a time.
    pub worker_concurrency: usize,
    /// How often a streaming job re-reads its record for a stop intent.
    pub monitor_interval_ms: u64,
    /// Time a relay gets to exit after an interrupt before it is killed.
    pub stop_grace_secs: u64,
    /// Time past `ends_at` after which a still-running relay is interrupted.
    pub end_grace_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: 4,
            monitor_interval_ms: 5000,
            stop_grace_secs: 10,
            end_grace_secs: 30,
        }
    }
}

impl SupervisorConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms.max(1))
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn end_grace(&self) -> Duration {
        Duration::from_secs(self.end_grace_secs)
    }
}
