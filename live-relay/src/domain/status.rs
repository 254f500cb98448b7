//! Relay job lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a relay job record.
///
/// Allowed transitions form a DAG:
///
/// ```text
/// scheduled -> pending
/// pending | scheduled -> downloading
/// downloading -> streaming | failed | stopped
/// streaming -> completed | failed | stopped
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RelayStatus {
    /// Admitted and eligible for pickup.
    Pending,
    /// Admitted with a start time in the future.
    Scheduled,
    /// A worker is fetching the source asset.
    Downloading,
    /// The relay process is live.
    Streaming,
    /// The relay process exited without a stop intent.
    Completed,
    /// The pipeline failed before or while streaming.
    Failed,
    /// The relay ended because a stop was requested.
    Stopped,
}

impl RelayStatus {
    pub const ALL: [RelayStatus; 7] = [
        RelayStatus::Pending,
        RelayStatus::Scheduled,
        RelayStatus::Downloading,
        RelayStatus::Streaming,
        RelayStatus::Completed,
        RelayStatus::Failed,
        RelayStatus::Stopped,
    ];

    /// Statuses that count against an account's quota.
    pub const QUOTA_COUNTED: [RelayStatus; 4] = [
        RelayStatus::Downloading,
        RelayStatus::Streaming,
        RelayStatus::Pending,
        RelayStatus::Scheduled,
    ];

    /// Statuses in which a worker owns the job and a stop may be requested.
    pub const RUNNING: [RelayStatus; 2] = [RelayStatus::Downloading, RelayStatus::Streaming];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Downloading => "downloading",
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Downloading | Self::Streaming)
    }

    /// Only a streaming job carries a pid.
    pub fn holds_pid(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn can_transition_to(&self, next: RelayStatus) -> bool {
        use RelayStatus::*;
        match self {
            Pending => matches!(next, Downloading),
            Scheduled => matches!(next, Pending | Downloading),
            Downloading => matches!(next, Streaming | Failed | Stopped),
            Streaming => matches!(next, Completed | Failed | Stopped),
            Completed | Failed | Stopped => false,
        }
    }

    /// Every status from which `next` may be entered.
    pub fn sources_of(next: RelayStatus) -> Vec<RelayStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}
