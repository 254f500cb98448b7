//! Request and response bodies of the HTTP API.

use serde::{Deserialize, Serialize};

use crate::admission::Admission;
use crate::domain::RelayStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub id: String,
    pub status: RelayStatus,
}

impl From<Admission> for AdmissionResponse {
    fn from(admission: Admission) -> Self {
        Self {
            id: admission.job_id,
            status: admission.status,
        }
    }
}

/// Body of the stop and start-now requests.
#[derive(Debug, Clone, Deserialize)]
pub struct OwnerRequest {
    pub owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRequest {
    pub owner_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}
