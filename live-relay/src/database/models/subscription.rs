//! Subscription model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{datetime_to_ms, now_ms};

/// A purchased plan. Capacity counts only while `expires_at` is in the future.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionDbModel {
    pub id: String,
    pub owner_id: String,
    pub plan_id: String,
    pub purchased_at: i64,
    pub expires_at: i64,
}

impl SubscriptionDbModel {
    pub fn new(
        owner_id: impl Into<String>,
        plan_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            plan_id: plan_id.into(),
            purchased_at: now_ms(),
            expires_at: datetime_to_ms(expires_at),
        }
    }
}
