//! Subscription repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::SubscriptionDbModel;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<SubscriptionDbModel>>;
    async fn add_subscription(&self, subscription: &SubscriptionDbModel) -> Result<()>;
}

/// SQLx implementation of SubscriptionRepository.
pub struct SqlxSubscriptionRepository {
    pool: SqlitePool,
}

impl SqlxSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SqlxSubscriptionRepository {
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<SubscriptionDbModel>> {
        let subs = sqlx::query_as::<_, SubscriptionDbModel>(
            "SELECT * FROM subscriptions WHERE owner_id = ? ORDER BY expires_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subs)
    }

    async fn add_subscription(&self, subscription: &SubscriptionDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (id, owner_id, plan_id, purchased_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&subscription.id)
        .bind(&subscription.owner_id)
        .bind(&subscription.plan_id)
        .bind(subscription.purchased_at)
        .bind(subscription.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
