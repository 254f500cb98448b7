//! Subscription plans and the concurrency quota they grant.

use chrono::{DateTime, Utc};

use crate::database::models::SubscriptionDbModel;
use crate::database::time::datetime_to_ms;

/// Concurrent relay capacity granted by a plan.
///
/// Unknown plan identifiers grant nothing.
pub fn plan_capacity(plan_id: &str) -> u32 {
    match plan_id {
        "TRIAL" | "LIVE1" => 1,
        "LIVE3" => 3,
        "LIVE5" => 5,
        "LIVE10" => 10,
        "LIVE20" => 20,
        "LIVE30" => 30,
        "LIVE50" => 50,
        "LIVE100" => 100,
        "LIVE150" => 150,
        "LIVE200" => 200,
        _ => 0,
    }
}

/// Sum of plan capacities over subscriptions that expire strictly after `now`.
pub fn account_quota<'a>(
    subscriptions: impl IntoIterator<Item = &'a SubscriptionDbModel>,
    now: DateTime<Utc>,
) -> u32 {
    let now_ms = datetime_to_ms(now);
    subscriptions
        .into_iter()
        .filter(|sub| sub.expires_at > now_ms)
        .fold(0u32, |total, sub| {
            total.saturating_add(plan_capacity(&sub.plan_id))
        })
}
