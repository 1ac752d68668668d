use chrono::{DateTime, Duration, Utc};
use parse_display::{Display, FromStr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[display(style = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
}

/// The subscription opened when a tenant first becomes active. One per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub package_id: String,
    pub status: SubscriptionStatus,
    pub started_at: DateTime<Utc>,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Packages with trial days start in `Trial`, the others are active right away.
    pub fn open(tenant_id: Uuid, package_id: impl Into<String>, trial_days: u32) -> Self {
        let started_at = Utc::now();
        let (status, trial_ends_at) = if trial_days > 0 {
            (
                SubscriptionStatus::Trial,
                Some(started_at + Duration::days(i64::from(trial_days))),
            )
        } else {
            (SubscriptionStatus::Active, None)
        };

        Self {
            id: Uuid::new_v4(),
            tenant_id,
            package_id: package_id.into(),
            status,
            started_at,
            trial_ends_at,
        }
    }
}
