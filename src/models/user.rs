use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Plus,
    Enterprise,
}

impl SubscriptionTier {
    /// Unknown tier strings resolve to `Free` so a bad value can never
    /// grant more access than intended. "pro" is a legacy alias of "plus".
    pub fn parse(raw: &str) -> Self {
        match raw {
            "plus" | "pro" => SubscriptionTier::Plus,
            "enterprise" => SubscriptionTier::Enterprise,
            _ => SubscriptionTier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Plus => "plus",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    pub fn can_use_paid_models(&self) -> bool {
        !matches!(self, SubscriptionTier::Free)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub subscription_tier: SubscriptionTier,
}
