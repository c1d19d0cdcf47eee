use anyhow::{anyhow, Result};
use std::env;
use std::fmt::Display;
use std::str::FromStr;

use crate::models::SubscriptionTier;

/// Per-tier ceilings: monthly message quota and chat requests per minute.
#[derive(Debug, Clone)]
pub struct TierLimits {
    pub message_limit: u64,
    pub chat_rate_per_minute: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    /// UTC offset (hours) of the billing timezone; calendar-month quota
    /// windows are computed in this offset.
    pub billing_utc_offset_hours: i32,
    /// How many prior messages are replayed to the provider per turn.
    pub history_window: usize,
    pub prompt_max_length: usize,
    pub default_model: String,
    /// Optional JSON file overriding the builtin model catalog.
    pub models_path: Option<String>,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub title_provider: String,
    pub title_model: String,
    pub free: TierLimits,
    pub plus: TierLimits,
    pub enterprise: TierLimits,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL").ok(),
            port: var_or("PORT", 3000)?,
            billing_utc_offset_hours: var_or("BILLING_UTC_OFFSET", 0)?,
            history_window: var_or("HISTORY_WINDOW", 10)?,
            prompt_max_length: var_or("PROMPT_MAX_LENGTH", 10_000)?,
            default_model: var_or("DEFAULT_MODEL", "gemini-2.0-flash-exp".to_string())?,
            models_path: env::var("MODELS_PATH").ok(),
            provider_base_url: var_or("PROVIDER_BASE_URL", "http://127.0.0.1:8080".to_string())?,
            provider_api_key: env::var("PROVIDER_API_KEY").ok(),
            title_provider: var_or("TITLE_PROVIDER", "groq".to_string())?,
            title_model: var_or("TITLE_MODEL", "llama-3.1-8b-instant".to_string())?,
            free: TierLimits {
                message_limit: var_or("FREE_TIER_MESSAGES", 100)?,
                chat_rate_per_minute: var_or("FREE_TIER_CHAT_RATE", 2)?,
            },
            plus: TierLimits {
                message_limit: var_or("PLUS_TIER_MESSAGES", 10_000)?,
                chat_rate_per_minute: var_or("PLUS_TIER_CHAT_RATE", 10)?,
            },
            enterprise: TierLimits {
                message_limit: var_or("ENTERPRISE_TIER_MESSAGES", 100_000)?,
                chat_rate_per_minute: var_or("ENTERPRISE_TIER_CHAT_RATE", 50)?,
            },
        })
    }

    pub fn tier_limits(&self, tier: SubscriptionTier) -> &TierLimits {
        match tier {
            SubscriptionTier::Free => &self.free,
            SubscriptionTier::Plus => &self.plus,
            SubscriptionTier::Enterprise => &self.enterprise,
        }
    }
}

fn var_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("invalid value for {}: {}", key, e)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_knob() {
        let config = Config::from_env().expect("defaults should parse");
        assert_eq!(config.history_window, 10);
        assert_eq!(config.free.message_limit, 100);
        assert_eq!(config.free.chat_rate_per_minute, 2);
        assert!(config.plus.message_limit > config.free.message_limit);
    }

    #[test]
    fn tier_limits_resolve_per_tier() {
        let config = Config::from_env().unwrap();
        assert_eq!(
            config.tier_limits(SubscriptionTier::Enterprise).message_limit,
            config.enterprise.message_limit
        );
        assert_eq!(
            config.tier_limits(SubscriptionTier::Free).chat_rate_per_minute,
            config.free.chat_rate_per_minute
        );
    }
}
