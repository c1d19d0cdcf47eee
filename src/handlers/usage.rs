use axum::{extract::State, Extension, Json};
use serde::Serialize;

use crate::errors::Result;
use crate::handlers::AppState;
use crate::models::User;

#[derive(Debug, Serialize)]
pub struct UsageStats {
    pub messages: u64,
    pub tokens: u64,
    pub cost: String,
    pub bytes: String,
}

#[derive(Debug, Serialize)]
pub struct UsageLimitsBody {
    pub messages: u64,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub stats: UsageStats,
    pub limits: UsageLimitsBody,
    pub percentage: f64,
    pub tier: &'static str,
}

/// Current billing-period usage for the authenticated user.
pub async fn current(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<UsageResponse>> {
    let stats = state.ledger.current_period_usage(user.id).await?;
    let limit = state.config.tier_limits(user.subscription_tier).message_limit;

    let percentage = if stats.messages > 0 && limit > 0 {
        ((stats.messages as f64 / limit as f64) * 100.0).min(100.0)
    } else {
        0.0
    };

    Ok(Json(UsageResponse {
        stats: UsageStats {
            messages: stats.messages,
            tokens: stats.tokens,
            cost: format!("{:.2}", stats.cost),
            bytes: format_bytes(stats.bytes),
        },
        limits: UsageLimitsBody { messages: limit },
        percentage: (percentage * 10.0).round() / 10.0,
        tier: user.subscription_tier.as_str(),
    }))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_format_steps_through_units() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
