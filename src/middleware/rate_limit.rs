use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::User;

/// Per-minute chat rate limiting, keyed by user id so different users'
/// limits never interact. Runs after auth and ahead of the orchestrator,
/// independently of the quota ledger.
pub async fn chat_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<User>()
        .cloned()
        .ok_or_else(|| AppError::Auth("Missing authentication token".into()))?;

    let tier = user.subscription_tier;
    let key = format!("{}:chat:{}", tier.as_str(), user.id);
    let limit = state.config.tier_limits(tier).chat_rate_per_minute;

    let decision = state.rate_limiter.try_acquire(&key, limit);
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_seconds: decision.retry_after.as_secs().max(1),
        });
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", decision.limit.into());
    headers.insert("X-RateLimit-Remaining", decision.remaining.into());
    Ok(response)
}
