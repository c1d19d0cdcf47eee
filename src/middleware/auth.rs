use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::errors::AppError;
use crate::handlers::AppState;

/// Resolves a bearer token to a user and stashes it in request extensions.
/// Token issuance and account management live outside this service.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Auth("Missing authentication token".into()))?;

    let user = state
        .storage
        .find_user_by_token(token)
        .await?
        .ok_or_else(|| AppError::Auth("Invalid authentication token".into()))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
