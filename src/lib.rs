pub mod config;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod provider;
pub mod services;
pub mod storage;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::handlers::AppState;
use crate::jobs::TitleWorker;
use crate::provider::ChatProvider;
use crate::services::catalog::ModelCatalog;
use crate::services::ledger::UsageLedger;
use crate::services::orchestrator::StreamOrchestrator;
use crate::services::quota::QuotaGate;
use crate::services::rate_limiter::SlidingWindowLimiter;
use crate::storage::Storage;

/// Wire the service graph together. Must run inside a tokio runtime (the
/// title worker spawns its queue task here).
pub fn build_state(
    config: Config,
    storage: Arc<dyn Storage>,
    provider: Arc<dyn ChatProvider>,
) -> anyhow::Result<AppState> {
    let catalog = Arc::new(match &config.models_path {
        Some(path) => ModelCatalog::from_json_file(path)?,
        None => ModelCatalog::builtin(),
    });
    let ledger = Arc::new(UsageLedger::new(
        storage.clone(),
        config.billing_utc_offset_hours,
    ));
    let titles = TitleWorker::spawn(
        storage.clone(),
        provider.clone(),
        config.title_provider.clone(),
        config.title_model.clone(),
    );
    let orchestrator = Arc::new(StreamOrchestrator::new(
        storage.clone(),
        ledger.clone(),
        QuotaGate::new(ledger.clone()),
        catalog.clone(),
        provider,
        titles,
        config.clone(),
    ));

    Ok(AppState {
        config,
        storage,
        catalog,
        ledger,
        orchestrator,
        rate_limiter: Arc::new(SlidingWindowLimiter::per_minute()),
    })
}

pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/chat/stream", post(handlers::chat::stream))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::rate_limit::chat_rate_limit,
        ))
        .route("/api/usage", get(handlers::usage::current))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health::health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
