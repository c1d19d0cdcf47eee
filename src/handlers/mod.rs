pub mod chat;
pub mod health;
pub mod usage;

use std::sync::Arc;

use crate::config::Config;
use crate::services::catalog::ModelCatalog;
use crate::services::ledger::UsageLedger;
use crate::services::orchestrator::StreamOrchestrator;
use crate::services::rate_limiter::SlidingWindowLimiter;
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub catalog: Arc<ModelCatalog>,
    pub ledger: Arc<UsageLedger>,
    pub orchestrator: Arc<StreamOrchestrator>,
    pub rate_limiter: Arc<SlidingWindowLimiter>,
}
