pub mod catalog;
pub mod ledger;
pub mod orchestrator;
pub mod pricing;
pub mod quota;
pub mod rate_limiter;
