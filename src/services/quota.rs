//! Pre-flight admission against the billing-period quota.
//!
//! The check reads the ledger aggregate and compares it to the tier ceiling.
//! It is deliberately not transactional with the eventual usage write: two
//! concurrent turns can both pass with one slot left, overshooting the
//! ceiling by at most (concurrency - 1) events. Admission is cheap and
//! approximate; strict enforcement would serialize all turns per user.

use std::sync::Arc;
use uuid::Uuid;

use crate::errors::Result;
use crate::services::ledger::UsageLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDimension {
    Messages,
    Tokens,
    Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { reason: String },
}

pub struct QuotaGate {
    ledger: Arc<UsageLedger>,
}

impl QuotaGate {
    pub fn new(ledger: Arc<UsageLedger>) -> Self {
        Self { ledger }
    }

    /// Admits only while usage is strictly below `limit`: a user who has
    /// already consumed exactly `limit` units is rejected on the next
    /// attempt.
    pub async fn check(
        &self,
        user_id: Uuid,
        dimension: QuotaDimension,
        limit: u64,
    ) -> Result<Admission> {
        let usage = self.ledger.current_period_usage(user_id).await?;
        let used = match dimension {
            QuotaDimension::Messages => usage.messages,
            QuotaDimension::Tokens => usage.tokens,
            QuotaDimension::Bytes => usage.bytes,
        };

        if used >= limit {
            let reason = match dimension {
                QuotaDimension::Messages => {
                    "You have reached your monthly message limit. Upgrade your plan to increase limit.".to_string()
                }
                QuotaDimension::Tokens => {
                    "You have reached your monthly token limit. Upgrade your plan to increase limit.".to_string()
                }
                QuotaDimension::Bytes => {
                    "You have reached your monthly upload limit. Upgrade your plan to increase limit.".to_string()
                }
            };
            return Ok(Admission::Rejected { reason });
        }

        Ok(Admission::Admitted)
    }
}
