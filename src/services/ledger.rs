//! Append-only ledger of billable events plus the derived billing-period
//! aggregate.

use chrono::{DateTime, Datelike, FixedOffset, Offset, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{EventMetadata, EventType, NewUsageEvent, PeriodUsage, UsageEvent};
use crate::services::catalog::ModelDescriptor;
use crate::services::pricing::{self, TokenBreakdown};
use crate::storage::Storage;

pub struct UsageLedger {
    storage: Arc<dyn Storage>,
    billing_offset: FixedOffset,
}

impl UsageLedger {
    pub fn new(storage: Arc<dyn Storage>, billing_utc_offset_hours: i32) -> Self {
        let seconds = billing_utc_offset_hours.clamp(-23, 23) * 3600;
        let billing_offset =
            FixedOffset::east_opt(seconds).unwrap_or_else(|| Utc.fix());
        Self { storage, billing_offset }
    }

    /// Append one billable event. Cost is computed here, once, and rounded
    /// to the 4-decimal storage scale. A persistence failure propagates to
    /// the caller: a silently dropped event is lost billing data.
    pub async fn record(
        &self,
        user_id: Uuid,
        event_type: EventType,
        tokens: TokenBreakdown,
        message_count: u32,
        bytes: u64,
        model: Option<&ModelDescriptor>,
        metadata: EventMetadata,
    ) -> Result<UsageEvent> {
        let cost = pricing::cost_of(event_type, &tokens, bytes, model).round_dp(4);
        let event = NewUsageEvent {
            user_id,
            event_type,
            tokens: tokens.total(),
            message_count,
            bytes,
            cost,
            metadata,
        };

        let stored = self.storage.insert_usage_event(&event).await;
        if let Err(e) = &stored {
            tracing::error!(
                user_id = %user_id,
                event_type = event_type.as_str(),
                error = %e,
                "failed to persist usage event; billing data lost"
            );
        }
        stored
    }

    /// Aggregate usage over the current calendar month in the configured
    /// billing timezone. Zeroes when no events exist.
    pub async fn current_period_usage(&self, user_id: Uuid) -> Result<PeriodUsage> {
        let (from, to) = self.period_bounds(Utc::now());
        self.storage.sum_usage_between(user_id, from, to).await
    }

    /// [first moment, first moment of next month) around `now`, expressed
    /// as UTC instants.
    pub fn period_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local = now.with_timezone(&self.billing_offset);
        let (year, month) = (local.year(), local.month());
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };

        let start = self.month_start(year, month).unwrap_or(now);
        let end = self.month_start(next_year, next_month).unwrap_or(now);
        (start, end)
    }

    fn month_start(&self, year: i32, month: u32) -> Option<DateTime<Utc>> {
        self.billing_offset
            .with_ymd_and_hms(year, month, 1, 0, 0, 0)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::ModelCatalog;
    use crate::storage::MemoryStorage;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn ledger_with_storage() -> (Arc<MemoryStorage>, UsageLedger) {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = UsageLedger::new(storage.clone(), 0);
        (storage, ledger)
    }

    #[test]
    fn period_bounds_span_one_calendar_month() {
        let (_, ledger) = ledger_with_storage();
        let now = Utc.with_ymd_and_hms(2025, 3, 15, 12, 30, 0).unwrap();
        let (from, to) = ledger.period_bounds(now);
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn period_bounds_roll_over_december() {
        let (_, ledger) = ledger_with_storage();
        let now = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap();
        let (from, to) = ledger.period_bounds(now);
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn billing_offset_shifts_the_window() {
        let storage = Arc::new(MemoryStorage::new());
        let ledger = UsageLedger::new(storage, 5);
        // 23:00 UTC on Jan 31 is already February 1st at UTC+5.
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 23, 0, 0).unwrap();
        let (from, _) = ledger.period_bounds(now);
        // Feb 1 00:00 at +05:00 == Jan 31 19:00 UTC.
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 1, 31, 19, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn aggregation_sums_each_dimension() {
        let (storage, ledger) = ledger_with_storage();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        storage.seed_event(user_id, EventType::MessageSent, 5, 0, 0, now);
        storage.seed_event(user_id, EventType::AiResponse, 0, 1000, 0, now);
        storage.seed_event(user_id, EventType::MessageSent, 3, 0, 0, now);

        let usage = ledger.current_period_usage(user_id).await.unwrap();
        assert_eq!(usage.messages, 8);
        assert_eq!(usage.tokens, 1000);
    }

    #[tokio::test]
    async fn events_outside_the_period_are_excluded() {
        let (storage, ledger) = ledger_with_storage();
        let user_id = Uuid::new_v4();
        storage.seed_event(user_id, EventType::MessageSent, 1, 0, 0, Utc::now());
        storage.seed_event(
            user_id,
            EventType::MessageSent,
            7,
            0,
            0,
            Utc::now() - Duration::days(45),
        );

        let usage = ledger.current_period_usage(user_id).await.unwrap();
        assert_eq!(usage.messages, 1);
    }

    #[tokio::test]
    async fn empty_period_aggregates_to_zero() {
        let (_, ledger) = ledger_with_storage();
        let usage = ledger.current_period_usage(Uuid::new_v4()).await.unwrap();
        assert_eq!(usage, PeriodUsage::default());
    }

    #[tokio::test]
    async fn cost_is_rounded_to_four_decimals_at_storage() {
        let (storage, ledger) = ledger_with_storage();
        let user_id = Uuid::new_v4();
        let catalog = ModelCatalog::builtin();
        let model = catalog.find("gemini-1.5-flash").unwrap();

        // 1 input token at 0.000075/1k is far below the storage scale.
        let event = ledger
            .record(
                user_id,
                EventType::AiResponse,
                TokenBreakdown::Split { input: 1, output: 0 },
                0,
                0,
                Some(model),
                EventMetadata::Other(serde_json::json!({})),
            )
            .await
            .unwrap();
        assert_eq!(event.cost, dec!(0.0000));
    }
}
