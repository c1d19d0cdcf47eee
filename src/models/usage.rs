use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageSent,
    AiResponse,
    FileUpload,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageSent => "message_sent",
            EventType::AiResponse => "ai_response",
            EventType::FileUpload => "file_upload",
        }
    }
}

/// Billable event, immutable once recorded. `cost` is fixed at creation time
/// and never recomputed from the inputs.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_type: EventType,
    pub tokens: u64,
    pub message_count: u32,
    pub bytes: u64,
    pub cost: Decimal,
    pub metadata: EventMetadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub user_id: Uuid,
    pub event_type: EventType,
    pub tokens: u64,
    pub message_count: u32,
    pub bytes: u64,
    pub cost: Decimal,
    pub metadata: EventMetadata,
}

/// Known metadata shapes per event type, with an open map as the escape
/// hatch for anything provider-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventMetadata {
    MessageSent {
        chat_id: Uuid,
        model: String,
        has_attachments: bool,
    },
    AiResponse {
        chat_id: Uuid,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
        response_length: u64,
        /// True when token counts were approximated from character counts
        /// rather than reported by the provider.
        estimated: bool,
    },
    FileUpload {
        chat_id: Uuid,
        mime_type: String,
        filename: String,
    },
    Other(serde_json::Value),
}

/// Aggregate usage over the current billing period. Always derived from the
/// event set at query time; there is no counter that can drift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PeriodUsage {
    pub messages: u64,
    pub tokens: u64,
    pub bytes: u64,
    pub cost: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_json() {
        let metadata = EventMetadata::AiResponse {
            chat_id: Uuid::new_v4(),
            model: "gpt-4o".into(),
            input_tokens: 120,
            output_tokens: 80,
            response_length: 320,
            estimated: false,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        let back: EventMetadata = serde_json::from_value(value).unwrap();
        assert!(matches!(back, EventMetadata::AiResponse { output_tokens: 80, .. }));
    }

    #[test]
    fn unrecognized_metadata_falls_back_to_open_map() {
        let value = serde_json::json!({ "vendor_trace_id": "abc-123" });
        let back: EventMetadata = serde_json::from_value(value).unwrap();
        assert!(matches!(back, EventMetadata::Other(_)));
    }
}
