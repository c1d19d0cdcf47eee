pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    Attachment, AttachmentUpload, Chat, Message, NewUsageEvent, PeriodUsage, Role, UsageEvent, User,
};

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Narrow persistence contract consumed by the core. Everything behind it is
/// an independent insert or a read; no method holds locks across calls.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>>;

    async fn find_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<Option<Chat>>;
    async fn create_chat(&self, user_id: Uuid, title: &str) -> Result<Chat>;
    async fn update_chat_title(&self, chat_id: Uuid, title: &str) -> Result<()>;

    async fn message_count(&self, chat_id: Uuid) -> Result<u64>;
    /// The most recent `limit` messages, returned in chronological order.
    async fn recent_messages(&self, chat_id: Uuid, limit: usize) -> Result<Vec<Message>>;
    /// The earliest `limit` messages, in chronological order.
    async fn first_messages(&self, chat_id: Uuid, limit: usize) -> Result<Vec<Message>>;
    async fn create_message(&self, chat_id: Uuid, role: Role, content: &str) -> Result<Message>;
    async fn create_attachments(
        &self,
        message_id: Uuid,
        uploads: &[AttachmentUpload],
    ) -> Result<Vec<Attachment>>;

    async fn insert_usage_event(&self, event: &NewUsageEvent) -> Result<UsageEvent>;
    async fn sum_usage_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PeriodUsage>;
}
