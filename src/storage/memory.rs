//! In-memory storage backend. Used by the test suites and as a volatile
//! fallback when no DATABASE_URL is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Mutex;
use uuid::Uuid;

use crate::errors::Result;
use crate::models::{
    Attachment, AttachmentUpload, Chat, EventMetadata, EventType, Message, NewUsageEvent,
    PeriodUsage, Role, SubscriptionTier, UsageEvent, User,
};
use crate::storage::Storage;

#[derive(Default)]
struct Inner {
    users: Vec<(String, User)>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    attachments: Vec<Attachment>,
    events: Vec<UsageEvent>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, token: &str, tier: SubscriptionTier) -> User {
        let user = User {
            id: Uuid::new_v4(),
            email: format!("{}@example.com", token),
            subscription_tier: tier,
        };
        self.lock().users.push((token.to_string(), user.clone()));
        user
    }

    /// Insert a pre-built event, bypassing cost calculation. Lets tests seed
    /// prior usage with explicit timestamps.
    pub fn seed_event(
        &self,
        user_id: Uuid,
        event_type: EventType,
        message_count: u32,
        tokens: u64,
        bytes: u64,
        created_at: DateTime<Utc>,
    ) {
        self.lock().events.push(UsageEvent {
            id: Uuid::new_v4(),
            user_id,
            event_type,
            tokens,
            message_count,
            bytes,
            cost: Decimal::ZERO,
            metadata: EventMetadata::Other(serde_json::json!({})),
            created_at,
        });
    }

    pub fn events_for(&self, user_id: Uuid) -> Vec<UsageEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn messages_in(&self, chat_id: Uuid) -> Vec<Message> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn chat(&self, chat_id: Uuid) -> Option<Chat> {
        self.lock().chats.iter().find(|c| c.id == chat_id).cloned()
    }

    pub fn chats_for(&self, user_id: Uuid) -> Vec<Chat> {
        self.lock()
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, user)| user.clone()))
    }

    async fn find_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<Option<Chat>> {
        Ok(self
            .lock()
            .chats
            .iter()
            .find(|c| c.id == chat_id && c.user_id == user_id)
            .cloned())
    }

    async fn create_chat(&self, user_id: Uuid, title: &str) -> Result<Chat> {
        let chat = Chat {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.lock().chats.push(chat.clone());
        Ok(chat)
    }

    async fn update_chat_title(&self, chat_id: Uuid, title: &str) -> Result<()> {
        let mut inner = self.lock();
        if let Some(chat) = inner.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.title = title.to_string();
        }
        Ok(())
    }

    async fn message_count(&self, chat_id: Uuid) -> Result<u64> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .count() as u64)
    }

    async fn recent_messages(&self, chat_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        let inner = self.lock();
        let mut recent: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .rev()
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn first_messages(&self, chat_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        Ok(self
            .lock()
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_message(&self, chat_id: Uuid, role: Role, content: &str) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            chat_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.lock().messages.push(message.clone());
        Ok(message)
    }

    async fn create_attachments(
        &self,
        message_id: Uuid,
        uploads: &[AttachmentUpload],
    ) -> Result<Vec<Attachment>> {
        let attachments: Vec<Attachment> = uploads
            .iter()
            .map(|upload| Attachment {
                id: Uuid::new_v4(),
                message_id,
                name: upload.name.clone(),
                mime_type: upload.mime_type.clone(),
                size_bytes: upload.size_bytes,
            })
            .collect();
        self.lock().attachments.extend(attachments.iter().cloned());
        Ok(attachments)
    }

    async fn insert_usage_event(&self, event: &NewUsageEvent) -> Result<UsageEvent> {
        let stored = UsageEvent {
            id: Uuid::new_v4(),
            user_id: event.user_id,
            event_type: event.event_type,
            tokens: event.tokens,
            message_count: event.message_count,
            bytes: event.bytes,
            cost: event.cost,
            metadata: event.metadata.clone(),
            created_at: Utc::now(),
        };
        self.lock().events.push(stored.clone());
        Ok(stored)
    }

    async fn sum_usage_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PeriodUsage> {
        let inner = self.lock();
        let mut usage = PeriodUsage::default();
        for event in inner
            .events
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= from && e.created_at < to)
        {
            usage.messages += u64::from(event.message_count);
            usage.tokens += event.tokens;
            usage.bytes += event.bytes;
            usage.cost += event.cost;
        }
        Ok(usage)
    }
}
