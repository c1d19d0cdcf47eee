//! Postgres storage backend over sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::models::{
    Attachment, AttachmentUpload, Chat, Message, NewUsageEvent, PeriodUsage, Role,
    SubscriptionTier, UsageEvent, User,
};
use crate::storage::Storage;

#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn find_user_by_token(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, email, subscription_tier FROM users WHERE api_token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            email: row.get("email"),
            subscription_tier: SubscriptionTier::parse(row.get::<String, _>("subscription_tier").as_str()),
        }))
    }

    async fn find_chat(&self, user_id: Uuid, chat_id: Uuid) -> Result<Option<Chat>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, created_at FROM chats WHERE id = $1 AND user_id = $2",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Chat {
            id: row.get("id"),
            user_id: row.get("user_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
        }))
    }

    async fn create_chat(&self, user_id: Uuid, title: &str) -> Result<Chat> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO chats (id, user_id, title) VALUES ($1, $2, $3) RETURNING created_at",
        )
        .bind(id)
        .bind(user_id)
        .bind(title)
        .fetch_one(&self.pool)
        .await?;

        Ok(Chat {
            id,
            user_id,
            title: title.to_string(),
            created_at: row.get("created_at"),
        })
    }

    async fn update_chat_title(&self, chat_id: Uuid, title: &str) -> Result<()> {
        sqlx::query("UPDATE chats SET title = $2 WHERE id = $1")
            .bind(chat_id)
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn message_count(&self, chat_id: Uuid) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM messages WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("count") as u64)
    }

    async fn recent_messages(&self, chat_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, role, content, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(chat_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows
            .into_iter()
            .map(|row| Message {
                id: row.get("id"),
                chat_id: row.get("chat_id"),
                role: Role::parse(row.get::<String, _>("role").as_str()).unwrap_or(Role::User),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    async fn first_messages(&self, chat_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, role, content, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(chat_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Message {
                id: row.get("id"),
                chat_id: row.get("chat_id"),
                role: Role::parse(row.get::<String, _>("role").as_str()).unwrap_or(Role::User),
                content: row.get("content"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn create_message(&self, chat_id: Uuid, role: Role, content: &str) -> Result<Message> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO messages (id, chat_id, role, content)
            VALUES ($1, $2, $3, $4)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(chat_id)
        .bind(role.as_str())
        .bind(content)
        .fetch_one(&self.pool)
        .await?;

        Ok(Message {
            id,
            chat_id,
            role,
            content: content.to_string(),
            created_at: row.get("created_at"),
        })
    }

    async fn create_attachments(
        &self,
        message_id: Uuid,
        uploads: &[AttachmentUpload],
    ) -> Result<Vec<Attachment>> {
        let mut attachments = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO attachments (id, message_id, name, mime_type, size_bytes)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(id)
            .bind(message_id)
            .bind(&upload.name)
            .bind(&upload.mime_type)
            .bind(upload.size_bytes as i64)
            .execute(&self.pool)
            .await?;

            attachments.push(Attachment {
                id,
                message_id,
                name: upload.name.clone(),
                mime_type: upload.mime_type.clone(),
                size_bytes: upload.size_bytes,
            });
        }
        Ok(attachments)
    }

    async fn insert_usage_event(&self, event: &NewUsageEvent) -> Result<UsageEvent> {
        let id = Uuid::new_v4();
        let metadata = serde_json::to_value(&event.metadata)
            .map_err(|e| AppError::Internal(e.into()))?;

        let row = sqlx::query(
            r#"
            INSERT INTO usage_events (id, user_id, event_type, tokens, messages, bytes, cost, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING created_at
            "#,
        )
        .bind(id)
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(event.tokens as i64)
        .bind(event.message_count as i32)
        .bind(event.bytes as i64)
        .bind(event.cost)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageEvent {
            id,
            user_id: event.user_id,
            event_type: event.event_type,
            tokens: event.tokens,
            message_count: event.message_count,
            bytes: event.bytes,
            cost: event.cost,
            metadata: event.metadata.clone(),
            created_at: row.get("created_at"),
        })
    }

    async fn sum_usage_between(
        &self,
        user_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<PeriodUsage> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(messages), 0)::BIGINT AS total_messages,
                COALESCE(SUM(tokens), 0)::BIGINT   AS total_tokens,
                COALESCE(SUM(bytes), 0)::BIGINT    AS total_bytes,
                COALESCE(SUM(cost), 0)             AS total_cost
            FROM usage_events
            WHERE user_id = $1 AND created_at >= $2 AND created_at < $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(PeriodUsage {
            messages: row.get::<i64, _>("total_messages") as u64,
            tokens: row.get::<i64, _>("total_tokens") as u64,
            bytes: row.get::<i64, _>("total_bytes") as u64,
            cost: row.get::<Decimal, _>("total_cost"),
        })
    }
}
