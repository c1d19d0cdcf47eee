//! Drives one chat turn end to end: admission, history assembly, provider
//! streaming, and finalization.
//!
//! The streaming half runs on its own task and talks to the HTTP handler
//! through a channel, so a client that disconnects mid-stream cannot prevent
//! the assistant message and its usage event from being persisted.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::jobs::TitleQueue;
use crate::models::{
    AttachmentUpload, Chat, EventMetadata, EventType, Role, User,
};
use crate::provider::{classify, ChatProvider, CompletionRequest, ProviderMessage, TokenUsage};
use crate::services::catalog::{ModelCatalog, ModelDescriptor};
use crate::services::ledger::UsageLedger;
use crate::services::pricing::TokenBreakdown;
use crate::services::quota::{Admission, QuotaDimension, QuotaGate};
use crate::storage::Storage;

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant. You can reason about the user \
request. If you do reason, you MUST wrap your thinking process in <think> tags like this: \
<think>my thought process</think>. Then provide your final answer.";

/// Roughly four characters per token; used only when the provider does not
/// report token counts.
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt: String,
    pub model: String,
    pub chat_id: Option<Uuid>,
    pub attachments: Vec<AttachmentUpload>,
}

/// Events relayed to the client, in order: one `Started`, zero or more
/// `Delta`s, at most one `Error`, one `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    Started { chat_id: Uuid },
    Delta { text: String },
    Error { message: String },
    Done,
}

impl TurnEvent {
    pub fn to_sse_data(&self) -> String {
        match self {
            TurnEvent::Started { chat_id } => {
                serde_json::json!({ "chat_id": chat_id }).to_string()
            }
            TurnEvent::Delta { text } => serde_json::json!({ "text": text }).to_string(),
            TurnEvent::Error { message } => serde_json::json!({ "error": message }).to_string(),
            TurnEvent::Done => "[Done]".to_string(),
        }
    }
}

pub struct StreamOrchestrator {
    storage: Arc<dyn Storage>,
    ledger: Arc<UsageLedger>,
    quota: QuotaGate,
    catalog: Arc<ModelCatalog>,
    provider: Arc<dyn ChatProvider>,
    titles: TitleQueue,
    config: Config,
}

struct TurnContext {
    storage: Arc<dyn Storage>,
    ledger: Arc<UsageLedger>,
    provider: Arc<dyn ChatProvider>,
    titles: TitleQueue,
    user_id: Uuid,
    chat: Chat,
    model: ModelDescriptor,
    history: Vec<ProviderMessage>,
}

impl StreamOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        ledger: Arc<UsageLedger>,
        quota: QuotaGate,
        catalog: Arc<ModelCatalog>,
        provider: Arc<dyn ChatProvider>,
        titles: TitleQueue,
        config: Config,
    ) -> Self {
        Self { storage, ledger, quota, catalog, provider, titles, config }
    }

    /// Run admission and the synchronous half of a turn, then hand the
    /// streaming half to a background task. Admission failures return
    /// before any side effect.
    pub async fn start_turn(
        &self,
        user: &User,
        request: TurnRequest,
    ) -> Result<ReceiverStream<TurnEvent>> {
        // Admitting: model, tier access, quota. Nothing is persisted yet.
        let model = self
            .catalog
            .find(&request.model)
            .ok_or(AppError::InvalidModel)?
            .clone();
        if !ModelCatalog::is_accessible(&model, user.subscription_tier) {
            return Err(AppError::TierRequired);
        }

        let limits = self.config.tier_limits(user.subscription_tier);
        match self
            .quota
            .check(user.id, QuotaDimension::Messages, limits.message_limit)
            .await?
        {
            Admission::Admitted => {}
            Admission::Rejected { reason } => return Err(AppError::QuotaExceeded(reason)),
        }

        let chat = match request.chat_id {
            Some(chat_id) => self
                .storage
                .find_chat(user.id, chat_id)
                .await?
                .ok_or(AppError::NotFound)?,
            None => self.storage.create_chat(user.id, "New Chat").await?,
        };

        // HistoryAssembled: bounded window of prior turns, then this prompt.
        let mut history: Vec<ProviderMessage> = self
            .storage
            .recent_messages(chat.id, self.config.history_window)
            .await?
            .into_iter()
            .map(|m| ProviderMessage { role: m.role, content: m.content })
            .collect();
        history.push(ProviderMessage {
            role: Role::User,
            content: request.prompt.clone(),
        });

        // The user's input is durable regardless of what the provider does
        // later.
        let user_message = self
            .storage
            .create_message(chat.id, Role::User, &request.prompt)
            .await?;

        if !request.attachments.is_empty() {
            self.storage
                .create_attachments(user_message.id, &request.attachments)
                .await?;
            for upload in &request.attachments {
                self.ledger
                    .record(
                        user.id,
                        EventType::FileUpload,
                        TokenBreakdown::None,
                        0,
                        upload.size_bytes,
                        None,
                        EventMetadata::FileUpload {
                            chat_id: chat.id,
                            mime_type: upload.mime_type.clone(),
                            filename: upload.name.clone(),
                        },
                    )
                    .await?;
            }
        }

        self.ledger
            .record(
                user.id,
                EventType::MessageSent,
                TokenBreakdown::None,
                1,
                0,
                None,
                EventMetadata::MessageSent {
                    chat_id: chat.id,
                    model: model.id.clone(),
                    has_attachments: !request.attachments.is_empty(),
                },
            )
            .await?;

        // Streaming + Finalizing run detached from the client connection.
        let (tx, rx) = mpsc::channel(32);
        let context = TurnContext {
            storage: self.storage.clone(),
            ledger: self.ledger.clone(),
            provider: self.provider.clone(),
            titles: self.titles.clone(),
            user_id: user.id,
            chat,
            model,
            history,
        };
        tokio::spawn(drive_turn(context, tx));

        Ok(ReceiverStream::new(rx))
    }
}

async fn drive_turn(ctx: TurnContext, tx: mpsc::Sender<TurnEvent>) {
    // Sends are best-effort: a closed channel means the client went away,
    // and the turn still has to finalize.
    let _ = tx.send(TurnEvent::Started { chat_id: ctx.chat.id }).await;

    let input_chars: usize = ctx.history.iter().map(|m| m.content.len()).sum();
    let request = CompletionRequest {
        provider: ctx.model.provider.clone(),
        model_id: ctx.model.id.clone(),
        system_prompt: Some(SYSTEM_PROMPT.to_string()),
        messages: ctx.history.clone(),
    };

    let mut accumulated = String::new();
    let mut reported_usage: Option<TokenUsage> = None;
    let mut stream_error: Option<String> = None;

    match ctx.provider.open_stream(request).await {
        Ok(mut stream) => {
            use futures::StreamExt;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) => {
                        if let Some(usage) = chunk.usage {
                            reported_usage = Some(usage);
                        }
                        if chunk.delta.is_empty() {
                            continue;
                        }
                        accumulated.push_str(&chunk.delta);
                        let _ = tx.send(TurnEvent::Delta { text: chunk.delta }).await;
                    }
                    Err(e) => {
                        stream_error = Some(e.to_string());
                        break;
                    }
                }
            }
        }
        Err(e) => stream_error = Some(e.to_string()),
    }

    if let Some(raw) = &stream_error {
        tracing::error!(chat_id = %ctx.chat.id, error = %raw, "provider stream failed");
        let _ = tx
            .send(TurnEvent::Error { message: classify::user_facing_message(raw) })
            .await;
    }

    // Finalizing: whatever text accumulated is the response, success or not.
    let (input_tokens, output_tokens, estimated) = match reported_usage {
        Some(usage) => (usage.input_tokens, usage.output_tokens, false),
        None => (
            (input_chars / CHARS_PER_TOKEN) as u64,
            (accumulated.len() / CHARS_PER_TOKEN) as u64,
            true,
        ),
    };

    if let Err(e) = ctx
        .storage
        .create_message(ctx.chat.id, Role::Assistant, &accumulated)
        .await
    {
        tracing::error!(chat_id = %ctx.chat.id, error = %e, "failed to persist assistant message");
    }

    let breakdown = if estimated {
        TokenBreakdown::Flat { total: input_tokens + output_tokens }
    } else {
        TokenBreakdown::Split { input: input_tokens, output: output_tokens }
    };
    if let Err(e) = ctx
        .ledger
        .record(
            ctx.user_id,
            EventType::AiResponse,
            breakdown,
            0,
            0,
            Some(&ctx.model),
            EventMetadata::AiResponse {
                chat_id: ctx.chat.id,
                model: ctx.model.id.clone(),
                input_tokens,
                output_tokens,
                response_length: accumulated.len() as u64,
                estimated,
            },
        )
        .await
    {
        tracing::error!(chat_id = %ctx.chat.id, error = %e, "failed to record ai_response usage");
    }

    let message_count = ctx
        .storage
        .message_count(ctx.chat.id)
        .await
        .unwrap_or(u64::MAX);
    if ctx.chat.title == "New Chat" || message_count <= 2 {
        ctx.titles.enqueue(ctx.chat.id);
    }

    let _ = tx.send(TurnEvent::Done).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_to_the_wire_shapes() {
        let chat_id = Uuid::nil();
        assert_eq!(
            TurnEvent::Started { chat_id }.to_sse_data(),
            format!("{{\"chat_id\":\"{}\"}}", chat_id)
        );
        assert_eq!(
            TurnEvent::Delta { text: "hi".into() }.to_sse_data(),
            "{\"text\":\"hi\"}"
        );
        assert_eq!(
            TurnEvent::Error { message: "boom".into() }.to_sse_data(),
            "{\"error\":\"boom\"}"
        );
        assert_eq!(TurnEvent::Done.to_sse_data(), "[Done]");
    }
}
