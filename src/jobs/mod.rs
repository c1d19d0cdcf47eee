//! Background title generation. Fire-and-forget: the request path enqueues
//! a chat id and moves on; failures here never affect a turn.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::provider::{ChatProvider, CompletionRequest, ProviderMessage};
use crate::models::Role;
use crate::storage::Storage;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct TitleQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl TitleQueue {
    pub fn enqueue(&self, chat_id: Uuid) {
        if self.tx.send(chat_id).is_err() {
            tracing::warn!(chat_id = %chat_id, "title queue is closed; dropping job");
        }
    }
}

pub struct TitleWorker {
    storage: Arc<dyn Storage>,
    provider: Arc<dyn ChatProvider>,
    provider_name: String,
    model_id: String,
}

impl TitleWorker {
    pub fn spawn(
        storage: Arc<dyn Storage>,
        provider: Arc<dyn ChatProvider>,
        provider_name: String,
        model_id: String,
    ) -> TitleQueue {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = TitleWorker { storage, provider, provider_name, model_id };

        tokio::spawn(async move {
            while let Some(chat_id) = rx.recv().await {
                worker.run_with_retries(chat_id).await;
            }
        });

        TitleQueue { tx }
    }

    async fn run_with_retries(&self, chat_id: Uuid) {
        for attempt in 0..MAX_ATTEMPTS {
            match self.generate_title(chat_id).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        attempt = attempt + 1,
                        error = %e,
                        "title generation failed"
                    );
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        tracing::warn!(chat_id = %chat_id, "giving up on title generation");
    }

    async fn generate_title(&self, chat_id: Uuid) -> anyhow::Result<()> {
        let messages = self.storage.first_messages(chat_id, 2).await?;
        if messages.is_empty() {
            return Ok(());
        }

        let conversation = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Generate a short, concise title (max 4 words) for this chat conversation. \
             Do not use quotes.\n\nConversation:\n{}",
            conversation
        );

        let title = self
            .provider
            .complete(CompletionRequest {
                provider: self.provider_name.clone(),
                model_id: self.model_id.clone(),
                system_prompt: None,
                messages: vec![ProviderMessage { role: Role::User, content: prompt }],
            })
            .await?;

        let title = title.trim();
        if title.is_empty() {
            anyhow::bail!("provider returned an empty title");
        }
        self.storage.update_chat_title(chat_id, title).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChunkStream, ProviderError, StreamChunk};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingProvider {
        requests: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl ChatProvider for RecordingProvider {
        async fn open_stream(
            &self,
            request: CompletionRequest,
        ) -> std::result::Result<ChunkStream, ProviderError> {
            self.requests.lock().unwrap().push(request);
            Ok(Box::pin(futures::stream::iter(vec![Ok(StreamChunk {
                delta: "Generated Title".to_string(),
                usage: None,
            })])))
        }
    }

    #[tokio::test]
    async fn title_comes_from_the_earliest_two_messages() {
        let storage = Arc::new(MemoryStorage::new());
        let chat = storage.create_chat(Uuid::new_v4(), "New Chat").await.unwrap();
        storage
            .create_message(chat.id, Role::User, "first question")
            .await
            .unwrap();
        storage
            .create_message(chat.id, Role::Assistant, "first answer")
            .await
            .unwrap();
        storage
            .create_message(chat.id, Role::User, "later follow-up")
            .await
            .unwrap();

        let provider = Arc::new(RecordingProvider {
            requests: Mutex::new(Vec::new()),
        });
        let queue = TitleWorker::spawn(
            storage.clone(),
            provider.clone(),
            "groq".to_string(),
            "llama-3.1-8b-instant".to_string(),
        );
        queue.enqueue(chat.id);

        let mut title = String::new();
        for _ in 0..50 {
            title = storage.chat(chat.id).unwrap().title;
            if title != "New Chat" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(title, "Generated Title");

        let requests = provider.requests.lock().unwrap();
        let prompt = &requests[0].messages[0].content;
        assert!(prompt.contains("first question"));
        assert!(prompt.contains("first answer"));
        assert!(!prompt.contains("later follow-up"));
    }
}
