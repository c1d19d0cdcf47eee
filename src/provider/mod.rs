//! Model provider abstraction: a turn opens one finite, non-restartable
//! stream of `{delta, usage?}` chunks. The stream may error at any point
//! after zero or more deltas.

pub mod classify;
pub mod sse;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use thiserror::Error;

use crate::models::Role;

pub use sse::HttpProvider;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: String,
    /// Final usage summary, typically carried by the last chunk.
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub provider: String,
    pub model_id: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ProviderMessage>,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Upstream(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

pub type ChunkStream =
    Pin<Box<dyn Stream<Item = std::result::Result<StreamChunk, ProviderError>> + Send>>;

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn open_stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkStream, ProviderError>;

    /// Drain a stream into its full text. Used by non-interactive callers
    /// such as title generation.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, ProviderError> {
        let mut stream = self.open_stream(request).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk?.delta);
        }
        Ok(text)
    }
}
