//! HTTP provider adapter speaking `text/event-stream`.
//!
//! Wire contract: POST `{base}/v1/chat/stream` with
//! `{provider, model, system, messages, stream: true}`; the response body is
//! a sequence of `data: {"delta": ..., "usage"?: ..., "error"?: ...}` frames
//! terminated by `data: [DONE]`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::config::Config;
use crate::provider::{
    ChatProvider, ChunkStream, CompletionRequest, ProviderError, StreamChunk, TokenUsage,
};

pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.provider_base_url.clone(), config.provider_api_key.clone())
    }
}

#[async_trait]
impl ChatProvider for HttpProvider {
    async fn open_stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<ChunkStream, ProviderError> {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();
        let body = serde_json::json!({
            "provider": request.provider,
            "model": request.model_id,
            "system": request.system_prompt,
            "messages": messages,
            "stream": true,
        });

        let mut http_request = self
            .client
            .post(format!("{}/v1/chat/stream", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!("{}: {}", status, text)));
        }

        Ok(Box::pin(UpstreamEventStream::new(
            response.bytes_stream().boxed(),
        )))
    }
}

#[derive(Debug, serde::Deserialize)]
struct WireEvent {
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
    #[serde(default)]
    error: Option<String>,
}

struct UpstreamEventStream {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    parser: SseFrameParser,
    done: bool,
}

impl UpstreamEventStream {
    fn new(inner: BoxStream<'static, reqwest::Result<Bytes>>) -> Self {
        Self {
            inner,
            parser: SseFrameParser::new(),
            done: false,
        }
    }
}

impl Stream for UpstreamEventStream {
    type Item = std::result::Result<StreamChunk, ProviderError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.done {
                return Poll::Ready(None);
            }

            while let Some(data) = this.parser.next_data() {
                if data == "[DONE]" {
                    this.done = true;
                    return Poll::Ready(None);
                }
                match serde_json::from_str::<WireEvent>(&data) {
                    Ok(event) => {
                        if let Some(error) = event.error {
                            this.done = true;
                            return Poll::Ready(Some(Err(ProviderError::Upstream(error))));
                        }
                        return Poll::Ready(Some(Ok(StreamChunk {
                            delta: event.delta.unwrap_or_default(),
                            usage: event.usage,
                        })));
                    }
                    Err(e) => {
                        tracing::warn!("unparseable stream frame: {} - data: {}", e, data);
                    }
                }
            }

            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.parser.push(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Incremental `data:`-frame extraction over a byte stream. Frames are
/// delimited by blank lines; comment and event-name lines are skipped.
struct SseFrameParser {
    buffer: Vec<u8>,
    pos: usize,
}

impl SseFrameParser {
    fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            pos: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        if self.pos > 0 && self.buffer.len() + bytes.len() > 16384 {
            self.buffer.drain(..self.pos);
            self.pos = 0;
        }
        self.buffer.extend_from_slice(bytes);
    }

    fn next_data(&mut self) -> Option<String> {
        loop {
            let start = self.pos;
            let (rel, delim_len) = frame_boundary(&self.buffer[start..])?;
            let block = String::from_utf8_lossy(&self.buffer[start..start + rel]).into_owned();
            self.pos = start + rel + delim_len;

            if self.pos > 8192 {
                self.buffer.drain(..self.pos);
                self.pos = 0;
            }

            for line in block.lines() {
                let line = line.trim();
                if let Some(data) = line.strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        return Some(data.to_string());
                    }
                }
            }
            // No data line in this block (comment or event name only).
        }
    }
}

/// Position and length of the earliest blank-line frame delimiter. Servers
/// may emit LF or CRLF line endings.
fn frame_boundary(hay: &[u8]) -> Option<(usize, usize)> {
    let lf = hay.windows(2).position(|w| w == b"\n\n");
    let crlf = hay.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) if b < a => Some((b, 4)),
        (Some(a), _) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}
