#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use chat_stream_server::config::Config;
use chat_stream_server::provider::{
    ChatProvider, ChunkStream, CompletionRequest, ProviderError, StreamChunk, TokenUsage,
};
use chat_stream_server::storage::MemoryStorage;
use chat_stream_server::{build_state, create_app};

/// Replays a fixed sequence of chunks for every opened stream, recording the
/// requests it was handed so tests can assert on history assembly.
pub struct ScriptedProvider {
    deltas: Vec<String>,
    usage: Option<TokenUsage>,
    error: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn succeeding(deltas: &[&str], usage: Option<TokenUsage>) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            usage,
            error: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_after(deltas: &[&str], error: &str) -> Self {
        Self {
            deltas: deltas.iter().map(|d| d.to_string()).collect(),
            usage: None,
            error: Some(error.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn open_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<ChunkStream, ProviderError> {
        self.requests.lock().unwrap().push(request);

        let mut items: Vec<Result<StreamChunk, ProviderError>> = self
            .deltas
            .iter()
            .map(|delta| {
                Ok(StreamChunk {
                    delta: delta.clone(),
                    usage: None,
                })
            })
            .collect();
        if let Some(error) = &self.error {
            items.push(Err(ProviderError::Upstream(error.clone())));
        } else if let Some(usage) = self.usage {
            items.push(Ok(StreamChunk {
                delta: String::new(),
                usage: Some(usage),
            }));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

pub struct TestApp {
    pub app: Router,
    pub storage: Arc<MemoryStorage>,
    pub provider: Arc<ScriptedProvider>,
    pub config: Config,
}

pub fn test_app(provider: ScriptedProvider) -> TestApp {
    let config = Config::from_env().expect("Failed to load config");
    let storage = Arc::new(MemoryStorage::new());
    let provider = Arc::new(provider);
    let state = build_state(config.clone(), storage.clone(), provider.clone())
        .expect("Failed to build state");
    TestApp {
        app: create_app(state),
        storage,
        provider,
        config,
    }
}

pub async fn post_stream(app: &Router, token: &str, body: Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat/stream")
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get_usage(app: &Router, token: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri("/api/usage")
                .header("authorization", format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Pull the chat id out of the first `data:` frame of a stream body.
pub fn chat_id_from_body(body: &str) -> Uuid {
    let line = body
        .lines()
        .find(|line| line.starts_with("data: {\"chat_id\""))
        .expect("no chat_id frame in stream body");
    let value: Value = serde_json::from_str(line.trim_start_matches("data: ")).unwrap();
    value["chat_id"].as_str().unwrap().parse().unwrap()
}

/// Every `data:` payload in order, frame markers stripped.
pub fn data_frames(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|payload| payload.to_string())
        .collect()
}
