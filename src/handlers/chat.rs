use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension, Json,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::errors::{AppError, Result};
use crate::handlers::AppState;
use crate::models::{AttachmentUpload, User};
use crate::services::orchestrator::TurnRequest;

#[derive(Debug, Deserialize)]
pub struct StreamBody {
    pub prompt: String,
    pub model: Option<String>,
    pub chat_id: Option<Uuid>,
    #[serde(default)]
    pub attachments: Vec<AttachmentUpload>,
}

/// One chat turn. Admission failures come back as plain JSON 4xx; once
/// admitted, the response is an event stream and any later failure travels
/// inside it.
pub async fn stream(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<StreamBody>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    if body.prompt.trim().is_empty() {
        return Err(AppError::Validation("The prompt field is required.".into()));
    }
    if body.prompt.chars().count() > state.config.prompt_max_length {
        return Err(AppError::Validation(format!(
            "The prompt may not be greater than {} characters.",
            state.config.prompt_max_length
        )));
    }

    let request = TurnRequest {
        prompt: body.prompt,
        model: body.model.unwrap_or_else(|| state.config.default_model.clone()),
        chat_id: body.chat_id,
        attachments: body.attachments,
    };

    let events = state.orchestrator.start_turn(&user, request).await?;
    let stream = events.map(|event| Ok(Event::default().data(event.to_sse_data())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
