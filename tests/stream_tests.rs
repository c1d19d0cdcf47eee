mod common;

use axum::http::{header, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;

use chat_stream_server::models::{EventMetadata, EventType, Role, SubscriptionTier};
use chat_stream_server::provider::TokenUsage;

use common::*;

#[tokio::test]
async fn successful_turn_streams_deltas_and_finalizes() {
    let harness = test_app(ScriptedProvider::succeeding(
        &["Hello", " world"],
        Some(TokenUsage {
            input_tokens: 120,
            output_tokens: 45,
        }),
    ));
    let user = harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(&harness.app, "tok-free", json!({ "prompt": "Hi there" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = body_string(response).await;
    let frames = data_frames(&body);
    assert!(frames[0].starts_with("{\"chat_id\""));
    assert_eq!(frames[1], "{\"text\":\"Hello\"}");
    assert_eq!(frames[2], "{\"text\":\" world\"}");
    assert_eq!(frames.last().unwrap(), "[Done]");

    let chat_id = chat_id_from_body(&body);
    let messages = harness.storage.messages_in(chat_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hi there");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello world");

    let events = harness.storage.events_for(user.id);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::MessageSent);
    assert_eq!(events[0].message_count, 1);
    assert_eq!(events[0].cost, dec!(0));

    let response_event = &events[1];
    assert_eq!(response_event.event_type, EventType::AiResponse);
    assert_eq!(response_event.tokens, 165);
    match &response_event.metadata {
        EventMetadata::AiResponse {
            input_tokens,
            output_tokens,
            response_length,
            estimated,
            ..
        } => {
            assert_eq!(*input_tokens, 120);
            assert_eq!(*output_tokens, 45);
            assert_eq!(*response_length, "Hello world".len() as u64);
            assert!(!estimated);
        }
        other => panic!("unexpected metadata: {:?}", other),
    }
}

#[tokio::test]
async fn client_disconnect_cannot_skip_finalization() {
    let harness = test_app(ScriptedProvider::succeeding(&["Hello", " world"], None));
    let user = harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(&harness.app, "tok-free", json!({ "prompt": "Hi" })).await;
    assert_eq!(response.status(), StatusCode::OK);
    // Walk away without reading a single event.
    drop(response);

    // Finalization runs on its own task; poll until the billing event lands.
    let mut finalized = false;
    for _ in 0..50 {
        let events = harness.storage.events_for(user.id);
        if events.iter().any(|e| e.event_type == EventType::AiResponse) {
            finalized = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(finalized, "turn never finalized after client went away");

    let events = harness.storage.events_for(user.id);
    let responses = events
        .iter()
        .filter(|e| e.event_type == EventType::AiResponse)
        .count();
    assert_eq!(responses, 1);

    let chats = harness.storage.chats_for(user.id);
    assert_eq!(chats.len(), 1);
    let messages = harness.storage.messages_in(chats[0].id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "Hello world");
}

#[tokio::test]
async fn provider_failure_mid_stream_still_finalizes_once() {
    let harness = test_app(ScriptedProvider::failing_after(
        &["par", "tial"],
        "429 rate limit exceeded",
    ));
    let user = harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(&harness.app, "tok-free", json!({ "prompt": "Hi" })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    let frames = data_frames(&body);
    assert!(frames.contains(&"{\"text\":\"par\"}".to_string()));
    assert!(frames.contains(&"{\"text\":\"tial\"}".to_string()));
    assert!(frames
        .iter()
        .any(|frame| frame.contains("\"error\"") && frame.contains("rate limiting")));
    assert_eq!(frames.last().unwrap(), "[Done]");

    // The partial text is kept and billed exactly once, with estimated
    // token counts since the provider never reported usage.
    let chat_id = chat_id_from_body(&body);
    let messages = harness.storage.messages_in(chat_id);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "partial");

    let events = harness.storage.events_for(user.id);
    let responses: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::AiResponse)
        .collect();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].tokens > 0);
    match &responses[0].metadata {
        EventMetadata::AiResponse { estimated, .. } => assert!(*estimated),
        other => panic!("unexpected metadata: {:?}", other),
    }
}

#[tokio::test]
async fn immediate_provider_failure_still_records_the_turn() {
    let harness = test_app(ScriptedProvider::failing_after(&[], "internal server error"));
    let user = harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(&harness.app, "tok-free", json!({ "prompt": "Hi" })).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    let frames = data_frames(&body);
    assert!(frames.iter().any(|frame| frame.contains("\"error\"")));
    assert_eq!(frames.last().unwrap(), "[Done]");

    let events = harness.storage.events_for(user.id);
    let sent = events
        .iter()
        .filter(|e| e.event_type == EventType::MessageSent)
        .count();
    let responded = events
        .iter()
        .filter(|e| e.event_type == EventType::AiResponse)
        .count();
    assert_eq!(sent, 1);
    assert_eq!(responded, 1);
}

#[tokio::test]
async fn attachments_are_billed_per_file() {
    let harness = test_app(ScriptedProvider::succeeding(&["ok"], None));
    let user = harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(
        &harness.app,
        "tok-free",
        json!({
            "prompt": "see attached",
            "attachments": [
                { "name": "report.pdf", "mime_type": "application/pdf", "size_bytes": 2048 },
                { "name": "photo.png", "mime_type": "image/png", "size_bytes": 4096 }
            ]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_string(response).await;

    let events = harness.storage.events_for(user.id);
    let uploads: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == EventType::FileUpload)
        .collect();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].bytes, 2048);
    assert_eq!(uploads[1].bytes, 4096);
    match &uploads[0].metadata {
        EventMetadata::FileUpload {
            mime_type, filename, ..
        } => {
            assert_eq!(mime_type, "application/pdf");
            assert_eq!(filename, "report.pdf");
        }
        other => panic!("unexpected metadata: {:?}", other),
    }

    let sent = events
        .iter()
        .find(|e| e.event_type == EventType::MessageSent)
        .unwrap();
    match &sent.metadata {
        EventMetadata::MessageSent {
            has_attachments, ..
        } => assert!(has_attachments),
        other => panic!("unexpected metadata: {:?}", other),
    }
}

#[tokio::test]
async fn follow_up_turn_carries_prior_messages_in_order() {
    let harness = test_app(ScriptedProvider::succeeding(&["First answer"], None));
    harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(&harness.app, "tok-free", json!({ "prompt": "First question" })).await;
    let body = body_string(response).await;
    let chat_id = chat_id_from_body(&body);

    let response = post_stream(
        &harness.app,
        "tok-free",
        json!({ "prompt": "Second question", "chat_id": chat_id }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_string(response).await;

    // Pick out the second turn's request; the title job may have opened
    // streams of its own in between.
    let requests = harness.provider.requests();
    let second = requests
        .iter()
        .find(|r| {
            r.messages
                .last()
                .is_some_and(|m| m.content == "Second question")
        })
        .expect("second turn request not captured");
    let contents: Vec<&str> = second.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["First question", "First answer", "Second question"]
    );
    assert_eq!(second.messages[0].role, Role::User);
    assert_eq!(second.messages[1].role, Role::Assistant);
}

#[tokio::test]
async fn fresh_chat_gets_a_generated_title() {
    let harness = test_app(ScriptedProvider::succeeding(&["Rust Memory Basics"], None));
    harness.storage.add_user("tok-free", SubscriptionTier::Free);

    let response = post_stream(&harness.app, "tok-free", json!({ "prompt": "Explain ownership" })).await;
    let body = body_string(response).await;
    let chat_id = chat_id_from_body(&body);

    // Title generation runs on a background task; poll briefly.
    let mut title = String::new();
    for _ in 0..50 {
        title = harness.storage.chat(chat_id).unwrap().title;
        if title != "New Chat" {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(title, "Rust Memory Basics");
}
