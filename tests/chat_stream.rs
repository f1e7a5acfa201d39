mod common;

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use serde_json::Value;

use travel_chat::models::{MessageRole, MessageStatus};
use travel_chat::{ChatSession, ConversationState, HttpTravelApi, StreamEvent, StreamingSession, TravelApi};

use common::{serve, sse};

struct ChatBackend {
    status: StatusCode,
    body: String,
    requests: Mutex<Vec<Value>>,
}

async fn chat_stream(State(backend): State<Arc<ChatBackend>>, Json(request): Json<Value>) -> Response {
    backend.requests.lock().unwrap().push(request);
    (
        backend.status,
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from(backend.body.clone()),
    )
        .into_response()
}

async fn api_for(status: StatusCode, body: String) -> (Arc<ChatBackend>, Arc<dyn TravelApi>) {
    let backend = Arc::new(ChatBackend { status, body, requests: Mutex::default() });
    let router = Router::new()
        .route("/api/chat/stream", post(chat_stream))
        .with_state(Arc::clone(&backend));
    let config = serve(router).await;
    (backend, Arc::new(HttpTravelApi::new(config)))
}

#[tokio::test]
async fn streamed_reply_lands_in_one_assistant_message() {
    let body = sse(&[
        r#"{"type":"token","content":"Lisbon is "}"#,
        r#"{"type":"tool_start","name":"weather","input":{"city":"Lisbon"}}"#,
        r#"{"type":"tool_end","name":"weather"}"#,
        r#"{"type":"token","content":"sunny."}"#,
        r#"{"type":"end"}"#,
    ]);
    let (backend, api) = api_for(StatusCode::OK, body).await;
    let chat = ChatSession::new(api, ConversationState::new());

    let id = chat.send("Weather in Lisbon?").await.unwrap();

    let messages = chat.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    let reply = chat.conversation().message(&id).unwrap();
    assert_eq!(reply.content, "Lisbon is sunny.");
    assert_eq!(reply.status, Some(MessageStatus::Success));
    assert_eq!(reply.collapsible_content.as_deref(), Some("Using weather…"));
    assert!(!chat.conversation().is_loading());

    let request = backend.requests.lock().unwrap()[0].clone();
    assert_eq!(request["messages"].as_array().unwrap().len(), 1);
    assert_eq!(request["messages"][0]["role"], "user");
}

#[tokio::test]
async fn server_error_marks_reply_failed() {
    let (_backend, api) = api_for(StatusCode::INTERNAL_SERVER_ERROR, "boom".into()).await;
    let chat = ChatSession::new(api, ConversationState::new());

    let id = chat.send("Hello").await.unwrap();

    let reply = chat.conversation().message(&id).unwrap();
    assert_eq!(reply.status, Some(MessageStatus::Error));
    assert!(reply.collapsible_content.unwrap().contains("500"));
    assert!(!chat.conversation().is_loading());
}

#[tokio::test]
async fn stream_without_end_event_still_ends_once() {
    let body = format!("{}data: {{\"type\":\"tok", sse(&[r#"{"type":"token","content":"cut"}"#]));
    let (_backend, api) = api_for(StatusCode::OK, body).await;
    let session = StreamingSession::new(api);

    let events: Vec<StreamEvent> = session.events(Vec::new()).collect().await;

    assert_eq!(
        events,
        vec![StreamEvent::Token { content: "cut".into() }, StreamEvent::End]
    );
}

#[tokio::test]
async fn malformed_frame_is_reported_and_stream_continues() {
    let body = sse(&[r#"{"type":"token","content":"a"}"#, "not json", r#"{"type":"token","content":"b"}"#, r#"{"type":"end"}"#]);
    let (_backend, api) = api_for(StatusCode::OK, body).await;
    let session = StreamingSession::new(api);

    let events: Vec<StreamEvent> = session.events(Vec::new()).collect().await;

    assert_eq!(events.len(), 4);
    assert!(matches!(&events[1], StreamEvent::Error { message } if message.starts_with("Failed to decode stream event")));
    assert_eq!(events[2], StreamEvent::Token { content: "b".into() });
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}
