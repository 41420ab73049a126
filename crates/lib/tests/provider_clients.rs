//! Integration test: point the OpenRouter and MessageBird clients at a local mock server and check
//! the requests they make and how they read responses.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    Json, Router,
};
use lib::channels::{DispatchError, MessageBirdChannel, ReplyDispatcher, ReplyTarget};
use lib::llm::{ChatMessage, CompletionBackend, LlmError, OpenRouterClient};
use lib::reply::{generate_reply, GenerationError, ReplyRequest};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Captured {
    path: String,
    headers: HeaderMap,
    body: serde_json::Value,
}

#[derive(Clone)]
struct Mock {
    status: StatusCode,
    response: serde_json::Value,
    captured: Arc<Mutex<Vec<Captured>>>,
}

async fn capture(
    State(mock): State<Mock>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    mock.captured.lock().unwrap().push(Captured {
        path: uri.path().to_string(),
        headers,
        body,
    });
    (mock.status, Json(mock.response.clone()))
}

/// Start a mock that answers every request with `status` and `response`. Returns base URL and captured requests.
async fn start_mock(
    status: StatusCode,
    response: serde_json::Value,
) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mock = Mock {
        status,
        response,
        captured: captured.clone(),
    };
    let app = Router::new().fallback(capture).with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{}", addr), captured)
}

fn header<'a>(c: &'a Captured, name: &str) -> Option<&'a str> {
    c.headers.get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn openrouter_request_carries_key_site_headers_and_two_turns() {
    let (base, captured) = start_mock(
        StatusCode::OK,
        serde_json::json!({
            "id": "gen-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "Sure, here you go." } }]
        }),
    )
    .await;
    let client = OpenRouterClient::new(Some(format!("{}/api/v1", base)), Some("or-key".to_string()))
        .with_site(
            Some("https://example.test".to_string()),
            Some("Example Bot".to_string()),
        );

    let request = ReplyRequest::new("store opens at 9", "when do you open?");
    let reply = generate_reply(&client, "vendor/model-1", &request, Duration::from_secs(5))
        .await
        .expect("reply");
    assert_eq!(reply, "Sure, here you go.");

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let c = &captured[0];
    assert_eq!(c.path, "/api/v1/chat/completions");
    assert_eq!(header(c, "authorization"), Some("Bearer or-key"));
    assert_eq!(header(c, "http-referer"), Some("https://example.test"));
    assert_eq!(header(c, "x-title"), Some("Example Bot"));
    assert_eq!(c.body["model"], "vendor/model-1");
    assert_eq!(c.body["messages"].as_array().map(|m| m.len()), Some(2));
    assert_eq!(c.body["messages"][0]["role"], "system");
    assert_eq!(c.body["messages"][1]["content"], "when do you open?");
    assert!(c.body.get("stream").is_none());
}

#[tokio::test]
async fn openrouter_without_site_headers_omits_them() {
    let (base, captured) = start_mock(
        StatusCode::OK,
        serde_json::json!({ "choices": [{ "message": { "content": "x" } }] }),
    )
    .await;
    let client = OpenRouterClient::new(Some(base), Some("k".to_string()));
    client
        .complete("m", vec![ChatMessage::user("hi")])
        .await
        .expect("completion");
    let captured = captured.lock().unwrap();
    assert_eq!(header(&captured[0], "http-referer"), None);
    assert_eq!(header(&captured[0], "x-title"), None);
}

#[tokio::test]
async fn openrouter_error_status_is_api_error() {
    let (base, _) = start_mock(
        StatusCode::TOO_MANY_REQUESTS,
        serde_json::json!({ "error": { "message": "rate limited" } }),
    )
    .await;
    let client = OpenRouterClient::new(Some(base), Some("k".to_string()));
    let err = client
        .complete("m", vec![ChatMessage::user("hi")])
        .await
        .unwrap_err();
    match err {
        LlmError::Api(msg) => assert!(msg.contains("429"), "{}", msg),
        other => panic!("expected api error, got {:?}", other),
    }
}

#[tokio::test]
async fn openrouter_empty_choices_is_generation_failure() {
    let (base, _) = start_mock(StatusCode::OK, serde_json::json!({ "choices": [] })).await;
    let client = OpenRouterClient::new(Some(base), Some("k".to_string()));
    let err = generate_reply(
        &client,
        "m",
        &ReplyRequest::new("c", "q"),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, GenerationError::NoChoices));
}

#[tokio::test]
async fn messagebird_conversation_reply() {
    let (base, captured) = start_mock(StatusCode::ACCEPTED, serde_json::json!({ "id": "m1" })).await;
    let channel = MessageBirdChannel::new(Some("mb-key".to_string()), None, &base, &base);

    channel
        .send_reply(&ReplyTarget::Conversation("conv-42".to_string()), "reply text")
        .await
        .expect("send");

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let c = &captured[0];
    assert_eq!(c.path, "/conversations/conv-42/messages");
    assert_eq!(header(c, "authorization"), Some("AccessKey mb-key"));
    assert_eq!(
        c.body,
        serde_json::json!({ "type": "text", "content": { "text": "reply text" } })
    );
}

#[tokio::test]
async fn messagebird_conversation_id_cannot_escape_its_path_segment() {
    let (base, captured) = start_mock(StatusCode::ACCEPTED, serde_json::json!({ "id": "m1" })).await;
    let conversations_base = format!("{}/v1", base);
    let channel = MessageBirdChannel::new(Some("mb-key".to_string()), None, &conversations_base, &base);

    channel
        .send_reply(&ReplyTarget::Conversation("x/../../admin?y=".to_string()), "reply text")
        .await
        .expect("send");

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    let path = &captured[0].path;
    assert!(path.starts_with("/v1/conversations/x%2F"), "{}", path);
    assert!(path.ends_with("/messages"), "{}", path);
    assert!(!path.contains("/admin"), "{}", path);
    assert_eq!(path.split('/').count(), 5, "{}", path);
}

#[tokio::test]
async fn messagebird_dot_conversation_id_is_rejected_before_sending() {
    let (base, captured) = start_mock(StatusCode::ACCEPTED, serde_json::json!({})).await;
    let channel = MessageBirdChannel::new(Some("mb-key".to_string()), None, &base, &base);

    let err = channel
        .send_reply(&ReplyTarget::Conversation("..".to_string()), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidConversationId(_)));
    assert!(captured.lock().unwrap().is_empty());
}

#[tokio::test]
async fn messagebird_legacy_send_to_recipient() {
    let (base, captured) = start_mock(StatusCode::CREATED, serde_json::json!({ "id": "m2" })).await;
    let channel = MessageBirdChannel::new(
        Some("mb-key".to_string()),
        Some("channel-7".to_string()),
        &base,
        &base,
    );

    channel
        .send_reply(&ReplyTarget::Recipient("+31600000000".to_string()), "hello")
        .await
        .expect("send");

    let captured = captured.lock().unwrap();
    let c = &captured[0];
    assert_eq!(c.path, "/messages");
    assert_eq!(
        c.body,
        serde_json::json!({ "originator": "channel-7", "recipients": ["+31600000000"], "body": "hello" })
    );
}

#[tokio::test]
async fn messagebird_error_status_is_api_error() {
    let (base, _) = start_mock(
        StatusCode::UNAUTHORIZED,
        serde_json::json!({ "errors": [{ "description": "bad key" }] }),
    )
    .await;
    let channel = MessageBirdChannel::new(Some("wrong".to_string()), None, &base, &base);
    let err = channel
        .send_reply(&ReplyTarget::Conversation("c1".to_string()), "x")
        .await
        .unwrap_err();
    match err {
        DispatchError::Api(msg) => assert!(msg.contains("401"), "{}", msg),
        other => panic!("expected api error, got {:?}", other),
    }
}
