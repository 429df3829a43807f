//! End-to-end relay tests.
//!
//! A fake upstream runs on a real socket and records every call it receives;
//! the relay runs on another socket in front of it. Requests go through
//! reqwest exactly as a browser or the CLI would send them.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use futures::{channel::mpsc, StreamExt};
use relay::{
    proxy::{ProxyServer, ProxyState, API_KEY_HEADER, REQUEST_ID_HEADER},
    Config, UpstreamAdapter, UpstreamConnection,
};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::Notify, time::timeout};

type Chunk = std::result::Result<Bytes, std::io::Error>;

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Value,
}

#[derive(Clone, Default)]
struct Upstream {
    calls: Arc<Mutex<Vec<Recorded>>>,
    gate: Arc<Notify>,
}

impl Upstream {
    fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }
}

fn event_stream(rx: mpsc::UnboundedReceiver<Chunk>) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(rx)).into_response()
}

fn sse(content: &str) -> Bytes {
    Bytes::from(format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": content}}]})
    ))
}

async fn upstream_handler(
    State(up): State<Upstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    up.calls.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: uri.path().to_string(),
        headers,
        body: body.clone(),
    });

    match (method.as_str(), uri.path()) {
        ("POST", "/assistant/chat/bot/chat/completions") => Json(json!({
            "id": "cmpl-1",
            "model": "gpt-4o",
            "message": {"role": "assistant", "content": "Hi there"},
            "usage": {"total_tokens": 7}
        }))
        .into_response(),
        ("POST", "/assistant/chat/nested/chat/completions") => Json(json!({
            "chat_completion": {
                "id": "cc-9",
                "choices": [{"message": {"role": "assistant", "content": "Nested hello"}}]
            }
        }))
        .into_response(),
        ("POST", "/assistant/chat/streaming/chat/completions") => {
            let (tx, rx) = mpsc::unbounded::<Chunk>();
            let _ = tx.unbounded_send(Ok(sse("Hel")));
            let _ = tx.unbounded_send(Ok(sse("lo")));
            let _ = tx.unbounded_send(Ok(Bytes::from_static(b"data: [DONE]\n\n")));
            event_stream(rx)
        },
        ("POST", "/assistant/chat/gated/chat/completions") => {
            let (tx, rx) = mpsc::unbounded::<Chunk>();
            let gate = up.gate.clone();
            tokio::spawn(async move {
                let _ = tx.unbounded_send(Ok(sse("first")));
                gate.notified().await;
                let _ = tx.unbounded_send(Ok(sse("second")));
                let _ = tx.unbounded_send(Ok(Bytes::from_static(b"data: [DONE]\n\n")));
            });
            event_stream(rx)
        },
        ("POST", "/assistant/chat/overloaded/chat/completions") => {
            (StatusCode::SERVICE_UNAVAILABLE, "overloaded").into_response()
        },
        ("POST", "/assistant/chat/quota/chat/completions") => Json(json!({
            "error": {"message": "quota exceeded", "code": 429}
        }))
        .into_response(),
        ("POST", "/assistant/chat/html/chat/completions") => (
            [(header::CONTENT_TYPE, "text/html")],
            "<html><body>Bad gateway</body></html>",
        )
            .into_response(),
        ("POST", "/assistant/chat/slow/chat/completions") => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!({"answer": "too late"})).into_response()
        },
        ("GET", "/assistants/bot") => (
            StatusCode::ACCEPTED,
            [("x-upstream", "yes")],
            Json(json!({"name": "bot", "status": "Ready"})),
        )
            .into_response(),
        ("PATCH", "/assistants/bot") => Json(json!({
            "name": "bot",
            "instructions": body["instructions"],
            "updated_at": "2025-01-01T00:00:00Z"
        }))
        .into_response(),
        ("POST", "/assistants") => Json(json!({
            "name": body["assistant_name"],
            "status": "Initializing"
        }))
        .into_response(),
        _ => (StatusCode::NOT_FOUND, "no route").into_response(),
    }
}

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Start a fake upstream and a relay in front of it. Returns the relay base URL.
async fn start() -> (String, Upstream) {
    let upstream = Upstream::default();
    let upstream_addr = spawn(
        Router::new()
            .fallback(upstream_handler)
            .with_state(upstream.clone()),
    )
    .await;

    let base = format!("http://{upstream_addr}");
    let connection = UpstreamConnection::new(&base, "sk-test").with_control_plane(&base);
    let adapter = UpstreamAdapter::new(connection).unwrap();
    let server = ProxyServer::from_state(ProxyState::with_adapter(Config::default(), adapter));
    let relay_addr = spawn(server.router()).await;

    (format!("http://{relay_addr}"), upstream)
}

fn chat_body(stream: bool) -> Value {
    json!({
        "messages": [{"role": "user", "content": "hello"}],
        "stream": stream
    })
}

// === Path resolution ===

#[tokio::test]
async fn test_empty_path_is_rejected_without_upstream_call() {
    let (relay, upstream) = start().await;
    let client = reqwest::Client::new();

    for url in [
        format!("{relay}/api/proxy"),
        format!("{relay}/api/proxy?path="),
        format!("{relay}/api/proxy?path=%2F%2F"),
    ] {
        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 400, "{url}");
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["type"], "BadRequestError");
    }

    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_multi_valued_path_reaches_completion_route() {
    let (relay, upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!(
            "{relay}/api/proxy?path=assistant&path=chat&path=bot"
        ))
        .header(header::COOKIE, "session=secret")
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let calls = upstream.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::POST);
    assert_eq!(calls[0].path, "/assistant/chat/bot/chat/completions");
    assert_eq!(calls[0].headers[API_KEY_HEADER], "sk-test");
    assert!(calls[0].headers.get(header::COOKIE).is_none());
    assert_eq!(calls[0].body, chat_body(false));
}

// === Buffered chat normalization ===

#[tokio::test]
async fn test_buffered_chat_is_normalized() {
    let (relay, _upstream) = start().await;

    let body: Value = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/bot"))
        .json(&chat_body(false))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["content"], "Hi there");
    assert_eq!(body["message"], json!({"role": "assistant", "content": "Hi there"}));
    assert_eq!(body["id"], "cmpl-1");
    assert_eq!(body["model"], "gpt-4o");
    assert_eq!(body["usage"]["total_tokens"], 7);
}

#[tokio::test]
async fn test_nested_completion_envelope_is_normalized() {
    let (relay, _upstream) = start().await;

    let body: Value = reqwest::Client::new()
        .post(format!("{relay}/api/proxy/assistant/chat/nested"))
        .json(&chat_body(false))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["content"], "Nested hello");
    assert_eq!(body["id"], "cc-9");
}

#[tokio::test]
async fn test_chat_without_messages_is_bad_request() {
    let (relay, upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/bot"))
        .json(&json!({"prompt": "hello"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Request body must include 'messages' array");
    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_upstream_error_status_becomes_transport_error() {
    let (relay, _upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/overloaded"))
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "UpstreamTransportError");
    assert_eq!(body["details"], "overloaded");
}

#[tokio::test]
async fn test_upstream_error_payload_becomes_logic_error() {
    let (relay, _upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/quota"))
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "UpstreamLogicError");
    assert!(body["error"].as_str().unwrap().contains("quota exceeded"));
}

#[tokio::test]
async fn test_html_reply_becomes_format_error() {
    let (relay, _upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/html"))
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "UpstreamFormatError");
    assert!(body["details"].as_str().unwrap().contains("<html>"));
}

// === Data-plane passthrough ===

#[tokio::test]
async fn test_data_plane_passthrough_keeps_status_and_headers() {
    let (relay, upstream) = start().await;

    let response = reqwest::Client::new()
        .get(format!("{relay}/api/proxy/assistants/bot"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 202);
    assert_eq!(response.headers()["x-upstream"], "yes");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"name": "bot", "status": "Ready"}));

    let calls = upstream.calls();
    assert_eq!(calls[0].method, Method::GET);
    assert_eq!(calls[0].path, "/assistants/bot");
}

#[tokio::test]
async fn test_data_plane_error_status_is_relayed_verbatim() {
    let (relay, _upstream) = start().await;

    let response = reqwest::Client::new()
        .get(format!("{relay}/api/proxy?path=assistants/missing"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "no route");
}

// === Event-stream passthrough ===

#[tokio::test]
async fn test_event_stream_is_passed_through() {
    let (relay, upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/streaming"))
        .json(&chat_body(true))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let text = response.text().await.unwrap();
    assert!(text.starts_with("data: "));
    assert!(text.contains("\"Hel\""));
    assert!(text.ends_with("data: [DONE]\n\n"));

    assert_eq!(upstream.calls()[0].body["stream"], true);
}

#[tokio::test]
async fn test_event_stream_chunks_arrive_before_upstream_finishes() {
    let (relay, upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/proxy?path=assistant/chat/gated"))
        .json(&chat_body(true))
        .send()
        .await
        .unwrap();
    let mut chunks = response.bytes_stream();

    // The upstream holds its second chunk until the gate opens.
    let first = timeout(Duration::from_secs(5), chunks.next())
        .await
        .expect("first chunk was buffered")
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&first).contains("first"));
    assert!(!String::from_utf8_lossy(&first).contains("second"));

    upstream.gate.notify_one();

    let mut rest = Vec::new();
    while let Some(chunk) = timeout(Duration::from_secs(5), chunks.next()).await.unwrap() {
        rest.extend_from_slice(&chunk.unwrap());
    }
    let rest = String::from_utf8_lossy(&rest);
    assert!(rest.contains("second"));
    assert!(rest.contains("[DONE]"));
}

// === Assistant lifecycle ===

#[tokio::test]
async fn test_create_assistant() {
    let (relay, upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/assistant/create"))
        .json(&json!({"assistantName": "bot", "instructions": "Be brief"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "bot");

    let calls = upstream.calls();
    assert_eq!(calls[0].method, Method::POST);
    assert_eq!(calls[0].path, "/assistants");
    assert_eq!(calls[0].body["assistant_name"], "bot");
    assert_eq!(calls[0].body["instructions"], "Be brief");
    assert_eq!(calls[0].body["region"], "us");
    assert_eq!(calls[0].body["metadata"]["createdBy"], "assistant-relay");
}

#[tokio::test]
async fn test_create_assistant_requires_fields() {
    let (relay, upstream) = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{relay}/api/assistant/create"))
        .json(&json!({"assistantName": "bot"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(format!("{relay}/api/assistant/create"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "No request body provided");

    assert!(upstream.calls().is_empty());
}

#[tokio::test]
async fn test_update_instructions() {
    let (relay, upstream) = start().await;

    let body: Value = reqwest::Client::new()
        .post(format!("{relay}/api/update-instructions"))
        .json(&json!({"assistantName": "bot", "instructions": "Answer in French"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["success"], true);
    assert_eq!(body["updatedAt"], "2025-01-01T00:00:00Z");
    assert_eq!(body["assistant"]["instructions"], "Answer in French");

    let calls = upstream.calls();
    assert_eq!(calls[0].method, Method::PATCH);
    assert_eq!(calls[0].path, "/assistants/bot");
    assert_eq!(calls[0].body["metadata"]["updatedBy"], "assistant-relay");
}

#[tokio::test]
async fn test_update_instructions_upstream_failure() {
    let (relay, _upstream) = start().await;

    let response = reqwest::Client::new()
        .post(format!("{relay}/api/update-instructions"))
        .json(&json!({"assistantName": "ghost", "instructions": "hi"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "UpstreamTransportError");
    assert_eq!(body["details"], "no route");
}

// === Unconfigured relay ===

#[tokio::test]
async fn test_unconfigured_relay_still_serves_health() {
    let relay_addr = spawn(ProxyServer::new(Config::default()).router()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{relay_addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("http://{relay_addr}/api/proxy?path=assistants"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "ConfigurationError");
}

#[tokio::test]
async fn test_stats_count_relayed_requests() {
    let (relay, _upstream) = start().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{relay}/api/proxy?path=assistant/chat/bot"))
        .json(&chat_body(false))
        .send()
        .await
        .unwrap();
    client
        .post(format!("{relay}/api/proxy?path=assistant/chat/streaming"))
        .json(&chat_body(true))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let stats: Value = client
        .get(format!("{relay}/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["requests"], 2);
    assert_eq!(stats["normalized_answers"], 1);
    assert_eq!(stats["streaming_requests"], 1);
}
