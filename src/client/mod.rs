//! Caller-side conversation flow.
//!
//! [`ConversationClient`] plays the role of the chat front-end: it owns the
//! conversation, posts it to the relay under a fixed wall-clock budget and
//! appends the assistant's reply. Buffered replies go through the same
//! [`extract_answer`] the relay uses unless they are the relay's own
//! [`ChatReply`], which is read directly.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{header, Client};
use serde_json::Value;

use crate::error::{ErrorEnvelope, RelayError, Result};
use crate::protocol::{ChatCompletionRequest, ChatMessage, ChatReply, Conversation};
use crate::proxy::{extract_answer, PATH_PARAM};

/// Round-trip budget for one chat turn.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat session against a running relay.
pub struct ConversationClient {
    http: Client,
    endpoint: String,
    assistant_path: String,
    stream: bool,
    timeout: Duration,
    conversation: Conversation,
}

impl ConversationClient {
    /// `endpoint` is the relay's proxy route, e.g. `http://127.0.0.1:3000/api/proxy`.
    pub fn new(endpoint: impl Into<String>, assistant_path: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            assistant_path: assistant_path.into(),
            stream: false,
            timeout: DEFAULT_TIMEOUT,
            conversation: Conversation::new(),
        }
    }

    /// Override the round-trip budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the upstream for an event-stream instead of a buffered answer.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// History so far.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Send one user turn and return the assistant's answer.
    ///
    /// The user message is appended before the call. The reply is appended only
    /// on success; on failure the conversation ends with the user's message.
    pub async fn send(&mut self, text: impl Into<String>) -> Result<String> {
        self.conversation.push(ChatMessage::user(text));

        let request = ChatCompletionRequest {
            messages: self.conversation.messages().to_vec(),
            stream: self.stream,
        };

        // Dropping the round-trip future on expiry aborts the HTTP request.
        let answer = tokio::time::timeout(self.timeout, self.round_trip(&request))
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))??;

        self.conversation.push(ChatMessage::assistant(answer.clone()));
        Ok(answer)
    }

    async fn round_trip(&self, request: &ChatCompletionRequest) -> Result<String> {
        let query = serde_urlencoded::to_string([(PATH_PARAM, self.assistant_path.as_str())])
            .map_err(|e| RelayError::BadRequest(format!("Invalid assistant path: {e}")))?;
        let url = format!("{}?{}", self.endpoint, query);

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamTransport {
                status: None,
                message: "Failed to reach the relay".to_string(),
                details: Some(e.to_string()),
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_ascii_lowercase);

        if content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("text/event-stream"))
        {
            let mut raw = Vec::new();
            let mut chunks = response.bytes_stream();
            while let Some(chunk) = chunks.next().await {
                raw.extend_from_slice(&chunk?);
            }
            return Ok(collect_event_stream(&String::from_utf8_lossy(&raw)));
        }

        let text = response.text().await?;

        if !status.is_success() {
            return Err(match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => RelayError::UpstreamTransport {
                    status: Some(status.as_u16()),
                    message: envelope.error,
                    details: envelope.details,
                },
                Err(_) => RelayError::upstream_status(
                    status.as_u16(),
                    format!("Relay returned {status}"),
                    text,
                ),
            });
        }

        // The relay's own reply shape carries the answer as-is, even when empty.
        if let Ok(reply) = serde_json::from_str::<ChatReply>(&text) {
            return Ok(reply.content);
        }
        Ok(extract_answer(&text, content_type.as_deref())?.content)
    }
}

/// Concatenate the text carried by an event-stream.
///
/// `data:` payloads that are JSON completion chunks contribute their delta
/// content; other payloads contribute verbatim; `[DONE]` is skipped. A body
/// with no `data:` lines at all is returned as-is.
pub fn collect_event_stream(raw: &str) -> String {
    let mut out = String::new();
    let mut saw_data = false;

    for line in raw.lines() {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        saw_data = true;
        let payload = payload.trim_start();
        if payload == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(chunk) => {
                let delta = ["/choices/0/delta/content", "/delta/content"]
                    .into_iter()
                    .find_map(|p| chunk.pointer(p).and_then(Value::as_str));
                if let Some(delta) = delta {
                    out.push_str(delta);
                }
            },
            Err(_) => out.push_str(payload),
        }
    }

    if saw_data {
        out
    } else {
        raw.to_string()
    }
}
