//! Chat message types exchanged between the caller, the relay and the upstream.
//!
//! A [`Conversation`] is an append-only sequence of [`ChatMessage`]s. The relay
//! forwards it untouched inside a [`ChatCompletionRequest`]; only the caller
//! appends the derived assistant reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user.
    User,
    /// Upstream assistant.
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, append-only chat history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Empty conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Messages in order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Most recent message.
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing has been said yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Body of a chat request, both inbound from the caller and outbound to the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// Conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Ask the upstream for an event-stream.
    #[serde(default)]
    pub stream: bool,
}

/// The only shape a caller is guaranteed to receive for buffered chat answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedAnswer {
    /// Answer text.
    pub content: String,
}

/// Buffered chat reply sent by the relay.
///
/// `content` is the normalized answer; `message` repeats it as an assistant
/// turn so front-ends can append it directly. `id`, `model` and `usage` are
/// copied from the upstream envelope when it has them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Normalized answer text.
    pub content: String,
    /// The answer as an assistant message.
    pub message: ChatMessage,
    /// Upstream completion id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Upstream model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Upstream token usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

impl ChatReply {
    /// Build a reply from a normalized answer and the parsed upstream body, if it was JSON.
    pub fn new(answer: NormalizedAnswer, envelope: Option<&Value>) -> Self {
        let field = |name: &str| {
            envelope.and_then(|v| {
                v.get(name)
                    .or_else(|| v.get("chat_completion").and_then(|c| c.get(name)))
                    .filter(|f| !f.is_null())
            })
        };

        Self {
            message: ChatMessage::assistant(answer.content.clone()),
            content: answer.content,
            id: field("id").and_then(Value::as_str).map(str::to_string),
            model: field("model").and_then(Value::as_str).map(str::to_string),
            usage: field("usage").cloned(),
        }
    }
}
