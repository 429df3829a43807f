//! Response shape reconciliation.
//!
//! The upstream has answered in several JSON envelopes over time. Each known
//! envelope is one row in [`Envelope::PRECEDENCE`]; probing walks the rows in
//! order and stops at the first non-empty string. Fields from different
//! envelopes are never merged.
//!
//! | Precedence | Envelope                | JSON pointer                                |
//! |------------|-------------------------|---------------------------------------------|
//! | 1          | nested chat completion  | `/chat_completion/choices/0/message/content` |
//! | 2          | chat completion         | `/choices/0/message/content`                |
//! | 3          | message object          | `/message/content`                          |
//! | 4          | answer                  | `/answer`                                   |
//! | 5          | message string          | `/message`                                  |
//!
//! When no row matches, an `error` field turns into [`RelayError::UpstreamLogic`];
//! otherwise the whole document is pretty-printed and returned as the answer.
//! That last fallback is deliberate: the caller always gets something
//! displayable, even if it is a raw JSON blob.

use serde_json::Value;

use crate::error::{RelayError, Result};
use crate::protocol::NormalizedAnswer;

/// Non-JSON bodies at or above this many characters are rejected.
pub const RAW_TEXT_LIMIT: usize = 500;

/// Known upstream answer envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// `{ chat_completion: { choices: [{ message: { content } }] } }`
    NestedChatCompletion,
    /// `{ choices: [{ message: { content } }] }`
    ChatCompletion,
    /// `{ message: { content } }`
    MessageObject,
    /// `{ answer }`
    Answer,
    /// `{ message: "..." }`
    MessageString,
}

impl Envelope {
    /// Lookup order. First match wins.
    pub const PRECEDENCE: [Envelope; 5] = [
        Envelope::NestedChatCompletion,
        Envelope::ChatCompletion,
        Envelope::MessageObject,
        Envelope::Answer,
        Envelope::MessageString,
    ];

    /// Location of the answer string inside this envelope.
    pub fn pointer(self) -> &'static str {
        match self {
            Envelope::NestedChatCompletion => "/chat_completion/choices/0/message/content",
            Envelope::ChatCompletion => "/choices/0/message/content",
            Envelope::MessageObject => "/message/content",
            Envelope::Answer => "/answer",
            Envelope::MessageString => "/message",
        }
    }

    /// The answer, if `doc` has this shape and the string is non-empty.
    pub fn extract(self, doc: &Value) -> Option<&str> {
        doc.pointer(self.pointer())
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// First envelope in precedence order that yields an answer.
    pub fn detect(doc: &Value) -> Option<(Envelope, &str)> {
        Self::PRECEDENCE
            .into_iter()
            .find_map(|envelope| envelope.extract(doc).map(|answer| (envelope, answer)))
    }
}

/// Outcome of reconciling a buffered body.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// Extracted answer.
    pub answer: NormalizedAnswer,
    /// Envelope that produced it; `None` for raw text and the JSON-dump fallback.
    pub envelope: Option<Envelope>,
    /// Parsed body, when it was JSON.
    pub document: Option<Value>,
}

/// Extract a single answer string from a buffered upstream body.
pub fn extract_answer(buffered: &str, declared_content_type: Option<&str>) -> Result<NormalizedAnswer> {
    reconcile(buffered, declared_content_type).map(|r| r.answer)
}

/// Like [`extract_answer`], but also return the envelope and the parsed document.
pub fn reconcile(buffered: &str, declared_content_type: Option<&str>) -> Result<Reconciled> {
    let doc: Value = match serde_json::from_str(buffered) {
        Ok(doc) => doc,
        Err(_) => return raw_text(buffered, declared_content_type),
    };

    if let Some((envelope, answer)) = Envelope::detect(&doc) {
        tracing::debug!(?envelope, "Matched upstream envelope");
        return Ok(Reconciled {
            answer: NormalizedAnswer {
                content: answer.to_string(),
            },
            envelope: Some(envelope),
            document: Some(doc),
        });
    }

    if let Some(error) = doc.get("error").filter(|e| reports_error(e)) {
        return Err(logic_error(&doc, error));
    }

    tracing::debug!("No known envelope matched; returning the JSON document as text");
    let content = serde_json::to_string_pretty(&doc)?;
    Ok(Reconciled {
        answer: NormalizedAnswer { content },
        envelope: None,
        document: Some(doc),
    })
}

fn raw_text(buffered: &str, declared_content_type: Option<&str>) -> Result<Reconciled> {
    tracing::debug!(content_type = ?declared_content_type, "Upstream body is not JSON");

    if buffered.contains('<') || buffered.chars().count() >= RAW_TEXT_LIMIT {
        return Err(RelayError::UpstreamFormat {
            message: "Upstream returned a body that is neither JSON nor a short text answer"
                .to_string(),
            details: buffered.to_string(),
        });
    }

    Ok(Reconciled {
        answer: NormalizedAnswer {
            content: buffered.to_string(),
        },
        envelope: None,
        document: None,
    })
}

/// Only a non-empty string or an object counts as an upstream error report.
fn reports_error(error: &Value) -> bool {
    match error {
        Value::String(s) => !s.is_empty(),
        Value::Object(_) => true,
        _ => false,
    }
}

fn logic_error(doc: &Value, error: &Value) -> RelayError {
    let message = match error {
        Value::String(s) => s.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    };

    let status = [doc.get("status"), error.get("status"), error.get("code")]
        .into_iter()
        .flatten()
        .find_map(Value::as_u64)
        .filter(|code| (400..=599).contains(code))
        .and_then(|code| u16::try_from(code).ok());

    RelayError::UpstreamLogic {
        status,
        message,
        details: error.to_string(),
    }
}
