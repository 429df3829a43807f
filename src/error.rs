//! Relay error types.
//!
//! Every failure the relay can produce maps onto one variant of [`RelayError`].
//! Errors are converted to the JSON envelope
//! `{ "error": string, "type"?: string, "details"?: string }` at the single
//! request-handling boundary via [`IntoResponse`], so no error ever escapes a
//! handler as a panic or a bare status code.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Message returned when the upstream host or credential is missing.
pub const CONFIGURATION_MESSAGE: &str =
    "Server not configured properly. Upstream host or API key is missing.";

/// Relay errors.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Required host/credential missing.
    #[error("{0}")]
    Configuration(String),

    /// Malformed inbound path or missing required body fields.
    #[error("{0}")]
    BadRequest(String),

    /// Route exists but does not accept the request method.
    #[error("Method not allowed")]
    MethodNotAllowed,

    /// No route matches the request path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure reaching upstream, or a non-2xx upstream status.
    #[error("{message}")]
    UpstreamTransport {
        /// Upstream status code, when the upstream answered at all.
        status: Option<u16>,
        /// Short description of the failure.
        message: String,
        /// Raw upstream error text, kept for diagnostics.
        details: Option<String>,
    },

    /// Upstream body did not match any recognized shape.
    #[error("{message}")]
    UpstreamFormat {
        /// Short description of the failure.
        message: String,
        /// Offending payload.
        details: String,
    },

    /// Upstream body explicitly encoded an error.
    #[error("Upstream reported an error: {message}")]
    UpstreamLogic {
        /// Status embedded in the upstream payload, if any.
        status: Option<u16>,
        /// Error message extracted from the payload.
        message: String,
        /// Full `error` payload, serialized.
        details: String,
    },

    /// Caller-side round-trip budget elapsed.
    #[error("The assistant did not answer within {}. Please try again.", describe_budget(.0))]
    Timeout(Duration),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Build a transport error from an upstream that answered with a non-2xx status.
    pub fn upstream_status(status: u16, message: impl Into<String>, body: String) -> Self {
        RelayError::UpstreamTransport {
            status: Some(status),
            message: message.into(),
            details: Some(body),
        }
    }

    /// Stable machine-readable name, sent as the envelope's `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Configuration(_) => "ConfigurationError",
            RelayError::BadRequest(_) => "BadRequestError",
            RelayError::MethodNotAllowed => "MethodNotAllowedError",
            RelayError::NotFound(_) => "NotFoundError",
            RelayError::UpstreamTransport { .. } => "UpstreamTransportError",
            RelayError::UpstreamFormat { .. } => "UpstreamFormatError",
            RelayError::UpstreamLogic { .. } => "UpstreamLogicError",
            RelayError::Timeout(_) => "TimeoutError",
            RelayError::Json(_) => "JsonError",
            RelayError::Io(_) => "IoError",
        }
    }

    /// HTTP status used when this error is reported to the caller.
    pub fn status(&self) -> StatusCode {
        let embedded = |status: &Option<u16>, fallback: StatusCode| {
            status
                .and_then(|code| StatusCode::from_u16(code).ok())
                .filter(|code| code.is_client_error() || code.is_server_error())
                .unwrap_or(fallback)
        };

        match self {
            RelayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::BadRequest(_) | RelayError::Json(_) => StatusCode::BAD_REQUEST,
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::UpstreamTransport { status, .. } => embedded(status, StatusCode::BAD_GATEWAY),
            RelayError::UpstreamFormat { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::UpstreamLogic { status, .. } => {
                embedded(status, StatusCode::INTERNAL_SERVER_ERROR)
            },
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Diagnostic payload carried in the envelope's `details` field.
    pub fn details(&self) -> Option<&str> {
        match self {
            RelayError::UpstreamTransport { details, .. } => details.as_deref(),
            RelayError::UpstreamFormat { details, .. }
            | RelayError::UpstreamLogic { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Convert into the wire envelope.
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: self.to_string(),
            kind: Some(self.kind().to_string()),
            details: self.details().map(str::to_string),
        }
    }
}

/// JSON error body returned by every failing relay route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Human-readable message.
    pub error: String,
    /// Error class name.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Diagnostic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            RelayError::Configuration(_) => tracing::error!(kind = self.kind(), "{self}"),
            RelayError::BadRequest(_)
            | RelayError::Json(_)
            | RelayError::MethodNotAllowed
            | RelayError::NotFound(_) => {
                tracing::debug!(kind = self.kind(), "{self}");
            },
            _ => tracing::warn!(kind = self.kind(), status = status.as_u16(), "{self}"),
        }
        (status, Json(self.envelope())).into_response()
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::UpstreamTransport {
            status: err.status().map(|s| s.as_u16()),
            message: "Failed to reach upstream".to_string(),
            details: Some(err.to_string()),
        }
    }
}

/// `30 seconds`, `1 second`, `250 milliseconds`.
fn describe_budget(budget: &Duration) -> String {
    if budget.subsec_nanos() == 0 {
        match budget.as_secs() {
            1 => "1 second".to_string(),
            secs => format!("{secs} seconds"),
        }
    } else {
        format!("{} milliseconds", budget.as_millis())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::Configuration(format!("Failed to parse config: {err}"))
    }
}
