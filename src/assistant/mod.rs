//! Assistant lifecycle calls against the upstream.
//!
//! Creation goes to the control plane, instruction updates to the data-plane
//! host. Both are single request/response round trips with no retry.

use axum::http::HeaderValue;
use chrono::{SecondsFormat, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{RelayError, Result};
use crate::proxy::UpstreamAdapter;

/// Inbound body for both lifecycle routes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRequest {
    /// Assistant name.
    #[serde(default)]
    pub assistant_name: Option<String>,
    /// Instruction text.
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Reply to a successful instruction update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReply {
    /// Always true.
    pub success: bool,
    /// Upstream `updated_at`, or the local time of the update.
    pub updated_at: String,
    /// Upstream assistant record.
    pub assistant: Value,
}

/// Create and update assistants using the relay's upstream connection.
pub struct AssistantAdmin<'a> {
    adapter: &'a UpstreamAdapter,
}

impl<'a> AssistantAdmin<'a> {
    /// Borrow an adapter's connection and client.
    pub fn new(adapter: &'a UpstreamAdapter) -> Self {
        Self { adapter }
    }

    /// Create a new assistant. Returns the upstream record.
    pub async fn create(&self, request: &AssistantRequest) -> Result<Value> {
        let name = non_empty(request.assistant_name.as_deref());
        let instructions = non_empty(request.instructions.as_deref());
        let (name, instructions) = match (name, instructions) {
            (Some(name), Some(instructions)) => (name, instructions),
            _ => {
                return Err(RelayError::BadRequest(
                    "assistantName and instructions are required".to_string(),
                ))
            },
        };

        let conn = self.adapter.connection();
        tracing::info!(assistant = %name, "Creating assistant");

        let body = json!({
            "assistant_name": name,
            "instructions": instructions,
            "region": conn.region,
            "metadata": {
                "createdBy": conn.metadata_tag,
                "createdAt": now(),
            }
        });

        let url = format!("{}/assistants", conn.control_plane_url);
        self.call(reqwest::Method::POST, &url, &body, "create assistant")
            .await
    }

    /// Replace an assistant's instructions.
    pub async fn update_instructions(&self, request: &AssistantRequest) -> Result<UpdateReply> {
        let Some(instructions) = non_empty(request.instructions.as_deref()) else {
            return Err(RelayError::BadRequest("Instructions are required".to_string()));
        };
        let Some(name) = non_empty(request.assistant_name.as_deref()) else {
            return Err(RelayError::BadRequest("Assistant name is required".to_string()));
        };

        let conn = self.adapter.connection();
        tracing::info!(assistant = %name, "Updating assistant instructions");

        let body = json!({
            "instructions": instructions,
            "metadata": {
                "lastUpdated": now(),
                "updatedBy": conn.metadata_tag,
            }
        });

        let url = assistant_url(&conn.host, name)?;
        let assistant = self
            .call(reqwest::Method::PATCH, url.as_str(), &body, "update assistant")
            .await?;

        let updated_at = assistant
            .get("updated_at")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(now);

        Ok(UpdateReply {
            success: true,
            updated_at,
            assistant,
        })
    }

    async fn call(&self, method: reqwest::Method, url: &str, body: &Value, action: &str) -> Result<Value> {
        let headers = self
            .adapter
            .headers(HeaderValue::from_static("application/json"))?;

        let response = self
            .adapter
            .client()
            .request(method, url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamTransport {
                status: None,
                message: format!("Failed to {action}"),
                details: Some(e.to_string()),
            })?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Failed to {}: {}", action, text);
            return Err(RelayError::upstream_status(
                status.as_u16(),
                format!(
                    "Failed to {action}: {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
                .trim_end()
                .to_string(),
                text,
            ));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|_| RelayError::UpstreamFormat {
            message: format!("Upstream returned a non-JSON body while trying to {action}"),
            details: text,
        })
    }
}

/// `<host>/assistants/<name>`, with `name` percent-encoded as one path segment.
fn assistant_url(host: &str, name: &str) -> Result<Url> {
    let invalid = || RelayError::Configuration(format!("Upstream host is not a valid base URL: {host}"));

    let mut url = Url::parse(host).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .push("assistants")
        .push(name);
    Ok(url)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
