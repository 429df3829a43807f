//! Upstream client adapter.
//!
//! Turns a [`ProxyRequest`] into an immutable [`UpstreamCall`] and sends it.
//! Only the content-type of the inbound request is propagated; every other
//! header sent upstream comes from the validated [`UpstreamConnection`].

use std::sync::Arc;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;

use super::multiplexer::UpstreamResponse;
use super::request::{Addressing, ProxyRequest};
use crate::config::UpstreamConnection;
use crate::error::{RelayError, Result};
use crate::protocol::ChatCompletionRequest;

/// Credential header expected by the upstream.
pub const API_KEY_HEADER: &str = "api-key";

/// Header carrying the optional upstream API version.
pub const API_VERSION_HEADER: &str = "x-api-version";

const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// A fully-built upstream request. Consumed by [`UpstreamAdapter::send`].
#[derive(Debug)]
pub struct UpstreamCall {
    /// Absolute upstream URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Exactly the headers that will be sent.
    pub headers: HeaderMap,
    /// Serialized body; `None` for GET/HEAD.
    pub body: Option<Bytes>,
    /// Addressing mode the call was built for.
    pub addressing: Addressing,
}

/// Builds and sends upstream calls for one validated connection.
#[derive(Clone)]
pub struct UpstreamAdapter {
    connection: Arc<UpstreamConnection>,
    client: Client,
}

impl UpstreamAdapter {
    /// Create an adapter with a default HTTP client.
    pub fn new(connection: UpstreamConnection) -> Result<Self> {
        let client = Client::builder().build().map_err(|e| {
            RelayError::Configuration(format!("Failed to create HTTP client: {e}"))
        })?;
        Ok(Self::with_client(connection, client))
    }

    /// Create an adapter around an existing client.
    pub fn with_client(connection: UpstreamConnection, client: Client) -> Self {
        Self {
            connection: Arc::new(connection),
            client,
        }
    }

    /// Validated connection parameters.
    pub fn connection(&self) -> &UpstreamConnection {
        &self.connection
    }

    /// Underlying HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build the upstream call for an inbound request. Performs no I/O.
    pub fn build_upstream_call(&self, inbound: &ProxyRequest) -> Result<UpstreamCall> {
        let addressing = inbound.target.addressing();
        let path = inbound.target.joined();

        match addressing {
            Addressing::DataPlane => {
                let content_type = inbound
                    .content_type
                    .clone()
                    .unwrap_or_else(|| HeaderValue::from_static("application/json"));

                Ok(UpstreamCall {
                    url: format!("{}/{}", self.connection.host, path),
                    method: inbound.method.clone(),
                    headers: self.headers(content_type)?,
                    body: inbound.carries_body().then(|| inbound.body.clone()),
                    addressing,
                })
            },
            Addressing::ChatCompletion { ref assistant } => {
                let request = parse_chat_body(&inbound.body)?;
                tracing::debug!(
                    assistant = %assistant,
                    messages = request.messages.len(),
                    stream = request.stream,
                    "Building chat completion call"
                );

                let mut url = format!("{}/{}", self.connection.host, path);
                if !self.connection.completion_suffix.is_empty() {
                    url.push('/');
                    url.push_str(&self.connection.completion_suffix);
                }

                Ok(UpstreamCall {
                    url,
                    method: Method::POST,
                    headers: self.headers(HeaderValue::from_static("application/json"))?,
                    body: Some(Bytes::from(serde_json::to_vec(&request)?)),
                    addressing,
                })
            },
        }
    }

    /// Fixed upstream header set plus the given content-type.
    pub fn headers(&self, content_type: HeaderValue) -> Result<HeaderMap> {
        let credential = |value: String| {
            HeaderValue::from_str(&value)
                .map(|mut v| {
                    v.set_sensitive(true);
                    v
                })
                .map_err(|_| {
                    RelayError::Configuration(
                        "API key contains characters that are not valid in an HTTP header"
                            .to_string(),
                    )
                })
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(API_KEY_HEADER),
            credential(self.connection.api_key.clone())?,
        );
        if self.connection.bearer_auth {
            headers.insert(
                header::AUTHORIZATION,
                credential(format!("Bearer {}", self.connection.api_key))?,
            );
        }
        headers.insert(header::CONTENT_TYPE, content_type);
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        if let Some(version) = &self.connection.api_version {
            let value = HeaderValue::from_str(version).map_err(|_| {
                RelayError::Configuration("API version is not a valid header value".to_string())
            })?;
            headers.insert(HeaderName::from_static(API_VERSION_HEADER), value);
        }

        Ok(headers)
    }

    /// Send a call and hand back the unread response.
    pub async fn send(&self, call: UpstreamCall) -> Result<UpstreamResponse> {
        tracing::debug!(method = %call.method, url = %call.url, "Calling upstream");

        let mut request = self
            .client
            .request(call.method, &call.url)
            .headers(call.headers);
        if let Some(body) = call.body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::UpstreamTransport {
                status: None,
                message: "Failed to connect to upstream".to_string(),
                details: Some(e.to_string()),
            })?;

        Ok(UpstreamResponse::from_reqwest(response))
    }
}

fn parse_chat_body(body: &[u8]) -> Result<ChatCompletionRequest> {
    let missing = || RelayError::BadRequest("Request body must include 'messages' array".to_string());

    let value: Value = serde_json::from_slice(body).map_err(|_| missing())?;
    if !value.get("messages").is_some_and(Value::is_array) {
        return Err(missing());
    }

    serde_json::from_value(value)
        .map_err(|e| RelayError::BadRequest(format!("Invalid chat request: {e}")))
}
