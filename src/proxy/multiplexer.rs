//! Transport multiplexer: one branch point between streaming and buffered relay.
//!
//! ```text
//! UpstreamResponse ──content-type──┬── text/event-stream ──> chunk-by-chunk passthrough
//!                                  └── anything else ──────> read fully, write once
//! ```
//!
//! The axum [`Response`] is the sink. Once its head is handed to hyper, status
//! and headers are committed; a failure after that point can only abort the
//! body, which closes the connection.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};

use super::stats::ProxyStats;
use crate::error::{RelayError, Result};

/// Owned, single-use upstream byte stream.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// How an upstream body must be relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// `text/event-stream`: forward incrementally.
    EventStream,
    /// Everything else: read to completion, then forward.
    Buffered,
}

/// Upstream response head plus its not-yet-read body.
pub struct UpstreamResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: ByteStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    /// Wrap an arbitrary byte stream. Used by the adapter and by test doubles.
    pub fn new<S>(status: StatusCode, headers: HeaderMap, body: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self {
            status,
            headers,
            body: body.boxed(),
        }
    }

    /// Take over a live `reqwest` response without reading it.
    pub fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(std::io::Error::other);
        Self::new(status, headers, body)
    }

    /// Upstream status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Upstream headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Declared content type, if readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Classify the body by its declared content type.
    pub fn body_kind(&self) -> BodyKind {
        let is_event_stream = self
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/event-stream"));

        if is_event_stream {
            BodyKind::EventStream
        } else {
            BodyKind::Buffered
        }
    }

    /// Read the whole body into memory.
    pub async fn into_buffered(self) -> Result<BufferedResponse> {
        let Self {
            status,
            headers,
            mut body,
        } = self;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| RelayError::UpstreamTransport {
                status: None,
                message: "Failed to read upstream response".to_string(),
                details: Some(e.to_string()),
            })?;
            buf.extend_from_slice(&chunk);
        }

        Ok(BufferedResponse {
            status,
            headers,
            body: buf.freeze(),
        })
    }
}

/// A fully-read upstream response.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    /// Upstream status code.
    pub status: StatusCode,
    /// Upstream headers.
    pub headers: HeaderMap,
    /// Complete body.
    pub body: Bytes,
}

impl BufferedResponse {
    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Declared content type, if readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Replay status, headers (minus `transfer-encoding`) and body downstream in one write.
    pub fn into_response(self) -> Result<Response> {
        let mut builder = Response::builder().status(self.status);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &self.headers {
                // The downstream body is re-framed by hyper.
                if name == header::TRANSFER_ENCODING {
                    continue;
                }
                headers.append(name.clone(), value.clone());
            }
        }

        builder
            .body(Body::from(self.body))
            .map_err(|e| RelayError::Io(std::io::Error::other(e)))
    }
}

/// Relay an upstream response to the caller.
///
/// Errors that happen before anything is committed come back as a JSON error
/// response; nothing is ever half-written.
pub async fn relay(upstream: UpstreamResponse, stats: Arc<ProxyStats>) -> Response {
    match try_relay(upstream, stats.clone()).await {
        Ok(response) => response,
        Err(err) => {
            stats.record_error();
            err.into_response()
        },
    }
}

async fn try_relay(upstream: UpstreamResponse, stats: Arc<ProxyStats>) -> Result<Response> {
    match upstream.body_kind() {
        BodyKind::EventStream => stream_response(upstream, stats),
        BodyKind::Buffered => {
            let buffered = upstream.into_buffered().await?;
            stats.record_buffered(buffered.body.len());
            buffered.into_response()
        },
    }
}

fn stream_response(upstream: UpstreamResponse, stats: Arc<ProxyStats>) -> Result<Response> {
    stats.record_streaming_request();

    let content_type = upstream
        .headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));

    let chunk_stats = Arc::clone(&stats);
    let body = upstream.body.map(move |chunk| match chunk {
        Ok(bytes) => {
            chunk_stats.record_streaming_chunk(bytes.len());
            Ok(bytes)
        },
        Err(e) => {
            // Status is already on the wire; aborting the body drops the connection.
            tracing::warn!("Upstream stream failed mid-flight: {}", e);
            chunk_stats.record_error();
            Err(e)
        },
    });

    Response::builder()
        .status(upstream.status)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .map_err(|e| RelayError::Io(std::io::Error::other(e)))
}
