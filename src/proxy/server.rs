//! Relay HTTP server: routes, shared state and the request-handling boundary.
//!
//! # Architecture
//!
//! ```text
//! Browser / CLI             Relay                         Upstream
//!     |                       |                              |
//!     |-- ANY /api/proxy ---->| resolve path (400 if empty)  |
//!     |   ?path=...           | adapter (500 if unconfigured)|
//!     |                       |-- UpstreamCall ------------->|
//!     |                       |<-- event-stream or body -----|
//!     |<-- SSE passthrough ---|                              |
//!     |<-- buffered body -----|  (data-plane)                |
//!     |<-- { content, ... } --|  (chat completion)           |
//! ```
//!
//! Every handler returns `Result<_, RelayError>` internally; the conversion to
//! the JSON error envelope happens once, here.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Instrument;
use uuid::Uuid;

use super::adapter::UpstreamAdapter;
use super::multiplexer::{relay, BodyKind, UpstreamResponse};
use super::reconcile::reconcile;
use super::request::{Addressing, ProxyRequest, TargetPath};
use super::stats::{ProxyStats, StatsSummary};
use crate::assistant::{AssistantAdmin, AssistantRequest, UpdateReply};
use crate::config::Config;
use crate::error::{RelayError, Result, CONFIGURATION_MESSAGE};
use crate::protocol::ChatReply;

/// Response header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared relay state. Read-only after construction, apart from counters.
pub struct ProxyState {
    config: Config,
    adapter: Option<UpstreamAdapter>,
    stats: Arc<ProxyStats>,
}

impl ProxyState {
    /// Validate the upstream connection once and build the adapter.
    ///
    /// A missing host or key is logged and remembered; proxy routes then answer
    /// with a configuration error instead of the process refusing to start.
    pub fn new(config: Config) -> Self {
        let adapter = match config.upstream.connection().and_then(UpstreamAdapter::new) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                tracing::warn!("Upstream not configured: {}", e);
                None
            },
        };

        Self {
            config,
            adapter,
            stats: Arc::new(ProxyStats::new()),
        }
    }

    /// State around a pre-built adapter.
    pub fn with_adapter(config: Config, adapter: UpstreamAdapter) -> Self {
        Self {
            config,
            adapter: Some(adapter),
            stats: Arc::new(ProxyStats::new()),
        }
    }

    /// The adapter, or the configuration error every upstream route reports.
    pub fn adapter(&self) -> Result<&UpstreamAdapter> {
        self.adapter
            .as_ref()
            .ok_or_else(|| RelayError::Configuration(CONFIGURATION_MESSAGE.to_string()))
    }

    /// Relay counters.
    pub fn stats(&self) -> &Arc<ProxyStats> {
        &self.stats
    }

    /// Loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Relay server
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a new relay server
    pub fn new(config: Config) -> Self {
        Self::from_state(ProxyState::new(config))
    }

    /// Create a server around existing state
    pub fn from_state(state: ProxyState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Get the router for the relay
    pub fn router(&self) -> Router {
        let server = &self.state.config.server;

        let router = Router::new()
            // Health and status
            .route("/health", get(health_handler))
            .route("/stats", get(stats_handler))
            // Core proxy
            .route("/api/proxy", any(proxy_query_handler))
            .route("/api/proxy/*path", any(proxy_tail_handler))
            // Assistant lifecycle
            .route(
                "/api/assistant/create",
                post(create_assistant_handler).fallback(method_not_allowed),
            )
            .route(
                "/api/update-instructions",
                post(update_instructions_handler).fallback(method_not_allowed),
            )
            .fallback(not_found)
            .layer(DefaultBodyLimit::max(server.max_body_size))
            .with_state(self.state.clone());

        let router = if server.cors {
            router.layer(CorsLayer::permissive())
        } else {
            router
        };

        router.layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let addr = self.state.config.server.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until Ctrl-C.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("Relay starting...");
        tracing::info!("Listening on http://{}", listener.local_addr()?);
        match self.state.adapter() {
            Ok(adapter) => tracing::info!("Upstream: {}", adapter.connection().host),
            Err(_) => tracing::warn!("Upstream: not configured, proxy routes will answer 500"),
        }

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Relay stopped");
        Ok(())
    }

    /// Get statistics
    pub fn stats(&self) -> StatsSummary {
        self.state.stats.summary()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

// === Handlers ===

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "assistant-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn stats_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(state.stats.summary())
}

async fn proxy_query_handler(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(state, method, None, uri.query(), headers, body).await
}

async fn proxy_tail_handler(
    State(state): State<Arc<ProxyState>>,
    Path(tail): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    proxy(state, method, Some(tail.as_str()), uri.query(), headers, body).await
}

/// The request-handling boundary for proxied calls.
async fn proxy(
    state: Arc<ProxyState>,
    method: Method,
    tail: Option<&str>,
    query: Option<&str>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "proxy",
        %request_id,
        %method,
        path = tracing::field::Empty
    );

    let mut response = handle_proxy(&state, method, tail, query, &headers, body)
        .instrument(span)
        .await
        .unwrap_or_else(|e| {
            state.stats.record_error();
            e.into_response()
        });

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn handle_proxy(
    state: &ProxyState,
    method: Method,
    tail: Option<&str>,
    query: Option<&str>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let target = TargetPath::resolve(tail, query)?;
    tracing::Span::current().record("path", tracing::field::display(&target));
    let adapter = state.adapter()?;

    tracing::info!("Proxying request");

    let inbound = ProxyRequest::new(method, target, headers, body);
    let call = adapter.build_upstream_call(&inbound)?;
    let addressing = call.addressing.clone();

    state.stats.record_request();
    let upstream = adapter.send(call).await?;

    if !upstream.status().is_success() {
        tracing::warn!(status = upstream.status().as_u16(), "Upstream returned an error status");
    }

    match (addressing, upstream.body_kind()) {
        (Addressing::ChatCompletion { .. }, BodyKind::Buffered) => {
            normalize_chat(state, upstream).await
        },
        _ => Ok(relay(upstream, state.stats.clone()).await),
    }
}

/// Buffer a chat completion and answer with the normalized reply.
async fn normalize_chat(state: &ProxyState, upstream: UpstreamResponse) -> Result<Response> {
    let buffered = upstream.into_buffered().await?;
    let text = buffered.text();

    if !buffered.status.is_success() {
        return Err(RelayError::upstream_status(
            buffered.status.as_u16(),
            format!("Upstream returned {}", buffered.status),
            text.into_owned(),
        ));
    }

    let reconciled = reconcile(&text, buffered.content_type())?;
    state.stats.record_buffered(buffered.body.len());
    state.stats.record_normalized();

    Ok(Json(ChatReply::new(reconciled.answer, reconciled.document.as_ref())).into_response())
}

async fn create_assistant_handler(
    State(state): State<Arc<ProxyState>>,
    body: Bytes,
) -> Result<Json<Value>> {
    let adapter = state.adapter()?;
    let request: AssistantRequest = parse_json_body(&body)?;
    AssistantAdmin::new(adapter).create(&request).await.map(Json)
}

async fn update_instructions_handler(
    State(state): State<Arc<ProxyState>>,
    body: Bytes,
) -> Result<Json<UpdateReply>> {
    let adapter = state.adapter()?;
    let request: AssistantRequest = parse_json_body(&body)?;
    AssistantAdmin::new(adapter)
        .update_instructions(&request)
        .await
        .map(Json)
}

async fn method_not_allowed() -> RelayError {
    RelayError::MethodNotAllowed
}

async fn not_found(uri: Uri) -> RelayError {
    RelayError::NotFound(uri.path().to_string())
}

fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    if body.is_empty() {
        return Err(RelayError::BadRequest("No request body provided".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| RelayError::BadRequest(format!("Request body is not valid JSON: {e}")))
}
