//! # Assistant Relay
//!
//! Protocol-normalizing HTTP relay in front of a hosted conversational
//! assistant API. Browser and CLI callers talk to the relay; the relay holds
//! the upstream credential, forwards requests and hands back either the
//! upstream's event-stream untouched or a single normalized answer.
//!
//! ## Features
//!
//! - **Upstream client adapter**: one validated connection, fixed header set,
//!   data-plane passthrough or chat-completion addressing
//! - **Transport multiplexer**: event-stream passthrough with no whole-body
//!   buffering, everything else buffered and relayed with its status
//! - **Response shape reconciler**: five known answer envelopes, explicit
//!   `error` detection and a JSON-dump fallback
//! - **Assistant lifecycle**: create an assistant, replace its instructions
//! - **Conversation client**: caller-side chat turns with a wall-clock budget
//!
//! ## Request Flow
//!
//! ```text
//! Caller                         Relay                          Upstream
//!    |                             |                                |
//!    |-- POST /api/proxy --------->|                                |
//!    |   ?path=assistant/chat/bot  |-- POST .../chat/completions -->|
//!    |                             |<-- text/event-stream ----------|
//!    |<== chunks as they arrive ===|                                |
//!    |                             |                                |
//!    |                             |<-- application/json -----------|
//!    |<-- { content, message } ----|  (reconciled)                  |
//! ```
//!
//! ## Error Envelope
//!
//! Every failing route answers with
//!
//! | Field | Description |
//! |-------|-------------|
//! | `error` | Human-readable message |
//! | `type` | Error class, e.g. `UpstreamFormatError` |
//! | `details` | Raw upstream text or offending payload, when available |
//!
//! ## Quick Start
//!
//! ### Running the relay
//!
//! ```rust,ignore
//! use relay::{Config, ProxyServer};
//!
//! let config = Config::from_env();
//! ProxyServer::new(config).run().await?;
//! ```
//!
//! ### Normalizing an upstream body
//!
//! ```rust
//! use relay::extract_answer;
//!
//! let body = r#"{"message":{"role":"assistant","content":"Hello"}}"#;
//! let answer = extract_answer(body, Some("application/json")).unwrap();
//! assert_eq!(answer.content, "Hello");
//! ```
//!
//! ### Chatting through the relay
//!
//! ```rust,ignore
//! use relay::ConversationClient;
//!
//! let mut client = ConversationClient::new(
//!     "http://127.0.0.1:3000/api/proxy",
//!     "assistant/chat/my-assistant",
//! );
//! let answer = client.send("What changed this week?").await?;
//! ```
//!
//! ## Modules
//!
//! - [`proxy`]: Routes, adapter, multiplexer and reconciler
//! - [`assistant`]: Assistant create / update-instructions
//! - [`client`]: Caller-side conversation flow
//! - [`protocol`]: Chat messages and reply shapes
//! - [`config`]: TOML + environment configuration
//! - [`error`]: Error types and the JSON error envelope

pub mod assistant;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod proxy;

pub use assistant::{AssistantAdmin, AssistantRequest, UpdateReply};
pub use client::{ConversationClient, DEFAULT_TIMEOUT};
pub use config::{Config, ServerConfig, UpstreamConfig, UpstreamConnection};
pub use error::{ErrorEnvelope, RelayError, Result};
pub use protocol::{ChatMessage, ChatReply, Conversation, NormalizedAnswer, Role};
pub use proxy::{extract_answer, ProxyServer, ProxyState, UpstreamAdapter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
