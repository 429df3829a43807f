//! Protocol-normalizing reverse proxy in front of a hosted assistant API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Relay                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  Caller ───> TargetPath ───> UpstreamAdapter ───> Upstream   │
//! │              (request)       (adapter)              │        │
//! │                                                     v        │
//! │  Caller <─── relay() <──────────────────── UpstreamResponse  │
//! │   (SSE or    (multiplexer)                          │        │
//! │    body)                                            │        │
//! │  Caller <─── ChatReply <─── reconcile() <───────────┘        │
//! │              (buffered chat completions only)                │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Health check |
//! | `/stats` | GET | Relay counters |
//! | `/api/proxy?path=...` | any | Proxy, target path from query |
//! | `/api/proxy/*path` | any | Proxy, target path from route |
//! | `/api/assistant/create` | POST | Create an assistant |
//! | `/api/update-instructions` | POST | Update assistant instructions |
//!
//! # Usage
//!
//! ```rust,ignore
//! use relay::{Config, proxy::ProxyServer};
//!
//! let config = Config::from_env();
//! ProxyServer::new(config).run().await?;
//! ```

mod adapter;
mod multiplexer;
mod reconcile;
mod request;
mod server;
mod stats;

pub use adapter::{UpstreamAdapter, UpstreamCall, API_KEY_HEADER, API_VERSION_HEADER};
pub use multiplexer::{relay, BodyKind, BufferedResponse, ByteStream, UpstreamResponse};
pub use reconcile::{extract_answer, reconcile, Envelope, Reconciled, RAW_TEXT_LIMIT};
pub use request::{Addressing, ProxyRequest, TargetPath, PATH_PARAM};
pub use server::{ProxyServer, ProxyState, REQUEST_ID_HEADER};
pub use stats::{ProxyStats, StatsSummary};
