//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (applied by the binary on top of the above)
//!
//! The upstream connection (host + credential) is validated exactly once, by
//! [`UpstreamConfig::connection`]. A missing value does not stop the process:
//! the relay keeps serving `/health` and answers proxy routes with a
//! configuration error instead.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result, CONFIGURATION_MESSAGE};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream assistant service configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            RelayError::Configuration(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        Ok(toml::from_str(&content)?)
    }

    /// Default config file location (`<config_dir>/assistant-relay/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("assistant-relay").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from a variable lookup on top of `self`.
    ///
    /// Split out from [`Config::from_env`] so tests can supply a fake
    /// environment instead of mutating the process one.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k).filter(|v| !v.is_empty()));

        if let Some(host) = first(&["RELAY_UPSTREAM_HOST", "PINECONE_HOST"]) {
            self.upstream.host = Some(host);
        }
        if let Some(key) = first(&["RELAY_API_KEY", "PINECONE_API_KEY"]) {
            self.upstream.api_key = Some(key);
        }
        if let Some(url) = first(&["RELAY_CONTROL_PLANE_URL"]) {
            self.upstream.control_plane_url = url;
        }
        if let Some(version) = first(&["RELAY_API_VERSION"]) {
            self.upstream.api_version = Some(version);
        }
        if let Some(port) = first(&["RELAY_PORT"]) {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(bind) = first(&["RELAY_BIND"]) {
            self.server.host = bind;
        }

        self
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum inbound request body size in bytes
    pub max_body_size: usize,

    /// Allow cross-origin requests from browsers
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_body_size: 1024 * 1024, // 1 MB
            cors: true,
        }
    }
}

impl ServerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream assistant service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Data-plane host URL (e.g. `https://prod-1-data.ke.pinecone.io`)
    pub host: Option<String>,

    /// Credential sent as `Api-Key`
    pub api_key: Option<String>,

    /// Control-plane URL used to create assistants
    pub control_plane_url: String,

    /// Optional API version header value
    pub api_version: Option<String>,

    /// Also send the credential as `Authorization: Bearer`
    pub bearer_auth: bool,

    /// Path appended to `assistant/chat/<name>` for completion calls
    pub completion_suffix: String,

    /// Region requested when creating assistants
    pub region: String,

    /// Tag recorded in assistant metadata
    pub metadata_tag: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: None,
            api_key: None,
            control_plane_url: "https://api.pinecone.io".to_string(),
            api_version: None,
            bearer_auth: true,
            completion_suffix: "chat/completions".to_string(),
            region: "us".to_string(),
            metadata_tag: "assistant-relay".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Validate host and credential into a ready-to-use connection.
    pub fn connection(&self) -> Result<UpstreamConnection> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match (present(&self.host), present(&self.api_key)) {
            (Some(host), Some(api_key)) => Ok(UpstreamConnection {
                host: host.trim_end_matches('/').to_string(),
                control_plane_url: self.control_plane_url.trim_end_matches('/').to_string(),
                api_key,
                api_version: self.api_version.clone(),
                bearer_auth: self.bearer_auth,
                completion_suffix: self.completion_suffix.trim_matches('/').to_string(),
                region: self.region.clone(),
                metadata_tag: self.metadata_tag.clone(),
            }),
            _ => Err(RelayError::Configuration(CONFIGURATION_MESSAGE.to_string())),
        }
    }
}

/// Validated, read-only upstream parameters.
#[derive(Clone)]
pub struct UpstreamConnection {
    /// Data-plane host, without trailing slash
    pub host: String,
    /// Control-plane URL, without trailing slash
    pub control_plane_url: String,
    /// Credential
    pub api_key: String,
    /// Optional API version header value
    pub api_version: Option<String>,
    /// Send `Authorization: Bearer` alongside `Api-Key`
    pub bearer_auth: bool,
    /// Completion path suffix, without surrounding slashes
    pub completion_suffix: String,
    /// Region for created assistants
    pub region: String,
    /// Metadata tag
    pub metadata_tag: String,
}

impl std::fmt::Debug for UpstreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnection")
            .field("host", &self.host)
            .field("control_plane_url", &self.control_plane_url)
            .field("api_key", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("bearer_auth", &self.bearer_auth)
            .field("completion_suffix", &self.completion_suffix)
            .finish_non_exhaustive()
    }
}

impl UpstreamConnection {
    /// Connection for tests and embedding, with defaults for everything but host and key.
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        let defaults = UpstreamConfig::default();
        Self {
            host: host.into().trim_end_matches('/').to_string(),
            control_plane_url: defaults.control_plane_url,
            api_key: api_key.into(),
            api_version: None,
            bearer_auth: defaults.bearer_auth,
            completion_suffix: defaults.completion_suffix,
            region: defaults.region,
            metadata_tag: defaults.metadata_tag,
        }
    }

    /// Point assistant creation at a different control plane.
    pub fn with_control_plane(mut self, url: impl Into<String>) -> Self {
        self.control_plane_url = url.into().trim_end_matches('/').to_string();
        self
    }
}
