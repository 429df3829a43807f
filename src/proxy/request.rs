//! Inbound request model and target-path resolution.

use axum::http::{header, HeaderMap, HeaderValue, Method};
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{RelayError, Result};

/// Query parameter carrying the target path segments.
pub const PATH_PARAM: &str = "path";

lazy_static! {
    static ref CHAT_PATH: Regex =
        Regex::new(r"(?:^|/)assistants?/chat/([^/]+)$").expect("chat path pattern is valid");
}

/// Non-empty, ordered upstream path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPath {
    segments: Vec<String>,
}

impl TargetPath {
    /// Build from raw pieces. Each piece may itself contain `/`; empty segments are dropped.
    pub fn from_pieces<I, S>(pieces: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments: Vec<String> = pieces
            .into_iter()
            .flat_map(|p| {
                p.as_ref()
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();

        if segments.is_empty() {
            return Err(RelayError::BadRequest(
                "Missing target path. Pass it as ?path=<segment>[&path=<segment>...]".to_string(),
            ));
        }

        Ok(Self { segments })
    }

    /// Resolve from a route tail (preferred when non-empty) or the `path` query parameter.
    pub fn resolve(tail: Option<&str>, query: Option<&str>) -> Result<Self> {
        if let Some(tail) = tail.filter(|t| !t.trim_matches('/').is_empty()) {
            return Self::from_pieces([tail]);
        }

        let values = query
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default()
            .into_iter()
            .filter(|(k, _)| k == PATH_PARAM)
            .map(|(_, v)| v)
            .collect::<Vec<_>>();

        Self::from_pieces(values)
    }

    /// Segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segments joined with `/`.
    pub fn joined(&self) -> String {
        self.segments.join("/")
    }

    /// Which upstream feature this path addresses.
    pub fn addressing(&self) -> Addressing {
        let joined = self.joined();
        match CHAT_PATH.captures(&joined).and_then(|c| c.get(1)) {
            Some(name) => Addressing::ChatCompletion {
                assistant: name.as_str().to_string(),
            },
            None => Addressing::DataPlane,
        }
    }
}

impl std::fmt::Display for TargetPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.joined())
    }
}

/// Upstream addressing mode, selected by target-path shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Path-based passthrough.
    DataPlane,
    /// Structured chat completion against a named assistant.
    ChatCompletion {
        /// Assistant name taken from `.../chat/<name>`.
        assistant: String,
    },
}

/// A request accepted by the relay, ready to be turned into an upstream call.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Inbound method, carried through unchanged.
    pub method: Method,
    /// Resolved upstream path.
    pub target: TargetPath,
    /// Inbound content-type, the only inbound header propagated upstream.
    pub content_type: Option<HeaderValue>,
    /// Inbound body bytes, untouched.
    pub body: Bytes,
}

impl ProxyRequest {
    /// Capture the parts of an inbound request the relay needs.
    pub fn new(method: Method, target: TargetPath, headers: &HeaderMap, body: Bytes) -> Self {
        Self {
            method,
            target,
            content_type: headers.get(header::CONTENT_TYPE).cloned(),
            body,
        }
    }

    /// GET and HEAD never carry a body upstream.
    pub fn carries_body(&self) -> bool {
        !matches!(self.method, Method::GET | Method::HEAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multi_value_query_is_joined() {
        let target =
            TargetPath::resolve(None, Some("path=assistant&path=chat&path=foo")).unwrap();
        assert_eq!(target.joined(), "assistant/chat/foo");
        assert_eq!(target.segments().len(), 3);
    }

    #[test]
    fn test_encoded_single_value() {
        let target = TargetPath::resolve(None, Some("path=assistant%2Fchat%2Ffoo&x=1")).unwrap();
        assert_eq!(target.to_string(), "assistant/chat/foo");
    }

    #[test]
    fn test_tail_wins_over_query() {
        let target = TargetPath::resolve(Some("/assistants/files/"), Some("path=ignored")).unwrap();
        assert_eq!(target.joined(), "assistants/files");
    }

    #[test]
    fn test_empty_path_is_bad_request() {
        for query in [None, Some(""), Some("path="), Some("path=%2F&path="), Some("other=1")] {
            let err = TargetPath::resolve(Some("/"), query).unwrap_err();
            assert!(matches!(err, RelayError::BadRequest(_)), "query {query:?}");
        }
    }

    #[test]
    fn test_chat_addressing() {
        let chat = |p: &str| TargetPath::from_pieces([p]).unwrap().addressing();

        assert_eq!(
            chat("assistant/chat/icp-pulse"),
            Addressing::ChatCompletion {
                assistant: "icp-pulse".into()
            }
        );
        assert_eq!(
            chat("v1/assistants/chat/bot"),
            Addressing::ChatCompletion {
                assistant: "bot".into()
            }
        );
        assert_eq!(chat("assistant/chat/bot/chat/completions"), Addressing::DataPlane);
        assert_eq!(chat("assistants/bot"), Addressing::DataPlane);
        assert_eq!(chat("myassistant/chat/bot"), Addressing::DataPlane);
    }

    #[test]
    fn test_body_carrying_methods() {
        let target = TargetPath::from_pieces(["x"]).unwrap();
        let req = |m: Method| ProxyRequest::new(m, target.clone(), &HeaderMap::new(), Bytes::new());
        assert!(!req(Method::GET).carries_body());
        assert!(!req(Method::HEAD).carries_body());
        assert!(req(Method::POST).carries_body());
        assert!(req(Method::PATCH).carries_body());
    }
}
