//! Stream reference parsing.
//!
//! A stream reference is whatever the caller was handed to play, e.g.
//! `https://live.example.com:8443/248/park-plaza_cam_02` or
//! `http://localhost:8889/mystream/whep`. Strategies derive their endpoint
//! guesses from the pieces exposed here.

use std::fmt;

use url::Url;

use crate::error::NegotiationError;

/// Parsed, immutable stream reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReference {
    raw: String,
    /// `http` or `https` (`ws`/`wss` are mapped onto these)
    pub scheme: String,
    pub host: String,
    /// Only set when the reference spells out a port
    pub port: Option<u16>,
    /// Path with a leading `/` and no trailing `/` (empty for the root)
    pub path: String,
    /// Path without the leading `/`, used as the stream identifier
    pub stream_id: String,
}

impl StreamReference {
    /// Parse a stream reference.
    ///
    /// Accepts `http`, `https`, `ws` and `wss`; query and fragment are dropped.
    pub fn parse(reference: &str) -> Result<Self, NegotiationError> {
        let trimmed = reference.trim();
        let invalid = |reason: &str| NegotiationError::InvalidStreamReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;

        let scheme = match url.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            _ => return Err(invalid("scheme must be http, https, ws or wss")),
        };

        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => return Err(invalid("missing host")),
        };

        let path = url.path().trim_end_matches('/').to_string();
        let stream_id = path.trim_start_matches('/').to_string();

        Ok(Self {
            raw: trimmed.to_string(),
            scheme: scheme.to_string(),
            host,
            port: url.port(),
            path,
            stream_id,
        })
    }

    /// The reference exactly as supplied (trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `scheme://host[:port]`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    /// WebSocket flavour of [`base_url`](Self::base_url).
    pub fn ws_base_url(&self) -> String {
        let scheme = if self.scheme == "https" { "wss" } else { "ws" };
        format!("{}://{}", scheme, self.authority())
    }

    /// Base URL plus path, without query, fragment or trailing slash.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url(), self.path)
    }

    /// True when one of the path segments names a well-known signaling
    /// endpoint, in which case the reference itself is the endpoint.
    pub fn is_direct_endpoint<S: AsRef<str>>(&self, segments: &[S]) -> bool {
        self.path
            .split('/')
            .filter(|s| !s.is_empty())
            .any(|seg| segments.iter().any(|d| seg.eq_ignore_ascii_case(d.as_ref())))
    }
}

impl fmt::Display for StreamReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
