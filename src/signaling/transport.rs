//! Transport primitives used by every signaling attempt.
//!
//! - `http_request`: one HTTP request/response with connect + read timeouts
//! - `ws_exchange`: connect, send one text message, wait for one matching
//!   reply, close
//!
//! Both own their connection for the duration of the call. Dropping the
//! returned future (e.g. on cancellation) drops the socket with it.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;

/// Grace period for the WebSocket close handshake
const WS_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Per-probe time bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTimeouts {
    #[serde(rename = "connect_ms", with = "crate::config::millis")]
    pub connect: Duration,
    #[serde(rename = "read_ms", with = "crate::config::millis")]
    pub read: Duration,
}

impl ProbeTimeouts {
    pub fn new(connect_ms: u64, read_ms: u64) -> Self {
        Self {
            connect: Duration::from_millis(connect_ms),
            read: Duration::from_millis(read_ms),
        }
    }

    pub fn total(&self) -> Duration {
        self.connect + self.read
    }
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self::new(5_000, 10_000)
    }
}

/// Outgoing HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response to an [`HttpRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    /// `Location` header resolved against the request URL
    pub location: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200 || self.status == 201
    }
}

/// Resolve a possibly relative `Location` against the endpoint it came from.
pub fn resolve_location(endpoint_url: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    match url::Url::parse(endpoint_url) {
        Ok(base) => base
            .join(location)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| location.to_string()),
        Err(_) => location.to_string(),
    }
}

/// Truncate long bodies for log lines and diagnostics.
pub fn preview(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

/// Perform one HTTP exchange.
pub async fn http_request(req: &HttpRequest, timeouts: &ProbeTimeouts) -> Result<HttpResponse, TransportError> {
    let uri: hyper::Uri = req
        .url
        .parse()
        .map_err(|_| TransportError::InvalidUrl(req.url.clone()))?;

    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(timeouts.connect));

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

    let mut builder = Request::builder().method(req.method.clone()).uri(uri);
    for (name, value) in &req.headers {
        builder = builder.header(*name, value.as_str());
    }
    let request = builder
        .body(Full::new(Bytes::from(req.body.clone().unwrap_or_default())))
        .map_err(|e| TransportError::Http(format!("Failed to build request: {}", e)))?;

    let exchange = async {
        let response = client.request(request).await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers();
        let content_type = headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let location = headers
            .get(hyper::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|s| resolve_location(&req.url, s));

        let body_bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| TransportError::Http(format!("Failed to read response body: {}", e)))?
            .to_bytes();

        Ok::<_, TransportError>(HttpResponse {
            status,
            content_type,
            location,
            body: String::from_utf8_lossy(&body_bytes).to_string(),
        })
    };

    let limit = timeouts.total();
    match tokio::time::timeout(limit, exchange).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(limit.as_millis() as u64)),
    }
}

/// Connect to `url`, send `message`, and return the first reply `matcher`
/// accepts.
///
/// Replies the matcher rejects are skipped. Returns `Ok(None)` when the
/// remote closes without a matching reply and `Err(Timeout)` when the read
/// window runs out.
pub async fn ws_exchange<T, F>(
    url: &str,
    message: String,
    timeouts: &ProbeTimeouts,
    mut matcher: F,
) -> Result<Option<T>, TransportError>
where
    F: FnMut(&str) -> Option<T>,
{
    let (mut ws, _) = match tokio::time::timeout(timeouts.connect, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
        Err(_) => return Err(TransportError::Timeout(timeouts.connect.as_millis() as u64)),
    };

    log::debug!("WebSocket connected to {}", url);

    let result = async {
        ws.send(Message::Text(message))
            .await
            .map_err(|e| TransportError::WebSocket(format!("Failed to send offer: {}", e)))?;

        let deadline = Instant::now() + timeouts.read;
        loop {
            let next = match tokio::time::timeout_at(deadline, ws.next()).await {
                Ok(next) => next,
                Err(_) => return Err(TransportError::Timeout(timeouts.read.as_millis() as u64)),
            };

            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(TransportError::WebSocket(e.to_string())),
            };

            log::debug!("WebSocket message from {}: {}", url, preview(&text, 100));
            if let Some(found) = matcher(&text) {
                return Ok(Some(found));
            }
        }
    }
    .await;

    let _ = tokio::time::timeout(WS_CLOSE_GRACE, ws.close(None)).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeHttpRemote, FakeWsRemote, Reply};

    #[test]
    fn test_resolve_location() {
        assert_eq!(
            resolve_location("http://localhost:8889/cam/whep", "/cam/whep/session/42"),
            "http://localhost:8889/cam/whep/session/42"
        );
        assert_eq!(
            resolve_location("http://localhost:8889/cam/whep", "https://other/x"),
            "https://other/x"
        );
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("  short  ", 10), "short");
        assert_eq!(preview("abcdefghij", 4), "abcd...");
    }

    #[tokio::test]
    async fn test_http_post_roundtrip() {
        let remote = FakeHttpRemote::start(vec![(
            "/cam/whep",
            Reply::sdp(201, "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n").with_location("/cam/whep/res-1"),
        )])
        .await;

        let req = HttpRequest::new(Method::POST, remote.url("/cam/whep"))
            .header("Content-Type", "application/sdp")
            .body("v=0\r\n");
        let resp = http_request(&req, &ProbeTimeouts::new(1_000, 1_000)).await.unwrap();

        assert_eq!(resp.status, 201);
        assert!(resp.is_success());
        assert!(resp.body.starts_with("v=0"));
        assert_eq!(resp.location.as_deref(), Some(remote.url("/cam/whep/res-1").as_str()));

        let hits = remote.requests();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].method, "POST");
        assert_eq!(hits[0].content_type.as_deref(), Some("application/sdp"));
        assert_eq!(hits[0].body, "v=0\r\n");
    }

    #[tokio::test]
    async fn test_http_unknown_path_is_404() {
        let remote = FakeHttpRemote::start(vec![]).await;
        let req = HttpRequest::new(Method::HEAD, remote.url("/nothing.m3u8"));
        let resp = http_request(&req, &ProbeTimeouts::new(1_000, 1_000)).await.unwrap();
        assert_eq!(resp.status, 404);
    }

    #[tokio::test]
    async fn test_http_timeout() {
        let remote = FakeHttpRemote::start(vec![("/slow", Reply::stall())]).await;
        let req = HttpRequest::new(Method::GET, remote.url("/slow"));
        let err = http_request(&req, &ProbeTimeouts::new(100, 100)).await.unwrap_err();
        assert_eq!(err, TransportError::Timeout(200));
    }

    #[tokio::test]
    async fn test_http_connect_refused() {
        // bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = HttpRequest::new(Method::GET, format!("http://{}/x", addr));
        let err = http_request(&req, &ProbeTimeouts::new(500, 500)).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_ws_exchange_skips_unmatched() {
        let remote = FakeWsRemote::start(vec![
            r#"{"type":"welcome"}"#.to_string(),
            r#"{"type":"answer","sdp":"v=0"}"#.to_string(),
        ])
        .await;

        let found = ws_exchange(&remote.url("/ws"), "hello".into(), &ProbeTimeouts::new(1_000, 1_000), |text| {
            if text.contains("answer") {
                Some(text.to_string())
            } else {
                None
            }
        })
        .await
        .unwrap();

        assert_eq!(found.as_deref(), Some(r#"{"type":"answer","sdp":"v=0"}"#));
        assert_eq!(remote.received(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_ws_exchange_times_out() {
        let remote = FakeWsRemote::start(vec![]).await;
        let err = ws_exchange(&remote.url("/ws"), "hello".into(), &ProbeTimeouts::new(1_000, 150), |_| Some(()))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout(150));
    }
}
