//! Test doubles: a scripted media engine and fake signaling remotes.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::error::EngineError;
use crate::events::NegotiationEvent;
use crate::peer::{
    EngineEvent, EngineEventSender, IceCandidateRecord, MediaEngine, OfferConstraints, PeerConnectionState,
    PeerSession, SessionDescriptor,
};

pub const FAKE_OFFER: &str =
    "v=0\r\no=- 4611 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=recvonly\r\n";
pub const FAKE_ANSWER: &str =
    "v=0\r\no=- 7722 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=sendonly\r\n";

// ============================================================================
// FakeEngine
// ============================================================================

/// When the fake reports ICE gathering complete
#[derive(Debug, Clone, Copy)]
pub enum Gathering {
    /// Candidates then completion, this long after the local description is set
    Auto(Duration),
    /// Only when the test calls [`FakeEngine::complete_gathering`]
    Manual,
}

struct EngineScript {
    gathering: Gathering,
    candidates: Vec<IceCandidateRecord>,
    reject_remote_containing: Option<String>,
    remote_delay: Option<Duration>,
}

#[derive(Default)]
struct EngineLog {
    opened: usize,
    closed: usize,
    remote: Vec<String>,
    added_candidates: Vec<IceCandidateRecord>,
    gathering_completed_at: Option<Instant>,
}

/// Scripted [`MediaEngine`] that records what the negotiator asked of it.
#[derive(Clone)]
pub struct FakeEngine {
    script: Arc<Mutex<EngineScript>>,
    log: Arc<Mutex<EngineLog>>,
    latest_events: Arc<Mutex<Option<EngineEventSender>>>,
}

pub fn host_candidate(n: u16) -> IceCandidateRecord {
    IceCandidateRecord {
        candidate: format!("candidate:{} 1 udp 2130706431 192.168.1.{} 5000{} typ host", n, 10 + n, n),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(EngineScript {
                gathering: Gathering::Auto(Duration::from_millis(20)),
                candidates: vec![host_candidate(1), host_candidate(2)],
                reject_remote_containing: None,
                remote_delay: None,
            })),
            log: Arc::new(Mutex::new(EngineLog::default())),
            latest_events: Arc::new(Mutex::new(None)),
        }
    }

    pub fn manual_gathering(self) -> Self {
        self.script.lock().gathering = Gathering::Manual;
        self
    }

    /// Answers whose SDP contains `needle` are rejected as malformed.
    pub fn rejecting_remote(self, needle: &str) -> Self {
        self.script.lock().reject_remote_containing = Some(needle.to_string());
        self
    }

    /// Make `set_remote_description` take this long.
    pub fn slow_remote(self, delay: Duration) -> Self {
        self.script.lock().remote_delay = Some(delay);
        self
    }

    pub fn complete_gathering(&self) {
        self.log.lock().gathering_completed_at = Some(Instant::now());
        self.push(EngineEvent::IceGatheringComplete);
    }

    pub fn push_state(&self, state: PeerConnectionState) {
        self.push(EngineEvent::ConnectionState(state));
    }

    fn push(&self, event: EngineEvent) {
        if let Some(tx) = self.latest_events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn opened(&self) -> usize {
        self.log.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.log.lock().closed
    }

    /// Every SDP handed to `set_remote_description`, accepted or not.
    pub fn remote_descriptions(&self) -> Vec<String> {
        self.log.lock().remote.clone()
    }

    pub fn added_candidates(&self) -> Vec<IceCandidateRecord> {
        self.log.lock().added_candidates.clone()
    }

    pub fn gathering_completed_at(&self) -> Option<Instant> {
        self.log.lock().gathering_completed_at
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn open_session(
        &self,
        _constraints: &OfferConstraints,
        events: EngineEventSender,
    ) -> Result<Box<dyn PeerSession>, EngineError> {
        self.log.lock().opened += 1;
        *self.latest_events.lock() = Some(events.clone());
        Ok(Box::new(FakePeer {
            engine: self.clone(),
            events: Mutex::new(Some(events)),
            local: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakePeer {
    engine: FakeEngine,
    events: Mutex<Option<EngineEventSender>>,
    local: Mutex<Option<SessionDescriptor>>,
    closed: AtomicBool,
}

impl FakePeer {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<SessionDescriptor, EngineError> {
        self.ensure_open()?;
        Ok(SessionDescriptor::offer(FAKE_OFFER))
    }

    async fn set_local_description(&self, desc: &SessionDescriptor) -> Result<(), EngineError> {
        self.ensure_open()?;
        *self.local.lock() = Some(desc.clone());

        let (gathering, candidates) = {
            let script = self.engine.script.lock();
            (script.gathering, script.candidates.clone())
        };
        if let Gathering::Auto(delay) = gathering {
            if let Some(tx) = self.events.lock().clone() {
                let log = self.engine.log.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    for c in candidates {
                        let _ = tx.send(EngineEvent::IceCandidate(c));
                    }
                    log.lock().gathering_completed_at = Some(Instant::now());
                    let _ = tx.send(EngineEvent::IceGatheringComplete);
                });
            }
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescriptor> {
        let local = self.local.lock().clone()?;
        if self.engine.gathering_completed_at().is_none() {
            return Some(local);
        }
        let mut sdp = local.sdp;
        for c in &self.engine.script.lock().candidates {
            sdp.push_str(&format!("a={}\r\n", c.candidate));
        }
        Some(SessionDescriptor { kind: local.kind, sdp })
    }

    async fn set_remote_description(&self, desc: &SessionDescriptor) -> Result<(), EngineError> {
        self.ensure_open()?;
        let (reject, delay) = {
            let script = self.engine.script.lock();
            (script.reject_remote_containing.clone(), script.remote_delay)
        };
        self.engine.log.lock().remote.push(desc.sdp.clone());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reject {
            Some(needle) if desc.sdp.contains(&needle) => {
                Err(EngineError::SetRemoteDescription("malformed SDP".into()))
            }
            _ => Ok(()),
        }
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateRecord) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.engine.log.lock().added_candidates.push(candidate.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.engine.log.lock().closed += 1;
        self.events.lock().take();
        Ok(())
    }
}

// ============================================================================
// Event collection
// ============================================================================

/// Collects negotiation events from a channel sink.
pub struct EventLog {
    rx: mpsc::UnboundedReceiver<NegotiationEvent>,
    pub seen: Vec<NegotiationEvent>,
}

impl EventLog {
    pub fn new(rx: mpsc::UnboundedReceiver<NegotiationEvent>) -> Self {
        Self { rx, seen: Vec::new() }
    }

    /// First event (already seen or arriving within `within`) matching `pred`.
    pub async fn wait_for<F>(&mut self, within: Duration, pred: F) -> Option<NegotiationEvent>
    where
        F: Fn(&NegotiationEvent) -> bool,
    {
        if let Some(ev) = self.seen.iter().find(|e| pred(*e)) {
            return Some(ev.clone());
        }
        let deadline = Instant::now() + within;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(ev)) => {
                    self.seen.push(ev.clone());
                    if pred(&ev) {
                        return Some(ev);
                    }
                }
                _ => return None,
            }
        }
    }

    /// Collect everything that arrives in the next `within`.
    pub async fn settle(&mut self, within: Duration) {
        let deadline = Instant::now() + within;
        while let Ok(Some(ev)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            self.seen.push(ev);
        }
    }

    pub fn states(&self) -> Vec<PeerConnectionState> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                NegotiationEvent::ConnectionStateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.seen
            .iter()
            .filter_map(|e| match e {
                NegotiationEvent::ConnectionError { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn is_state(state: PeerConnectionState) -> impl Fn(&NegotiationEvent) -> bool {
    move |e: &NegotiationEvent| matches!(e, NegotiationEvent::ConnectionStateChanged { state: s, .. } if *s == state)
}

pub fn is_error(e: &NegotiationEvent) -> bool {
    matches!(e, NegotiationEvent::ConnectionError { .. })
}

// ============================================================================
// FakeHttpRemote
// ============================================================================

/// Canned reply for one path.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    content_type: Option<&'static str>,
    body: String,
    location: Option<String>,
    delay: Option<Duration>,
    head_status: Option<u16>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
            location: None,
            delay: None,
            head_status: None,
        }
    }

    pub fn sdp(status: u16, body: &str) -> Self {
        Self {
            content_type: Some("application/sdp"),
            body: body.to_string(),
            ..Self::status(status)
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            content_type: Some("application/json"),
            body: body.to_string(),
            ..Self::status(status)
        }
    }

    /// Never answers within any sane request timeout.
    pub fn stall() -> Self {
        Self::status(200).delayed(Duration::from_secs(30))
    }

    pub fn with_location(mut self, path: &str) -> Self {
        self.location = Some(path.to_string());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer HEAD with 405 and everything else normally.
    pub fn rejecting_head(mut self) -> Self {
        self.head_status = Some(405);
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub user_agent: Option<String>,
    pub body: String,
    pub at: Instant,
}

struct HttpRemoteState {
    routes: HashMap<String, Reply>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// HTTP server on an ephemeral port that answers from a route table and
/// records every request. Unknown paths get 404.
pub struct FakeHttpRemote {
    addr: SocketAddr,
    state: Arc<HttpRemoteState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeHttpRemote {
    pub async fn start(routes: Vec<(&str, Reply)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(HttpRemoteState {
            routes: routes.into_iter().map(|(p, r)| (p.to_string(), r)).collect(),
            requests: Mutex::new(Vec::new()),
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let server_state = state.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };
                        let io = TokioIo::new(stream);
                        let state = server_state.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_http(req, state).await }
                            });
                            let _ = http1::Builder::new().serve_connection(io, service).await;
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

impl Drop for FakeHttpRemote {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_http(
    req: Request<Incoming>,
    state: Arc<HttpRemoteState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let header = |name: hyper::header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    };
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let content_type = header(hyper::header::CONTENT_TYPE);
    let user_agent = header(hyper::header::USER_AGENT);

    let body = match req.into_body().collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).to_string(),
        Err(_) => String::new(),
    };

    state.requests.lock().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        content_type,
        user_agent,
        body,
        at: Instant::now(),
    });

    let Some(reply) = state.routes.get(&path).cloned() else {
        return Ok(plain(404, "Not Found"));
    };

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }

    let status = match reply.head_status {
        Some(s) if method == "HEAD" => s,
        _ => reply.status,
    };

    let mut builder = Response::builder().status(status);
    if let Some(ct) = reply.content_type {
        builder = builder.header("Content-Type", ct);
    }
    if let Some(location) = &reply.location {
        builder = builder.header("Location", location.as_str());
    }
    Ok(builder
        .body(Full::new(Bytes::from(reply.body)))
        .unwrap_or_else(|_| plain(500, "bad reply")))
}

fn plain(status: u16, body: &'static str) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *resp.status_mut() = hyper::StatusCode::from_u16(status).unwrap_or(hyper::StatusCode::INTERNAL_SERVER_ERROR);
    resp
}

// ============================================================================
// FakeWsRemote
// ============================================================================

/// WebSocket server that records the first text message of each connection,
/// then sends its scripted replies in order and stays open.
pub struct FakeWsRemote {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    paths: Arc<Mutex<Vec<String>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeWsRemote {
    pub async fn start(replies: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_received = received.clone();
        let server_paths = paths.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { continue };
                        let received = server_received.clone();
                        let paths = server_paths.clone();
                        let replies = replies.clone();
                        tokio::spawn(async move {
                            let mut path = String::new();
                            let ws = tokio_tungstenite::accept_hdr_async(
                                stream,
                                |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
                                 response: tokio_tungstenite::tungstenite::handshake::server::Response| {
                                    path = request.uri().path().to_string();
                                    Ok(response)
                                },
                            )
                            .await;
                            let Ok(ws) = ws else { return };
                            paths.lock().push(path);

                            let (mut sender, mut receiver) = ws.split();
                            let mut answered = false;
                            while let Some(Ok(msg)) = receiver.next().await {
                                let Message::Text(text) = msg else { continue };
                                received.lock().push(text);
                                if answered {
                                    continue;
                                }
                                answered = true;
                                for reply in &replies {
                                    if sender.send(Message::Text(reply.clone())).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Self {
            addr,
            received,
            paths,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().clone()
    }
}

impl Drop for FakeWsRemote {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
