//! Per-negotiation state.
//!
//! A [`Session`] lives from `begin` until it is released. Transitions are
//! decided under the state lock; events go out afterwards under a separate
//! re-entrant emit lock, after re-checking the state. The host's sink may
//! call straight back into the negotiator from inside an event.
//!
//! A cancel that lands before an answer's Connected is emitted suppresses
//! that Connected, and a cancel's Closed always follows any Connected that
//! got out first.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyper::Method;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::Notify;

use crate::config::NegotiatorConfig;
use crate::error::{EngineError, NegotiationError};
use crate::events::{EventSink, NegotiationEvent};
use crate::peer::{PeerConnectionState, PeerSession, SdpKind, SessionDescriptor};
use crate::signaling::{http_request, HttpRequest, ProbeTimeouts};
use crate::stream_ref::StreamReference;

/// Where a negotiation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    CreatingOffer,
    /// Direct mode only: waiting for ICE gathering before the single POST
    AwaitingIceGathering,
    /// Direct mode only: offer sent, waiting for the answer
    Transmitting,
    /// Discovery mode: index into the enabled strategy list
    TryingStrategy(usize),
    Connected,
    Failed,
    Cancelled,
}

impl NegotiationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationState::Connected | NegotiationState::Failed | NegotiationState::Cancelled
        )
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationState::TryingStrategy(i) => write!(f, "TryingStrategy({})", i),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Set-once flag that can be awaited.
#[derive(Default)]
pub struct Signal {
    set: AtomicBool,
    notify: Notify,
}

impl Signal {
    pub fn set(&self) {
        if !self.set.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            // register before checking so a concurrent set() cannot be missed
            let notified = self.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of offering an answer to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// An answer was already applied; this one was ignored
    AlreadyApplied,
    /// The session was cancelled; the answer was dropped
    Discarded,
}

pub(crate) struct Session {
    pub generation: u64,
    pub reference: StreamReference,
    pub config: Arc<NegotiatorConfig>,
    pub cancel: Signal,
    pub gathering: Signal,
    sink: Arc<dyn EventSink>,
    /// Held while calling the sink, never together with `state`
    emit_lock: ReentrantMutex<()>,
    state: Mutex<NegotiationState>,
    last_peer_state: Mutex<Option<PeerConnectionState>>,
    peer: Mutex<Option<Arc<dyn PeerSession>>>,
    apply_lock: tokio::sync::Mutex<()>,
    applied: AtomicBool,
    released: AtomicBool,
    resource_url: Mutex<Option<String>>,
}

impl Session {
    pub fn new(
        generation: u64,
        reference: StreamReference,
        config: Arc<NegotiatorConfig>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            generation,
            reference,
            config,
            cancel: Signal::default(),
            gathering: Signal::default(),
            sink,
            emit_lock: ReentrantMutex::new(()),
            state: Mutex::new(NegotiationState::Idle),
            last_peer_state: Mutex::new(None),
            peer: Mutex::new(None),
            apply_lock: tokio::sync::Mutex::new(()),
            applied: AtomicBool::new(false),
            released: AtomicBool::new(false),
            resource_url: Mutex::new(None),
        }
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.lock()
    }

    pub fn stream_url(&self) -> &str {
        self.reference.as_str()
    }

    pub fn is_applied(&self) -> bool {
        self.applied.load(Ordering::SeqCst)
    }

    /// Move to a non-terminal progress state. No-op once terminal.
    pub fn advance(&self, next: NegotiationState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        log::debug!("[session {}] {} -> {}", self.generation, *state, next);
        *state = next;
        true
    }

    /// Emit unless the session has been cancelled.
    pub fn emit_live(&self, event: NegotiationEvent) {
        let _emit = self.emit_lock.lock();
        if self.state() == NegotiationState::Cancelled {
            return;
        }
        self.sink.emit(event);
    }

    /// Emit a connection state, skipping repeats.
    pub fn emit_peer_state(&self, peer_state: PeerConnectionState) {
        let _emit = self.emit_lock.lock();
        if self.state() == NegotiationState::Cancelled || !self.mark_peer_state(peer_state) {
            return;
        }
        self.sink.emit(NegotiationEvent::state(peer_state, self.stream_url()));
    }

    /// Record `peer_state` as last reported; false if it already was.
    fn mark_peer_state(&self, peer_state: PeerConnectionState) -> bool {
        let mut last = self.last_peer_state.lock();
        if *last == Some(peer_state) {
            return false;
        }
        *last = Some(peer_state);
        true
    }

    /// State reported by the engine.
    ///
    /// Progress states are ours to report; the engine's New/Connecting are
    /// not forwarded so they cannot contradict an earlier Connected.
    pub fn on_engine_state(&self, peer_state: PeerConnectionState) {
        match peer_state {
            PeerConnectionState::New | PeerConnectionState::Connecting => {
                log::debug!("[session {}] engine state {:?}", self.generation, peer_state);
            }
            other => self.emit_peer_state(other),
        }
    }

    pub fn attach_peer(&self, peer: Arc<dyn PeerSession>) {
        *self.peer.lock() = Some(peer);
    }

    pub fn peer(&self) -> Result<Arc<dyn PeerSession>, NegotiationError> {
        self.peer
            .lock()
            .clone()
            .ok_or(NegotiationError::Engine(EngineError::Closed))
    }

    /// Apply a remote answer at most once.
    ///
    /// Serialised by the apply lock. On success the session becomes
    /// Connected and emits `Connected` as its last negotiation event, unless a
    /// cancel got in first.
    pub async fn apply_remote(
        &self,
        answer: &SessionDescriptor,
        resource_url: Option<String>,
    ) -> Result<ApplyOutcome, NegotiationError> {
        let _guard = self.apply_lock.lock().await;

        if self.cancel.is_set() {
            log::warn!("[session {}] answer arrived after cancel, discarding", self.generation);
            return Ok(ApplyOutcome::Discarded);
        }
        if self.is_applied() {
            log::warn!("[session {}] remote description already applied, ignoring", self.generation);
            return Ok(ApplyOutcome::AlreadyApplied);
        }
        if answer.kind != SdpKind::Answer {
            return Err(NegotiationError::ProtocolMismatch(format!(
                "expected an answer, got {}",
                answer.kind
            )));
        }

        let peer = self.peer()?;
        peer.set_remote_description(answer)
            .await
            .map_err(|e| NegotiationError::DescriptionApply(e.to_string()))?;
        self.applied.store(true, Ordering::SeqCst);
        *self.resource_url.lock() = resource_url;

        {
            let mut state = self.state.lock();
            if *state == NegotiationState::Cancelled {
                return Ok(ApplyOutcome::Discarded);
            }
            *state = NegotiationState::Connected;
        }
        log::info!("[session {}] connected to {}", self.generation, self.stream_url());

        let _emit = self.emit_lock.lock();
        if self.state() == NegotiationState::Connected && self.mark_peer_state(PeerConnectionState::Connected) {
            self.sink
                .emit(NegotiationEvent::state(PeerConnectionState::Connected, self.stream_url()));
        }
        Ok(ApplyOutcome::Applied)
    }

    /// Terminal failure: one aggregated error event, then `Failed`.
    pub fn fail(&self, message: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = NegotiationState::Failed;
        }
        log::error!("[session {}] negotiation failed: {}", self.generation, message);

        let _emit = self.emit_lock.lock();
        self.mark_peer_state(PeerConnectionState::Failed);
        self.sink.emit(NegotiationEvent::error(message, self.stream_url()));
        self.sink
            .emit(NegotiationEvent::state(PeerConnectionState::Failed, self.stream_url()));
        true
    }

    /// Cancel from any state. Returns false if already cancelled or failed.
    pub fn cancel(&self) -> bool {
        self.cancel.set();
        {
            let mut state = self.state.lock();
            if matches!(*state, NegotiationState::Cancelled | NegotiationState::Failed) {
                return false;
            }
            log::info!("[session {}] cancelled in state {}", self.generation, *state);
            *state = NegotiationState::Cancelled;
        }

        let _emit = self.emit_lock.lock();
        self.mark_peer_state(PeerConnectionState::Closed);
        self.sink
            .emit(NegotiationEvent::state(PeerConnectionState::Closed, self.stream_url()));
        true
    }

    /// Close the peer session and delete the remote resource. Runs once.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.set();

        let peer = self.peer.lock().take();
        let resource_url = self.resource_url.lock().take();
        let limit = self.config.release_timeout;

        if let Some(url) = resource_url {
            log::debug!("[session {}] deleting remote resource {}", self.generation, url);
            let req = HttpRequest::new(Method::DELETE, url.as_str()).header("User-Agent", self.config.user_agent.as_str());
            let timeouts = ProbeTimeouts {
                connect: limit,
                read: limit,
            };
            match tokio::time::timeout(limit, http_request(&req, &timeouts)).await {
                Ok(Ok(resp)) => log::debug!("DELETE {} -> {}", url, resp.status),
                Ok(Err(e)) => log::warn!("DELETE {} failed: {}", url, e),
                Err(_) => log::warn!("DELETE {} timed out", url),
            }
        }

        if let Some(peer) = peer {
            match tokio::time::timeout(limit, peer.close()).await {
                Ok(Ok(())) => log::debug!("[session {}] peer session closed", self.generation),
                Ok(Err(e)) => log::warn!("[session {}] {}", self.generation, e),
                Err(_) => log::warn!("[session {}] peer close timed out", self.generation),
            }
        }
    }
}
