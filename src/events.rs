//! Lifecycle events delivered to the host.
//!
//! The negotiator reports everything through an [`EventSink`]: the local
//! offer, each gathered ICE candidate, connection state changes, and errors.
//! Sinks must not block; they are called from the negotiation worker.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::peer::{IceCandidateRecord, PeerConnectionState, SdpKind, SessionDescriptor};

/// Event emitted by a negotiation.
///
/// Serializes as `{"event":"localSdpReady","sdp":...,"type":"offer"}` etc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum NegotiationEvent {
    #[serde(rename_all = "camelCase")]
    LocalSdpReady {
        sdp: String,
        #[serde(rename = "type")]
        kind: SdpKind,
    },
    #[serde(rename_all = "camelCase")]
    IceCandidateReady {
        candidate: String,
        sdp_mid: Option<String>,
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: Option<u16>,
    },
    #[serde(rename_all = "camelCase")]
    ConnectionError { message: String, stream_url: String },
    #[serde(rename_all = "camelCase")]
    ConnectionStateChanged {
        state: PeerConnectionState,
        stream_url: String,
    },
}

impl NegotiationEvent {
    pub fn local_sdp(desc: &SessionDescriptor) -> Self {
        NegotiationEvent::LocalSdpReady {
            sdp: desc.sdp.clone(),
            kind: desc.kind,
        }
    }

    pub fn ice_candidate(c: &IceCandidateRecord) -> Self {
        NegotiationEvent::IceCandidateReady {
            candidate: c.candidate.clone(),
            sdp_mid: c.sdp_mid.clone(),
            sdp_mline_index: c.sdp_mline_index,
        }
    }

    pub fn error(message: impl Into<String>, stream_url: &str) -> Self {
        NegotiationEvent::ConnectionError {
            message: message.into(),
            stream_url: stream_url.to_string(),
        }
    }

    pub fn state(state: PeerConnectionState, stream_url: &str) -> Self {
        NegotiationEvent::ConnectionStateChanged {
            state,
            stream_url: stream_url.to_string(),
        }
    }
}

/// Receiver of negotiation events.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: NegotiationEvent);
}

/// Callback form of an event sink
pub type EventCallback = Arc<dyn Fn(NegotiationEvent) + Send + Sync>;

impl EventSink for EventCallback {
    fn emit(&self, event: NegotiationEvent) {
        (self)(event)
    }
}

impl EventSink for mpsc::UnboundedSender<NegotiationEvent> {
    fn emit(&self, event: NegotiationEvent) {
        // a dropped receiver just means nobody is listening any more
        let _ = self.send(event);
    }
}

/// Convenience: an unbounded channel whose sender is a sink.
pub fn event_channel() -> (
    mpsc::UnboundedSender<NegotiationEvent>,
    mpsc::UnboundedReceiver<NegotiationEvent>,
) {
    mpsc::unbounded_channel()
}
