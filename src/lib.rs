//! webrtc-negotiator - receive-only WebRTC session negotiation
//!
//! Given a stream reference (an http(s) or ws(s) URL), obtains a remote SDP
//! answer for a locally generated recv-only offer, whatever signaling
//! convention the remote happens to speak.
//!
//! Features:
//! - Direct WHEP mode when the reference is itself a WHEP endpoint
//! - Discovery across WHEP, WHIP, ad-hoc WebSocket, JSON SDP exchange and
//!   service REST conventions, driven by configurable endpoint templates
//! - HLS/DASH manifest detection with a clear "not WebRTC" diagnostic
//! - Once-only answer application, race-free cancellation
//! - webrtc-rs media engine adapter
//!
//! Results are reported through an [`EventSink`]: local SDP, ICE candidates,
//! connection state changes and one aggregated error on failure.

pub mod config;
pub mod error;
pub mod events;
pub mod negotiator;
pub mod peer;
pub mod signaling;
pub mod stream_ref;

#[cfg(test)]
mod test_support;

pub use config::{google_stun_servers, NegotiatorConfig};
pub use error::{EngineError, NegotiationError, TransportError};
pub use events::{event_channel, EventCallback, EventSink, NegotiationEvent};
pub use negotiator::{ApplyOutcome, NegotiationState, Negotiator};
pub use peer::{
    IceCandidateRecord, IceServerConfig, MediaEngine, OfferConstraints, PeerConnectionState, PeerSession,
    SdpKind, SessionDescriptor, WebRtcEngine,
};
pub use signaling::{ProbeTimeouts, StrategyDescriptor, StrategyKind};
pub use stream_ref::StreamReference;

use lazy_static::lazy_static;
use tokio::runtime::Runtime;

lazy_static! {
    /// Runtime for negotiators created outside of a tokio context.
    static ref RUNTIME: Runtime = Runtime::new().expect("Failed to create tokio runtime");
}
