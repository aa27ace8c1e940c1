//! Error types for negotiation, transport probes and the media engine.

use thiserror::Error;

/// Errors raised by a single HTTP or WebSocket probe.
///
/// These never escape a strategy: the driver records them as endpoint
/// outcomes and moves on to the next candidate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid endpoint URL {0}")]
    InvalidUrl(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out after {0} ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Errors reported by a [`MediaEngine`](crate::peer::MediaEngine) or its peer sessions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Failed to create peer session: {0}")]
    Session(String),

    #[error("Failed to create offer: {0}")]
    CreateOffer(String),

    #[error("Failed to set local description: {0}")]
    SetLocalDescription(String),

    #[error("Failed to set remote description: {0}")]
    SetRemoteDescription(String),

    #[error("Failed to add ICE candidate: {0}")]
    IceCandidate(String),

    #[error("Peer session already closed")]
    Closed,
}

/// Negotiation-level errors.
///
/// Only `Exhausted`, `Cancelled` and the synchronous `begin` failures are
/// ever surfaced to the caller; the rest describe why one endpoint did not
/// match and end up inside the aggregated diagnostic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Invalid stream reference '{reference}': {reason}")]
    InvalidStreamReference { reference: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("Remote description rejected: {0}")]
    DescriptionApply(String),

    #[error("All signaling strategies exhausted: {diagnostic}")]
    Exhausted { diagnostic: String },

    #[error("Remote serves {protocol} streaming, not WebRTC. Manifest found at: {url}")]
    ManifestDetected { protocol: String, url: String },

    #[error("Negotiation cancelled")]
    Cancelled,

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Negotiator has been disposed")]
    Disposed,

    #[error("No negotiation in progress")]
    NoSession,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl NegotiationError {
    /// Terminal errors end the negotiation; all others only end one attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NegotiationError::Exhausted { .. }
                | NegotiationError::ManifestDetected { .. }
                | NegotiationError::Cancelled
                | NegotiationError::Disposed
                | NegotiationError::InvalidStreamReference { .. }
        )
    }
}
