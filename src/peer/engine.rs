//! Narrow interface to the media engine.
//!
//! The negotiator never touches RTP, codecs or rendering. It only needs to
//! create an offer, apply descriptions, and observe ICE and connection state.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::EngineError;

/// SDP role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

impl SdpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "offer" => Some(SdpKind::Offer),
            "answer" => Some(SdpKind::Answer),
            _ => None,
        }
    }
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An SDP payload with its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescriptor {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Offer, sdp: sdp.into() }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self { kind: SdpKind::Answer, sdp: sdp.into() }
    }
}

/// ICE candidate as discovered by the engine (or supplied by the remote).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateRecord {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Peer connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// What kind of media the offer asks to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferConstraints {
    pub receive_video: bool,
    pub receive_audio: bool,
}

impl Default for OfferConstraints {
    fn default() -> Self {
        Self {
            receive_video: true,
            receive_audio: false,
        }
    }
}

/// Events pushed by a peer session while it lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    IceCandidate(IceCandidateRecord),
    IceGatheringComplete,
    ConnectionState(PeerConnectionState),
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

/// Factory for peer sessions.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Create a fresh receive-only peer session. Engine events for that
    /// session must be sent on `events` until it is closed.
    async fn open_session(
        &self,
        constraints: &OfferConstraints,
        events: EngineEventSender,
    ) -> Result<Box<dyn PeerSession>, EngineError>;
}

/// One peer session. Owned exclusively by the negotiator.
#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescriptor, EngineError>;

    async fn set_local_description(&self, desc: &SessionDescriptor) -> Result<(), EngineError>;

    /// Current local description, including any candidates gathered since
    /// it was set.
    async fn local_description(&self) -> Option<SessionDescriptor>;

    /// Fails with [`EngineError::SetRemoteDescription`] on malformed SDP.
    async fn set_remote_description(&self, desc: &SessionDescriptor) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: &IceCandidateRecord) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serializes_with_type() {
        let json = serde_json::to_string(&SessionDescriptor::answer("v=0\r\n")).unwrap();
        assert!(json.contains("\"type\":\"answer\""));
        assert!(json.contains("\"sdp\":\"v=0\\r\\n\""));
    }

    #[test]
    fn test_candidate_field_names() {
        let json = r#"{"candidate":"candidate:1 1 UDP 2130706431 192.168.1.1 8189 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let c: IceCandidateRecord = serde_json::from_str(json).unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        assert_eq!(c.sdp_mline_index, Some(0));
    }

    #[test]
    fn test_sdp_kind_from_str() {
        assert_eq!(SdpKind::from_str("ANSWER"), Some(SdpKind::Answer));
        assert_eq!(SdpKind::from_str("pranswer"), None);
    }
}
