//! [`MediaEngine`] backed by webrtc-rs.
//!
//! Wraps RTCPeerConnection and forwards ICE / state callbacks as
//! [`EngineEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as RtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::api::API;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use super::engine::{
    EngineEvent, EngineEventSender, IceCandidateRecord, MediaEngine, OfferConstraints,
    PeerConnectionState, PeerSession, SdpKind, SessionDescriptor,
};
use crate::error::EngineError;

/// ICE server configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    /// Create a STUN-only server config
    pub fn stun(url: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        }
    }

    /// Create a TURN server config with credentials
    pub fn turn(url: &str, username: &str, credential: &str) -> Self {
        Self {
            urls: vec![url.to_string()],
            username: Some(username.to_string()),
            credential: Some(credential.to_string()),
        }
    }

    fn to_rtc_ice_server(&self) -> RTCIceServer {
        RTCIceServer {
            urls: self.urls.clone(),
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Media engine creating one RTCPeerConnection per negotiation.
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<IceServerConfig>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<IceServerConfig>) -> Result<Self, EngineError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::Session(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| EngineError::Session(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn build_rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self.ice_servers.iter().map(|s| s.to_rtc_ice_server()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn open_session(
        &self,
        constraints: &OfferConstraints,
        events: EngineEventSender,
    ) -> Result<Box<dyn PeerSession>, EngineError> {
        let peer_connection = self
            .api
            .new_peer_connection(self.build_rtc_config())
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        let peer_connection = Arc::new(peer_connection);

        let mut kinds = Vec::new();
        if constraints.receive_video {
            kinds.push(RTPCodecType::Video);
        }
        if constraints.receive_audio {
            kinds.push(RTPCodecType::Audio);
        }
        for kind in kinds {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| EngineError::Session(format!("Failed to add transceiver: {}", e)))?;
        }

        let ice_tx = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(json) = candidate.and_then(|c| c.to_json().ok()) {
                let _ = ice_tx.send(EngineEvent::IceCandidate(IceCandidateRecord {
                    candidate: json.candidate,
                    sdp_mid: json.sdp_mid,
                    sdp_mline_index: json.sdp_mline_index,
                }));
            }
            Box::pin(async {})
        }));

        let gathering_tx = events.clone();
        peer_connection.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            log::debug!("ICE gathering state: {}", state);
            if state == RTCIceGathererState::Complete {
                let _ = gathering_tx.send(EngineEvent::IceGatheringComplete);
            }
            Box::pin(async {})
        }));

        let state_tx = events;
        peer_connection.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state = match s {
                RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
                RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
                RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
                RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
                RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
                _ => PeerConnectionState::New,
            };
            let _ = state_tx.send(EngineEvent::ConnectionState(state));
            Box::pin(async {})
        }));

        Ok(Box::new(WebRtcPeerSession {
            peer_connection,
            closed: AtomicBool::new(false),
        }))
    }
}

/// One RTCPeerConnection.
pub struct WebRtcPeerSession {
    peer_connection: Arc<RTCPeerConnection>,
    closed: AtomicBool,
}

impl WebRtcPeerSession {
    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }
}

fn to_descriptor(desc: RTCSessionDescription) -> Option<SessionDescriptor> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer | RTCSdpType::Pranswer => SdpKind::Answer,
        _ => return None,
    };
    Some(SessionDescriptor { kind, sdp: desc.sdp })
}

fn to_rtc(desc: &SessionDescriptor) -> Result<RTCSessionDescription, String> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
    };
    parsed.map_err(|e| format!("Invalid {} SDP: {}", desc.kind, e))
}

#[async_trait]
impl PeerSession for WebRtcPeerSession {
    async fn create_offer(&self) -> Result<SessionDescriptor, EngineError> {
        self.ensure_open()?;
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| EngineError::CreateOffer(e.to_string()))?;
        Ok(SessionDescriptor::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescriptor) -> Result<(), EngineError> {
        self.ensure_open()?;
        let rtc = to_rtc(desc).map_err(EngineError::SetLocalDescription)?;
        self.peer_connection
            .set_local_description(rtc)
            .await
            .map_err(|e| EngineError::SetLocalDescription(e.to_string()))
    }

    async fn local_description(&self) -> Option<SessionDescriptor> {
        self.peer_connection
            .local_description()
            .await
            .and_then(to_descriptor)
    }

    async fn set_remote_description(&self, desc: &SessionDescriptor) -> Result<(), EngineError> {
        self.ensure_open()?;
        let rtc = to_rtc(desc).map_err(EngineError::SetRemoteDescription)?;
        self.peer_connection
            .set_remote_description(rtc)
            .await
            .map_err(|e| EngineError::SetRemoteDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidateRecord) -> Result<(), EngineError> {
        self.ensure_open()?;
        let candidate_init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.peer_connection
            .add_ice_candidate(candidate_init)
            .await
            .map_err(|e| EngineError::IceCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<(), EngineError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.peer_connection
            .close()
            .await
            .map_err(|e| EngineError::Session(format!("Failed to close peer connection: {}", e)))
    }
}
