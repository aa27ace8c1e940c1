//! Negotiator configuration.
//!
//! Everything here has a working default. Hosts that want to tune endpoint
//! guesses for a particular service can load a JSON document; durations are
//! given in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NegotiationError;
use crate::peer::{IceServerConfig, OfferConstraints};
use crate::signaling::{ProbeTimeouts, RequestShape, ResponseMatcher, StrategyDescriptor};

/// Serde helper for `Duration` stored as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Default Google STUN servers
pub fn google_stun_servers() -> Vec<IceServerConfig> {
    vec![
        IceServerConfig::stun("stun:stun.l.google.com:19302"),
        IceServerConfig::stun("stun:stun1.l.google.com:19302"),
        IceServerConfig::stun("stun:stun2.l.google.com:19302"),
    ]
}

/// Negotiator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiatorConfig {
    /// STUN/TURN servers handed to the media engine
    pub ice_servers: Vec<IceServerConfig>,
    /// Upper bound on the gathering wait in direct-endpoint mode
    #[serde(rename = "ice_gathering_timeout_ms", with = "millis")]
    pub ice_gathering_timeout: Duration,
    /// Path segments that mark a reference as a signaling endpoint itself
    pub direct_segments: Vec<String>,
    /// Timeouts for the single POST in direct-endpoint mode
    pub direct_timeouts: ProbeTimeouts,
    /// Roots substituted for `{service}` in templates; empty = the
    /// reference's own base URL
    pub service_roots: Vec<String>,
    pub user_agent: String,
    pub offer: OfferConstraints,
    /// Discovery strategies in priority order
    pub strategies: Vec<StrategyDescriptor>,
    /// Bound on peer close + resource DELETE when a session is released
    #[serde(rename = "release_timeout_ms", with = "millis")]
    pub release_timeout: Duration,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            ice_servers: google_stun_servers(),
            ice_gathering_timeout: Duration::from_secs(5),
            direct_segments: vec!["whep".to_string()],
            direct_timeouts: ProbeTimeouts::new(10_000, 10_000),
            service_roots: Vec::new(),
            user_agent: format!("webrtc-negotiator/{}", env!("CARGO_PKG_VERSION")),
            offer: OfferConstraints::default(),
            strategies: StrategyDescriptor::default_set(),
            release_timeout: Duration::from_secs(2),
        }
    }
}

impl NegotiatorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, NegotiationError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| NegotiationError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, NegotiationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| NegotiationError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Strategies that take part in discovery, in order.
    pub fn enabled_strategies(&self) -> impl Iterator<Item = &StrategyDescriptor> {
        self.strategies.iter().filter(|s| s.enabled)
    }

    pub fn validate(&self) -> Result<(), NegotiationError> {
        let bad = |msg: String| Err(NegotiationError::Config(msg));

        if self.enabled_strategies().next().is_none() {
            return bad("at least one strategy must be enabled".into());
        }
        if self.ice_gathering_timeout.is_zero() {
            return bad("ice_gathering_timeout_ms must be > 0".into());
        }
        if self.direct_timeouts.connect.is_zero() || self.direct_timeouts.read.is_zero() {
            return bad("direct_timeouts must be > 0".into());
        }
        for s in &self.strategies {
            if s.templates.is_empty() {
                return bad(format!("{} has no endpoint templates", s.kind));
            }
            if s.timeouts.connect.is_zero() || s.timeouts.read.is_zero() {
                return bad(format!("{} timeouts must be > 0", s.kind));
            }
            let ws_request = s.request == RequestShape::WsOffer;
            let ws_matcher = s.matcher == ResponseMatcher::WsAnswer;
            if ws_request != ws_matcher {
                return bad(format!("{}: WebSocket requests need the ws_answer matcher", s.kind));
            }
        }
        Ok(())
    }
}
