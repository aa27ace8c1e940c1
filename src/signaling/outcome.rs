//! Per-endpoint outcomes and the diagnostic built from them.

use std::fmt;

use crate::error::{NegotiationError, TransportError};
use crate::peer::SessionDescriptor;

use super::strategy::StrategyKind;

/// Streaming protocol a manifest probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Hls,
    Dash,
    Unknown,
}

impl ManifestKind {
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".m3u8") {
            ManifestKind::Hls
        } else if path.ends_with(".mpd") {
            ManifestKind::Dash
        } else {
            ManifestKind::Unknown
        }
    }
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestKind::Hls => f.write_str("HLS"),
            ManifestKind::Dash => f.write_str("DASH"),
            ManifestKind::Unknown => f.write_str("non-WebRTC"),
        }
    }
}

/// What happened at one candidate endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointOutcome {
    /// Answer received and applied
    Answered,
    /// Non-success status, or a status the matcher does not accept
    HttpStatus(u16),
    Transport(TransportError),
    /// Endpoint replied but the payload was not a usable answer
    Mismatch(String),
    /// Answer received but the engine rejected it
    ApplyFailed(String),
    /// WebSocket closed without anything that looked like an answer
    NoReply,
    ManifestFound(ManifestKind),
    /// Listing endpoint responded; recorded as a hint only
    ApiFound { status: u16, preview: String },
    /// Answer arrived after cancellation and was dropped
    Discarded,
}

impl EndpointOutcome {
    /// Error this outcome stands for, if it is a failure.
    pub fn error(&self) -> Option<NegotiationError> {
        match self {
            EndpointOutcome::HttpStatus(status) => {
                Some(NegotiationError::ProtocolMismatch(format!("HTTP {}", status)))
            }
            EndpointOutcome::Transport(e) => Some(NegotiationError::Transport(e.clone())),
            EndpointOutcome::Mismatch(reason) => Some(NegotiationError::ProtocolMismatch(reason.clone())),
            EndpointOutcome::NoReply => {
                Some(NegotiationError::ProtocolMismatch("closed without an answer".into()))
            }
            EndpointOutcome::ApplyFailed(reason) => Some(NegotiationError::DescriptionApply(reason.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for EndpointOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointOutcome::Answered => f.write_str("answered"),
            EndpointOutcome::HttpStatus(status) => write!(f, "HTTP {}", status),
            EndpointOutcome::Transport(e) => write!(f, "{}", e),
            EndpointOutcome::Mismatch(reason) => write!(f, "unusable reply ({})", reason),
            EndpointOutcome::ApplyFailed(reason) => write!(f, "answer rejected ({})", reason),
            EndpointOutcome::NoReply => f.write_str("closed without an answer"),
            EndpointOutcome::ManifestFound(kind) => write!(f, "{} manifest found", kind),
            EndpointOutcome::ApiFound { status, preview } => {
                write!(f, "API responded HTTP {}: {}", status, preview)
            }
            EndpointOutcome::Discarded => f.write_str("discarded after cancellation"),
        }
    }
}

/// One line of the diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointReport {
    pub strategy: StrategyKind,
    pub url: String,
    pub outcome: EndpointOutcome,
}

impl fmt::Display for EndpointReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} -> {}", self.strategy, self.url, self.outcome)
    }
}

/// Result of running one strategy over all its candidates.
#[derive(Debug, Clone)]
pub struct StrategyResult {
    pub kind: StrategyKind,
    pub succeeded: bool,
    /// The answer that was applied, when `succeeded`
    pub remote_answer: Option<SessionDescriptor>,
    /// Set when the strategy proved the remote is not a WebRTC service
    pub terminal: Option<NegotiationError>,
    pub reports: Vec<EndpointReport>,
}

impl StrategyResult {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            succeeded: false,
            remote_answer: None,
            terminal: None,
            reports: Vec::new(),
        }
    }

    pub fn record(&mut self, url: &str, outcome: EndpointOutcome) {
        match outcome.error() {
            Some(e) => log::debug!("[{}] {} failed: {}", self.kind, url, e),
            None => log::debug!("[{}] {} -> {}", self.kind, url, outcome),
        }
        self.reports.push(EndpointReport {
            strategy: self.kind,
            url: url.to_string(),
            outcome,
        });
    }

    /// Mark the strategy successful with the answer it applied.
    pub fn succeed(&mut self, url: &str, answer: SessionDescriptor) {
        self.record(url, EndpointOutcome::Answered);
        self.succeeded = true;
        self.remote_answer = Some(answer);
    }

    pub fn diagnostic(&self) -> String {
        summarize(&self.reports)
    }
}

/// Human-readable listing of every endpoint tried.
pub fn summarize(reports: &[EndpointReport]) -> String {
    let mut out = format!("Tried {} endpoint(s):", reports.len());
    for report in reports {
        out.push_str("\n  ");
        out.push_str(&report.to_string());
    }
    out
}
