//! Signaling strategies and the transports they run over.

pub mod outcome;
pub mod strategy;
pub mod transport;

pub use outcome::{summarize, EndpointOutcome, EndpointReport, ManifestKind, StrategyResult};
pub use strategy::{
    EndpointCandidate, ProbeContext, ProbeOutcome, RequestShape, ResponseMatcher, StrategyDescriptor,
    StrategyKind, Transport,
};
pub use transport::{http_request, ws_exchange, HttpRequest, HttpResponse, ProbeTimeouts};
