//! Signaling strategies as data.
//!
//! A [`StrategyDescriptor`] says where to look (endpoint templates), how to
//! ask (request shape) and how to recognise an answer (response matcher).
//! One generic driver runs any descriptor; adding a convention for a new
//! service means adding templates, not code.

use std::fmt;

use hyper::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::outcome::{EndpointOutcome, ManifestKind};
use super::transport::{http_request, preview, ws_exchange, HttpRequest, HttpResponse, ProbeTimeouts};
use crate::peer::{SdpKind, SessionDescriptor};
use crate::stream_ref::StreamReference;

/// Which signaling convention a descriptor implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    #[serde(rename = "whep")]
    Whep,
    #[serde(rename = "whip")]
    Whip,
    #[serde(rename = "websocket")]
    WebSocketAdHoc,
    #[serde(rename = "direct_sdp")]
    DirectSdpExchange,
    #[serde(rename = "service_rest")]
    ServiceSpecificRestCall,
    #[serde(rename = "manifest")]
    ManifestDiscovery,
    #[serde(rename = "api_discovery")]
    ApiDiscovery,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Whep => "WHEP",
            StrategyKind::Whip => "WHIP",
            StrategyKind::WebSocketAdHoc => "WebSocket",
            StrategyKind::DirectSdpExchange => "direct SDP",
            StrategyKind::ServiceSpecificRestCall => "service REST",
            StrategyKind::ManifestDiscovery => "manifest",
            StrategyKind::ApiDiscovery => "API discovery",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    WebSocket,
}

/// How the offer goes on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestShape {
    /// POST raw SDP as `application/sdp`
    SdpBody,
    /// POST `{"type":"offer","sdp":...}`
    JsonOffer,
    /// POST `{"streamId":...,"offer":{"type":"offer","sdp":...}}`
    JsonStreamOffer,
    /// WebSocket text `{"type":"offer","sdp":...,"streamId":...}`
    WsOffer,
    /// HEAD, retried as GET when the server answers 405
    Head,
    Get,
}

impl RequestShape {
    pub fn transport(&self) -> Transport {
        match self {
            RequestShape::WsOffer => Transport::WebSocket,
            _ => Transport::Http,
        }
    }
}

/// How a reply is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMatcher {
    /// 200/201 with a raw SDP body
    SdpAnswer,
    /// 200 with JSON carrying `sdp`
    JsonSdp,
    /// 200 with JSON carrying `answer.sdp`
    JsonAnswerSdp,
    /// WebSocket text carrying `answer.sdp`, `sdp`+`type`, or `result.sdp`
    WsAnswer,
    /// 200 means the stream is served as HLS/DASH
    Manifest,
    /// 200 is a hint for the diagnostic
    ApiListing,
}

/// One concrete endpoint to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCandidate {
    pub url: String,
    pub transport: Transport,
}

/// Per-negotiation values every attempt needs.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext<'a> {
    pub user_agent: &'a str,
    pub stream_id: &'a str,
}

/// Result of a single attempt, before the session has seen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Answer {
        answer: SessionDescriptor,
        /// Resolved `Location` of the created resource, if any
        resource_url: Option<String>,
    },
    Manifest(ManifestKind),
    Hint { status: u16, preview: String },
    Miss(EndpointOutcome),
}

fn enabled_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub kind: StrategyKind,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// URL templates. Placeholders: `{base}`, `{ws_base}`, `{stream_url}`,
    /// `{path}`, `{stream_id}`, `{service}`.
    pub templates: Vec<String>,
    pub request: RequestShape,
    pub matcher: ResponseMatcher,
    #[serde(default)]
    pub timeouts: ProbeTimeouts,
}

fn templates(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl StrategyDescriptor {
    /// The built-in strategies in discovery order.
    pub fn default_set() -> Vec<StrategyDescriptor> {
        vec![
            StrategyDescriptor {
                kind: StrategyKind::Whep,
                enabled: true,
                templates: templates(&[
                    "{base}/whep",
                    "{base}/whep{path}",
                    "{stream_url}/whep",
                    "{base}/api/whep",
                    "{base}/api/whep{path}",
                    "{base}/webrtc/whep",
                    "{base}/webrtc/whep{path}",
                    "{base}/play",
                    "{base}/play{path}",
                    "{base}/receive",
                    "{base}/receive{path}",
                ]),
                request: RequestShape::SdpBody,
                matcher: ResponseMatcher::SdpAnswer,
                timeouts: ProbeTimeouts::new(5_000, 10_000),
            },
            StrategyDescriptor {
                kind: StrategyKind::Whip,
                enabled: true,
                templates: templates(&["{base}/whip"]),
                request: RequestShape::SdpBody,
                matcher: ResponseMatcher::SdpAnswer,
                timeouts: ProbeTimeouts::new(5_000, 10_000),
            },
            StrategyDescriptor {
                kind: StrategyKind::WebSocketAdHoc,
                enabled: false,
                templates: templates(&[
                    "{ws_base}/ws",
                    "{ws_base}/websocket",
                    "{ws_base}/signaling",
                    "{ws_base}/webrtc/ws",
                    "{ws_base}/{stream_id}/ws",
                    "{ws_base}/stream/{stream_id}/ws",
                ]),
                request: RequestShape::WsOffer,
                matcher: ResponseMatcher::WsAnswer,
                timeouts: ProbeTimeouts::new(5_000, 10_000),
            },
            StrategyDescriptor {
                kind: StrategyKind::DirectSdpExchange,
                enabled: true,
                templates: templates(&[
                    "{base}/api/webrtc/offer",
                    "{base}/webrtc/offer",
                    "{base}/offer",
                    "{base}/{stream_id}/offer",
                    "{base}/stream/{stream_id}/offer",
                ]),
                request: RequestShape::JsonOffer,
                matcher: ResponseMatcher::JsonSdp,
                timeouts: ProbeTimeouts::new(5_000, 5_000),
            },
            StrategyDescriptor {
                kind: StrategyKind::ServiceSpecificRestCall,
                enabled: true,
                templates: templates(&[
                    "{service}/api/webrtc/play",
                    "{service}/webrtc/play",
                    "{service}/play/{stream_id}",
                    "{service}/stream/play",
                ]),
                request: RequestShape::JsonStreamOffer,
                matcher: ResponseMatcher::JsonAnswerSdp,
                timeouts: ProbeTimeouts::new(5_000, 10_000),
            },
            StrategyDescriptor {
                kind: StrategyKind::ManifestDiscovery,
                enabled: true,
                templates: templates(&[
                    "{stream_url}.m3u8",
                    "{stream_url}/playlist.m3u8",
                    "{stream_url}/index.m3u8",
                    "{stream_url}.mpd",
                    "{stream_url}/manifest.mpd",
                    "{base}/hls{path}.m3u8",
                    "{base}/dash{path}.mpd",
                    "{base}/stream{path}.m3u8",
                    "{base}/live{path}.m3u8",
                ]),
                request: RequestShape::Head,
                matcher: ResponseMatcher::Manifest,
                timeouts: ProbeTimeouts::new(3_000, 3_000),
            },
            StrategyDescriptor {
                kind: StrategyKind::ApiDiscovery,
                enabled: false,
                templates: templates(&[
                    "{base}/api/streams",
                    "{base}/api/live",
                    "{base}/api/channels",
                    "{base}/streams",
                    "{base}/channels",
                    "{base}/live",
                ]),
                request: RequestShape::Get,
                matcher: ResponseMatcher::ApiListing,
                timeouts: ProbeTimeouts::new(3_000, 3_000),
            },
        ]
    }

    /// Descriptor used when the reference itself is a WHEP endpoint.
    pub fn direct_whep(timeouts: ProbeTimeouts) -> Self {
        Self {
            kind: StrategyKind::Whep,
            enabled: true,
            templates: Vec::new(),
            request: RequestShape::SdpBody,
            matcher: ResponseMatcher::SdpAnswer,
            timeouts,
        }
    }

    /// Expand the templates against a reference, in template order without
    /// duplicates.
    ///
    /// Templates that need the path are skipped for references without one.
    pub fn candidates(&self, reference: &StreamReference, service_roots: &[String]) -> Vec<EndpointCandidate> {
        let transport = self.request.transport();
        let own_root = [reference.base_url()];
        let roots: &[String] = if service_roots.is_empty() { &own_root } else { service_roots };

        let mut out: Vec<EndpointCandidate> = Vec::new();
        for template in &self.templates {
            let needs_path = ["{stream_url}", "{path}", "{stream_id}"]
                .iter()
                .any(|p| template.contains(p));
            if needs_path && reference.stream_id.is_empty() {
                continue;
            }

            let urls: Vec<String> = if template.contains("{service}") {
                roots
                    .iter()
                    .map(|root| expand(&template.replace("{service}", root.trim_end_matches('/')), reference))
                    .collect()
            } else {
                vec![expand(template, reference)]
            };

            for url in urls {
                if !out.iter().any(|c| c.url == url) {
                    out.push(EndpointCandidate { url, transport });
                }
            }
        }
        out
    }

    /// Try one candidate. Never fails: every problem becomes a
    /// [`ProbeOutcome::Miss`].
    pub async fn attempt(
        &self,
        candidate: &EndpointCandidate,
        offer: &SessionDescriptor,
        ctx: &ProbeContext<'_>,
    ) -> ProbeOutcome {
        match self.request {
            RequestShape::WsOffer => self.attempt_ws(candidate, offer, ctx).await,
            _ => self.attempt_http(candidate, offer, ctx).await,
        }
    }

    async fn attempt_http(
        &self,
        candidate: &EndpointCandidate,
        offer: &SessionDescriptor,
        ctx: &ProbeContext<'_>,
    ) -> ProbeOutcome {
        let url = candidate.url.as_str();
        let request = match self.request {
            RequestShape::SdpBody => HttpRequest::new(Method::POST, url)
                .header("Content-Type", "application/sdp")
                .header("Accept", "application/sdp")
                .body(offer.sdp.clone()),
            RequestShape::JsonOffer => HttpRequest::new(Method::POST, url)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json")
                .body(json!({ "type": "offer", "sdp": offer.sdp }).to_string()),
            RequestShape::JsonStreamOffer => HttpRequest::new(Method::POST, url)
                .header("Content-Type", "application/json")
                .header("Accept", "application/json")
                .body(
                    json!({
                        "streamId": ctx.stream_id,
                        "offer": { "type": "offer", "sdp": offer.sdp },
                    })
                    .to_string(),
                ),
            RequestShape::Head => HttpRequest::new(Method::HEAD, url),
            RequestShape::Get | RequestShape::WsOffer => HttpRequest::new(Method::GET, url),
        }
        .header("User-Agent", ctx.user_agent);

        let mut response = http_request(&request, &self.timeouts).await;

        if self.request == RequestShape::Head {
            if let Ok(resp) = &response {
                if resp.status == 405 {
                    log::debug!("HEAD not allowed at {}, retrying with GET", url);
                    let retry = HttpRequest {
                        method: Method::GET,
                        ..request.clone()
                    };
                    response = http_request(&retry, &self.timeouts).await;
                }
            }
        }

        match response {
            Ok(resp) => self.matcher.judge_http(url, &resp),
            Err(e) => ProbeOutcome::Miss(EndpointOutcome::Transport(e)),
        }
    }

    async fn attempt_ws(
        &self,
        candidate: &EndpointCandidate,
        offer: &SessionDescriptor,
        ctx: &ProbeContext<'_>,
    ) -> ProbeOutcome {
        let message = json!({
            "type": "offer",
            "sdp": offer.sdp,
            "streamId": ctx.stream_id,
        })
        .to_string();

        match ws_exchange(&candidate.url, message, &self.timeouts, ws_answer).await {
            Ok(Some(Ok(answer))) => ProbeOutcome::Answer {
                answer,
                resource_url: None,
            },
            Ok(Some(Err(reason))) => ProbeOutcome::Miss(EndpointOutcome::Mismatch(reason)),
            Ok(None) => ProbeOutcome::Miss(EndpointOutcome::NoReply),
            Err(e) => ProbeOutcome::Miss(EndpointOutcome::Transport(e)),
        }
    }
}

fn expand(template: &str, r: &StreamReference) -> String {
    template
        .replace("{stream_url}", &r.stream_url())
        .replace("{ws_base}", &r.ws_base_url())
        .replace("{base}", &r.base_url())
        .replace("{path}", &r.path)
        .replace("{stream_id}", &r.stream_id)
}

impl ResponseMatcher {
    /// Classify an HTTP response.
    pub fn judge_http(&self, url: &str, resp: &HttpResponse) -> ProbeOutcome {
        let miss = |outcome| ProbeOutcome::Miss(outcome);
        match self {
            ResponseMatcher::SdpAnswer => {
                if !resp.is_success() {
                    return miss(EndpointOutcome::HttpStatus(resp.status));
                }
                match sdp_from_body(&resp.body) {
                    Ok(answer) => ProbeOutcome::Answer {
                        answer,
                        resource_url: resp.location.clone(),
                    },
                    Err(reason) => miss(EndpointOutcome::Mismatch(match &resp.content_type {
                        Some(ct) => format!("{}, content-type {}", reason, ct),
                        None => reason,
                    })),
                }
            }
            ResponseMatcher::JsonSdp | ResponseMatcher::JsonAnswerSdp => {
                if resp.status != 200 {
                    return miss(EndpointOutcome::HttpStatus(resp.status));
                }
                let parsed = if *self == ResponseMatcher::JsonSdp {
                    sdp_from_json(&resp.body)
                } else {
                    answer_sdp_from_json(&resp.body)
                };
                match parsed {
                    Ok(answer) => ProbeOutcome::Answer {
                        answer,
                        resource_url: None,
                    },
                    Err(reason) => miss(EndpointOutcome::Mismatch(reason)),
                }
            }
            ResponseMatcher::Manifest => {
                if resp.status == 200 {
                    ProbeOutcome::Manifest(ManifestKind::from_url(url))
                } else {
                    miss(EndpointOutcome::HttpStatus(resp.status))
                }
            }
            ResponseMatcher::ApiListing => {
                if resp.status == 200 {
                    ProbeOutcome::Hint {
                        status: resp.status,
                        preview: preview(&resp.body, 100),
                    }
                } else {
                    miss(EndpointOutcome::HttpStatus(resp.status))
                }
            }
            ResponseMatcher::WsAnswer => miss(EndpointOutcome::Mismatch(
                "WebSocket matcher cannot judge an HTTP response".into(),
            )),
        }
    }
}

fn check_answer_type(obj: &Value) -> Result<(), String> {
    match obj.get("type") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(t)) if SdpKind::from_str(t) == Some(SdpKind::Answer) => Ok(()),
        Some(other) => Err(format!("expected type \"answer\", got {}", other)),
    }
}

fn sdp_field(obj: &Value) -> Option<&str> {
    obj.get("sdp").and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Raw SDP answer body.
pub fn sdp_from_body(body: &str) -> Result<SessionDescriptor, String> {
    if body.trim_start().starts_with("v=") {
        Ok(SessionDescriptor::answer(body))
    } else if body.trim().is_empty() {
        Err("empty body".into())
    } else {
        Err(format!("body is not SDP: {}", preview(body, 60)))
    }
}

/// `{"sdp": ..., "type": "answer"?}`
pub fn sdp_from_json(body: &str) -> Result<SessionDescriptor, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    let sdp = sdp_field(&value).ok_or_else(|| "no sdp field".to_string())?;
    check_answer_type(&value)?;
    Ok(SessionDescriptor::answer(sdp))
}

/// `{"answer": {"sdp": ..., "type": "answer"?}}`
pub fn answer_sdp_from_json(body: &str) -> Result<SessionDescriptor, String> {
    let value: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    let answer = value.get("answer").ok_or_else(|| "no answer field".to_string())?;
    let sdp = sdp_field(answer).ok_or_else(|| "no answer.sdp field".to_string())?;
    check_answer_type(answer)?;
    Ok(SessionDescriptor::answer(sdp))
}

/// Match one WebSocket text message.
///
/// `None` means the message is not an answer at all and the exchange should
/// keep listening; `Some(Err)` means it is answer-shaped but unusable.
pub fn ws_answer(text: &str) -> Option<Result<SessionDescriptor, String>> {
    let value: Value = serde_json::from_str(text).ok()?;

    if let Some(answer) = value.get("answer") {
        if let Some(sdp) = sdp_field(answer) {
            return Some(check_answer_type(answer).map(|_| SessionDescriptor::answer(sdp)));
        }
    }

    if let Some(sdp) = sdp_field(&value) {
        return match value.get("type").and_then(Value::as_str) {
            Some(_) => Some(check_answer_type(&value).map(|_| SessionDescriptor::answer(sdp))),
            None => None,
        };
    }

    if let Some(result) = value.get("result") {
        if let Some(sdp) = sdp_field(result) {
            return Some(check_answer_type(result).map(|_| SessionDescriptor::answer(sdp)));
        }
    }

    None
}
