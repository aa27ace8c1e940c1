//! Runs one negotiation on a session: offer, then either the single direct
//! POST or the discovery sequence.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::session::{ApplyOutcome, NegotiationState, Session};
use crate::error::{EngineError, NegotiationError};
use crate::events::NegotiationEvent;
use crate::peer::{EngineEvent, MediaEngine, PeerConnectionState, SessionDescriptor};
use crate::signaling::{
    summarize, EndpointCandidate, EndpointOutcome, ProbeContext, ProbeOutcome, StrategyDescriptor,
    StrategyResult, Transport,
};

/// Drive `session` to Connected, Failed or Cancelled.
pub(crate) async fn run_session(engine: &dyn MediaEngine, session: Arc<Session>) {
    log::info!(
        "[session {}] negotiating {}",
        session.generation,
        session.stream_url()
    );

    let outcome = tokio::select! {
        result = negotiate(engine, &session) => result,
        _ = session.cancel.wait() => Err(NegotiationError::Cancelled),
    };

    match outcome {
        Ok(()) => {}
        Err(NegotiationError::Cancelled) => {
            log::debug!("[session {}] stopped by cancel", session.generation);
            session.release().await;
        }
        Err(e) => {
            if !e.is_terminal() {
                // engine or setup failure rather than a negotiation outcome
                log::error!("[session {}] negotiation aborted: {}", session.generation, e);
            }
            let message = match e {
                NegotiationError::Exhausted { diagnostic } => diagnostic,
                other => other.to_string(),
            };
            session.fail(&message);
            session.release().await;
        }
    }
}

async fn negotiate(engine: &dyn MediaEngine, session: &Arc<Session>) -> Result<(), NegotiationError> {
    session.advance(NegotiationState::CreatingOffer);
    session.emit_peer_state(PeerConnectionState::Connecting);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let peer = engine.open_session(&session.config.offer, events_tx).await?;
    session.attach_peer(Arc::from(peer));
    spawn_event_pump(session.clone(), events_rx);

    let peer = session.peer()?;
    let offer = peer.create_offer().await?;
    // before set_local so it precedes every candidate event
    session.emit_live(NegotiationEvent::local_sdp(&offer));
    peer.set_local_description(&offer).await?;

    if session
        .reference
        .is_direct_endpoint(session.config.direct_segments.as_slice())
    {
        run_direct(session, offer).await
    } else {
        run_discovery(session, &offer).await
    }
}

/// Forward engine events for this session until it is cancelled or the
/// engine drops its sender.
fn spawn_event_pump(session: Arc<Session>, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = session.cancel.wait() => None,
            };
            match event {
                Some(EngineEvent::IceCandidate(c)) => session.emit_live(NegotiationEvent::ice_candidate(&c)),
                Some(EngineEvent::IceGatheringComplete) => {
                    log::debug!("[session {}] ICE gathering complete", session.generation);
                    session.gathering.set();
                }
                Some(EngineEvent::ConnectionState(state)) => session.on_engine_state(state),
                None => break,
            }
        }
        log::debug!("[session {}] event pump stopped", session.generation);
    });
}

/// The reference is itself a WHEP endpoint: wait for gathering, then one POST.
async fn run_direct(session: &Arc<Session>, offer: SessionDescriptor) -> Result<(), NegotiationError> {
    session.advance(NegotiationState::AwaitingIceGathering);
    let limit = session.config.ice_gathering_timeout;
    if tokio::time::timeout(limit, session.gathering.wait()).await.is_err() {
        log::warn!(
            "[session {}] ICE gathering not complete after {:?}, sending offer with the candidates gathered so far",
            session.generation,
            limit
        );
    }

    // the local description now carries the gathered candidates
    let kind = offer.kind;
    let offer = session
        .peer()?
        .local_description()
        .await
        .filter(|d| d.kind == kind)
        .unwrap_or(offer);

    session.advance(NegotiationState::Transmitting);
    let descriptor = StrategyDescriptor::direct_whep(session.config.direct_timeouts);
    let candidate = EndpointCandidate {
        url: session.reference.as_str().to_string(),
        transport: Transport::Http,
    };

    let result = run_candidates(session, &descriptor, &[candidate], &offer).await;
    if result.succeeded {
        log_answer(session, &result);
        Ok(())
    } else {
        Err(NegotiationError::Exhausted {
            diagnostic: format!(
                "WHEP endpoint {} did not accept the offer. {}",
                session.stream_url(),
                result.diagnostic()
            ),
        })
    }
}

/// Try each enabled strategy in order until one connects.
async fn run_discovery(session: &Arc<Session>, offer: &SessionDescriptor) -> Result<(), NegotiationError> {
    let mut reports = Vec::new();

    for (index, descriptor) in session.config.enabled_strategies().enumerate() {
        if session.is_applied() {
            // answered out of band through apply_remote_description
            return Ok(());
        }
        session.advance(NegotiationState::TryingStrategy(index));
        log::info!("[session {}] trying {} signaling", session.generation, descriptor.kind);

        let mut result = run_strategy(session, descriptor, offer).await;
        reports.extend(std::mem::take(&mut result.reports));
        if result.succeeded {
            log::info!("[session {}] {} signaling succeeded", session.generation, result.kind);
            log_answer(session, &result);
            return Ok(());
        }
        if let Some(terminal) = result.terminal {
            return Err(NegotiationError::Exhausted {
                diagnostic: format!("{}\n{}", terminal, summarize(&reports)),
            });
        }
    }

    Err(NegotiationError::Exhausted {
        diagnostic: format!(
            "No WebRTC signaling endpoint answered for {}. {}",
            session.stream_url(),
            summarize(&reports)
        ),
    })
}

fn log_answer(session: &Session, result: &StrategyResult) {
    if let Some(answer) = &result.remote_answer {
        log::debug!(
            "[session {}] remote answer via {} ({} bytes):\n{}",
            session.generation,
            result.kind,
            answer.sdp.len(),
            answer.sdp
        );
    }
}

pub(crate) async fn run_strategy(
    session: &Session,
    descriptor: &StrategyDescriptor,
    offer: &SessionDescriptor,
) -> StrategyResult {
    let candidates = descriptor.candidates(&session.reference, &session.config.service_roots);
    run_candidates(session, descriptor, &candidates, offer).await
}

/// The generic driver: attempt candidates in order, hand answers to the
/// session, stop at the first one it accepts.
async fn run_candidates(
    session: &Session,
    descriptor: &StrategyDescriptor,
    candidates: &[EndpointCandidate],
    offer: &SessionDescriptor,
) -> StrategyResult {
    let mut result = StrategyResult::new(descriptor.kind);
    let ctx = ProbeContext {
        user_agent: &session.config.user_agent,
        stream_id: &session.reference.stream_id,
    };

    for candidate in candidates {
        log::debug!("[{}] trying {}", descriptor.kind, candidate.url);
        match descriptor.attempt(candidate, offer, &ctx).await {
            ProbeOutcome::Answer { answer, resource_url } => {
                match session.apply_remote(&answer, resource_url).await {
                    Ok(ApplyOutcome::Applied) => {
                        result.succeed(&candidate.url, answer);
                        return result;
                    }
                    Ok(ApplyOutcome::AlreadyApplied) => {
                        result.record(&candidate.url, EndpointOutcome::Discarded);
                        result.succeeded = true;
                        return result;
                    }
                    Ok(ApplyOutcome::Discarded) => {
                        result.record(&candidate.url, EndpointOutcome::Discarded);
                        return result;
                    }
                    Err(NegotiationError::Engine(e)) if e == EngineError::Closed => {
                        result.record(&candidate.url, EndpointOutcome::Discarded);
                        return result;
                    }
                    Err(e) => {
                        log::warn!("[{}] {} answered but: {}", descriptor.kind, candidate.url, e);
                        let reason = match e {
                            NegotiationError::DescriptionApply(r) | NegotiationError::ProtocolMismatch(r) => r,
                            other => other.to_string(),
                        };
                        result.record(&candidate.url, EndpointOutcome::ApplyFailed(reason));
                    }
                }
            }
            ProbeOutcome::Manifest(kind) => {
                result.record(&candidate.url, EndpointOutcome::ManifestFound(kind));
                result.terminal = Some(NegotiationError::ManifestDetected {
                    protocol: kind.to_string(),
                    url: candidate.url.clone(),
                });
                return result;
            }
            ProbeOutcome::Hint { status, preview } => {
                log::info!("[{}] {} responded, recording as hint", descriptor.kind, candidate.url);
                result.record(&candidate.url, EndpointOutcome::ApiFound { status, preview });
            }
            ProbeOutcome::Miss(outcome) => result.record(&candidate.url, outcome),
        }
    }

    result
}
