//! The negotiator: one active session at a time, driven by a single worker.
//!
//! `begin`, `cancel` and `dispose` never block. They only swap the current
//! session and queue work; the worker task owns all network I/O and the
//! engine calls for a negotiation. No negotiator lock is held while the
//! event sink runs, so sinks may call back into the negotiator.

mod driver;
mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::NegotiatorConfig;
use crate::error::NegotiationError;
use crate::events::EventSink;
use crate::peer::{IceCandidateRecord, MediaEngine, SessionDescriptor};
use crate::stream_ref::StreamReference;
use crate::RUNTIME;

pub use session::{ApplyOutcome, NegotiationState};
use session::Session;

/// Negotiates a receive-only WebRTC session against whatever signaling the
/// remote speaks.
pub struct Negotiator {
    config: Arc<NegotiatorConfig>,
    sink: Arc<dyn EventSink>,
    handle: Handle,
    worker_tx: Mutex<Option<mpsc::UnboundedSender<Arc<Session>>>>,
    current: Mutex<Option<Arc<Session>>>,
    generation: AtomicU64,
}

impl Negotiator {
    /// Create a negotiator on the ambient tokio runtime, or on the shared
    /// runtime when called outside one.
    pub fn new<E, S>(engine: E, sink: S, config: NegotiatorConfig) -> Result<Self, NegotiationError>
    where
        E: MediaEngine,
        S: EventSink,
    {
        let handle = Handle::try_current().unwrap_or_else(|_| RUNTIME.handle().clone());
        Self::with_handle(engine, sink, config, handle)
    }

    pub fn with_handle<E, S>(
        engine: E,
        sink: S,
        config: NegotiatorConfig,
        handle: Handle,
    ) -> Result<Self, NegotiationError>
    where
        E: MediaEngine,
        S: EventSink,
    {
        config.validate()?;

        let engine: Arc<dyn MediaEngine> = Arc::new(engine);
        let (worker_tx, mut worker_rx) = mpsc::unbounded_channel::<Arc<Session>>();

        handle.spawn(async move {
            while let Some(session) = worker_rx.recv().await {
                if session.cancel.is_set() {
                    // superseded before it started
                    session.release().await;
                    continue;
                }
                driver::run_session(engine.as_ref(), session).await;
            }
            log::debug!("negotiation worker stopped");
        });

        Ok(Self {
            config: Arc::new(config),
            sink: Arc::new(sink),
            handle,
            worker_tx: Mutex::new(Some(worker_tx)),
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Start negotiating `reference`, discarding any session in progress.
    ///
    /// Fails synchronously only for an unparseable reference or after
    /// [`dispose`](Self::dispose); everything else is reported as events.
    pub fn begin(&self, reference: &str) -> Result<(), NegotiationError> {
        let reference = StreamReference::parse(reference)?;

        let tx = self.worker_tx.lock().clone().ok_or(NegotiationError::Disposed)?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(Session::new(
            generation,
            reference,
            self.config.clone(),
            self.sink.clone(),
        ));

        let previous = self.current.lock().replace(session.clone());
        if let Some(previous) = previous {
            self.discard(previous);
        }

        if self.worker_tx.lock().is_none() {
            // disposed while we were starting
            let ours = {
                let mut current = self.current.lock();
                match current.as_ref() {
                    Some(s) if Arc::ptr_eq(s, &session) => current.take(),
                    _ => None,
                }
            };
            if let Some(session) = ours {
                self.discard(session);
            }
            return Err(NegotiationError::Disposed);
        }
        tx.send(session).map_err(|_| NegotiationError::Disposed)
    }

    /// Cancel the current negotiation. Safe in any state, any number of times.
    pub fn cancel(&self) {
        let current = self.current.lock().clone();
        if let Some(session) = current {
            self.discard(session);
        }
    }

    /// Cancel and stop the worker. Later `begin` calls fail with `Disposed`.
    pub fn dispose(&self) {
        let worker = self.worker_tx.lock().take();
        if worker.is_none() {
            return;
        }
        let current = self.current.lock().take();
        if let Some(session) = current {
            self.discard(session);
        }
        log::debug!("negotiator disposed");
    }

    pub fn state(&self) -> NegotiationState {
        let current = self.current.lock().clone();
        current.map(|s| s.state()).unwrap_or(NegotiationState::Idle)
    }

    pub fn stream_reference(&self) -> Option<StreamReference> {
        self.current.lock().as_ref().map(|s| s.reference.clone())
    }

    /// Apply an answer obtained by the host's own signaling.
    ///
    /// Goes through the same once-only guard as discovered answers.
    pub async fn apply_remote_description(&self, answer: SessionDescriptor) -> Result<ApplyOutcome, NegotiationError> {
        let session = self.active_session()?;
        session.apply_remote(&answer, None).await
    }

    /// Hand a trickled remote candidate to the peer session.
    pub async fn add_remote_ice_candidate(&self, candidate: IceCandidateRecord) -> Result<(), NegotiationError> {
        let session = self.active_session()?;
        if session.cancel.is_set() {
            return Err(NegotiationError::Cancelled);
        }
        session.peer()?.add_ice_candidate(&candidate).await?;
        Ok(())
    }

    fn active_session(&self) -> Result<Arc<Session>, NegotiationError> {
        if self.worker_tx.lock().is_none() {
            return Err(NegotiationError::Disposed);
        }
        self.current.lock().clone().ok_or(NegotiationError::NoSession)
    }

    fn discard(&self, session: Arc<Session>) {
        session.cancel();
        self.handle.spawn(async move {
            session.release().await;
        });
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        self.dispose();
    }
}
