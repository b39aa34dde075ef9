//! Session coordinator.
//!
//! [`ProbeService`] owns at most one live session, drives the configured
//! provider for it, and routes provider progress into the session model. A
//! new session always supersedes the previous one: the old session's request
//! is cancelled and its model disposed before the replacement is installed.

mod pending;

pub use pending::{PendingRequest, RequestOutcome};

use crate::cancellation::{CancellationSource, CancellationToken};
use crate::config::EngineConfig;
use crate::error::{ErrorDetails, ProbeError};
use crate::model::{ProbeRequest, ProbeSession, SessionId, SessionState};
use crate::progress::ProgressEvent;
use crate::provider::{ProgressReporter, ProgressSink, Provider, ProviderRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, error, info};

/// Coordinator for probe sessions. Clones share state.
#[derive(Clone)]
pub struct ProbeService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    registry: Arc<ProviderRegistry>,
    provider_id: String,
    slot: Mutex<Option<ProbeSession>>,
    in_flight: Mutex<HashMap<SessionId, InFlight>>,
    next_request_seq: AtomicU64,
}

/// Live cancellation source for one session's request.
struct InFlight {
    request_seq: u64,
    source: CancellationSource,
    session: ProbeSession,
}

impl ProbeService {
    pub fn new(registry: Arc<ProviderRegistry>, provider_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                registry,
                provider_id: provider_id.into(),
                slot: Mutex::new(None),
                in_flight: Mutex::new(HashMap::new()),
                next_request_seq: AtomicU64::new(1),
            }),
        }
    }

    pub fn from_config(registry: Arc<ProviderRegistry>, config: &EngineConfig) -> Self {
        Self::new(registry, config.provider.clone())
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.inner.registry
    }

    pub fn provider_id(&self) -> &str {
        &self.inner.provider_id
    }

    /// Replace the current session with a fresh one.
    pub fn start_session(&self) -> ProbeSession {
        let session = ProbeSession::new();
        let previous = self.inner.slot().replace(session.clone());
        if let Some(previous) = previous {
            debug!(previous = %previous.id(), next = %session.id(), "superseding session");
            self.cancel_current_request(previous.id());
            previous.dispose();
        }
        info!(session = %session.id(), "session started");
        session
    }

    pub fn current_session(&self) -> Option<ProbeSession> {
        self.inner.slot().clone()
    }

    /// Issue `request` on `session` and drive the provider in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn initiate(
        &self,
        session: &ProbeSession,
        request: impl Into<ProbeRequest>,
    ) -> Result<PendingRequest, ProbeError> {
        let request = request.into();
        let provider = self
            .inner
            .registry
            .get(&self.inner.provider_id)
            .ok_or_else(|| ProbeError::NoProvider(self.inner.provider_id.clone()))?;

        let request_seq = self.inner.next_request_seq.fetch_add(1, Ordering::Relaxed);
        let source = CancellationSource::new();
        let token = source.token();
        {
            // Held across issue_request so two racing initiates cannot both
            // pass the collision check.
            let mut in_flight = self.inner.in_flight();
            if in_flight.contains_key(session.id()) {
                return Err(ProbeError::RequestPending(session.id().to_string()));
            }
            session.lock().issue_request(request.clone())?;
            in_flight.insert(
                session.id().clone(),
                InFlight {
                    request_seq,
                    source,
                    session: session.clone(),
                },
            );
        }
        info!(
            session = %session.id(),
            request_seq,
            provider = %self.inner.provider_id,
            "request issued"
        );

        let (created_tx, created_rx) = oneshot::channel();
        let (completed_tx, completed_rx) = oneshot::channel();
        // The response exists as soon as the request is issued.
        let _ = created_tx.send(());

        let progress = ProgressSink::new(SessionProgress {
            session: session.clone(),
            token: token.clone(),
        });
        tokio::spawn(run_exchange(Exchange {
            inner: Arc::clone(&self.inner),
            provider,
            session: session.clone(),
            request,
            progress,
            token,
            request_seq,
            completed_tx,
        }));

        Ok(PendingRequest::new(
            session.id().clone(),
            request_seq,
            created_rx,
            completed_rx,
        ))
    }

    /// Signal cancellation for the session's request, if one is in flight.
    ///
    /// Returns once the signal is raised; the provider stops on its own
    /// schedule. Returns false when nothing was pending.
    pub fn cancel_current_request(&self, session_id: &SessionId) -> bool {
        let Some(in_flight) = self.inner.in_flight().remove(session_id) else {
            return false;
        };
        // Fire before touching the model: progress callbacks check the token
        // under the model lock, so nothing lands after `cancel` below.
        in_flight.source.cancel();
        in_flight.session.cancel();
        info!(session = %session_id, request_seq = in_flight.request_seq, "request cancelled");
        true
    }

    /// Abandon a session entirely: cancel its request and dispose its model.
    pub fn clear_session(&self, session_id: &SessionId) {
        let pending_session = self
            .inner
            .in_flight()
            .get(session_id)
            .map(|in_flight| in_flight.session.clone());
        self.cancel_current_request(session_id);
        if let Some(session) = pending_session {
            session.dispose();
        }

        let mut slot = self.inner.slot();
        if slot.as_ref().is_some_and(|s| s.id() == session_id) {
            if let Some(session) = slot.take() {
                session.dispose();
            }
        }
        debug!(session = %session_id, "session cleared");
    }

    /// True when a request is in flight for the session.
    pub fn has_pending_request(&self, session_id: &SessionId) -> bool {
        self.inner.in_flight().contains_key(session_id)
    }
}

impl ServiceInner {
    fn slot(&self) -> MutexGuard<'_, Option<ProbeSession>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<SessionId, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the in-flight entry unless a newer request replaced it.
    fn finish(&self, session_id: &SessionId, request_seq: u64) {
        let mut in_flight = self.in_flight();
        if in_flight
            .get(session_id)
            .is_some_and(|entry| entry.request_seq == request_seq)
        {
            in_flight.remove(session_id);
        }
    }
}

/// Progress sink bound to one session and its request's token.
struct SessionProgress {
    session: ProbeSession,
    token: CancellationToken,
}

impl ProgressReporter for SessionProgress {
    fn report(&self, event: ProgressEvent) {
        let part = match &event {
            ProgressEvent::Pending(part) => Some(part.content.clone()),
            ProgressEvent::Payload(_) => None,
        };
        let applied = {
            let mut model = self.session.lock();
            if self.token.is_cancelled() {
                debug!(session = %self.session.id(), kind = event.kind(), "progress after cancellation dropped");
                return;
            }
            model.apply_progress(event)
        };
        if let (true, Some(content)) = (applied, part) {
            self.session.watch_part(content);
        }
    }
}

struct Exchange {
    inner: Arc<ServiceInner>,
    provider: Arc<dyn Provider>,
    session: ProbeSession,
    request: ProbeRequest,
    progress: ProgressSink,
    token: CancellationToken,
    request_seq: u64,
    completed_tx: oneshot::Sender<RequestOutcome>,
}

async fn run_exchange(exchange: Exchange) {
    let Exchange {
        inner,
        provider,
        session,
        request,
        progress,
        token,
        request_seq,
        completed_tx,
    } = exchange;

    // A nested task turns a provider panic into a join error instead of
    // taking the exchange down with it.
    let provider_token = token.clone();
    let session_id = session.id().clone();
    let resolved = tokio::spawn(async move {
        provider
            .resolve(&session_id, &request, progress, provider_token)
            .await
    })
    .await;

    let error = match resolved {
        Ok(Ok(())) => None,
        Ok(Err(err)) => {
            error!(session = %session.id(), request_seq, error = %err, "provider failed");
            Some(err.to_details())
        }
        Err(join_err) => {
            error!(session = %session.id(), request_seq, error = %join_err, "provider task aborted");
            Some(ErrorDetails::new(format!("provider task aborted: {join_err}")).with_code("aborted"))
        }
    };

    if !token.is_cancelled() {
        session.complete();
    }
    let outcome = if session.state() == SessionState::Completed {
        RequestOutcome::Completed { error }
    } else {
        RequestOutcome::Cancelled
    };
    inner.finish(session.id(), request_seq);
    debug!(session = %session.id(), request_seq, ?outcome, "request settled");
    let _ = completed_tx.send(outcome);
}
