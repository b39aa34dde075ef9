//! Session model: one request/response exchange and its state machine.
//!
//! ```text
//! Created --issue_request--> RequestIssued --complete--> Completed
//!    \                            |
//!     `-------- cancel ---------> Cancelled
//! ```
//!
//! The model knows nothing about cancellation tokens; callers decide whether a
//! progress event may still be applied. Terminal and disposed models ignore
//! every mutation with a warning, since misbehaving providers must not be able
//! to take the host down.

pub mod request;
pub mod response;

pub use request::{ContextVariable, ProbeRequest};
pub use response::{
    Breakdown, BreakdownKey, GoToDefinition, PartState, PartView, ProbeResponse, ResponseView,
};

use crate::error::ProbeError;
use crate::progress::{DeferredContent, ProgressEvent};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Process-unique session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a grouped-hex id (`xxxx-xxxx-xxxx-xxxx`).
    pub fn generate() -> Self {
        let mut bytes = [0u8; 8];
        OsRng.fill_bytes(&mut bytes);
        let hex = format!("{:016x}", u64::from_be_bytes(bytes));
        Self(format!(
            "{}-{}-{}-{}",
            &hex[0..4],
            &hex[4..8],
            &hex[8..12],
            &hex[12..16]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    RequestIssued,
    Completed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Notification raised after a session mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Updated { session_id: SessionId, revision: u64 },
    Disposed { session_id: SessionId },
}

/// Read-only snapshot handed to presentation layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub state: SessionState,
    pub request: Option<ProbeRequest>,
    pub response: Option<ResponseView>,
    pub follow_along: bool,
    pub revision: u64,
}

impl SessionView {
    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
    }
}

/// Mutable state of one session.
#[derive(Debug)]
pub struct SessionModel {
    id: SessionId,
    state: SessionState,
    request: Option<ProbeRequest>,
    response: Option<ProbeResponse>,
    follow_along: bool,
    disposed: bool,
    revision: u64,
    listeners: Vec<mpsc::UnboundedSender<SessionChange>>,
}

impl SessionModel {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            state: SessionState::Created,
            request: None,
            response: None,
            follow_along: true,
            disposed: false,
            revision: 0,
            listeners: Vec::new(),
        }
    }

    /// Rebuild a completed session from exported data.
    pub fn restored(id: SessionId, request: ProbeRequest, response: ProbeResponse) -> Self {
        Self {
            state: SessionState::Completed,
            request: Some(request),
            response: Some(response),
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> Option<&ProbeRequest> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&ProbeResponse> {
        self.response.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn follow_along(&self) -> bool {
        self.follow_along
    }

    /// Install the request and an empty response.
    pub fn issue_request(&mut self, request: ProbeRequest) -> Result<(), ProbeError> {
        if self.disposed {
            return Err(ProbeError::SessionDisposed(self.id.to_string()));
        }
        if self.state != SessionState::Created {
            return Err(ProbeError::InvalidState(format!(
                "session {} already issued its request ({:?})",
                self.id, self.state
            )));
        }
        self.request = Some(request);
        self.response = Some(ProbeResponse::new());
        self.state = SessionState::RequestIssued;
        self.notify_updated();
        Ok(())
    }

    /// Fold one progress event into the response and notify once.
    ///
    /// Returns whether the event was applied.
    pub fn apply_progress(&mut self, event: ProgressEvent) -> bool {
        if self.disposed {
            warn!(session = %self.id, kind = event.kind(), "progress for disposed session ignored");
            return false;
        }
        if self.state.is_terminal() {
            warn!(
                session = %self.id,
                kind = event.kind(),
                state = ?self.state,
                "progress after session settled ignored"
            );
            return false;
        }
        let Some(response) = self.response.as_mut() else {
            warn!(session = %self.id, kind = event.kind(), "progress before request ignored");
            return false;
        };
        debug!(session = %self.id, kind = event.kind(), "applying progress");
        response.apply(event);
        self.notify_updated();
        true
    }

    /// Record that a deferred part settled so snapshots pick up its content.
    ///
    /// Completed sessions still notify; cancelled or disposed ones stay quiet.
    pub fn part_settled(&mut self) {
        if self.disposed || self.state == SessionState::Cancelled || self.response.is_none() {
            return;
        }
        debug!(session = %self.id, "deferred part settled");
        self.notify_updated();
    }

    pub fn complete(&mut self) {
        if self.disposed || self.state != SessionState::RequestIssued {
            debug!(session = %self.id, state = ?self.state, "complete ignored");
            return;
        }
        self.state = SessionState::Completed;
        self.notify_updated();
    }

    /// Move to `Cancelled`, discarding the partially built exchange.
    pub fn cancel(&mut self) {
        if self.disposed || self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Cancelled;
        self.request = None;
        self.response = None;
        self.notify_updated();
    }

    pub fn set_follow_along(&mut self, enabled: bool) {
        if self.disposed || self.follow_along == enabled {
            return;
        }
        self.follow_along = enabled;
        self.notify_updated();
    }

    /// Release listeners after a final notification. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        let change = SessionChange::Disposed {
            session_id: self.id.clone(),
        };
        for listener in self.listeners.drain(..) {
            let _ = listener.send(change.clone());
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.disposed {
            self.listeners.push(tx);
        }
        rx
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.clone(),
            state: self.state,
            request: self.request.clone(),
            response: self.response.as_ref().map(ProbeResponse::view),
            follow_along: self.follow_along,
            revision: self.revision,
        }
    }

    fn notify_updated(&mut self) {
        self.revision = self.revision.saturating_add(1);
        let change = SessionChange::Updated {
            session_id: self.id.clone(),
            revision: self.revision,
        };
        self.listeners
            .retain(|listener| listener.send(change.clone()).is_ok());
    }
}

/// Shared handle to a session model.
///
/// Clones refer to the same session. Locks are held only for the duration of
/// one synchronous mutation.
#[derive(Debug, Clone)]
pub struct ProbeSession {
    id: SessionId,
    inner: Arc<Mutex<SessionModel>>,
}

impl ProbeSession {
    pub fn new() -> Self {
        Self::from_model(SessionModel::new(SessionId::generate()))
    }

    pub fn from_model(model: SessionModel) -> Self {
        Self {
            id: model.id().clone(),
            inner: Arc::new(Mutex::new(model)),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Lock the model for a synchronous read or mutation.
    pub fn lock(&self) -> MutexGuard<'_, SessionModel> {
        // A panic while holding the lock leaves the model consistent enough to
        // keep reading; every mutation is a single field-level step.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn apply_progress(&self, event: impl Into<ProgressEvent>) {
        let event = event.into();
        let part = match &event {
            ProgressEvent::Pending(part) => Some(part.content.clone()),
            ProgressEvent::Payload(_) => None,
        };
        let applied = self.lock().apply_progress(event);
        if let (true, Some(content)) = (applied, part) {
            self.watch_part(content);
        }
    }

    /// Notify subscribers once `content` settles.
    ///
    /// Needs a tokio runtime; outside one the settlement is only visible to
    /// later snapshots.
    pub fn watch_part(&self, content: DeferredContent) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(session = %self.id, "no runtime to watch deferred part");
            return;
        };
        let model = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            content.resolved().await;
            if let Some(model) = model.upgrade() {
                model
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .part_settled();
            }
        });
    }

    pub fn complete(&self) {
        self.lock().complete();
    }

    pub fn cancel(&self) {
        self.lock().cancel();
    }

    pub fn set_follow_along(&self, enabled: bool) {
        self.lock().set_follow_along(enabled);
    }

    pub fn dispose(&self) {
        self.lock().dispose();
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionChange> {
        self.lock().subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().is_disposed()
    }

    pub fn view(&self) -> SessionView {
        self.lock().view()
    }

    pub fn same_session(&self, other: &ProbeSession) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for ProbeSession {
    fn default() -> Self {
        Self::new()
    }
}
