//! Runtime command/event schema.
//!
//! Frontends drive the runtime actor with [`RuntimeCommand`]s and render the
//! [`RuntimeEventEnvelope`] stream it produces.

use crate::error::ErrorDetails;
use crate::model::SessionView;
use crate::service::RequestOutcome;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Logical reference for one issued request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestRef {
    pub session_id: String,
    pub request_seq: u64,
}

/// Control-plane commands for a runtime actor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuntimeCommand {
    /// Replace the current session with a fresh one.
    StartSession,
    /// Issue a request on the current session, starting one if needed.
    Submit { prompt: String },
    /// Cancel the running request, if any.
    Cancel,
    /// Abandon the current session.
    Clear,
    SetFollowAlong { enabled: bool },
    Shutdown,
}

/// Monotonic envelope for runtime events.
///
/// `seq` is assigned by the runtime; `ts_unix_ms` is wall-clock capture time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeEventEnvelope {
    pub seq: u64,
    pub ts_unix_ms: u64,
    pub event: RuntimeEvent,
}

impl RuntimeEventEnvelope {
    pub fn new(seq: u64, event: RuntimeEvent) -> Self {
        Self {
            seq,
            ts_unix_ms: now_unix_millis(),
            event,
        }
    }
}

/// Typed runtime event families.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum RuntimeEvent {
    Lifecycle(LifecycleEvent),
    Session(SessionEvent),
    Request(RequestEvent),
    Progress(ProgressUpdate),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    RuntimeStarted,
    RuntimeStopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    Started { session_id: String },
    Cleared { session_id: String },
    FollowAlongChanged { session_id: String, enabled: bool },
}

/// Request state transitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    Issued { request: RequestRef, preview: String },
    ResponseCreated { request: RequestRef },
    Completed { request: RequestRef },
    Failed { request: RequestRef, error: ErrorDetails },
    Cancelled { request: RequestRef },
}

impl RequestEvent {
    /// Terminal event for a settled request.
    pub fn settled(request: RequestRef, outcome: RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Completed { error: None } => Self::Completed { request },
            RequestOutcome::Completed { error: Some(error) } => Self::Failed { request, error },
            RequestOutcome::Cancelled => Self::Cancelled { request },
        }
    }
}

/// Snapshot of the current session after it changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub view: SessionView,
}

/// Error surfaced to frontends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestRef>,
    pub message: String,
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
