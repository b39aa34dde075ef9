//! Request lifecycle helpers.
//!
//! Each issued request gets a small watcher task that reports its two
//! settlement signals back to the runtime actor.

use super::RequestRef;
use crate::model::SessionId;
use crate::service::{PendingRequest, RequestOutcome};
use tokio::sync::mpsc;

/// Runtime-owned metadata for the request currently in flight.
pub(super) struct ActiveRequest {
    pub(super) session_id: SessionId,
    pub(super) request: RequestRef,
}

/// Settlement signal sent from a watcher back to the runtime actor.
pub(super) enum RequestUpdate {
    Created(RequestRef),
    Settled(RequestRef, RequestOutcome),
}

/// Forward `pending`'s settlement signals as [`RequestUpdate`]s.
pub(super) fn spawn_request_watcher(
    request: RequestRef,
    mut pending: PendingRequest,
    updates_tx: mpsc::UnboundedSender<RequestUpdate>,
) {
    tokio::spawn(async move {
        pending.created().await;
        let _ = updates_tx.send(RequestUpdate::Created(request.clone()));
        let outcome = pending.completed().await;
        let _ = updates_tx.send(RequestUpdate::Settled(request, outcome));
    });
}
