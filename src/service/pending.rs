//! Handles returned by `ProbeService::initiate`.

use crate::error::ErrorDetails;
use crate::model::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Terminal result of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// The provider finished, with error details when it failed.
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorDetails>,
    },
    Cancelled,
}

impl RequestOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn error(&self) -> Option<&ErrorDetails> {
        match self {
            Self::Completed { error } => error.as_ref(),
            Self::Cancelled => None,
        }
    }
}

/// The two settlement signals of an initiated request.
#[derive(Debug)]
pub struct PendingRequest {
    session_id: SessionId,
    request_seq: u64,
    created: Option<oneshot::Receiver<()>>,
    completed: oneshot::Receiver<RequestOutcome>,
}

impl PendingRequest {
    pub(super) fn new(
        session_id: SessionId,
        request_seq: u64,
        created: oneshot::Receiver<()>,
        completed: oneshot::Receiver<RequestOutcome>,
    ) -> Self {
        Self {
            session_id,
            request_seq,
            created: Some(created),
            completed,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Coordinator-wide sequence number of this request.
    pub fn request_seq(&self) -> u64 {
        self.request_seq
    }

    /// Wait until the response object exists. Returns at once on later calls.
    pub async fn created(&mut self) {
        // The sender fires before the exchange task starts; a closed channel
        // still means the response was created.
        if let Some(created) = self.created.take() {
            let _ = created.await;
        }
    }

    /// Wait for the terminal outcome. Never fails.
    pub async fn completed(self) -> RequestOutcome {
        // The exchange task always sends before exiting; if it was torn down
        // with the runtime, the request can only be considered cancelled.
        self.completed.await.unwrap_or(RequestOutcome::Cancelled)
    }
}
