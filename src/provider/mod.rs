//! Pluggable response providers.
//!
//! A provider turns a [`ProbeRequest`] into a stream of progress events. It
//! may run in-process or behind the cross-process bridge; either way the
//! coordinator only sees the [`Provider`] trait.

pub mod registry;
pub mod scripted;

pub use registry::ProviderRegistry;
pub use scripted::{ScriptAction, ScriptStep, ScriptedProvider};

use crate::cancellation::CancellationToken;
use crate::error::ProviderError;
use crate::model::{ProbeRequest, SessionId};
use crate::progress::ProgressEvent;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Capability that produces responses to probe requests.
///
/// `session_id` identifies the exchange the request belongs to. Implementations
/// report incremental output through `progress` and should stop promptly once
/// `token` fires. Returning `Err` settles the request with
/// error details; it never tears down the host.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn resolve(
        &self,
        session_id: &SessionId,
        request: &ProbeRequest,
        progress: ProgressSink,
        token: CancellationToken,
    ) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// Progress sink
// ---------------------------------------------------------------------------

/// Receiver of progress events on behalf of one request.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

impl<F> ProgressReporter for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn report(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Cloneable progress callback handed to providers.
#[derive(Clone)]
pub struct ProgressSink {
    reporter: Arc<dyn ProgressReporter>,
}

impl ProgressSink {
    pub fn new(reporter: impl ProgressReporter + 'static) -> Self {
        Self {
            reporter: Arc::new(reporter),
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::new(|_event: ProgressEvent| {})
    }

    pub fn report(&self, event: impl Into<ProgressEvent>) {
        self.reporter.report(event.into());
    }
}

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closure_sink_receives_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            ProgressSink::new(move |event: ProgressEvent| {
                seen.lock().expect("lock").push(event.kind());
            })
        };
        sink.report(ProgressEvent::markdown("a"));
        sink.clone().report(crate::progress::ProgressPayload::DiscardAll);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["markdownContent", "discardAll"]
        );
    }
}
