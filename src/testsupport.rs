//! Shared test fixtures for coordinator, bridge, config and export tests.
//!
//! `ChannelProvider` hands each provider invocation to the test so progress can
//! be driven one event at a time; `TestTempDir` gives config and export tests
//! a scratch directory.

use crate::cancellation::CancellationToken;
use crate::error::ProviderError;
use crate::model::{ProbeRequest, SessionId};
use crate::progress::{BreakdownFragment, ProgressEvent, SymbolRef};
use crate::provider::{ProgressSink, Provider};
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("probe-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }

    /// Write UTF-8 text to a child path, creating parent directories as needed.
    pub fn write_text(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.child(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent directories for fixture");
        }
        fs::write(&path, content).expect("failed to write fixture file");
        path
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// One invocation of a [`ChannelProvider`], owned by the test.
#[derive(Debug)]
pub struct ProviderCall {
    pub session_id: SessionId,
    pub request: ProbeRequest,
    pub progress: ProgressSink,
    pub token: CancellationToken,
    finish: oneshot::Sender<Result<(), ProviderError>>,
}

impl ProviderCall {
    /// Let the provider's `resolve` return `result`.
    pub fn finish(self, result: Result<(), ProviderError>) {
        let _ = self.finish.send(result);
    }
}

/// Provider whose invocations are forwarded to the test over a channel.
///
/// `resolve` blocks until the test calls [`ProviderCall::finish`] or drops
/// the call, which counts as success.
#[derive(Debug)]
pub struct ChannelProvider {
    calls: mpsc::UnboundedSender<ProviderCall>,
}

impl ChannelProvider {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProviderCall>) {
        let (calls, rx) = mpsc::unbounded_channel();
        (Self { calls }, rx)
    }
}

#[async_trait]
impl Provider for ChannelProvider {
    async fn resolve(
        &self,
        session_id: &SessionId,
        request: &ProbeRequest,
        progress: ProgressSink,
        token: CancellationToken,
    ) -> Result<(), ProviderError> {
        let (finish, finished) = oneshot::channel();
        let call = ProviderCall {
            session_id: session_id.clone(),
            request: request.clone(),
            progress,
            token,
            finish,
        };
        if self.calls.send(call).is_err() {
            return Err(ProviderError::Failed("test dropped the call channel".into()));
        }
        finished.await.unwrap_or(Ok(()))
    }
}

/// Breakdown fragment for `bar` in `file:///foo.rs`.
pub fn bar_fragment() -> BreakdownFragment {
    BreakdownFragment::new(SymbolRef::new("file:///foo.rs", "bar"))
}

pub fn bar_breakdown(query: &str) -> ProgressEvent {
    ProgressEvent::breakdown(bar_fragment().query(query))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_dir_fixture_writes_and_resolves_paths() {
        let fixture = TestTempDir::new("fixture");
        let file = fixture.write_text("nested/file.txt", "hello");
        assert_eq!(fs::read_to_string(file).expect("read"), "hello");
    }

    #[tokio::test]
    async fn channel_provider_hands_calls_to_the_test() {
        let (provider, mut calls) = ChannelProvider::new();
        let run = tokio::spawn(async move {
            provider
                .resolve(
                    &SessionId::from("s"),
                    &ProbeRequest::new("hi"),
                    ProgressSink::discard(),
                    CancellationToken::none(),
                )
                .await
        });
        let call = calls.recv().await.expect("call");
        assert_eq!(call.request.message(), "hi");
        call.finish(Err(ProviderError::Failed("nope".into())));
        assert!(run.await.expect("join").is_err());
    }
}
