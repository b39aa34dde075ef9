//! Provider that replays a fixed script of progress steps.
//!
//! Scripts are JSON documents:
//!
//! ```json
//! { "steps": [
//!     { "progress": { "kind": "breakdown", "reference": { "uri": "file:///foo.rs", "name": "bar" }, "query": "Q" } },
//!     { "delay_ms": 20, "pending": { "title": "tool call", "content": "output", "after_ms": 50 } },
//!     { "progress": { "kind": "markdownContent", "content": "done" } }
//! ] }
//! ```

use super::{ProgressSink, Provider};
use crate::cancellation::CancellationToken;
use crate::error::ProviderError;
use crate::model::{ProbeRequest, SessionId};
use crate::progress::{deferred, PendingPart, ProgressPayload};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One script step: an optional delay followed by an action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptStep {
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(flatten)]
    pub action: ScriptAction,
}

/// What a script step does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptAction {
    /// Report a synchronous payload.
    Progress(ProgressPayload),
    /// Report a pending part whose content resolves `after_ms` later.
    Pending {
        title: String,
        content: String,
        #[serde(default)]
        after_ms: u64,
    },
    /// Fail the request with this message.
    Fail(String),
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    steps: Vec<ScriptStep>,
}

/// Replays [`ScriptStep`]s for every request it receives.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    steps: Vec<ScriptStep>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let script: ScriptFile = serde_json::from_str(raw)?;
        Ok(Self::new(script.steps))
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn resolve(
        &self,
        session_id: &SessionId,
        request: &ProbeRequest,
        progress: ProgressSink,
        token: CancellationToken,
    ) -> Result<(), ProviderError> {
        debug!(
            session = %session_id,
            steps = self.steps.len(),
            message = request.message(),
            "replaying script"
        );
        for step in &self.steps {
            if step.delay_ms > 0 {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(step.delay_ms)) => {}
                }
            }
            if token.is_cancelled() {
                return Ok(());
            }
            match &step.action {
                ScriptAction::Progress(payload) => progress.report(payload.clone()),
                ScriptAction::Pending {
                    title,
                    content,
                    after_ms,
                } => {
                    let (resolver, part) = deferred();
                    progress.report(PendingPart::new(title.clone(), part));
                    let content = content.clone();
                    let delay = Duration::from_millis(*after_ms);
                    let token = token.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            // Dropping the resolver marks the part dropped.
                            _ = token.cancelled() => drop(resolver),
                            _ = tokio::time::sleep(delay) => resolver.resolve(content),
                        }
                    });
                }
                ScriptAction::Fail(message) => return Err(ProviderError::Failed(message.clone())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancellation::CancellationSource;
    use crate::progress::{BreakdownFragment, ProgressEvent, SymbolRef};
    use std::sync::{Arc, Mutex};

    fn session() -> SessionId {
        SessionId::from("session-1")
    }

    fn recording_sink() -> (ProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let events = Arc::clone(&events);
            ProgressSink::new(move |event: ProgressEvent| {
                events.lock().expect("lock").push(event);
            })
        };
        (sink, events)
    }

    #[test]
    fn parses_documented_script_shape() {
        let raw = r#"{ "steps": [
            { "progress": { "kind": "breakdown", "reference": { "uri": "file:///foo.rs", "name": "bar" }, "query": "Q" } },
            { "delay_ms": 20, "pending": { "title": "tool call", "content": "output", "after_ms": 50 } },
            { "fail": "boom" }
        ] }"#;
        let provider = ScriptedProvider::from_json(raw).expect("parse");
        assert_eq!(provider.steps().len(), 3);
        assert_eq!(
            provider.steps()[0].action,
            ScriptAction::Progress(ProgressPayload::Breakdown(
                BreakdownFragment::new(SymbolRef::new("file:///foo.rs", "bar")).query("Q")
            ))
        );
        assert_eq!(provider.steps()[1].delay_ms, 20);
        assert_eq!(provider.steps()[2].action, ScriptAction::Fail("boom".into()));
    }

    #[tokio::test]
    async fn replays_steps_in_order() {
        let provider = ScriptedProvider::new(vec![
            ScriptStep {
                delay_ms: 0,
                action: ScriptAction::Progress(ProgressPayload::RepoMapGeneration {
                    finished: true,
                }),
            },
            ScriptStep {
                delay_ms: 1,
                action: ScriptAction::Progress(ProgressPayload::MarkdownContent {
                    content: "done".into(),
                }),
            },
        ]);
        let (sink, events) = recording_sink();
        provider
            .resolve(&session(), &ProbeRequest::new("go"), sink, CancellationToken::none())
            .await
            .expect("resolve");
        let kinds: Vec<_> = events.lock().expect("lock").iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["repoMapGeneration", "markdownContent"]);
    }

    #[tokio::test]
    async fn fail_step_returns_error() {
        let provider = ScriptedProvider::new(vec![ScriptStep {
            delay_ms: 0,
            action: ScriptAction::Fail("no index".into()),
        }]);
        let err = provider
            .resolve(
                &session(),
                &ProbeRequest::new("go"),
                ProgressSink::discard(),
                CancellationToken::none(),
            )
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("no index"));
    }

    #[tokio::test]
    async fn cancellation_stops_replay() {
        let provider = ScriptedProvider::new(vec![ScriptStep {
            delay_ms: 10_000,
            action: ScriptAction::Progress(ProgressPayload::DiscardAll),
        }]);
        let source = CancellationSource::new();
        let (sink, events) = recording_sink();
        let token = source.token();
        let run = tokio::spawn(async move {
            provider
                .resolve(&session(), &ProbeRequest::new("go"), sink, token)
                .await
        });
        source.cancel();
        run.await.expect("join").expect("cancelled resolve is ok");
        assert!(events.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn pending_part_resolves_later() {
        let provider = ScriptedProvider::new(vec![ScriptStep {
            delay_ms: 0,
            action: ScriptAction::Pending {
                title: "tool".into(),
                content: "result".into(),
                after_ms: 5,
            },
        }]);
        let (sink, events) = recording_sink();
        provider
            .resolve(&session(), &ProbeRequest::new("go"), sink, CancellationToken::none())
            .await
            .expect("resolve");
        let part = match events.lock().expect("lock").first() {
            Some(ProgressEvent::Pending(part)) => part.clone(),
            other => panic!("unexpected event: {other:?}"),
        };
        assert_eq!(part.content.resolved().await.as_deref(), Some("result"));
    }
}
