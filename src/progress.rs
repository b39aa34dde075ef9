//! Incremental progress payloads emitted by providers.
//!
//! A provider reports its work as a stream of [`ProgressEvent`]s. Most events
//! carry a plain serializable [`ProgressPayload`]; a [`PendingPart`] carries a
//! placeholder whose content is produced later and delivered through a
//! [`DeferredContent`] handle.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Reference to a named symbol inside a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SymbolRef {
    pub uri: String,
    pub name: String,
}

impl SymbolRef {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

/// Zero-based line/character position.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A range inside a specific document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

/// Partial breakdown entry. Absent fields leave existing values untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakdownFragment {
    pub reference: SymbolRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl BreakdownFragment {
    pub fn new(reference: SymbolRef) -> Self {
        Self {
            reference,
            query: None,
            reason: None,
            response: None,
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// A proposed edit to one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextEdit {
    pub uri: String,
    pub range: Range,
    pub new_text: String,
}

/// Serializable progress payloads, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProgressPayload {
    /// Replaces the response summary.
    MarkdownContent { content: String },
    /// Merged into the breakdown keyed by its reference.
    Breakdown(BreakdownFragment),
    /// Appended navigation hint.
    GoToDefinition {
        location: Location,
        name: String,
        #[serde(default)]
        thinking: String,
    },
    /// Recorded once per uri.
    OpenFile { uri: String },
    RepoMapGeneration { finished: bool },
    LongContextSearch { finished: bool },
    /// Appended proposed edit.
    TextEdit(TextEdit),
    IterationFinished { iteration: u32 },
    /// Drops every proposed edit collected so far.
    DiscardAll,
}

impl ProgressPayload {
    /// Stable kind label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarkdownContent { .. } => "markdownContent",
            Self::Breakdown(_) => "breakdown",
            Self::GoToDefinition { .. } => "goToDefinition",
            Self::OpenFile { .. } => "openFile",
            Self::RepoMapGeneration { .. } => "repoMapGeneration",
            Self::LongContextSearch { .. } => "longContextSearch",
            Self::TextEdit(_) => "textEdit",
            Self::IterationFinished { .. } => "iterationFinished",
            Self::DiscardAll => "discardAll",
        }
    }
}

/// One incremental unit of provider output.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Payload(ProgressPayload),
    Pending(PendingPart),
}

impl ProgressEvent {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self::Payload(ProgressPayload::MarkdownContent {
            content: content.into(),
        })
    }

    pub fn breakdown(fragment: BreakdownFragment) -> Self {
        Self::Payload(ProgressPayload::Breakdown(fragment))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Payload(payload) => payload.kind(),
            Self::Pending(_) => "pendingContent",
        }
    }
}

impl From<ProgressPayload> for ProgressEvent {
    fn from(payload: ProgressPayload) -> Self {
        Self::Payload(payload)
    }
}

/// Placeholder for content that arrives after the event itself.
#[derive(Debug, Clone)]
pub struct PendingPart {
    pub title: String,
    pub content: DeferredContent,
}

impl PendingPart {
    pub fn new(title: impl Into<String>, content: DeferredContent) -> Self {
        Self {
            title: title.into(),
            content,
        }
    }
}

impl From<PendingPart> for ProgressEvent {
    fn from(part: PendingPart) -> Self {
        Self::Pending(part)
    }
}

// ---------------------------------------------------------------------------
// Deferred content
// ---------------------------------------------------------------------------

/// Resolution state of a deferred content part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredState {
    Pending,
    Resolved(String),
    /// The producer went away without resolving.
    Dropped,
}

/// Read side of a deferred content part. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeferredContent {
    rx: watch::Receiver<DeferredState>,
}

/// Write side of a deferred content part.
///
/// Resolution consumes the resolver, so a part resolves at most once. Dropping
/// an unresolved resolver marks the part [`DeferredState::Dropped`].
#[derive(Debug)]
pub struct DeferredResolver {
    tx: watch::Sender<DeferredState>,
}

/// Create a linked resolver/content pair.
pub fn deferred() -> (DeferredResolver, DeferredContent) {
    let (tx, rx) = watch::channel(DeferredState::Pending);
    (DeferredResolver { tx }, DeferredContent { rx })
}

impl DeferredResolver {
    pub fn resolve(self, content: impl Into<String>) {
        let content = content.into();
        self.tx.send_replace(DeferredState::Resolved(content));
    }
}

impl Drop for DeferredResolver {
    fn drop(&mut self) {
        self.tx.send_if_modified(|state| {
            if *state == DeferredState::Pending {
                *state = DeferredState::Dropped;
                true
            } else {
                false
            }
        });
    }
}

impl DeferredContent {
    /// Current state without waiting.
    pub fn state(&self) -> DeferredState {
        self.rx.borrow().clone()
    }

    /// Resolved content, if available now.
    pub fn get(&self) -> Option<String> {
        match &*self.rx.borrow() {
            DeferredState::Resolved(content) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.rx.borrow(), DeferredState::Pending)
    }

    /// Wait until the part settles. Returns `None` when it was dropped.
    pub async fn resolved(&self) -> Option<String> {
        let mut rx = self.rx.clone();
        let settled = rx
            .wait_for(|state| *state != DeferredState::Pending)
            .await
            .ok()
            .map(|state| state.clone());
        match settled {
            Some(DeferredState::Resolved(content)) => Some(content),
            _ => None,
        }
    }
}
