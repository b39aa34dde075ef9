//! Response aggregation.
//!
//! [`ProbeResponse`] folds progress events into one consistent view. Merge
//! rules are per kind:
//!
//! - `markdownContent` replaces the summary.
//! - `breakdown` merges into the entry with the same `(uri, name)` key, keeping
//!   the entry at its first-appearance position; new keys append.
//! - `goToDefinition`, `textEdit`, `iterationFinished` and pending parts append.
//! - `openFile` records each uri once.
//! - `repoMapGeneration` and `longContextSearch` overwrite their status flag.
//! - `discardAll` clears the proposed edits.

use crate::progress::{
    deferred, BreakdownFragment, DeferredContent, DeferredState, Location, PendingPart,
    ProgressEvent, ProgressPayload, SymbolRef, TextEdit,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key identifying one breakdown entry.
pub type BreakdownKey = SymbolRef;

/// Aggregated breakdown entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Breakdown {
    pub reference: SymbolRef,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
}

impl Breakdown {
    fn from_fragment(fragment: BreakdownFragment) -> Self {
        let mut entry = Self {
            reference: fragment.reference.clone(),
            query: None,
            reason: None,
            response: None,
        };
        entry.merge(fragment);
        entry
    }

    /// Overwrite fields the fragment carries with non-empty values.
    fn merge(&mut self, fragment: BreakdownFragment) {
        merge_field(&mut self.query, fragment.query);
        merge_field(&mut self.reason, fragment.reason);
        merge_field(&mut self.response, fragment.response);
    }
}

fn merge_field(slot: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming.filter(|v| !v.is_empty()) {
        *slot = Some(value);
    }
}

/// Appended navigation hint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GoToDefinition {
    pub location: Location,
    pub name: String,
    #[serde(default)]
    pub thinking: String,
}

/// Settlement state of a deferred part, as seen in a snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartState {
    Pending,
    Resolved,
    Dropped,
}

/// Snapshot of one deferred part.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartView {
    pub title: String,
    pub state: PartState,
    #[serde(default)]
    pub content: Option<String>,
}

/// Read-only snapshot of a response for presentation and export.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ResponseView {
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub breakdowns: Vec<Breakdown>,
    #[serde(default)]
    pub go_to_definitions: Vec<GoToDefinition>,
    #[serde(default)]
    pub open_files: Vec<String>,
    #[serde(default)]
    pub text_edits: Vec<TextEdit>,
    #[serde(default)]
    pub iterations: Vec<u32>,
    #[serde(default)]
    pub repo_map_generated: Option<bool>,
    #[serde(default)]
    pub long_context_search_finished: Option<bool>,
    #[serde(default)]
    pub parts: Vec<PartView>,
}

/// Mutable response aggregate owned by one session.
#[derive(Debug, Default)]
pub struct ProbeResponse {
    result: Option<String>,
    breakdowns: Vec<Breakdown>,
    breakdown_index: HashMap<BreakdownKey, usize>,
    go_to_definitions: Vec<GoToDefinition>,
    open_files: Vec<String>,
    text_edits: Vec<TextEdit>,
    iterations: Vec<u32>,
    repo_map_generated: Option<bool>,
    long_context_search_finished: Option<bool>,
    parts: Vec<PendingPart>,
}

impl ProbeResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one progress event into the aggregate.
    pub fn apply(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Payload(payload) => self.apply_payload(payload),
            ProgressEvent::Pending(part) => self.parts.push(part),
        }
    }

    fn apply_payload(&mut self, payload: ProgressPayload) {
        match payload {
            ProgressPayload::MarkdownContent { content } => self.result = Some(content),
            ProgressPayload::Breakdown(fragment) => self.apply_breakdown(fragment),
            ProgressPayload::GoToDefinition {
                location,
                name,
                thinking,
            } => self.go_to_definitions.push(GoToDefinition {
                location,
                name,
                thinking,
            }),
            ProgressPayload::OpenFile { uri } => {
                if !self.open_files.contains(&uri) {
                    self.open_files.push(uri);
                }
            }
            ProgressPayload::RepoMapGeneration { finished } => {
                self.repo_map_generated = Some(finished);
            }
            ProgressPayload::LongContextSearch { finished } => {
                self.long_context_search_finished = Some(finished);
            }
            ProgressPayload::TextEdit(edit) => self.text_edits.push(edit),
            ProgressPayload::IterationFinished { iteration } => self.iterations.push(iteration),
            ProgressPayload::DiscardAll => self.text_edits.clear(),
        }
    }

    fn apply_breakdown(&mut self, fragment: BreakdownFragment) {
        if let Some(&index) = self.breakdown_index.get(&fragment.reference) {
            self.breakdowns[index].merge(fragment);
            return;
        }
        self.breakdown_index
            .insert(fragment.reference.clone(), self.breakdowns.len());
        self.breakdowns.push(Breakdown::from_fragment(fragment));
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn breakdowns(&self) -> &[Breakdown] {
        &self.breakdowns
    }

    pub fn breakdown(&self, key: &BreakdownKey) -> Option<&Breakdown> {
        self.breakdown_index.get(key).map(|&i| &self.breakdowns[i])
    }

    pub fn go_to_definitions(&self) -> &[GoToDefinition] {
        &self.go_to_definitions
    }

    pub fn text_edits(&self) -> &[TextEdit] {
        &self.text_edits
    }

    pub fn parts(&self) -> &[PendingPart] {
        &self.parts
    }

    pub fn view(&self) -> ResponseView {
        ResponseView {
            result: self.result.clone(),
            breakdowns: self.breakdowns.clone(),
            go_to_definitions: self.go_to_definitions.clone(),
            open_files: self.open_files.clone(),
            text_edits: self.text_edits.clone(),
            iterations: self.iterations.clone(),
            repo_map_generated: self.repo_map_generated,
            long_context_search_finished: self.long_context_search_finished,
            parts: self.parts.iter().map(part_view).collect(),
        }
    }

    /// Rebuild an aggregate from a snapshot.
    ///
    /// Parts without content can never settle after import, so they come back
    /// as dropped.
    pub fn from_view(view: ResponseView) -> Self {
        let mut response = Self {
            result: view.result,
            go_to_definitions: view.go_to_definitions,
            open_files: view.open_files,
            text_edits: view.text_edits,
            iterations: view.iterations,
            repo_map_generated: view.repo_map_generated,
            long_context_search_finished: view.long_context_search_finished,
            ..Self::default()
        };
        for entry in view.breakdowns {
            response.apply_breakdown(BreakdownFragment {
                reference: entry.reference,
                query: entry.query,
                reason: entry.reason,
                response: entry.response,
            });
        }
        for part in view.parts {
            let (resolver, content) = deferred();
            if let Some(text) = part.content {
                resolver.resolve(text);
            }
            response.parts.push(PendingPart::new(part.title, content));
        }
        response
    }
}

fn part_view(part: &PendingPart) -> PartView {
    let (state, content) = deferred_snapshot(&part.content);
    PartView {
        title: part.title.clone(),
        state,
        content,
    }
}

fn deferred_snapshot(content: &DeferredContent) -> (PartState, Option<String>) {
    match content.state() {
        DeferredState::Pending => (PartState::Pending, None),
        DeferredState::Resolved(text) => (PartState::Resolved, Some(text)),
        DeferredState::Dropped => (PartState::Dropped, None),
    }
}
