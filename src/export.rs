//! Session export and import.
//!
//! A session is exported as a versioned JSON document holding its exchange.
//! Import is strict: unknown versions, unknown fields and malformed shapes are
//! rejected as a whole.

use crate::error::ImportError;
use crate::model::{ProbeRequest, ProbeResponse, ProbeSession, ResponseView, SessionId, SessionModel};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Document schema version written by [`export_session`].
pub const SESSION_DOCUMENT_VERSION: u32 = 1;

/// Portable snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionDocument {
    pub version: u32,
    pub session_id: SessionId,
    pub exported_at_millis: u64,
    /// Completed exchanges, oldest first. A session holds at most one.
    pub exchanges: Vec<ExportedExchange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportedExchange {
    pub request: ProbeRequest,
    pub response: ResponseView,
}

/// Snapshot a session. Deferred parts carry their content when resolved.
pub fn export_session(session: &ProbeSession) -> SessionDocument {
    let view = session.view();
    let exchanges = match (view.request, view.response) {
        (Some(request), Some(response)) => vec![ExportedExchange { request, response }],
        _ => Vec::new(),
    };
    SessionDocument {
        version: SESSION_DOCUMENT_VERSION,
        session_id: view.session_id,
        exported_at_millis: now_unix_millis(),
        exchanges,
    }
}

/// Parse and validate a document, then rebuild its session.
///
/// The restored session is settled: it accepts no further progress.
pub fn import_session(raw: &str) -> Result<ProbeSession, ImportError> {
    let document = parse_document(raw)?;
    let mut exchanges = document.exchanges.into_iter();
    let model = match exchanges.next() {
        Some(exchange) => SessionModel::restored(
            document.session_id,
            exchange.request,
            ProbeResponse::from_view(exchange.response),
        ),
        None => SessionModel::new(document.session_id),
    };
    Ok(ProbeSession::from_model(model))
}

/// Parse a document without rebuilding a session.
pub fn parse_document(raw: &str) -> Result<SessionDocument, ImportError> {
    // Check the version first so newer documents fail with a clear error
    // instead of a shape mismatch.
    let value: serde_json::Value = serde_json::from_str(raw)?;
    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| ImportError::Invalid("missing numeric `version`".into()))?;
    if version != u64::from(SESSION_DOCUMENT_VERSION) {
        return Err(ImportError::UnsupportedVersion(
            u32::try_from(version).unwrap_or(u32::MAX),
        ));
    }

    let document: SessionDocument = serde_json::from_value(value)?;
    if document.session_id.as_str().trim().is_empty() {
        return Err(ImportError::Invalid("empty session id".into()));
    }
    if document.exchanges.len() > 1 {
        return Err(ImportError::Invalid(format!(
            "a session holds one exchange, found {}",
            document.exchanges.len()
        )));
    }
    for exchange in &document.exchanges {
        let mut seen = HashSet::new();
        for entry in &exchange.response.breakdowns {
            if !seen.insert(&entry.reference) {
                return Err(ImportError::Invalid(format!(
                    "duplicate breakdown for `{}` in {}",
                    entry.reference.name, entry.reference.uri
                )));
            }
        }
    }
    Ok(document)
}

/// Write a document as pretty JSON, replacing `path` atomically.
pub fn write_document(path: &Path, document: &SessionDocument) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(document)?;
    // Write to a sibling temporary file first so a partial write never
    // replaces a good export.
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionState;
    use crate::progress::{deferred, PendingPart, ProgressEvent};
    use crate::testsupport::{bar_breakdown, bar_fragment, TestTempDir};
    use serde_json::json;

    fn completed_session() -> ProbeSession {
        let session = ProbeSession::new();
        session
            .lock()
            .issue_request(ProbeRequest::new("explain foo.rs"))
            .expect("issue");
        session.apply_progress(bar_breakdown("Q"));
        session.apply_progress(ProgressEvent::breakdown(bar_fragment().reason("R")));
        session.apply_progress(ProgressEvent::markdown("summary"));
        let (resolver, content) = deferred();
        session.apply_progress(PendingPart::new("tool", content));
        resolver.resolve("tool output");
        let (_pending, content) = deferred();
        session.apply_progress(PendingPart::new("still running", content));
        session.complete();
        session
    }

    #[test]
    fn export_captures_the_exchange() {
        let session = completed_session();
        let document = export_session(&session);
        assert_eq!(document.version, SESSION_DOCUMENT_VERSION);
        assert_eq!(&document.session_id, session.id());
        assert_eq!(document.exchanges.len(), 1);
        let response = &document.exchanges[0].response;
        assert_eq!(response.result.as_deref(), Some("summary"));
        assert_eq!(response.breakdowns[0].query.as_deref(), Some("Q"));
        assert_eq!(response.breakdowns[0].reason.as_deref(), Some("R"));
        assert_eq!(response.parts[0].content.as_deref(), Some("tool output"));
        assert_eq!(response.parts[1].content, None);
    }

    #[test]
    fn import_restores_a_settled_session() {
        let original = completed_session();
        let raw = serde_json::to_string(&export_session(&original)).expect("serialize");
        let restored = import_session(&raw).expect("import");

        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.state(), SessionState::Completed);
        let view = restored.view();
        assert_eq!(view.request, original.view().request);
        let response = view.response.expect("response");
        assert_eq!(response.breakdowns, original.view().response.expect("r").breakdowns);

        restored.apply_progress(ProgressEvent::markdown("late"));
        assert_eq!(
            restored.view().response.expect("response").result.as_deref(),
            Some("summary")
        );
    }

    #[test]
    fn cancelled_session_exports_no_exchange() {
        let session = ProbeSession::new();
        session
            .lock()
            .issue_request(ProbeRequest::new("x"))
            .expect("issue");
        session.cancel();
        let document = export_session(&session);
        assert!(document.exchanges.is_empty());
        let raw = serde_json::to_string(&document).expect("serialize");
        assert_eq!(import_session(&raw).expect("import").state(), SessionState::Created);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let raw = json!({
            "version": 2,
            "session_id": "s",
            "exported_at_millis": 0,
            "exchanges": []
        })
        .to_string();
        assert!(matches!(
            import_session(&raw),
            Err(ImportError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = json!({
            "version": 1,
            "session_id": "s",
            "exported_at_millis": 0,
            "exchanges": [],
            "extra": true
        })
        .to_string();
        assert!(matches!(import_session(&raw), Err(ImportError::Parse(_))));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        assert!(matches!(import_session("[]"), Err(ImportError::Invalid(_))));
        assert!(matches!(import_session("{"), Err(ImportError::Parse(_))));
        let wrong_type = json!({
            "version": 1,
            "session_id": "s",
            "exported_at_millis": 0,
            "exchanges": [{ "request": { "message": 5 }, "response": {} }]
        })
        .to_string();
        assert!(matches!(import_session(&wrong_type), Err(ImportError::Parse(_))));
    }

    #[test]
    fn multiple_exchanges_are_rejected() {
        let exchange = json!({ "request": { "message": "a" }, "response": {} });
        let raw = json!({
            "version": 1,
            "session_id": "s",
            "exported_at_millis": 0,
            "exchanges": [exchange.clone(), exchange]
        })
        .to_string();
        assert!(matches!(import_session(&raw), Err(ImportError::Invalid(_))));
    }

    #[test]
    fn duplicate_breakdown_keys_are_rejected() {
        let entry = |query: &str| {
            json!({
                "reference": { "uri": "file:///foo.rs", "name": "x" },
                "query": query
            })
        };
        let raw = json!({
            "version": 1,
            "session_id": "s",
            "exported_at_millis": 0,
            "exchanges": [{
                "request": { "message": "a" },
                "response": { "breakdowns": [entry("Q1"), entry("Q2")] }
            }]
        })
        .to_string();
        let err = import_session(&raw).expect_err("duplicate keys");
        assert!(matches!(err, ImportError::Invalid(ref msg) if msg.contains("duplicate breakdown")));
    }

    #[test]
    fn same_name_in_other_documents_is_accepted() {
        let raw = json!({
            "version": 1,
            "session_id": "s",
            "exported_at_millis": 0,
            "exchanges": [{
                "request": { "message": "a" },
                "response": { "breakdowns": [
                    { "reference": { "uri": "file:///foo.rs", "name": "x" } },
                    { "reference": { "uri": "file:///bar.rs", "name": "x" } }
                ] }
            }]
        })
        .to_string();
        let session = import_session(&raw).expect("import");
        assert_eq!(session.view().response.expect("response").breakdowns.len(), 2);
    }

    #[test]
    fn write_document_replaces_file() {
        let dir = TestTempDir::new("export");
        let path = dir.child("session.json");
        let document = export_session(&completed_session());
        write_document(&path, &document).expect("write");
        write_document(&path, &document).expect("overwrite");
        let raw = std::fs::read_to_string(&path).expect("read");
        assert_eq!(parse_document(&raw).expect("parse"), document);
        assert!(!dir.child("session.json.tmp").exists());
    }
}
