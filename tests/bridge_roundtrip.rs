//! End-to-end tests: coordinator ↔ host bridge ↔ provider host over an
//! in-memory duplex stream.

use probe::bridge::{Connection, HostBridge, ProviderHost};
use probe::model::PartState;
use probe::provider::{ProviderRegistry, ScriptedProvider};
use probe::service::{ProbeService, RequestOutcome};
use std::sync::Arc;
use std::time::Duration;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    registry: Arc<ProviderRegistry>,
    bridge: Arc<HostBridge>,
    _host_connection: Connection,
    provider_host: Arc<ProviderHost>,
    provider_connection: Connection,
}

fn connect() -> Harness {
    let (host_io, provider_io) = tokio::io::duplex(64 * 1024);
    let (host_read, host_write) = tokio::io::split(host_io);
    let (provider_read, provider_write) = tokio::io::split(provider_io);

    let registry = Arc::new(ProviderRegistry::new());
    let (bridge, host_connection) =
        HostBridge::connect(Arc::clone(&registry), host_read, host_write, CALL_TIMEOUT);
    let (provider_host, provider_connection) =
        ProviderHost::connect(provider_read, provider_write, CALL_TIMEOUT);
    Harness {
        registry,
        bridge,
        _host_connection: host_connection,
        provider_host,
        provider_connection,
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn script(raw: &str) -> Arc<ScriptedProvider> {
    Arc::new(ScriptedProvider::from_json(raw).expect("script"))
}

async fn serve(harness: &Harness, provider_id: &str, raw: &str) {
    harness
        .provider_host
        .register_provider(provider_id, script(raw))
        .expect("register");
    let registry = Arc::clone(&harness.registry);
    let id = provider_id.to_string();
    wait_until("remote registration", move || registry.contains(&id)).await;
}

async fn settle(pending: probe::service::PendingRequest) -> RequestOutcome {
    tokio::time::timeout(WAIT, pending.completed())
        .await
        .expect("request settles")
}

#[tokio::test]
async fn remote_provider_streams_into_the_session() {
    let harness = connect();
    serve(
        &harness,
        "remote",
        r#"{ "steps": [
            { "progress": { "kind": "breakdown", "reference": { "uri": "file:///foo.rs", "name": "bar" }, "query": "Q" } },
            { "pending": { "title": "tool call", "content": "output", "after_ms": 20 } },
            { "progress": { "kind": "breakdown", "reference": { "uri": "file:///foo.rs", "name": "bar" }, "reason": "R" } },
            { "progress": { "kind": "markdownContent", "content": "done" } }
        ] }"#,
    )
    .await;
    assert_eq!(harness.bridge.remote_provider_ids(), vec!["remote".to_string()]);

    let service = ProbeService::new(Arc::clone(&harness.registry), "remote");
    let session = service.start_session();
    let pending = service.initiate(&session, "explain foo.rs").expect("initiate");
    let outcome = settle(pending).await;
    assert_eq!(outcome, RequestOutcome::Completed { error: None });

    let response = session.view().response.expect("response");
    assert_eq!(response.result.as_deref(), Some("done"));
    assert_eq!(response.breakdowns.len(), 1);
    assert_eq!(response.breakdowns[0].query.as_deref(), Some("Q"));
    assert_eq!(response.breakdowns[0].reason.as_deref(), Some("R"));
    assert_eq!(response.parts.len(), 1);
    assert_eq!(response.parts[0].title, "tool call");
    assert_eq!(response.parts[0].state, PartState::Resolved);
    assert_eq!(response.parts[0].content.as_deref(), Some("output"));

    assert_eq!(harness.bridge.open_invocations(), 0);
    assert_eq!(harness.provider_host.running_requests(), 0);
}

#[tokio::test]
async fn remote_failure_is_reported_not_raised() {
    let harness = connect();
    serve(
        &harness,
        "remote",
        r#"{ "steps": [
            { "progress": { "kind": "markdownContent", "content": "partial" } },
            { "fail": "boom" }
        ] }"#,
    )
    .await;

    let service = ProbeService::new(Arc::clone(&harness.registry), "remote");
    let session = service.start_session();
    let outcome = settle(service.initiate(&session, "x").expect("initiate")).await;
    let error = outcome.error().expect("error details");
    assert_eq!(error.message, "boom");
    assert_eq!(
        session.view().response.expect("response").result.as_deref(),
        Some("partial")
    );
}

#[tokio::test]
async fn cancelling_reaches_the_provider_process() {
    let harness = connect();
    serve(
        &harness,
        "remote",
        r#"{ "steps": [
            { "progress": { "kind": "markdownContent", "content": "started" } },
            { "delay_ms": 60000, "progress": { "kind": "markdownContent", "content": "never" } }
        ] }"#,
    )
    .await;

    let service = ProbeService::new(Arc::clone(&harness.registry), "remote");
    let session = service.start_session();
    let pending = service.initiate(&session, "x").expect("initiate");
    let provider_host = Arc::clone(&harness.provider_host);
    wait_until("provider start", move || provider_host.running_requests() == 1).await;

    assert!(service.cancel_current_request(session.id()));
    assert_eq!(settle(pending).await, RequestOutcome::Cancelled);
    assert!(session.view().response.is_none());

    let provider_host = Arc::clone(&harness.provider_host);
    wait_until("provider cancel", move || provider_host.running_requests() == 0).await;
    assert_eq!(harness.bridge.open_invocations(), 0);
}

#[tokio::test]
async fn unresolved_parts_are_dropped_on_cancel() {
    let harness = connect();
    serve(
        &harness,
        "remote",
        r#"{ "steps": [
            { "pending": { "title": "slow tool", "content": "late", "after_ms": 60000 } },
            { "delay_ms": 60000, "progress": { "kind": "markdownContent", "content": "never" } }
        ] }"#,
    )
    .await;

    let service = ProbeService::new(Arc::clone(&harness.registry), "remote");
    let session = service.start_session();
    let pending = service.initiate(&session, "x").expect("initiate");
    let watched = session.clone();
    wait_until("part announced", move || {
        watched
            .view()
            .response
            .is_some_and(|response| response.parts.len() == 1)
    })
    .await;

    assert!(service.cancel_current_request(session.id()));
    assert_eq!(settle(pending).await, RequestOutcome::Cancelled);
    assert_eq!(harness.bridge.open_invocations(), 0);
}

#[tokio::test]
async fn unregister_withdraws_the_remote_provider() {
    let harness = connect();
    serve(&harness, "remote", r#"{ "steps": [] }"#).await;

    assert!(harness.provider_host.unregister_provider("remote"));
    assert!(!harness.provider_host.unregister_provider("remote"));
    let registry = Arc::clone(&harness.registry);
    wait_until("remote unregistration", move || !registry.contains("remote")).await;
    assert!(harness.bridge.remote_provider_ids().is_empty());
}

#[tokio::test]
async fn closing_the_connection_unregisters_remote_providers() {
    let harness = connect();
    serve(&harness, "first", r#"{ "steps": [] }"#).await;
    serve(&harness, "second", r#"{ "steps": [] }"#).await;

    harness.provider_connection.peer().close();
    let registry = Arc::clone(&harness.registry);
    wait_until("remote cleanup", move || registry.is_empty()).await;
    assert!(harness.bridge.remote_provider_ids().is_empty());

    let service = ProbeService::new(Arc::clone(&harness.registry), "first");
    let session = service.start_session();
    assert!(service.initiate(&session, "x").is_err());
}
