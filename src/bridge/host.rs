//! Host end of the bridge.
//!
//! Providers announced by the remote process are registered locally as
//! [`RemoteProvider`]s. While one of them resolves a request, the host keeps
//! an invocation entry holding the request's progress sink and the deferred
//! parts promised so far, keyed by the numeric handles it handed out.

use super::peer::{spawn_connection, Connection, Dispatcher, Responder, RpcPeer};
use super::protocol::{ProgressChunk, RpcNotification, RpcReply, RpcRequest};
use crate::cancellation::CancellationToken;
use crate::error::{BridgeError, ProviderError};
use crate::model::{ProbeRequest, SessionId};
use crate::progress::{deferred, DeferredResolver, PendingPart};
use crate::provider::{ProgressSink, Provider, ProviderRegistry};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Invocation table
// ---------------------------------------------------------------------------

/// Live state of one remote invocation.
struct Invocation {
    sink: ProgressSink,
    token: CancellationToken,
    next_handle: u64,
    parts: HashMap<u64, DeferredResolver>,
}

/// Invocations keyed by request id.
///
/// Handles are scoped to their request id and never reused while the
/// invocation lives; closing an invocation drops every unresolved part.
struct InvocationTable {
    next_request_id: AtomicU64,
    entries: Mutex<HashMap<u64, Invocation>>,
}

impl InvocationTable {
    fn new() -> Self {
        Self {
            next_request_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, Invocation>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn open(&self, sink: ProgressSink, token: CancellationToken) -> u64 {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(
            request_id,
            Invocation {
                sink,
                token,
                next_handle: 1,
                parts: HashMap::new(),
            },
        );
        request_id
    }

    /// Forget an invocation. Returns how many parts were still unresolved.
    fn close(&self, request_id: u64) -> usize {
        let Some(invocation) = self.entries().remove(&request_id) else {
            return 0;
        };
        let unresolved = invocation.parts.len();
        if unresolved > 0 {
            debug!(request_id, unresolved, "dropping unresolved parts");
        }
        unresolved
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn handle_progress_chunk(
        &self,
        request_id: u64,
        chunk: ProgressChunk,
        handle: Option<u64>,
    ) -> Option<u64> {
        let mut entries = self.entries();
        let Some(invocation) = entries.get_mut(&request_id) else {
            debug!(request_id, kind = chunk.kind(), "chunk for unknown request ignored");
            return None;
        };
        if invocation.token.is_cancelled() {
            debug!(request_id, kind = chunk.kind(), "chunk after cancellation ignored");
            return None;
        }

        match (chunk, handle) {
            (ProgressChunk::Payload(payload), None) => {
                let sink = invocation.sink.clone();
                drop(entries);
                sink.report(payload);
                None
            }
            (ProgressChunk::AsyncContent { title }, None) => {
                let handle = invocation.next_handle;
                invocation.next_handle += 1;
                let (resolver, content) = deferred();
                invocation.parts.insert(handle, resolver);
                let sink = invocation.sink.clone();
                drop(entries);
                debug!(request_id, handle, "async content handle allocated");
                sink.report(PendingPart::new(title, content));
                Some(handle)
            }
            (ProgressChunk::AsyncContentResolved { content }, Some(handle)) => {
                match invocation.parts.remove(&handle) {
                    Some(resolver) => match content {
                        Some(content) => resolver.resolve(content),
                        None => drop(resolver),
                    },
                    None => debug!(request_id, handle, "completion for unknown handle ignored"),
                }
                None
            }
            (chunk, handle) => {
                warn!(
                    request_id,
                    kind = chunk.kind(),
                    ?handle,
                    "malformed progress chunk ignored"
                );
                None
            }
        }
    }
}

/// Closes an invocation however `resolve` exits.
struct InvocationGuard<'a> {
    table: &'a InvocationTable,
    request_id: u64,
}

impl Drop for InvocationGuard<'_> {
    fn drop(&mut self) {
        self.table.close(self.request_id);
    }
}

// ---------------------------------------------------------------------------
// Remote provider
// ---------------------------------------------------------------------------

/// Local stand-in for a provider living on the other side of the bridge.
pub struct RemoteProvider {
    provider_id: String,
    peer: RpcPeer,
    invocations: Arc<InvocationTable>,
}

impl RemoteProvider {
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

#[async_trait]
impl Provider for RemoteProvider {
    async fn resolve(
        &self,
        session_id: &SessionId,
        request: &ProbeRequest,
        progress: ProgressSink,
        token: CancellationToken,
    ) -> Result<(), ProviderError> {
        let request_id = self.invocations.open(progress, token.clone());
        let _guard = InvocationGuard {
            table: &self.invocations,
            request_id,
        };
        let call = self.peer.start_call(RpcRequest::Invoke {
            provider_id: self.provider_id.clone(),
            session_id: session_id.clone(),
            request_id,
            request: request.clone(),
        })?;

        tokio::select! {
            reply = call.reply() => match reply? {
                RpcReply::Invoke { error: None } => Ok(()),
                RpcReply::Invoke { error: Some(details) } => Err(ProviderError::Remote(details)),
                other => Err(BridgeError::UnexpectedReply(format!("{other:?}")).into()),
            },
            _ = token.cancelled() => {
                debug!(request_id, provider = %self.provider_id, "forwarding cancellation");
                if let Err(err) = self.peer.notify(RpcNotification::Cancel { request_id }) {
                    debug!(request_id, error = %err, "cancel not delivered");
                }
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Host bridge
// ---------------------------------------------------------------------------

/// Dispatcher for the host side of one bridge connection.
pub struct HostBridge {
    registry: Arc<ProviderRegistry>,
    invocations: Arc<InvocationTable>,
    remote_ids: Mutex<BTreeSet<String>>,
}

impl HostBridge {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            invocations: Arc::new(InvocationTable::new()),
            remote_ids: Mutex::new(BTreeSet::new()),
        }
    }

    /// Serve the host side over a byte stream pair.
    pub fn connect<R, W>(
        registry: Arc<ProviderRegistry>,
        reader: R,
        writer: W,
        call_timeout: Duration,
    ) -> (Arc<Self>, Connection)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let bridge = Arc::new(Self::new(registry));
        let connection = spawn_connection(reader, writer, Arc::clone(&bridge), call_timeout);
        (bridge, connection)
    }

    /// Route one progress chunk to its invocation.
    ///
    /// Returns the allocated handle for an `asyncContent` announcement.
    /// Chunks for unknown requests, unknown handles and mismatched
    /// chunk/handle combinations are ignored.
    pub fn handle_progress_chunk(
        &self,
        request_id: u64,
        chunk: ProgressChunk,
        handle: Option<u64>,
    ) -> Option<u64> {
        self.invocations
            .handle_progress_chunk(request_id, chunk, handle)
    }

    /// Ids of providers registered through this connection.
    pub fn remote_provider_ids(&self) -> Vec<String> {
        self.remote_ids().iter().cloned().collect()
    }

    /// Number of invocations currently in flight.
    pub fn open_invocations(&self) -> usize {
        self.invocations.len()
    }

    fn remote_ids(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.remote_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Dispatcher for HostBridge {
    fn handle_request(&self, _peer: &RpcPeer, request: RpcRequest, responder: Responder) {
        match request {
            RpcRequest::HandleProgressChunk { request_id, chunk } => {
                match self.handle_progress_chunk(request_id, chunk, None) {
                    Some(handle) => responder.reply(RpcReply::Handle { handle }),
                    None => responder.fail(format!("no handle allocated for request {request_id}")),
                }
            }
            RpcRequest::Invoke { provider_id, .. } => {
                warn!(provider = %provider_id, "invoke sent to host ignored");
                responder.fail("host does not serve invoke");
            }
        }
    }

    fn handle_notification(&self, peer: &RpcPeer, notification: RpcNotification) {
        match notification {
            RpcNotification::RegisterProvider { provider_id } => {
                let provider = Arc::new(RemoteProvider {
                    provider_id: provider_id.clone(),
                    peer: peer.clone(),
                    invocations: Arc::clone(&self.invocations),
                });
                match self.registry.register(provider_id.clone(), provider) {
                    Ok(()) => {
                        info!(provider = %provider_id, "remote provider registered");
                        self.remote_ids().insert(provider_id);
                    }
                    Err(err) => warn!(error = %err, "remote provider registration rejected"),
                }
            }
            RpcNotification::UnregisterProvider { provider_id } => {
                if self.remote_ids().remove(&provider_id) {
                    self.registry.unregister(&provider_id);
                    info!(provider = %provider_id, "remote provider unregistered");
                } else {
                    debug!(provider = %provider_id, "unregister for unknown remote provider ignored");
                }
            }
            RpcNotification::ProgressChunk {
                request_id,
                chunk,
                handle,
            } => {
                self.handle_progress_chunk(request_id, chunk, handle);
            }
            RpcNotification::Cancel { request_id } => {
                debug!(request_id, "cancel sent to host ignored");
            }
        }
    }

    fn connection_closed(&self, _peer: &RpcPeer) {
        let ids = std::mem::take(&mut *self.remote_ids());
        for provider_id in ids {
            self.registry.unregister(&provider_id);
            info!(provider = %provider_id, "remote provider gone with its connection");
        }
    }
}
