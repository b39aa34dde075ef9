//! Provider end of the bridge.
//!
//! [`ProviderHost`] serves locally registered providers to a remote host:
//! it answers `invoke`, honours `cancel`, and translates the provider's
//! progress into chunks. A pending part is announced with a
//! `handleProgressChunk` call; once its content settles the completion is
//! sent under the handle the host returned.

use super::peer::{spawn_connection, Connection, Dispatcher, PendingCall, Responder, RpcPeer};
use super::protocol::{ProgressChunk, RpcNotification, RpcReply, RpcRequest};
use crate::cancellation::{CancellationSource, CancellationToken};
use crate::error::{ErrorDetails, RegistryError};
use crate::model::{ProbeRequest, SessionId};
use crate::progress::{DeferredContent, ProgressEvent};
use crate::provider::{ProgressReporter, ProgressSink, Provider, ProviderRegistry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type RunningMap = Arc<Mutex<HashMap<u64, CancellationSource>>>;
type PartTasks = Arc<Mutex<Vec<JoinHandle<()>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Serves local providers over one bridge connection.
pub struct ProviderHost {
    providers: ProviderRegistry,
    running: RunningMap,
    peer: OnceLock<RpcPeer>,
}

impl ProviderHost {
    /// Serve over a byte stream pair. Register providers on the returned host.
    pub fn connect<R, W>(reader: R, writer: W, call_timeout: Duration) -> (Arc<Self>, Connection)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let host = Arc::new(Self {
            providers: ProviderRegistry::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
            peer: OnceLock::new(),
        });
        let connection = spawn_connection(reader, writer, Arc::clone(&host), call_timeout);
        let _ = host.peer.set(connection.peer().clone());
        (host, connection)
    }

    /// Register a provider locally and announce it to the host.
    pub fn register_provider(
        &self,
        provider_id: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Result<(), RegistryError> {
        let provider_id = provider_id.into();
        self.providers.register(provider_id.clone(), provider)?;
        info!(provider = %provider_id, "serving provider");
        self.announce(RpcNotification::RegisterProvider { provider_id });
        Ok(())
    }

    /// Withdraw a provider. Returns whether it was registered.
    pub fn unregister_provider(&self, provider_id: &str) -> bool {
        if !self.providers.unregister(provider_id) {
            return false;
        }
        self.announce(RpcNotification::UnregisterProvider {
            provider_id: provider_id.to_string(),
        });
        true
    }

    /// Number of requests currently being resolved.
    pub fn running_requests(&self) -> usize {
        lock(&self.running).len()
    }

    fn announce(&self, notification: RpcNotification) {
        let Some(peer) = self.peer.get() else {
            return;
        };
        if let Err(err) = peer.notify(notification) {
            warn!(error = %err, "provider announcement not delivered");
        }
    }

    fn invoke(
        &self,
        peer: &RpcPeer,
        provider_id: String,
        session_id: SessionId,
        request_id: u64,
        request: ProbeRequest,
        responder: Responder,
    ) {
        let Some(provider) = self.providers.get(&provider_id) else {
            warn!(provider = %provider_id, request_id, "invoke for unknown provider");
            responder.reply(RpcReply::Invoke {
                error: Some(
                    ErrorDetails::new(format!("no provider registered for `{provider_id}`"))
                        .with_code("no_provider"),
                ),
            });
            return;
        };

        let source = CancellationSource::new();
        let token = source.token();
        lock(&self.running).insert(request_id, source);
        let running = RunningGuard {
            running: Arc::clone(&self.running),
            request_id,
        };
        let parts: PartTasks = Arc::new(Mutex::new(Vec::new()));
        let progress = ProgressSink::new(ForwardingSink {
            peer: peer.clone(),
            request_id,
            token: token.clone(),
            parts: Arc::clone(&parts),
        });

        tokio::spawn(async move {
            debug!(provider = %provider_id, session = %session_id, request_id, "invoke started");
            let result = provider
                .resolve(&session_id, &request, progress, token)
                .await;
            // Settle announced parts before the reply closes the host's
            // invocation and drops their handles.
            join_parts(&parts).await;
            drop(running);
            let error = match result {
                Ok(()) => None,
                Err(err) => {
                    error!(provider = %provider_id, request_id, error = %err, "provider failed");
                    Some(err.to_details())
                }
            };
            responder.reply(RpcReply::Invoke { error });
        });
    }
}

impl Dispatcher for ProviderHost {
    fn handle_request(&self, peer: &RpcPeer, request: RpcRequest, responder: Responder) {
        match request {
            RpcRequest::Invoke {
                provider_id,
                session_id,
                request_id,
                request,
            } => self.invoke(peer, provider_id, session_id, request_id, request, responder),
            RpcRequest::HandleProgressChunk { request_id, .. } => {
                warn!(request_id, "progress chunk sent to provider side ignored");
                responder.fail("provider host does not accept progress");
            }
        }
    }

    fn handle_notification(&self, _peer: &RpcPeer, notification: RpcNotification) {
        match notification {
            RpcNotification::Cancel { request_id } => match lock(&self.running).get(&request_id) {
                Some(source) => {
                    source.cancel();
                    info!(request_id, "request cancelled by host");
                }
                None => debug!(request_id, "cancel for finished request ignored"),
            },
            other => debug!(method = other.method(), "notification ignored by provider host"),
        }
    }

    fn connection_closed(&self, _peer: &RpcPeer) {
        for source in lock(&self.running).values() {
            source.cancel();
        }
    }
}

/// Removes a request's cancellation source when its task ends.
struct RunningGuard {
    running: RunningMap,
    request_id: u64,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.request_id);
    }
}

/// Turns provider progress into bridge chunks for one request.
struct ForwardingSink {
    peer: RpcPeer,
    request_id: u64,
    token: CancellationToken,
    parts: PartTasks,
}

async fn join_parts(parts: &PartTasks) {
    let tasks = std::mem::take(&mut *lock(parts));
    for task in tasks {
        let _ = task.await;
    }
}

impl ProgressReporter for ForwardingSink {
    fn report(&self, event: ProgressEvent) {
        if self.token.is_cancelled() {
            debug!(request_id = self.request_id, kind = event.kind(), "progress after cancel dropped");
            return;
        }
        match event {
            ProgressEvent::Payload(payload) => {
                let chunk = RpcNotification::ProgressChunk {
                    request_id: self.request_id,
                    chunk: ProgressChunk::Payload(payload),
                    handle: None,
                };
                if let Err(err) = self.peer.notify(chunk) {
                    debug!(request_id = self.request_id, error = %err, "progress not delivered");
                }
            }
            ProgressEvent::Pending(part) => {
                // Started synchronously so the announcement keeps its place
                // among the other chunks.
                let call = self.peer.start_call(RpcRequest::HandleProgressChunk {
                    request_id: self.request_id,
                    chunk: ProgressChunk::AsyncContent { title: part.title },
                });
                let call = match call {
                    Ok(call) => call,
                    Err(err) => {
                        debug!(request_id = self.request_id, error = %err, "async content not announced");
                        return;
                    }
                };
                let task = tokio::spawn(forward_part(
                    self.peer.clone(),
                    self.request_id,
                    call,
                    part.content,
                    self.token.clone(),
                ));
                lock(&self.parts).push(task);
            }
        }
    }
}

async fn forward_part(
    peer: RpcPeer,
    request_id: u64,
    call: PendingCall,
    content: DeferredContent,
    token: CancellationToken,
) {
    let handle = match tokio::time::timeout(peer.call_timeout(), call.reply()).await {
        Ok(Ok(RpcReply::Handle { handle })) => handle,
        Ok(Ok(other)) => {
            warn!(request_id, reply = ?other, "unexpected reply to async content");
            return;
        }
        Ok(Err(err)) => {
            debug!(request_id, error = %err, "host declined async content");
            return;
        }
        Err(_) => {
            warn!(request_id, "timed out waiting for an async content handle");
            return;
        }
    };
    let content = tokio::select! {
        content = content.resolved() => content,
        _ = token.cancelled() => return,
    };
    let completion = RpcNotification::ProgressChunk {
        request_id,
        chunk: ProgressChunk::AsyncContentResolved { content },
        handle: Some(handle),
    };
    if let Err(err) = peer.notify(completion) {
        debug!(request_id, handle, error = %err, "async content completion not delivered");
    }
}
