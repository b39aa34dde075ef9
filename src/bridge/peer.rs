//! JSON-lines RPC connection shared by both ends of the bridge.
//!
//! One reader task decodes frames and dispatches them in arrival order; one
//! writer task drains an unbounded queue. Outgoing calls are matched to
//! replies through a pending map keyed by a connection-local id.

use super::protocol::{
    decode_frame, encode_frame, Frame, RpcNotification, RpcReply, RpcRequest, RpcResult,
};
use crate::cancellation::{CancellationSource, CancellationToken};
use crate::error::BridgeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receives inbound requests and notifications.
///
/// Handlers run on the reader task, so they must not block; long work is
/// spawned and answered later through the [`Responder`].
pub trait Dispatcher: Send + Sync + 'static {
    fn handle_request(&self, peer: &RpcPeer, request: RpcRequest, responder: Responder);

    fn handle_notification(&self, peer: &RpcPeer, notification: RpcNotification);

    /// Called once after the inbound stream ends.
    fn connection_closed(&self, _peer: &RpcPeer) {}
}

// ---------------------------------------------------------------------------
// Peer
// ---------------------------------------------------------------------------

/// Sending half of a connection. Clones share the connection.
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    outgoing: mpsc::UnboundedSender<Frame>,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcResult>>>,
    next_id: AtomicU64,
    call_timeout: Duration,
    closed: CancellationSource,
}

impl PeerInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResult>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RpcPeer {
    fn new(outgoing: mpsc::UnboundedSender<Frame>, call_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                outgoing,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                call_timeout,
                closed: CancellationSource::new(),
            }),
        }
    }

    pub fn notify(&self, notification: RpcNotification) -> Result<(), BridgeError> {
        debug!(method = notification.method(), "bridge notify");
        self.send(Frame::Notification { body: notification })
    }

    /// Enqueue a request now and return a handle for its reply.
    ///
    /// The frame is queued before this returns, so frames sent afterwards are
    /// written after it.
    pub fn start_call(&self, request: RpcRequest) -> Result<PendingCall, BridgeError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending().insert(id, tx);
        let call = PendingCall {
            id,
            rx,
            inner: Arc::clone(&self.inner),
        };
        debug!(id, method = request.method(), "bridge call");
        self.send(Frame::Request { id, body: request })?;
        Ok(call)
    }

    /// Call and wait for the reply, bounded by the connection's call timeout.
    pub async fn call(&self, request: RpcRequest) -> Result<RpcReply, BridgeError> {
        let call = self.start_call(request)?;
        match tokio::time::timeout(self.inner.call_timeout, call.reply()).await {
            Ok(reply) => reply,
            Err(_) => Err(BridgeError::Timeout),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.inner.call_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub async fn closed(&self) {
        self.closed_token().cancelled().await
    }

    pub fn closed_token(&self) -> CancellationToken {
        self.inner.closed.token()
    }

    /// Close the connection. Outstanding calls fail with `Closed`.
    pub fn close(&self) {
        if self.inner.closed.cancel() {
            let dropped = std::mem::take(&mut *self.inner.pending());
            debug!(outstanding = dropped.len(), "bridge connection closed");
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending().len()
    }

    fn send(&self, frame: Frame) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        self.inner
            .outgoing
            .send(frame)
            .map_err(|_| BridgeError::Closed)
    }

    fn complete(&self, id: u64, result: RpcResult) {
        match self.inner.pending().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(id, "reply for unknown or abandoned call"),
        }
    }
}

/// An outstanding call. Dropping it abandons the reply.
pub struct PendingCall {
    id: u64,
    rx: oneshot::Receiver<RpcResult>,
    inner: Arc<PeerInner>,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply without a deadline.
    pub async fn reply(mut self) -> Result<RpcReply, BridgeError> {
        match (&mut self.rx).await {
            Ok(RpcResult::Ok(reply)) => Ok(reply),
            Ok(RpcResult::Err(message)) => Err(BridgeError::Remote(message)),
            Err(_) => Err(BridgeError::Closed),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.inner.pending().remove(&self.id);
    }
}

/// Reply slot for one inbound request.
///
/// Dropping it unanswered sends an error so the caller never hangs.
pub struct Responder {
    id: u64,
    peer: RpcPeer,
    answered: bool,
}

impl Responder {
    fn new(peer: RpcPeer, id: u64) -> Self {
        Self {
            id,
            peer,
            answered: false,
        }
    }

    pub fn reply(mut self, reply: RpcReply) {
        self.send(RpcResult::Ok(reply));
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.send(RpcResult::Err(message.into()));
    }

    fn send(&mut self, body: RpcResult) {
        self.answered = true;
        if let Err(err) = self.peer.send(Frame::Response { id: self.id, body }) {
            debug!(id = self.id, error = %err, "reply not sent");
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if !self.answered {
            self.send(RpcResult::Err("request dropped without a reply".into()));
        }
    }
}

// ---------------------------------------------------------------------------
// Connection tasks
// ---------------------------------------------------------------------------

/// A running connection: the peer plus its reader and writer tasks.
pub struct Connection {
    peer: RpcPeer,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Connection {
    pub fn peer(&self) -> &RpcPeer {
        &self.peer
    }

    /// Wait until the inbound stream ends and queued frames are flushed.
    pub async fn join(self) {
        if let Err(err) = self.reader.await {
            warn!(error = %err, "bridge reader task failed");
        }
        if let Err(err) = self.writer.await {
            warn!(error = %err, "bridge writer task failed");
        }
    }
}

/// Start reader and writer tasks over a byte stream pair.
pub fn spawn_connection<R, W, D>(
    reader: R,
    writer: W,
    dispatcher: Arc<D>,
    call_timeout: Duration,
) -> Connection
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    D: Dispatcher + ?Sized,
{
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    let peer = RpcPeer::new(outgoing_tx, call_timeout);
    let writer = tokio::spawn(write_frames(writer, outgoing_rx, peer.clone()));
    let reader = tokio::spawn(read_frames(reader, peer.clone(), dispatcher));
    Connection {
        peer,
        reader,
        writer,
    }
}

async fn write_frames<W>(mut writer: W, mut outgoing: mpsc::UnboundedReceiver<Frame>, peer: RpcPeer)
where
    W: AsyncWrite + Unpin,
{
    let closed = peer.closed_token();
    loop {
        // Queued frames are flushed before a close takes effect.
        let frame = tokio::select! {
            biased;
            frame = outgoing.recv() => frame,
            _ = closed.cancelled() => None,
        };
        let Some(frame) = frame else {
            break;
        };
        let line = match encode_frame(&frame) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "dropping unencodable frame");
                continue;
            }
        };
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!(error = %err, "bridge write failed");
            break;
        }
        if let Err(err) = writer.flush().await {
            warn!(error = %err, "bridge flush failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
    peer.close();
}

async fn read_frames<R, D>(reader: R, peer: RpcPeer, dispatcher: Arc<D>)
where
    R: AsyncRead + Unpin,
    D: Dispatcher + ?Sized,
{
    let mut lines = BufReader::new(reader).lines();
    let closed = peer.closed_token();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = closed.cancelled() => break,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match decode_frame(&line) {
                    Ok(frame) => dispatch(&peer, dispatcher.as_ref(), frame),
                    Err(err) => warn!(error = %err, "dropping malformed frame"),
                }
            }
            Ok(None) => {
                debug!("bridge peer closed its stream");
                break;
            }
            Err(err) => {
                warn!(error = %err, "bridge read failed");
                break;
            }
        }
    }
    peer.close();
    dispatcher.connection_closed(&peer);
}

fn dispatch<D>(peer: &RpcPeer, dispatcher: &D, frame: Frame)
where
    D: Dispatcher + ?Sized,
{
    match frame {
        Frame::Response { id, body } => peer.complete(id, body),
        Frame::Request { id, body } => {
            debug!(id, method = body.method(), "bridge request received");
            dispatcher.handle_request(peer, body, Responder::new(peer.clone(), id));
        }
        Frame::Notification { body } => {
            debug!(method = body.method(), "bridge notification received");
            dispatcher.handle_notification(peer, body);
        }
    }
}
