//! Cross-process provider bridge.
//!
//! A provider can live in another process and still look like a local
//! [`Provider`](crate::provider::Provider) to the coordinator. The two ends
//! exchange newline-delimited JSON frames over any byte stream pair:
//!
//! - [`HostBridge`] runs next to the coordinator and registers a
//!   [`RemoteProvider`] for every provider the other side announces.
//! - [`ProviderHost`] runs next to the real providers and serves `invoke`.
//!
//! Asynchronously produced content parts cannot cross the boundary as
//! objects, so they are correlated by numeric handles scoped to one request.

pub mod host;
pub mod peer;
pub mod protocol;
pub mod remote;

pub use host::{HostBridge, RemoteProvider};
pub use peer::{spawn_connection, Connection, Dispatcher, PendingCall, Responder, RpcPeer};
pub use protocol::{Frame, ProgressChunk, RpcNotification, RpcReply, RpcRequest, RpcResult};
pub use remote::ProviderHost;
