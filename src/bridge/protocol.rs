//! Wire types for the provider bridge.
//!
//! Every frame is one line of JSON. Requests carry a connection-scoped id that
//! the matching response echoes; notifications are fire-and-forget.

use crate::error::{BridgeError, ErrorDetails};
use crate::model::{ProbeRequest, SessionId};
use crate::progress::ProgressPayload;
use serde::{Deserialize, Serialize};

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request { id: u64, body: RpcRequest },
    Response { id: u64, body: RpcResult },
    Notification { body: RpcNotification },
}

/// Calls that expect a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum RpcRequest {
    /// Host → provider: resolve one request.
    Invoke {
        provider_id: String,
        session_id: SessionId,
        request_id: u64,
        request: ProbeRequest,
    },
    /// Provider → host: announce an async content part and get its handle.
    HandleProgressChunk { request_id: u64, chunk: ProgressChunk },
}

impl RpcRequest {
    pub fn method(&self) -> &'static str {
        match self {
            Self::Invoke { .. } => "invoke",
            Self::HandleProgressChunk { .. } => "handleProgressChunk",
        }
    }
}

/// Successful replies, tagged by the call they answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RpcReply {
    /// Terminal result of an `invoke`.
    Invoke {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorDetails>,
    },
    /// Handle allocated for an async content part.
    Handle { handle: u64 },
}

/// Body of a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcResult {
    Ok(RpcReply),
    Err(String),
}

/// Fire-and-forget messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
pub enum RpcNotification {
    RegisterProvider { provider_id: String },
    UnregisterProvider { provider_id: String },
    /// Host → provider: stop working on a request.
    Cancel { request_id: u64 },
    /// Provider → host: synchronous payloads and async part completions.
    ProgressChunk {
        request_id: u64,
        chunk: ProgressChunk,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        handle: Option<u64>,
    },
}

impl RpcNotification {
    pub fn method(&self) -> &'static str {
        match self {
            Self::RegisterProvider { .. } => "registerProvider",
            Self::UnregisterProvider { .. } => "unregisterProvider",
            Self::Cancel { .. } => "cancel",
            Self::ProgressChunk { .. } => "progressChunk",
        }
    }
}

/// Progress as it crosses the process boundary.
///
/// Pending parts cannot be serialized directly, so they travel as an
/// `asyncContent` announcement followed later by `asyncContentResolved` for
/// the same handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ProgressChunk {
    Payload(ProgressPayload),
    AsyncContent {
        title: String,
    },
    /// `content` is `None` when the provider dropped the part unresolved.
    AsyncContentResolved {
        content: Option<String>,
    },
}

impl ProgressChunk {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Payload(payload) => payload.kind(),
            Self::AsyncContent { .. } => "asyncContent",
            Self::AsyncContentResolved { .. } => "asyncContentResolved",
        }
    }
}

/// Serialize a frame as one newline-terminated line.
pub fn encode_frame(frame: &Frame) -> Result<String, BridgeError> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_frame(line: &str) -> Result<Frame, BridgeError> {
    Ok(serde_json::from_str(line.trim_end())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_request_wire_shape() {
        let frame = Frame::Request {
            id: 7,
            body: RpcRequest::Invoke {
                provider_id: "probe".into(),
                session_id: SessionId::from("s-1"),
                request_id: 3,
                request: ProbeRequest::new("explain foo.rs"),
            },
        };
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value["type"], json!("request"));
        assert_eq!(value["id"], json!(7));
        assert_eq!(value["body"]["method"], json!("invoke"));
        assert_eq!(value["body"]["params"]["session_id"], json!("s-1"));
        assert_eq!(value["body"]["params"]["request_id"], json!(3));
    }

    #[test]
    fn progress_chunk_notification_omits_missing_handle() {
        let frame = Frame::Notification {
            body: RpcNotification::ProgressChunk {
                request_id: 1,
                chunk: ProgressChunk::Payload(ProgressPayload::DiscardAll),
                handle: None,
            },
        };
        let value = serde_json::to_value(&frame).expect("serialize");
        let params = &value["body"]["params"];
        assert!(params.get("handle").is_none());
        assert_eq!(params["chunk"]["type"], json!("payload"));
        assert_eq!(params["chunk"]["payload"]["kind"], json!("discardAll"));
    }

    #[test]
    fn encoded_frames_are_single_lines() {
        let frame = Frame::Response {
            id: 2,
            body: RpcResult::Ok(RpcReply::Handle { handle: 4 }),
        };
        let line = encode_frame(&frame).expect("encode");
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_frame(&line).expect("decode"), frame);
    }

    #[test]
    fn error_results_decode() {
        let frame = decode_frame(r#"{"type":"response","id":5,"body":{"err":"no such provider"}}"#)
            .expect("decode");
        assert_eq!(
            frame,
            Frame::Response {
                id: 5,
                body: RpcResult::Err("no such provider".into()),
            }
        );
    }

    #[test]
    fn garbage_is_a_codec_error() {
        assert!(matches!(decode_frame("not json"), Err(BridgeError::Codec(_))));
    }
}
