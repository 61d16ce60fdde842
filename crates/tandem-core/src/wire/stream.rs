//! Stream events carried as JSON-RPC notifications.
//!
//! ```text
//! <- {"jsonrpc":"2.0","result":{"stream_id":"..."},"id":1}              (open ack)
//! <- {"jsonrpc":"2.0","method":"stream.event","params":{"stream_id":"...","seq":0,"payload":...}}
//! <- {"jsonrpc":"2.0","method":"stream.end","params":{"stream_id":"...","kind":"completed"}}
//! ```

use super::{ErrorObject, Notification, Params, RequestId, Response};
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method name of a stream item.
pub const STREAM_EVENT_METHOD: &str = "stream.event";
/// Method name of the terminal marker.
pub const STREAM_END_METHOD: &str = "stream.end";
/// Built-in method the Engine uses to cancel a stream by id.
pub const STREAM_CANCEL_METHOD: &str = "engine.stream.cancel";

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    Completed,
    Cancelled,
    Errored,
}

/// One unit pushed over a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Item {
        stream_id: String,
        seq: u64,
        payload: Value,
    },
    Terminal {
        stream_id: String,
        kind: TerminalKind,
        error: Option<ErrorObject>,
    },
}

#[derive(Deserialize)]
struct ItemParams {
    stream_id: String,
    seq: u64,
    payload: Value,
}

#[derive(Deserialize)]
struct EndParams {
    stream_id: String,
    kind: TerminalKind,
    #[serde(default)]
    error: Option<ErrorObject>,
}

impl StreamEvent {
    pub fn completed(stream_id: impl Into<String>) -> Self {
        StreamEvent::Terminal {
            stream_id: stream_id.into(),
            kind: TerminalKind::Completed,
            error: None,
        }
    }

    pub fn cancelled(stream_id: impl Into<String>) -> Self {
        StreamEvent::Terminal {
            stream_id: stream_id.into(),
            kind: TerminalKind::Cancelled,
            error: None,
        }
    }

    pub fn errored(stream_id: impl Into<String>, error: ErrorObject) -> Self {
        StreamEvent::Terminal {
            stream_id: stream_id.into(),
            kind: TerminalKind::Errored,
            error: Some(error),
        }
    }

    pub fn stream_id(&self) -> &str {
        match self {
            StreamEvent::Item { stream_id, .. } | StreamEvent::Terminal { stream_id, .. } => {
                stream_id
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Terminal { .. })
    }

    /// Terminal kind, or `None` for an item.
    pub fn terminal_kind(&self) -> Option<TerminalKind> {
        match self {
            StreamEvent::Terminal { kind, .. } => Some(*kind),
            StreamEvent::Item { .. } => None,
        }
    }

    pub fn to_notification(&self) -> Notification {
        let (method, params) = match self {
            StreamEvent::Item {
                stream_id,
                seq,
                payload,
            } => (
                STREAM_EVENT_METHOD,
                json!({"stream_id": stream_id, "seq": seq, "payload": payload}),
            ),
            StreamEvent::Terminal {
                stream_id,
                kind,
                error,
            } => {
                let mut params = json!({"stream_id": stream_id, "kind": kind});
                if let (Some(error), Value::Object(map)) = (error, &mut params) {
                    map.insert("error".to_string(), json!(error));
                }
                (STREAM_END_METHOD, params)
            }
        };

        let params = match params {
            Value::Object(map) => Some(Params::Object(map)),
            _ => None,
        };
        Notification::new(method, params)
    }

    pub fn from_notification(notification: &Notification) -> Result<Self, DecodeError> {
        let params = notification.params_value();
        match notification.method.as_str() {
            STREAM_EVENT_METHOD => {
                let item: ItemParams = serde_json::from_value(params)
                    .map_err(|e| DecodeError::invalid("params", e.to_string()))?;
                Ok(StreamEvent::Item {
                    stream_id: item.stream_id,
                    seq: item.seq,
                    payload: item.payload,
                })
            }
            STREAM_END_METHOD => {
                let end: EndParams = serde_json::from_value(params)
                    .map_err(|e| DecodeError::invalid("params", e.to_string()))?;
                Ok(StreamEvent::Terminal {
                    stream_id: end.stream_id,
                    kind: end.kind,
                    error: end.error,
                })
            }
            other => Err(DecodeError::invalid(
                "method",
                format!("`{}` is not a stream event", other),
            )),
        }
    }
}

/// Result of a stream-open acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOpened {
    pub stream_id: String,
}

impl StreamOpened {
    /// Acknowledge the originating request.
    pub fn into_response(self, id: RequestId) -> Response {
        Response::success(id, json!(self))
    }

    /// Read the stream id out of an ack result.
    pub fn from_result(result: Value) -> Result<Self, DecodeError> {
        serde_json::from_value(result)
            .map_err(|e| DecodeError::invalid("result.stream_id", e.to_string()))
    }

    /// Allocate a fresh stream id.
    pub fn generate() -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}
