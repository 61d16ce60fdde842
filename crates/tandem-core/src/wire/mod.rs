//! JSON-RPC 2.0 wire model.
//!
//! Pure data: no I/O and no business logic. Serialization goes through serde;
//! decoding goes through [`decode`], which validates the envelope field by
//! field instead of trusting a derived `Deserialize`.

mod codes;
mod decode;
mod stream;

pub use codes::{ApplicationCode, ErrorCode, APPLICATION_CODE_RANGE};
pub use decode::{decode, decode_value};
pub use stream::{
    StreamEvent, StreamOpened, TerminalKind, STREAM_CANCEL_METHOD, STREAM_END_METHOD,
    STREAM_EVENT_METHOD,
};

use crate::error::DecodeError;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// The only protocol version spoken on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// Serialize any wire message to bytes.
pub fn encode<M: Serialize>(message: &M) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(message)
}

/// Marker for the fixed `"jsonrpc": "2.0"` member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

/// Correlation token chosen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Method parameters: by name or by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

impl Params {
    /// Convert an arbitrary JSON value; `null` means "no params".
    pub fn from_value(value: Value) -> Result<Option<Self>, DecodeError> {
        match value {
            Value::Null => Ok(None),
            Value::Object(map) => Ok(Some(Params::Object(map))),
            Value::Array(items) => Ok(Some(Params::Array(items))),
            _ => Err(DecodeError::invalid(
                "params",
                "must be an object or an array",
            )),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Params::Object(map) => Value::Object(map),
            Params::Array(items) => Value::Array(items),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Params::Object(map) => map.get(key),
            Params::Array(_) => None,
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Object(map)
    }
}

/// JSON-RPC 2.0 request that expects a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
    pub id: RequestId,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
            id,
        }
    }

    /// Params as a JSON value, defaulting to an empty object.
    pub fn params_value(&self) -> Value {
        params_or_empty(self.params.clone())
    }
}

/// JSON-RPC 2.0 request without an id; never answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub jsonrpc: JsonRpcVersion,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Params>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            method: method.into(),
            params,
        }
    }

    pub fn params_value(&self) -> Value {
        params_or_empty(self.params.clone())
    }
}

fn params_or_empty(params: Option<Params>) -> Value {
    params
        .map(Params::into_value)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Error carrying the code's standard message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Either a result or an error; never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

/// JSON-RPC 2.0 response.
///
/// `id` is `None` only for errors raised before the request id could be read.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: Option<RequestId>,
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Error(error) => Some(error),
            Outcome::Result(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(error) => Err(error),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Response", 3)?;
        state.serialize_field("jsonrpc", JSONRPC_VERSION)?;
        match &self.outcome {
            Outcome::Result(result) => state.serialize_field("result", result)?,
            Outcome::Error(error) => state.serialize_field("error", error)?,
        }
        state.serialize_field("id", &self.id)?;
        state.end()
    }
}

/// Any decoded wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Message::Request(request)
    }
}

impl From<Notification> for Message {
    fn from(notification: Notification) -> Self {
        Message::Notification(notification)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Message::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let params = Params::from_value(json!({"a": 1})).unwrap();
        let request = Request::new(RequestId::from("abc"), "echo", params);
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "method": "echo", "params": {"a": 1}, "id": "abc"})
        );
    }

    #[test]
    fn test_notification_omits_id_and_empty_params() {
        let notification = Notification::new("ping", None);
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "ping"}));
    }

    #[test]
    fn test_success_response_has_no_error() {
        let response = Response::success(RequestId::from(1), json!({"value": 42}));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value, json!({"jsonrpc": "2.0", "result": {"value": 42}, "id": 1}));
    }

    #[test]
    fn test_null_result_is_kept() {
        let response = Response::success(RequestId::from(7), Value::Null);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "result": null, "id": 7}));
    }

    #[test]
    fn test_error_response_without_id() {
        let response = Response::error(None, ErrorObject::from_code(ErrorCode::ParseError));
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32700, "message": "Parse error"},
                "id": null
            })
        );
    }

    #[test]
    fn test_params_from_value_rejects_scalars() {
        assert_eq!(Params::from_value(Value::Null).unwrap(), None);
        assert!(matches!(
            Params::from_value(json!([1, 2])).unwrap(),
            Some(Params::Array(_))
        ));

        let err = Params::from_value(json!("nope")).unwrap_err();
        assert_eq!(err.field(), Some("params"));
    }

    #[test]
    fn test_request_params_default_to_empty_object() {
        let request = Request::new(RequestId::from(1), "noop", None);
        assert_eq!(request.params_value(), json!({}));
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId::from(5).to_string(), "5");
        assert_eq!(RequestId::from("x").to_string(), "\"x\"");
    }
}
