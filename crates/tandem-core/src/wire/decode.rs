//! Strict decoding of wire messages.

use super::{
    ErrorCode, ErrorObject, JsonRpcVersion, Message, Notification, Outcome, Params, Request,
    RequestId, Response, JSONRPC_VERSION,
};
use crate::error::DecodeError;
use serde_json::{Map, Value};

/// Decode bytes into a request, notification or response.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_value(value)
}

/// Decode an already-parsed JSON value.
pub fn decode_value(value: Value) -> Result<Message, DecodeError> {
    let Value::Object(mut object) = value else {
        return Err(DecodeError::invalid("message", "must be a JSON object"));
    };

    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => {}
        _ => {
            return Err(DecodeError::invalid(
                "jsonrpc",
                format!("must be \"{}\"", JSONRPC_VERSION),
            ))
        }
    }

    let has_result = object.contains_key("result");
    let has_error = object.contains_key("error");

    if object.contains_key("method") {
        if has_result || has_error {
            return Err(DecodeError::invalid(
                "method",
                "a request must not carry result or error",
            ));
        }
        return decode_request(&mut object);
    }

    if has_result || has_error {
        return decode_response(&mut object);
    }

    Err(DecodeError::invalid("method", "missing"))
}

fn decode_request(object: &mut Map<String, Value>) -> Result<Message, DecodeError> {
    let method = match object.remove("method") {
        Some(Value::String(method)) if !method.is_empty() => method,
        Some(Value::String(_)) => return Err(DecodeError::invalid("method", "must not be empty")),
        _ => return Err(DecodeError::invalid("method", "must be a string")),
    };

    let params = match object.remove("params") {
        None => None,
        Some(Value::Null) => {
            return Err(DecodeError::invalid(
                "params",
                "must be an object or an array",
            ))
        }
        Some(value) => Params::from_value(value)?,
    };

    match object.remove("id") {
        None => Ok(Message::Notification(Notification {
            jsonrpc: JsonRpcVersion,
            method,
            params,
        })),
        Some(value) => Ok(Message::Request(Request {
            jsonrpc: JsonRpcVersion,
            method,
            params,
            id: decode_id(value)?,
        })),
    }
}

fn decode_response(object: &mut Map<String, Value>) -> Result<Message, DecodeError> {
    let result = object.remove("result");
    let error = object.remove("error");

    let outcome = match (result, error) {
        (Some(_), Some(_)) => {
            return Err(DecodeError::invalid(
                "result",
                "result and error are mutually exclusive",
            ))
        }
        (Some(result), None) => Outcome::Result(result),
        (None, Some(error)) => Outcome::Error(decode_error_object(error)?),
        (None, None) => return Err(DecodeError::invalid("result", "missing result or error")),
    };

    let id = match object.remove("id") {
        None => return Err(DecodeError::invalid("id", "missing")),
        Some(Value::Null) => {
            if !matches!(outcome, Outcome::Error(_)) {
                return Err(DecodeError::invalid(
                    "id",
                    "may only be null on an error response",
                ));
            }
            None
        }
        Some(value) => Some(decode_id(value)?),
    };

    Ok(Message::Response(Response { id, outcome }))
}

fn decode_id(value: Value) -> Result<RequestId, DecodeError> {
    match value {
        Value::String(id) => Ok(RequestId::String(id)),
        Value::Number(number) => number
            .as_i64()
            .map(RequestId::Number)
            .ok_or_else(|| DecodeError::invalid("id", "must be an integer or a string")),
        _ => Err(DecodeError::invalid("id", "must be an integer or a string")),
    }
}

fn decode_error_object(value: Value) -> Result<ErrorObject, DecodeError> {
    let Value::Object(mut object) = value else {
        return Err(DecodeError::invalid("error", "must be an object"));
    };

    let code = object
        .remove("code")
        .and_then(|code| code.as_i64())
        .and_then(|code| i32::try_from(code).ok())
        .ok_or_else(|| DecodeError::invalid("error.code", "must be an integer"))?;
    let code = ErrorCode::from_code(code).ok_or_else(|| {
        DecodeError::invalid("error.code", format!("{} is not a recognized error code", code))
    })?;

    let message = match object.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err(DecodeError::invalid("error.message", "must be a string")),
    };

    Ok(ErrorObject {
        code,
        message,
        data: object.remove("data"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode;
    use serde_json::json;

    fn decode_json(value: Value) -> Result<Message, DecodeError> {
        decode(&serde_json::to_vec(&value).unwrap())
    }

    fn invalid_field(value: Value) -> String {
        decode_json(value)
            .unwrap_err()
            .field()
            .expect("expected a field error")
            .to_string()
    }

    #[test]
    fn test_decode_request() {
        let message = decode_json(json!({
            "jsonrpc": "2.0",
            "method": "echo",
            "params": {"msg": "hello"},
            "id": 1
        }))
        .unwrap();

        match message {
            Message::Request(request) => {
                assert_eq!(request.method, "echo");
                assert_eq!(request.id, RequestId::Number(1));
                assert_eq!(request.params_value(), json!({"msg": "hello"}));
            }
            other => panic!("Expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_notification_when_id_absent() {
        let message = decode_json(json!({"jsonrpc": "2.0", "method": "tick"})).unwrap();
        assert!(matches!(message, Message::Notification(n) if n.method == "tick"));
    }

    #[test]
    fn test_parse_error_on_malformed_bytes() {
        let err = decode(b"not json").unwrap_err();
        assert!(matches!(err, DecodeError::Parse { .. }));
        assert_eq!(err.error_code(), ErrorCode::ParseError);
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert_eq!(
            invalid_field(json!({"jsonrpc": "1.0", "method": "echo", "id": 1})),
            "jsonrpc"
        );
        assert_eq!(invalid_field(json!({"method": "echo", "id": 1})), "jsonrpc");
    }

    #[test]
    fn test_rejects_bad_method() {
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": "", "id": 1})),
            "method"
        );
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": 5, "id": 1})),
            "method"
        );
        assert_eq!(invalid_field(json!({"jsonrpc": "2.0", "id": 1})), "method");
    }

    #[test]
    fn test_rejects_bad_params() {
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": "m", "params": 3, "id": 1})),
            "params"
        );
    }

    #[test]
    fn test_rejects_bad_ids() {
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": "m", "id": null})),
            "id"
        );
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": "m", "id": 1.5})),
            "id"
        );
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": "m", "id": [1]})),
            "id"
        );
    }

    #[test]
    fn test_rejects_non_object_root() {
        assert_eq!(invalid_field(json!([1, 2, 3])), "message");
    }

    #[test]
    fn test_response_requires_exactly_one_outcome() {
        assert_eq!(
            invalid_field(json!({
                "jsonrpc": "2.0",
                "result": 1,
                "error": {"code": -32603, "message": "x"},
                "id": 1
            })),
            "result"
        );
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "method": "m", "result": 1, "id": 1})),
            "method"
        );
    }

    #[test]
    fn test_response_id_rules() {
        assert_eq!(invalid_field(json!({"jsonrpc": "2.0", "result": 1})), "id");
        assert_eq!(
            invalid_field(json!({"jsonrpc": "2.0", "result": 1, "id": null})),
            "id"
        );

        let message = decode_json(json!({
            "jsonrpc": "2.0",
            "error": {"code": -32700, "message": "Parse error"},
            "id": null
        }))
        .unwrap();
        assert!(matches!(message, Message::Response(Response { id: None, .. })));
    }

    #[test]
    fn test_rejects_unknown_error_code() {
        assert_eq!(
            invalid_field(json!({
                "jsonrpc": "2.0",
                "error": {"code": 12, "message": "x"},
                "id": 1
            })),
            "error.code"
        );
        assert_eq!(
            invalid_field(json!({
                "jsonrpc": "2.0",
                "error": {"code": -32603},
                "id": 1
            })),
            "error.message"
        );
    }

    #[test]
    fn test_round_trip_fidelity() {
        let messages: Vec<Message> = vec![
            Request::new(
                RequestId::from(1),
                "echo",
                Params::from_value(json!({"msg": "hello"})).unwrap(),
            )
            .into(),
            Request::new(RequestId::from("req-9"), "sum", Some(Params::Array(vec![json!(1), json!(2)])))
                .into(),
            Notification::new("tick", None).into(),
            Response::success(RequestId::from(1), json!({"msg": "hello"})).into(),
            Response::success(RequestId::from("a"), Value::Null).into(),
            Response::error(
                Some(RequestId::from(3)),
                ErrorObject::new(ErrorCode::APPLICATION_ERROR, "boom").with_data(json!({"retry": false})),
            )
            .into(),
            Response::error(None, ErrorObject::from_code(ErrorCode::ParseError)).into(),
        ];

        for message in messages {
            let bytes = encode(&message).unwrap();
            assert_eq!(decode(&bytes).unwrap(), message);
        }
    }
}
