//! Error types for the Engine client.

use std::time::Duration;
use tandem_core::{DecodeError, ErrorCode, ErrorObject};
use thiserror::Error;

/// Every way an outbound call can end other than with a result.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection refused or reset, or an HTTP failure without a JSON-RPC body.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    /// The Application answered with an error response.
    #[error("Remote error: {0}")]
    Remote(ErrorObject),

    /// The peer sent something that violates the protocol.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Stream {stream_id} produced no event within {timeout:?}")]
    StreamTimeout { stream_id: String, timeout: Duration },

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },

    #[error("Invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint { endpoint: String, message: String },
}

impl RpcError {
    pub fn transport(message: impl Into<String>) -> Self {
        RpcError::Transport {
            message: message.into(),
            source: None,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        RpcError::Protocol {
            message: message.into(),
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Transport failures always qualify. A timeout qualifies only for
    /// idempotent calls, since the first attempt may still have run. Remote
    /// and protocol errors never do.
    pub fn is_retryable(&self, idempotent: bool) -> bool {
        match self {
            RpcError::Transport { .. } => true,
            RpcError::Timeout(_) => idempotent,
            _ => false,
        }
    }

    /// Code of a remote error response, looking through retry exhaustion.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self {
            RpcError::Remote(error) => Some(error.code),
            RpcError::RetriesExhausted { last, .. } => last.remote_code(),
            _ => None,
        }
    }

    /// The underlying cause when retries ran out, otherwise `self`.
    pub fn root(&self) -> &RpcError {
        match self {
            RpcError::RetriesExhausted { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        RpcError::Transport {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<DecodeError> for RpcError {
    fn from(err: DecodeError) -> Self {
        RpcError::protocol(err.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(RpcError::transport("refused").is_retryable(false));
        assert!(RpcError::Timeout(Duration::from_secs(1)).is_retryable(true));
        assert!(!RpcError::Timeout(Duration::from_secs(1)).is_retryable(false));
        assert!(!RpcError::protocol("bad").is_retryable(true));
        assert!(!RpcError::Remote(ErrorObject::from_code(ErrorCode::InternalError)).is_retryable(true));
    }

    #[test]
    fn test_remote_code_through_exhaustion() {
        let err = RpcError::RetriesExhausted {
            attempts: 3,
            last: Box::new(RpcError::Remote(ErrorObject::from_code(ErrorCode::MethodNotFound))),
        };
        assert_eq!(err.remote_code(), Some(ErrorCode::MethodNotFound));
        assert!(matches!(err.root(), RpcError::Remote(_)));
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::Remote(ErrorObject::new(ErrorCode::InvalidParams, "missing a"));
        assert_eq!(err.to_string(), "Remote error: [-32602] missing a");
    }
}
