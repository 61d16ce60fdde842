//! Error types shared by both sides of the bridge.

use crate::wire::{ErrorCode, ErrorObject};
use thiserror::Error;

/// Failure to decode a wire message.
///
/// Syntax errors are [`DecodeError::Parse`]; every structural violation names
/// the offending field so the peer can be told exactly what was wrong.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid field `{field}`: {message}")]
    Invalid { field: String, message: String },
}

impl DecodeError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        DecodeError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Name of the field that failed validation, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            DecodeError::Parse { .. } => None,
            DecodeError::Invalid { field, .. } => Some(field),
        }
    }

    /// JSON-RPC error code to report back for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::Parse { .. } => ErrorCode::ParseError,
            DecodeError::Invalid { .. } => ErrorCode::InvalidRequest,
        }
    }

    /// Build the error object sent to the peer.
    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::new(self.error_code(), self.to_string());
        match self.field() {
            Some(field) => error.with_data(serde_json::json!({ "field": field })),
            None => error,
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Parse {
            message: err.to_string(),
        }
    }
}

/// Failure of a stream channel operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel was closed; nothing more may be sent.
    #[error("Channel closed")]
    Closed,

    /// The channel was cancelled by either side.
    #[error("Stream cancelled")]
    Cancelled,
}

impl ChannelError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChannelError::Cancelled)
    }
}
