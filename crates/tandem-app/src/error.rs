//! Handler error type.

use serde_json::Value;
use tandem_core::{ChannelError, ErrorCode, ErrorObject};
use thiserror::Error;

/// Failure returned by a unary or streaming handler.
///
/// Carries the JSON-RPC code to report. Handlers that do not care about the
/// code use [`HandlerError::internal`]; the dispatcher never invents codes on
/// a handler's behalf.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub code: ErrorCode,
    pub message: String,
    pub data: Option<Value>,
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

impl HandlerError {
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::InternalError, message)
    }

    /// Generic application failure (-32000).
    pub fn application(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::APPLICATION_ERROR, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_code(ErrorCode::InvalidParams, message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn to_error_object(&self) -> ErrorObject {
        let error = ErrorObject::new(self.code, self.message.clone());
        match &self.data {
            Some(data) => error.with_data(data.clone()),
            None => error,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::invalid_params(err.to_string())
    }
}

impl From<ChannelError> for HandlerError {
    fn from(err: ChannelError) -> Self {
        HandlerError::internal(err.to_string())
    }
}

impl From<HandlerError> for ErrorObject {
    fn from(err: HandlerError) -> Self {
        ErrorObject {
            code: err.code,
            message: err.message,
            data: err.data,
        }
    }
}
