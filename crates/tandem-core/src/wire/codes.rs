//! JSON-RPC error codes.
//!
//! The set is closed: the five standard codes plus the application-reserved
//! range `-32099..=-32000`. Anything else is rejected on decode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Codes the Application may assign to its own failures.
pub const APPLICATION_CODE_RANGE: RangeInclusive<i32> = -32099..=-32000;

/// A code inside [`APPLICATION_CODE_RANGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApplicationCode(i32);

impl ApplicationCode {
    /// Returns `None` when `code` is outside the reserved range.
    pub fn new(code: i32) -> Option<Self> {
        APPLICATION_CODE_RANGE.contains(&code).then_some(Self(code))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

/// JSON-RPC 2.0 error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ErrorCode {
    /// -32700: the body was not valid JSON.
    ParseError,
    /// -32600: the JSON was not a valid request object.
    InvalidRequest,
    /// -32601: no handler is registered for the method.
    MethodNotFound,
    /// -32602: the handler rejected its params.
    InvalidParams,
    /// -32603: the handler failed without declaring a code.
    InternalError,
    /// -32099..=-32000: application-defined.
    Application(ApplicationCode),
}

impl ErrorCode {
    /// Generic handler failure that declares itself an application error.
    pub const APPLICATION_ERROR: ErrorCode = ErrorCode::Application(ApplicationCode(-32000));
    /// The stream exceeded its maximum lifetime.
    pub const STREAM_TIMED_OUT: ErrorCode = ErrorCode::Application(ApplicationCode(-32002));

    /// Numeric value on the wire.
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::Application(code) => code.get(),
        }
    }

    /// Parse a wire value; `None` for codes outside the closed set.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(ErrorCode::ParseError),
            -32600 => Some(ErrorCode::InvalidRequest),
            -32601 => Some(ErrorCode::MethodNotFound),
            -32602 => Some(ErrorCode::InvalidParams),
            -32603 => Some(ErrorCode::InternalError),
            other => ApplicationCode::new(other).map(ErrorCode::Application),
        }
    }

    /// Convenience constructor for an application code.
    pub fn application(code: i32) -> Option<Self> {
        ApplicationCode::new(code).map(ErrorCode::Application)
    }

    pub fn is_application(self) -> bool {
        matches!(self, ErrorCode::Application(_))
    }

    /// Protocol-level codes are produced before any handler runs.
    pub fn is_protocol(self) -> bool {
        matches!(self, ErrorCode::ParseError | ErrorCode::InvalidRequest)
    }

    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::Application(_) => "Application error",
        }
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        ErrorCode::from_code(code).ok_or_else(|| format!("unknown error code {}", code))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
