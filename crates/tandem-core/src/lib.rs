//! Tandem Core - shared contract between the Engine and the Application.
//!
//! Both processes depend on this crate and nothing else of each other. It
//! provides:
//!
//! - [`wire`]: JSON-RPC 2.0 request, response, error and stream-event models
//!   with strict decoding
//! - [`channel`]: a bounded single-producer/single-consumer channel with
//!   explicit close and cancel signaling
//! - [`sse`]: server-push framing used to carry stream events over HTTP
//! - [`retry`]: exponential backoff used by the Engine for transport failures
//! - [`config`]: defaults for buffers, timeouts and retry bounds
//!
//! # Example
//!
//! ```rust
//! use tandem_core::wire::{self, Message, Params, Request, RequestId};
//! use serde_json::json;
//!
//! let params = Params::from_value(json!({"msg": "hello"})).unwrap();
//! let request = Request::new(RequestId::from(1), "echo", params);
//! let bytes = wire::encode(&request).unwrap();
//!
//! match wire::decode(&bytes).unwrap() {
//!     Message::Request(decoded) => assert_eq!(decoded, request),
//!     other => panic!("unexpected message: {other:?}"),
//! }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod retry;
pub mod sse;
pub mod wire;

pub use channel::{channel, ChannelHandle, ChannelState, Receiver, Recv, Sender};
pub use config::{NetworkConfig, ServerConfig, StreamConfig};
pub use error::{ChannelError, DecodeError};
pub use retry::{retry_async, RetryConfig, RetryStats};
pub use wire::{
    ErrorCode, ErrorObject, Message, Notification, Params, Request, RequestId, Response,
    StreamEvent, TerminalKind,
};
