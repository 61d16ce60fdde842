//! Tandem Engine - the calling side of the bridge.
//!
//! [`EngineClient`] issues JSON-RPC calls to a Tandem Application with
//! per-call timeouts and retry with exponential backoff, matches every
//! response to its request, and consumes streaming methods as an ordered
//! [`EventStream`].
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use tandem_engine::{ClientConfig, EngineClient, StreamOptions};
//!
//! # async fn run() -> Result<(), tandem_engine::RpcError> {
//! let client = EngineClient::new("http://127.0.0.1:8100/rpc", ClientConfig::default())?;
//! let sum = client.call("add", json!({"a": 2, "b": 3})).await?;
//!
//! let mut stream = client
//!     .call_stream("generate", json!({"tokens": 3}), StreamOptions::new())
//!     .await?;
//! while let Some(event) = stream.next().await {
//!     println!("{:?}", event?);
//! }
//! # let _ = sum;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod correlation;
pub mod error;
pub mod stream;
pub mod transport;

pub use client::{CallOptions, ClientConfig, EngineClient, StreamOptions};
pub use correlation::{CallKind, PendingCall, PendingCalls};
pub use error::RpcError;
pub use stream::EventStream;
pub use transport::{HttpTransport, Transport, TransportReply};
