//! Tandem Application - the serving side of the bridge.
//!
//! Decodes inbound JSON-RPC messages, routes them to registered handlers and
//! carries the results back: a single response for unary methods, or a
//! bounded event stream for streaming methods.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tandem_app::{handlers, start_server, DispatcherConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let dispatcher = Arc::new(handlers::default_dispatcher(DispatcherConfig::default()));
//! let server = start_server(dispatcher, "127.0.0.1", 0).await?;
//! println!("listening on {}", server.addr());
//! # Ok(())
//! # }
//! ```

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod server;
pub mod sink;
pub mod streams;

pub use dispatcher::{Dispatched, Dispatcher, DispatcherBuilder, DispatcherConfig, OpenStream};
pub use error::{HandlerError, HandlerResult};
pub use handler::{Handler, StreamHandler, UnaryHandler};
pub use server::{router, start_server, ServerHandle};
pub use sink::StreamSink;
pub use streams::StreamRegistry;
