//! Handler traits and the registration table entry.

use crate::error::HandlerResult;
use crate::sink::StreamSink;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// A method that produces exactly one result.
#[async_trait]
pub trait UnaryHandler: Send + Sync + 'static {
    async fn call(&self, params: Value) -> HandlerResult<Value>;
}

/// A method that pushes events into a stream until it is done.
///
/// Implementations must stop when [`StreamSink::emit`] fails or
/// [`StreamSink::check`] reports cancellation. Returning `Ok(())` completes the
/// stream; returning an error ends it as errored.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    async fn run(&self, params: Value, sink: StreamSink) -> HandlerResult<()>;
}

#[async_trait]
impl<F, Fut> UnaryHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Value>> + Send + 'static,
{
    async fn call(&self, params: Value) -> HandlerResult<Value> {
        (self)(params).await
    }
}

#[async_trait]
impl<F, Fut> StreamHandler for F
where
    F: Fn(Value, StreamSink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<()>> + Send + 'static,
{
    async fn run(&self, params: Value, sink: StreamSink) -> HandlerResult<()> {
        (self)(params, sink).await
    }
}

/// Entry in the method table.
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<dyn UnaryHandler>),
    Streaming(Arc<dyn StreamHandler>),
}

impl Handler {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Handler::Streaming(_))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Unary(_) => f.write_str("Handler::Unary"),
            Handler::Streaming(_) => f.write_str("Handler::Streaming"),
        }
    }
}
