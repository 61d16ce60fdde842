//! Method dispatch for inbound JSON-RPC messages.
//!
//! Every inbound body ends in exactly one of three ways: a single reply, no
//! reply (notifications), or an open stream whose events are drained by the
//! transport. Decode failures are answered without touching any handler.

use crate::error::{HandlerError, HandlerResult};
use crate::handler::{Handler, StreamHandler, UnaryHandler};
use crate::sink::StreamSink;
use crate::streams::{spawn_producer, StreamRegistry, Supervision};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::wire::{decode, StreamOpened, STREAM_CANCEL_METHOD};
use tandem_core::{
    channel, ErrorCode, ErrorObject, Message, Notification, Receiver, Request, RequestId,
    Response, StreamConfig, StreamEvent,
};
use tracing::{debug, error, info, warn};

/// Tunables for stream handling.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Buffered events per stream before the producer is suspended.
    pub channel_capacity: usize,
    /// Longest a stream may run before it is closed as errored.
    pub stream_timeout: Duration,
    /// Time a cancelled producer gets before it is aborted.
    pub cancel_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: StreamConfig::DEFAULT_CHANNEL_CAPACITY,
            stream_timeout: StreamConfig::MAX_STREAM_DURATION,
            cancel_grace: StreamConfig::CANCEL_GRACE,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }
}

/// A stream that has been acknowledged and is being produced.
pub struct OpenStream {
    /// Response to the originating request; its result is `{stream_id}`.
    pub ack: Response,
    pub stream_id: String,
    /// Items followed by exactly one terminal marker, unless cancelled.
    pub events: Receiver<StreamEvent>,
}

impl std::fmt::Debug for OpenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenStream")
            .field("stream_id", &self.stream_id)
            .finish_non_exhaustive()
    }
}

/// Outcome of dispatching one inbound message.
#[derive(Debug)]
pub enum Dispatched {
    Reply(Response),
    NoReply,
    Stream(OpenStream),
}

/// Builds an immutable [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, Handler>,
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a method that returns a single result.
    pub fn unary<H: UnaryHandler>(self, method: impl Into<String>, handler: H) -> Self {
        self.register(method.into(), Handler::Unary(Arc::new(handler)))
    }

    /// Register a method that produces a stream.
    pub fn streaming<H: StreamHandler>(self, method: impl Into<String>, handler: H) -> Self {
        self.register(method.into(), Handler::Streaming(Arc::new(handler)))
    }

    fn register(mut self, method: String, handler: Handler) -> Self {
        if method == STREAM_CANCEL_METHOD {
            warn!("`{}` is built in; ignoring registration", method);
            return self;
        }
        if self.handlers.insert(method.clone(), handler).is_some() {
            warn!("Handler for `{}` registered twice; keeping the latest", method);
        }
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        info!("Dispatcher ready with {} methods: {:?}", methods.len(), methods);

        Dispatcher {
            handlers: self.handlers,
            config: self.config,
            streams: StreamRegistry::new(),
        }
    }
}

/// Routes inbound messages to registered handlers.
pub struct Dispatcher {
    handlers: HashMap<String, Handler>,
    config: DispatcherConfig,
    streams: StreamRegistry,
}

#[derive(Deserialize)]
struct CancelParams {
    stream_id: String,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn streams(&self) -> &StreamRegistry {
        &self.streams
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.push(STREAM_CANCEL_METHOD.to_string());
        methods.sort();
        methods
    }

    /// Decode and route one inbound body.
    pub async fn dispatch(&self, body: &[u8]) -> Dispatched {
        let message = match decode(body) {
            Ok(message) => message,
            Err(err) => {
                warn!("Rejected inbound message: {}", err);
                return Dispatched::Reply(Response::error(None, err.to_error_object()));
            }
        };

        match message {
            Message::Request(request) => self.handle_request(request).await,
            Message::Notification(notification) => {
                self.handle_notification(notification).await;
                Dispatched::NoReply
            }
            Message::Response(_) => {
                warn!("Received a response on the request path");
                Dispatched::Reply(Response::error(
                    None,
                    ErrorObject::new(ErrorCode::InvalidRequest, "Expected a request"),
                ))
            }
        }
    }

    async fn handle_request(&self, request: Request) -> Dispatched {
        let params = request.params_value();
        let Request { id, method, .. } = request;
        debug!("Request {} -> {}", id, method);

        if method == STREAM_CANCEL_METHOD {
            return Dispatched::Reply(into_response(id, self.cancel_stream(params)));
        }

        match self.handlers.get(&method) {
            None => {
                debug!("Method not found: {}", method);
                Dispatched::Reply(Response::error(
                    Some(id),
                    ErrorObject::new(
                        ErrorCode::MethodNotFound,
                        format!("Method not found: {}", method),
                    ),
                ))
            }
            Some(Handler::Unary(handler)) => {
                let result = run_unary(&method, handler.clone(), params).await;
                Dispatched::Reply(into_response(id, result))
            }
            Some(Handler::Streaming(handler)) => {
                Dispatched::Stream(self.open_stream(id, &method, handler.clone(), params))
            }
        }
    }

    async fn handle_notification(&self, notification: Notification) {
        let params = notification.params_value();
        let method = notification.method;

        if method == STREAM_CANCEL_METHOD {
            if let Err(err) = self.cancel_stream(params) {
                warn!("Ignoring malformed cancel notification: {}", err);
            }
            return;
        }

        match self.handlers.get(&method) {
            None => debug!("Notification for unknown method `{}` ignored", method),
            Some(Handler::Streaming(_)) => {
                warn!("Notification for streaming method `{}` ignored", method)
            }
            Some(Handler::Unary(handler)) => {
                if let Err(err) = run_unary(&method, handler.clone(), params).await {
                    warn!("Notification `{}` failed: {}", method, err);
                }
            }
        }
    }

    fn open_stream(
        &self,
        id: RequestId,
        method: &str,
        handler: Arc<dyn StreamHandler>,
        params: Value,
    ) -> OpenStream {
        let StreamOpened { stream_id } = StreamOpened::generate();
        let (sender, events) = channel(self.config.channel_capacity);
        let handle = sender.handle();
        let sink = StreamSink::new(stream_id.clone(), sender);

        info!("Opening stream {} for `{}`", stream_id, method);
        spawn_producer(
            self.streams.clone(),
            handler,
            params,
            sink,
            handle,
            Supervision {
                stream_timeout: self.config.stream_timeout,
                cancel_grace: self.config.cancel_grace,
            },
        );

        OpenStream {
            ack: StreamOpened {
                stream_id: stream_id.clone(),
            }
            .into_response(id),
            stream_id,
            events,
        }
    }

    fn cancel_stream(&self, params: Value) -> HandlerResult<Value> {
        let CancelParams { stream_id } = serde_json::from_value(params)?;
        let cancelled = self.streams.cancel(&stream_id);
        Ok(json!({"cancelled": cancelled, "stream_id": stream_id}))
    }
}

/// Run a unary handler in its own task so a panic becomes an internal error.
async fn run_unary(method: &str, handler: Arc<dyn UnaryHandler>, params: Value) -> HandlerResult<Value> {
    let task = tokio::spawn(async move { handler.call(params).await });
    match task.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            error!("Handler for `{}` panicked", method);
            Err(HandlerError::internal("Handler panicked"))
        }
        Err(err) => {
            error!("Handler for `{}` did not finish: {}", method, err);
            Err(HandlerError::internal("Handler was cancelled"))
        }
    }
}

fn into_response(id: RequestId, result: HandlerResult<Value>) -> Response {
    match result {
        Ok(value) => Response::success(id, value),
        Err(err) => Response::error(Some(id), err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{Recv, TerminalKind};

    async fn echo(params: Value) -> HandlerResult<Value> {
        Ok(params)
    }

    async fn boom(_params: Value) -> HandlerResult<Value> {
        Err(HandlerError::application("boom").with_data(json!({"hint": "retry later"})))
    }

    async fn count(params: Value, mut sink: StreamSink) -> HandlerResult<()> {
        let n = params.get("n").and_then(Value::as_u64).unwrap_or(3);
        for i in 0..n {
            sink.emit(json!({"i": i})).await?;
        }
        Ok(())
    }

    async fn endless(_params: Value, mut sink: StreamSink) -> HandlerResult<()> {
        let mut i = 0u64;
        loop {
            sink.emit(json!(i)).await?;
            i += 1;
        }
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .config(DispatcherConfig::new().with_channel_capacity(2))
            .unary("echo", echo)
            .unary("boom", boom)
            .unary("panic", |_params: Value| async move {
                if true {
                    panic!("bug");
                }
                HandlerResult::Ok(Value::Null)
            })
            .streaming("count", count)
            .streaming("endless", endless)
            .build()
    }

    async fn reply(dispatcher: &Dispatcher, body: Value) -> Response {
        match dispatcher.dispatch(body.to_string().as_bytes()).await {
            Dispatched::Reply(response) => response,
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    async fn open(dispatcher: &Dispatcher, body: Value) -> OpenStream {
        match dispatcher.dispatch(body.to_string().as_bytes()).await {
            Dispatched::Stream(stream) => stream,
            other => panic!("Expected stream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_echo_reply_keeps_id() {
        let d = dispatcher();
        let response = reply(
            &d,
            json!({"jsonrpc": "2.0", "method": "echo", "params": {"msg": "hello"}, "id": 1}),
        )
        .await;

        assert_eq!(response.id, Some(RequestId::from(1)));
        assert_eq!(response.into_result().unwrap(), json!({"msg": "hello"}));
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let d = dispatcher();
        match d.dispatch(b"{not json").await {
            Dispatched::Reply(response) => {
                assert_eq!(response.id, None);
                assert_eq!(response.error_object().unwrap().code, ErrorCode::ParseError);
            }
            other => panic!("Expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_request_names_field() {
        let d = dispatcher();
        let response = reply(&d, json!({"jsonrpc": "2.0", "method": "", "id": 1})).await;
        let error = response.error_object().unwrap();

        assert_eq!(error.code, ErrorCode::InvalidRequest);
        assert_eq!(error.data, Some(json!({"field": "method"})));
    }

    #[tokio::test]
    async fn test_response_on_request_path_is_invalid() {
        let d = dispatcher();
        let response = reply(&d, json!({"jsonrpc": "2.0", "result": 1, "id": 1})).await;
        assert_eq!(response.error_object().unwrap().code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher();
        let response = reply(&d, json!({"jsonrpc": "2.0", "method": "nope", "id": "x"})).await;

        assert_eq!(response.id, Some(RequestId::from("x")));
        assert_eq!(response.error_object().unwrap().code, ErrorCode::MethodNotFound);
    }

    #[tokio::test]
    async fn test_handler_error_keeps_code_and_data() {
        let d = dispatcher();
        let response = reply(&d, json!({"jsonrpc": "2.0", "method": "boom", "id": 2})).await;
        let error = response.error_object().unwrap();

        assert_eq!(error.code, ErrorCode::APPLICATION_ERROR);
        assert_eq!(error.message, "boom");
        assert_eq!(error.data, Some(json!({"hint": "retry later"})));
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let d = dispatcher();
        let response = reply(&d, json!({"jsonrpc": "2.0", "method": "panic", "id": 3})).await;
        assert_eq!(response.error_object().unwrap().code, ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn test_notifications_never_reply() {
        let d = dispatcher();
        for body in [
            json!({"jsonrpc": "2.0", "method": "echo", "params": {"a": 1}}),
            json!({"jsonrpc": "2.0", "method": "boom"}),
            json!({"jsonrpc": "2.0", "method": "missing"}),
            json!({"jsonrpc": "2.0", "method": "count"}),
        ] {
            assert!(matches!(
                d.dispatch(body.to_string().as_bytes()).await,
                Dispatched::NoReply
            ));
        }
        assert!(d.streams().is_empty());
    }

    #[tokio::test]
    async fn test_stream_is_gap_free_and_terminates_once() {
        let d = dispatcher();
        let mut stream = open(
            &d,
            json!({"jsonrpc": "2.0", "method": "count", "params": {"n": 5}, "id": 7}),
        )
        .await;

        assert_eq!(stream.ack.id, Some(RequestId::from(7)));
        let opened = StreamOpened::from_result(stream.ack.clone().into_result().unwrap()).unwrap();
        assert_eq!(opened.stream_id, stream.stream_id);

        let mut seqs = Vec::new();
        let mut terminals = 0;
        loop {
            match stream.events.recv().await {
                Recv::Event(StreamEvent::Item { seq, stream_id, .. }) => {
                    assert_eq!(stream_id, stream.stream_id);
                    seqs.push(seq);
                }
                Recv::Event(StreamEvent::Terminal { kind, .. }) => {
                    assert_eq!(kind, TerminalKind::Completed);
                    terminals += 1;
                }
                Recv::End => break,
                Recv::Cancelled => panic!("stream was cancelled"),
            }
        }

        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn test_backpressure_bounds_buffer() {
        let d = dispatcher();
        let stream = open(&d, json!({"jsonrpc": "2.0", "method": "endless", "id": 1})).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.events.len(), 2);
        assert_eq!(stream.events.capacity(), 2);
    }

    #[tokio::test]
    async fn test_cancel_method_stops_stream() {
        let d = dispatcher();
        let mut stream = open(&d, json!({"jsonrpc": "2.0", "method": "endless", "id": 1})).await;
        assert!(matches!(stream.events.recv().await, Recv::Event(_)));

        let response = reply(
            &d,
            json!({
                "jsonrpc": "2.0",
                "method": "engine.stream.cancel",
                "params": {"stream_id": stream.stream_id},
                "id": 2
            }),
        )
        .await;
        assert_eq!(
            response.into_result().unwrap(),
            json!({"cancelled": true, "stream_id": stream.stream_id})
        );
        assert_eq!(stream.events.recv().await, Recv::Cancelled);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !d.streams().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_notification_and_unknown_stream() {
        let d = dispatcher();
        let stream = open(&d, json!({"jsonrpc": "2.0", "method": "endless", "id": 1})).await;

        let body = json!({
            "jsonrpc": "2.0",
            "method": "engine.stream.cancel",
            "params": {"stream_id": stream.stream_id}
        });
        assert!(matches!(
            d.dispatch(body.to_string().as_bytes()).await,
            Dispatched::NoReply
        ));
        assert_eq!(stream.events.state(), tandem_core::ChannelState::Cancelled);

        let response = reply(
            &d,
            json!({"jsonrpc": "2.0", "method": "engine.stream.cancel", "params": {"stream_id": "gone"}, "id": 5}),
        )
        .await;
        assert_eq!(response.into_result().unwrap()["cancelled"], json!(false));

        let response = reply(&d, json!({"jsonrpc": "2.0", "method": "engine.stream.cancel", "id": 6})).await;
        assert_eq!(response.error_object().unwrap().code, ErrorCode::InvalidParams);
    }

    #[tokio::test]
    async fn test_dropping_events_cancels_producer() {
        let d = dispatcher();
        let stream = open(&d, json!({"jsonrpc": "2.0", "method": "endless", "id": 1})).await;
        assert_eq!(d.streams().len(), 1);
        drop(stream);

        tokio::time::timeout(Duration::from_secs(2), async {
            while !d.streams().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_reregistration_replaces_and_reserved_name_is_ignored() {
        let d = Dispatcher::builder()
            .unary("m", echo)
            .streaming("m", count)
            .unary(STREAM_CANCEL_METHOD, echo)
            .build();

        assert_eq!(d.methods(), vec![STREAM_CANCEL_METHOD.to_string(), "m".to_string()]);
        assert!(d.handlers.get("m").map(Handler::is_streaming).unwrap_or(false));
    }
}
