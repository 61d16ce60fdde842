//! Engine client: outbound unary and streaming calls.

use crate::correlation::{CallKind, PendingCall, PendingCalls};
use crate::error::RpcError;
use crate::stream::EventStream;
use crate::transport::{HttpTransport, Transport, TransportReply};
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::wire::{decode, encode, StreamOpened, STREAM_CANCEL_METHOD};
use tandem_core::{
    retry_async, Message, NetworkConfig, Notification, Params, Request, RequestId, Response,
    RetryConfig, StreamConfig,
};
use tracing::{debug, info, warn};
use url::Url;

/// Client-wide defaults; per-call options override them.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub call_timeout: Duration,
    pub stream_event_timeout: Duration,
    pub stream_open_timeout: Duration,
    pub cancel_timeout: Duration,
    pub retry: RetryConfig,
    /// Events buffered between the network reader and the consumer.
    pub stream_buffer: usize,
    /// Largest event-stream frame accepted over HTTP.
    pub max_frame_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: NetworkConfig::PER_CALL_TIMEOUT,
            stream_event_timeout: NetworkConfig::PER_STREAM_EVENT_TIMEOUT,
            stream_open_timeout: NetworkConfig::STREAM_OPEN_TIMEOUT,
            cancel_timeout: NetworkConfig::CANCEL_REQUEST_TIMEOUT,
            retry: RetryConfig::default(),
            stream_buffer: StreamConfig::DEFAULT_CHANNEL_CAPACITY,
            max_frame_bytes: NetworkConfig::MAX_SSE_FRAME_BYTES,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_stream_event_timeout(mut self, timeout: Duration) -> Self {
        self.stream_event_timeout = timeout;
        self
    }

    pub fn with_stream_open_timeout(mut self, timeout: Duration) -> Self {
        self.stream_open_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer;
        self
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }
}

/// Per-call overrides for [`EngineClient::call_unary`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub retry: Option<RetryConfig>,
    /// Allow retrying after a timeout. Only safe if running the call twice is harmless.
    pub idempotent: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }
}

/// Per-call overrides for [`EngineClient::call_stream`].
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub per_event_timeout: Option<Duration>,
    pub open_timeout: Option<Duration>,
    pub retry: Option<RetryConfig>,
    pub buffer: Option<usize>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_per_event_timeout(mut self, timeout: Duration) -> Self {
        self.per_event_timeout = Some(timeout);
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    pending: PendingCalls,
    next_id: AtomicU64,
}

/// Handle for calling into the Application. Cheap to clone.
#[derive(Clone)]
pub struct EngineClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Result of a successful stream open, before the reader is spawned.
type OpenedStream = (String, BoxStream<'static, Result<String, RpcError>>);

impl EngineClient {
    /// Client over HTTP, e.g. `http://127.0.0.1:8100/rpc`.
    pub fn new(endpoint: &str, config: ClientConfig) -> Result<Self, RpcError> {
        let url = Url::parse(endpoint).map_err(|e| RpcError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })?;
        let transport = HttpTransport::new(url)?.with_max_frame_bytes(config.max_frame_bytes);
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                transport,
                config,
                pending: PendingCalls::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Requests sent and not yet answered.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    fn next_id(&self) -> RequestId {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        RequestId::Number(i64::try_from(id).unwrap_or(i64::MAX))
    }

    /// Unary call with the client's default options.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_unary(method, params, CallOptions::default()).await
    }

    /// Unary call.
    ///
    /// Each attempt uses a fresh request id and its own timeout. Only
    /// transport failures are retried, plus timeouts when the call is marked
    /// idempotent; error responses are returned as [`RpcError::Remote`].
    pub async fn call_unary(
        &self,
        method: &str,
        params: Value,
        options: CallOptions,
    ) -> Result<Value, RpcError> {
        let params = Params::from_value(params)?;
        let timeout = options.timeout.unwrap_or(self.inner.config.call_timeout);
        let retry = options
            .retry
            .unwrap_or_else(|| self.inner.config.retry.clone());
        let idempotent = options.idempotent;

        let (result, stats) = retry_async(
            &retry,
            |attempt| {
                let params = params.clone();
                async move { self.unary_attempt(method, params, timeout, attempt).await }
            },
            |e: &RpcError| e.is_retryable(idempotent),
        )
        .await;

        match result {
            Err(e) if stats.attempts > 1 && e.is_retryable(idempotent) => {
                Err(RpcError::RetriesExhausted {
                    attempts: stats.attempts,
                    last: Box::new(e),
                })
            }
            other => other,
        }
    }

    async fn unary_attempt(
        &self,
        method: &str,
        params: Option<Params>,
        timeout: Duration,
        attempt: u32,
    ) -> Result<Value, RpcError> {
        let id = self.next_id();
        let body = encode(&Request::new(id.clone(), method, params))?;
        self.inner
            .pending
            .register(id.clone(), PendingCall::new(method, CallKind::Unary, attempt));

        let result = tokio::time::timeout(timeout, async {
            let bytes = match self.inner.transport.send(body).await? {
                TransportReply::Message(bytes) => bytes,
                TransportReply::Empty => return Err(RpcError::protocol("empty reply to a request")),
                TransportReply::Stream(_) => {
                    return Err(RpcError::protocol(format!(
                        "`{}` answered with a stream; use call_stream",
                        method
                    )))
                }
            };
            self.correlate(&id, expect_response(&bytes)?)
        })
        .await
        .unwrap_or(Err(RpcError::Timeout(timeout)));

        if result.is_err() {
            self.inner.pending.abandon(&id);
        }
        result
    }

    /// Match a response to the request that is waiting for it.
    fn correlate(&self, expected: &RequestId, response: Response) -> Result<Value, RpcError> {
        match response.id.clone() {
            Some(id) if &id == expected => {
                if self.inner.pending.complete(&id).is_none() {
                    return Err(RpcError::protocol(format!("duplicate response for {}", id)));
                }
                response.into_result().map_err(RpcError::Remote)
            }
            Some(id) => {
                warn!("Discarding response with id {} (expected {})", id, expected);
                Err(RpcError::protocol(format!(
                    "response id {} does not match request {}",
                    id, expected
                )))
            }
            None => {
                // The Application could not read the request well enough to echo its id.
                self.inner.pending.complete(expected);
                match response.into_result() {
                    Err(error) => Err(RpcError::Remote(error)),
                    Ok(_) => Err(RpcError::protocol("successful response without an id")),
                }
            }
        }
    }

    /// Fire-and-forget notification: no id, no correlation, no retry.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), RpcError> {
        let params = Params::from_value(params)?;
        self.send_notification(method, params, self.inner.config.call_timeout)
            .await
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Params>,
        timeout: Duration,
    ) -> Result<(), RpcError> {
        let body = encode(&Notification::new(method, params))?;

        let reply = tokio::time::timeout(timeout, self.inner.transport.send(body))
            .await
            .unwrap_or(Err(RpcError::Timeout(timeout)))?;

        match reply {
            TransportReply::Empty => Ok(()),
            TransportReply::Message(bytes) => match decode(&bytes) {
                Ok(Message::Response(response)) if response.is_error() => {
                    match response.into_result() {
                        Err(error) => Err(RpcError::Remote(error)),
                        Ok(_) => Ok(()),
                    }
                }
                _ => {
                    debug!("Ignoring reply to notification `{}`", method);
                    Ok(())
                }
            },
            TransportReply::Stream(_) => Err(RpcError::protocol(format!(
                "notification `{}` answered with a stream",
                method
            ))),
        }
    }

    /// Open a streaming call.
    ///
    /// Only the open step is retried, and only for transport failures; once
    /// the acknowledgement arrives the stream is never re-issued.
    pub async fn call_stream(
        &self,
        method: &str,
        params: Value,
        options: StreamOptions,
    ) -> Result<EventStream, RpcError> {
        let config = &self.inner.config;
        let params = Params::from_value(params)?;
        let open_timeout = options.open_timeout.unwrap_or(config.stream_open_timeout);
        let per_event_timeout = options
            .per_event_timeout
            .unwrap_or(config.stream_event_timeout);
        let buffer = options.buffer.unwrap_or(config.stream_buffer);
        let retry = options.retry.unwrap_or_else(|| config.retry.clone());

        let (result, stats) = retry_async(
            &retry,
            |attempt| {
                let params = params.clone();
                async move { self.open_attempt(method, params, open_timeout, attempt).await }
            },
            |e: &RpcError| e.is_retryable(false),
        )
        .await;

        let (stream_id, frames) = match result {
            Ok(opened) => opened,
            Err(e) if stats.attempts > 1 && e.is_retryable(false) => {
                return Err(RpcError::RetriesExhausted {
                    attempts: stats.attempts,
                    last: Box::new(e),
                })
            }
            Err(e) => return Err(e),
        };

        info!("Stream {} opened for `{}`", stream_id, method);
        Ok(EventStream::spawn(
            self.clone(),
            stream_id,
            frames,
            per_event_timeout,
            buffer,
        ))
    }

    async fn open_attempt(
        &self,
        method: &str,
        params: Option<Params>,
        timeout: Duration,
        attempt: u32,
    ) -> Result<OpenedStream, RpcError> {
        let id = self.next_id();
        let body = encode(&Request::new(id.clone(), method, params))?;
        self.inner
            .pending
            .register(id.clone(), PendingCall::new(method, CallKind::Stream, attempt));

        let result = tokio::time::timeout(timeout, async {
            match self.inner.transport.send(body).await? {
                TransportReply::Stream(mut frames) => {
                    let frame = match frames.next().await {
                        Some(frame) => frame?,
                        None => {
                            return Err(RpcError::transport("stream closed before acknowledgement"))
                        }
                    };

                    let result = self.correlate(&id, expect_response(frame.as_bytes())?)?;
                    let StreamOpened { stream_id } = StreamOpened::from_result(result)?;
                    Ok((stream_id, frames))
                }
                TransportReply::Message(bytes) => {
                    self.correlate(&id, expect_response(&bytes)?)?;
                    Err(RpcError::protocol(format!(
                        "`{}` is not a streaming method",
                        method
                    )))
                }
                TransportReply::Empty => Err(RpcError::protocol("empty reply to a request")),
            }
        })
        .await
        .unwrap_or(Err(RpcError::Timeout(timeout)));

        if result.is_err() {
            self.inner.pending.abandon(&id);
        }
        result
    }

    /// Ask the Application to cancel a stream. Returns whether it was running.
    pub async fn cancel_stream(&self, stream_id: &str) -> Result<bool, RpcError> {
        let options = CallOptions::new()
            .with_timeout(self.inner.config.cancel_timeout)
            .with_retry(RetryConfig::none());
        let result = self
            .call_unary(
                STREAM_CANCEL_METHOD,
                json!({ "stream_id": stream_id }),
                options,
            )
            .await?;
        Ok(result
            .get("cancelled")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Best-effort cancel used when a stream is abandoned.
    pub(crate) async fn send_cancel_notice(&self, stream_id: &str) -> Result<(), RpcError> {
        let params = Params::from_value(json!({ "stream_id": stream_id }))?;
        self.send_notification(STREAM_CANCEL_METHOD, params, self.inner.config.cancel_timeout)
            .await
    }
}

fn expect_response(bytes: &[u8]) -> Result<Response, RpcError> {
    match decode(bytes)? {
        Message::Response(response) => Ok(response),
        _ => Err(RpcError::protocol("expected a response")),
    }
}
