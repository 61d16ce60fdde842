//! Byte transport between the Engine and the Application.

use crate::error::RpcError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tandem_core::sse::{data_frames, EVENT_STREAM_CONTENT_TYPE};
use tandem_core::wire::decode;
use tandem_core::NetworkConfig;
use tracing::debug;
use url::Url;

/// What came back for one outbound message.
pub enum TransportReply {
    /// A single JSON message.
    Message(Bytes),
    /// Nothing; the normal answer to a notification.
    Empty,
    /// The `data` of each server-push frame, in arrival order.
    Stream(BoxStream<'static, Result<String, RpcError>>),
}

impl std::fmt::Debug for TransportReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportReply::Message(bytes) => f.debug_tuple("Message").field(bytes).finish(),
            TransportReply::Empty => f.write_str("Empty"),
            TransportReply::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Sends one encoded message and returns the peer's reply.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, body: Vec<u8>) -> Result<TransportReply, RpcError>;
}

/// HTTP transport: one POST per message, pooled connections.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
    max_frame_bytes: usize,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Result<Self, RpcError> {
        let client = Client::builder()
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, endpoint))
    }

    /// Use a preconfigured client (proxies, TLS settings).
    pub fn with_client(client: Client, endpoint: Url) -> Self {
        Self {
            client,
            endpoint,
            max_frame_bytes: NetworkConfig::MAX_SSE_FRAME_BYTES,
        }
    }

    /// Largest event-stream frame accepted before the stream fails.
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, body: Vec<u8>) -> Result<TransportReply, RpcError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, format!("application/json, {}", EVENT_STREAM_CONTENT_TYPE))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(TransportReply::Empty);
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.starts_with(EVENT_STREAM_CONTENT_TYPE))
            .unwrap_or(false);

        if is_stream && status.is_success() {
            debug!("Reading event stream from {}", self.endpoint);
            let body = response.bytes_stream().map(|chunk| chunk.map_err(RpcError::from));
            return Ok(TransportReply::Stream(data_frames(body, self.max_frame_bytes)));
        }

        let bytes = response.bytes().await?;
        if status.is_server_error() && decode(&bytes).is_err() {
            return Err(RpcError::transport(format!("HTTP {}", status)));
        }
        Ok(TransportReply::Message(bytes))
    }
}
