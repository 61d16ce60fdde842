//! HTTP server implementation using Axum.
//!
//! `POST /rpc` takes one JSON-RPC message per body. Unary replies come back as
//! JSON; streaming methods answer with a server-sent-events body whose first
//! frame is the open acknowledgement, followed by one notification per event.

use crate::dispatcher::{Dispatched, Dispatcher, OpenStream};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response as HttpResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::sse::STREAM_ID_HEADER;
use tandem_core::{Receiver, Recv, Response, ServerConfig, StreamConfig, StreamEvent};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running server. Dropping it stops the server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait briefly for in-flight requests.
    ///
    /// Open streams that outlive the wait are cut off.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.task_handle.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await.is_err() {
                info!("Server did not drain within {:?}; aborting", SHUTDOWN_TIMEOUT);
                handle.abort();
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Build the router without binding it.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(STREAM_ID_HEADER)]);

    Router::new()
        .route(ServerConfig::HEALTH_PATH, get(handle_health))
        .route(ServerConfig::RPC_PATH, post(handle_rpc))
        .layer(DefaultBodyLimit::max(ServerConfig::MAX_BODY_BYTES))
        .layer(ConcurrencyLimitLayer::new(ServerConfig::MAX_CONCURRENT_REQUESTS))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(dispatcher)
}

/// Start the JSON-RPC HTTP server in the background.
///
/// `port` 0 picks a free port; read it back from [`ServerHandle::addr`].
pub async fn start_server(
    dispatcher: Arc<Dispatcher>,
    host: &str,
    port: u16,
) -> anyhow::Result<ServerHandle> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let app = router(dispatcher);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    Ok(ServerHandle {
        addr: actual_addr,
        shutdown_tx: Some(shutdown_tx),
        task_handle: Some(task_handle),
    })
}

async fn handle_health(State(dispatcher): State<Arc<Dispatcher>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_streams": dispatcher.streams().len(),
    }))
}

async fn handle_rpc(State(dispatcher): State<Arc<Dispatcher>>, body: Bytes) -> HttpResponse {
    match dispatcher.dispatch(&body).await {
        Dispatched::Reply(response) => {
            let status = match response.error_object() {
                Some(error) if error.code.is_protocol() => StatusCode::BAD_REQUEST,
                _ => StatusCode::OK,
            };
            (status, Json(response)).into_response()
        }
        Dispatched::NoReply => StatusCode::NO_CONTENT.into_response(),
        Dispatched::Stream(stream) => stream_response(stream),
    }
}

fn stream_response(stream: OpenStream) -> HttpResponse {
    let OpenStream {
        ack,
        stream_id,
        events,
    } = stream;
    let header = HeaderValue::from_str(&stream_id).ok();

    let body = Sse::new(event_frames(ack, stream_id, events))
        .keep_alive(KeepAlive::new().interval(StreamConfig::KEEP_ALIVE_INTERVAL));

    let mut response = body.into_response();
    if let Some(header) = header {
        response.headers_mut().insert(STREAM_ID_HEADER, header);
    }
    response
}

/// Ack first, then events until the terminal marker.
///
/// Dropping this stream drops the receiver, which cancels the producer; axum
/// does that when the peer goes away.
fn event_frames(
    ack: Response,
    stream_id: String,
    events: Receiver<StreamEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let ack = stream::once(async move { Ok(frame(&ack)) });

    let rest = stream::unfold(Some((events, stream_id)), |state| async move {
        let (mut events, stream_id) = state?;
        match events.recv().await {
            Recv::Event(event) => {
                let next = if event.is_terminal() {
                    debug!("Stream {} delivered terminal marker", stream_id);
                    None
                } else {
                    Some((events, stream_id))
                };
                Some((Ok(frame(&event.to_notification())), next))
            }
            Recv::Cancelled => {
                let marker = StreamEvent::cancelled(stream_id);
                Some((Ok(frame(&marker.to_notification())), None))
            }
            Recv::End => None,
        }
    });

    ack.chain(rest)
}

fn frame<M: Serialize>(message: &M) -> Event {
    Event::default().json_data(message).unwrap_or_else(|e| {
        error!("Failed to encode stream frame: {}", e);
        Event::default().comment("encode error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::default_dispatcher;
    use crate::DispatcherConfig;

    async fn server() -> ServerHandle {
        let dispatcher = Arc::new(default_dispatcher(DispatcherConfig::default()));
        start_server(dispatcher, "127.0.0.1", 0).await.unwrap()
    }

    #[tokio::test]
    async fn test_server_starts() {
        let handle = server().await;
        assert!(handle.addr().port() > 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_health() {
        let handle = server().await;
        let url = format!("http://{}/health", handle.addr());

        let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_streams"], 0);
    }

    #[tokio::test]
    async fn test_status_codes() {
        let handle = server().await;
        let url = format!("http://{}/rpc", handle.addr());
        let client = reqwest::Client::new();

        let parse_error = client.post(&url).body("{oops").send().await.unwrap();
        assert_eq!(parse_error.status(), 400);

        let not_found = client
            .post(&url)
            .body(r#"{"jsonrpc":"2.0","method":"nope","id":1}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(not_found.status(), 200);

        let notification = client
            .post(&url)
            .body(r#"{"jsonrpc":"2.0","method":"echo","params":{}}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(notification.status(), 204);
    }

    #[tokio::test]
    async fn test_stream_response_headers() {
        let handle = server().await;
        let url = format!("http://{}/rpc", handle.addr());

        let response = reqwest::Client::new()
            .post(&url)
            .body(r#"{"jsonrpc":"2.0","method":"generate","params":{"tokens":2,"delay_ms":0},"id":1}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(response.headers()[STREAM_ID_HEADER].to_str().unwrap().len() > 0);
        assert!(response.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = response.text().await.unwrap();
        assert!(body.contains("\"stream.end\""));
        assert!(body.contains("\"completed\""));
    }
}
