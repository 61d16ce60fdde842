//! Live stream registry and producer supervision.

use crate::error::HandlerError;
use crate::handler::StreamHandler;
use crate::sink::StreamSink;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tandem_core::{ChannelHandle, ErrorCode, ErrorObject, StreamEvent};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

/// Index of running streams by id.
///
/// Holds only cancel handles; entries are removed when the producer exits.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<Mutex<HashMap<String, ChannelHandle<StreamEvent>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ChannelHandle<StreamEvent>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, stream_id: String, handle: ChannelHandle<StreamEvent>) {
        self.lock().insert(stream_id, handle);
    }

    pub(crate) fn remove(&self, stream_id: &str) {
        self.lock().remove(stream_id);
    }

    /// Cancel a running stream. Returns `false` if it is unknown or already over.
    pub fn cancel(&self, stream_id: &str) -> bool {
        let handle = self.lock().get(stream_id).cloned();
        match handle {
            Some(handle) => {
                let cancelled = handle.cancel();
                if cancelled {
                    info!("Stream {} cancelled by request", stream_id);
                }
                cancelled
            }
            None => {
                debug!("Cancel for unknown stream {}", stream_id);
                false
            }
        }
    }

    /// Ids of streams whose producers are still running.
    pub fn active_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Limits applied to one supervised producer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Supervision {
    pub stream_timeout: Duration,
    pub cancel_grace: Duration,
}

enum Exit {
    Finished(Result<Result<(), HandlerError>, JoinError>),
    Cancelled,
    TimedOut,
}

/// Run `handler` as the stream's producer and write its terminal marker.
///
/// The supervisor owns the outcome: completion, handler error and panic each
/// close the channel with the matching marker. On cancellation or timeout
/// the producer gets `cancel_grace` to notice, then it is aborted.
pub(crate) fn spawn_producer(
    registry: StreamRegistry,
    handler: Arc<dyn StreamHandler>,
    params: Value,
    sink: StreamSink,
    handle: ChannelHandle<StreamEvent>,
    limits: Supervision,
) -> JoinHandle<()> {
    let stream_id = sink.stream_id().to_string();
    registry.insert(stream_id.clone(), handle.clone());

    tokio::spawn(async move {
        let mut task = tokio::spawn(async move { handler.run(params, sink).await });
        let deadline = tokio::time::sleep(limits.stream_timeout);
        tokio::pin!(deadline);

        let exit = tokio::select! {
            joined = &mut task => Exit::Finished(joined),
            _ = handle.cancelled() => Exit::Cancelled,
            _ = &mut deadline => Exit::TimedOut,
        };

        match exit {
            Exit::Finished(Ok(Ok(()))) => {
                if handle.close(StreamEvent::completed(&stream_id)) {
                    debug!("Stream {} completed", stream_id);
                }
            }
            Exit::Finished(Ok(Err(err))) => {
                if handle.is_cancelled() {
                    debug!("Stream {} handler exited after cancellation: {}", stream_id, err);
                } else {
                    warn!("Stream {} handler failed: {}", stream_id, err);
                    handle.close(StreamEvent::errored(&stream_id, err.to_error_object()));
                }
            }
            Exit::Finished(Err(join_err)) => {
                error!("Stream {} handler panicked: {}", stream_id, join_err);
                handle.close(StreamEvent::errored(
                    &stream_id,
                    ErrorObject::new(ErrorCode::InternalError, "Stream handler panicked"),
                ));
            }
            Exit::Cancelled => {
                debug!("Stream {} cancelled; waiting for producer", stream_id);
                stop_producer(&stream_id, task, limits.cancel_grace).await;
            }
            Exit::TimedOut => {
                warn!(
                    "Stream {} exceeded maximum duration of {:?}",
                    stream_id, limits.stream_timeout
                );
                handle.close(StreamEvent::errored(
                    &stream_id,
                    ErrorObject::new(
                        ErrorCode::STREAM_TIMED_OUT,
                        format!("Stream exceeded {:?}", limits.stream_timeout),
                    ),
                ));
                stop_producer(&stream_id, task, limits.cancel_grace).await;
            }
        }

        registry.remove(&stream_id);
    })
}

async fn stop_producer(
    stream_id: &str,
    mut task: JoinHandle<Result<(), HandlerError>>,
    grace: Duration,
) {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(_) => debug!("Stream {} producer exited", stream_id),
        Err(_) => {
            warn!(
                "Stream {} producer ignored cancellation for {:?}; aborting",
                stream_id, grace
            );
            task.abort();
        }
    }
}
