//! Client side of a streaming call.
//!
//! A reader task pulls event-stream frames off the response, checks them against
//! the stream id and sequence, and feeds a bounded channel. [`EventStream`]
//! drains that channel with a per-event deadline.

use crate::client::EngineClient;
use crate::error::RpcError;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::time::Duration;
use tandem_core::wire::decode;
use tandem_core::{channel, Message, Receiver, Recv, Sender, StreamEvent};
use tracing::{debug, warn};

type Delivery = Result<StreamEvent, RpcError>;

/// Events of one open stream, in order.
///
/// Yields each item, then the terminal marker (or an error), then `None`.
/// Dropping it before the end cancels the stream on both sides.
pub struct EventStream {
    stream_id: String,
    events: Receiver<Delivery>,
    per_event_timeout: Duration,
    client: EngineClient,
    finished: bool,
}

impl EventStream {
    pub(crate) fn spawn(
        client: EngineClient,
        stream_id: String,
        frames: BoxStream<'static, Result<String, RpcError>>,
        per_event_timeout: Duration,
        buffer: usize,
    ) -> Self {
        let (sender, events) = channel(buffer);
        let reader = FrameReader {
            stream_id: stream_id.clone(),
            next_seq: 0,
            sender,
        };
        tokio::spawn(reader.run(frames));

        Self {
            stream_id,
            events,
            per_event_timeout,
            client,
            finished: false,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Whether the terminal marker or an error has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next event, or `None` once the stream is over.
    ///
    /// If nothing arrives within the per-event timeout the stream is
    /// cancelled and [`RpcError::StreamTimeout`] is returned.
    pub async fn next(&mut self) -> Option<Delivery> {
        if self.finished {
            return None;
        }

        match tokio::time::timeout(self.per_event_timeout, self.events.recv()).await {
            Ok(Recv::Event(Ok(event))) => {
                if event.is_terminal() {
                    debug!("Stream {} ended: {:?}", self.stream_id, event.terminal_kind());
                    self.finished = true;
                }
                Some(Ok(event))
            }
            Ok(Recv::Event(Err(e))) => {
                warn!("Stream {} failed: {}", self.stream_id, e);
                self.abandon();
                Some(Err(e))
            }
            Ok(Recv::End) | Ok(Recv::Cancelled) => {
                self.finished = true;
                None
            }
            Err(_) => {
                warn!(
                    "Stream {} idle for {:?}, cancelling",
                    self.stream_id, self.per_event_timeout
                );
                self.abandon();
                Some(Err(RpcError::StreamTimeout {
                    stream_id: self.stream_id.clone(),
                    timeout: self.per_event_timeout,
                }))
            }
        }
    }

    /// Cancel the stream and wait for the Application's answer.
    ///
    /// Returns whether the Application still had the stream running.
    pub async fn cancel(&mut self) -> Result<bool, RpcError> {
        if self.finished {
            return Ok(false);
        }
        self.finished = true;
        let result = self.client.cancel_stream(&self.stream_id).await;
        self.events.cancel();
        result
    }

    /// Adapt into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = Delivery> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }

    /// Stop locally and tell the Application without waiting for it.
    fn abandon(&mut self) {
        self.finished = true;
        self.events.cancel();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime to cancel stream {} remotely", self.stream_id);
            return;
        };
        let client = self.client.clone();
        let stream_id = self.stream_id.clone();
        runtime.spawn(async move {
            if let Err(e) = client.send_cancel_notice(&stream_id).await {
                debug!("Cancel notice for stream {} failed: {}", stream_id, e);
            }
        });
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("stream_id", &self.stream_id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Stream {} dropped before its end", self.stream_id);
            self.abandon();
        }
    }
}

/// Turns event-stream frames into ordered events for one stream.
struct FrameReader {
    stream_id: String,
    next_seq: u64,
    sender: Sender<Delivery>,
}

/// Whether the reader should keep going after a frame.
enum Flow {
    Continue,
    Done,
}

impl FrameReader {
    async fn run(mut self, mut frames: BoxStream<'static, Result<String, RpcError>>) {
        loop {
            let frame = tokio::select! {
                _ = self.sender.cancelled() => {
                    debug!("Reader for stream {} stopped by cancel", self.stream_id);
                    return;
                }
                frame = frames.next() => frame,
            };

            match frame {
                Some(Ok(frame)) => {
                    if let Flow::Done = self.deliver(&frame).await {
                        return;
                    }
                }
                Some(Err(e)) => {
                    self.sender.close(Err(e));
                    return;
                }
                None => {
                    self.sender.close(Err(RpcError::transport(
                        "stream ended without a terminal marker",
                    )));
                    return;
                }
            }
        }
    }

    async fn deliver(&mut self, frame: &str) -> Flow {
        let event = match decode(frame.as_bytes()) {
            Ok(Message::Notification(notification)) => {
                match StreamEvent::from_notification(&notification) {
                    Ok(event) => event,
                    Err(e) => return self.fail(RpcError::from(e)),
                }
            }
            Ok(_) => return self.fail(RpcError::protocol("expected a stream notification")),
            Err(e) => return self.fail(RpcError::from(e)),
        };

        if event.stream_id() != self.stream_id {
            warn!(
                "Dropping event for stream {} on stream {}",
                event.stream_id(),
                self.stream_id
            );
            return Flow::Continue;
        }

        match event {
            StreamEvent::Item { seq, .. } if seq < self.next_seq => {
                warn!("Dropping duplicate seq {} on stream {}", seq, self.stream_id);
                Flow::Continue
            }
            StreamEvent::Item { seq, .. } if seq > self.next_seq => self.fail(RpcError::protocol(
                format!(
                    "stream {} skipped from seq {} to {}",
                    self.stream_id, self.next_seq, seq
                ),
            )),
            StreamEvent::Item { .. } => {
                self.next_seq += 1;
                match self.sender.send(Ok(event)).await {
                    Ok(()) => Flow::Continue,
                    Err(_) => Flow::Done,
                }
            }
            terminal @ StreamEvent::Terminal { .. } => {
                self.sender.close(Ok(terminal));
                Flow::Done
            }
        }
    }

    fn fail(&self, error: RpcError) -> Flow {
        self.sender.close(Err(error));
        Flow::Done
    }
}
