//! Server-sent-events framing.
//!
//! The Application writes one JSON wire message per `data:` frame. The Engine
//! turns the raw response body into those frames with [`data_frames`], which
//! parses with `eventsource-stream` and refuses frames larger than a fixed
//! budget so a peer that never ends a frame cannot grow the buffer forever.

use crate::error::DecodeError;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::future;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
/// Response header carrying the id of the stream being pushed.
pub const STREAM_ID_HEADER: &str = "x-stream-id";

/// Counts bytes since the last blank line of an event-stream body.
#[derive(Debug)]
struct FrameBudget {
    limit: usize,
    pending: usize,
    after_newline: bool,
}

impl FrameBudget {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: 0,
            after_newline: false,
        }
    }

    fn consume(&mut self, chunk: &[u8]) -> Result<(), DecodeError> {
        for &byte in chunk {
            match byte {
                b'\n' => {
                    if self.after_newline {
                        self.pending = 0;
                    }
                    self.after_newline = true;
                }
                b'\r' => {}
                _ => {
                    self.after_newline = false;
                    self.pending += 1;
                    if self.pending > self.limit {
                        return Err(DecodeError::Parse {
                            message: format!("event stream frame exceeds {} bytes", self.limit),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Split an event-stream body into the `data` of each frame.
///
/// Comments (keep-alives) and frames without data are skipped. A malformed
/// body or a frame over `max_frame_bytes` yields one [`DecodeError::Parse`]
/// converted into `E`; the stream ends after the first error of any kind.
pub fn data_frames<S, B, E>(body: S, max_frame_bytes: usize) -> BoxStream<'static, Result<String, E>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: From<DecodeError> + fmt::Display + Send + 'static,
{
    let mut budget = FrameBudget::new(max_frame_bytes);
    let guarded = body.map(move |chunk| {
        let chunk = chunk?;
        budget.consume(chunk.as_ref())?;
        Ok::<B, E>(chunk)
    });

    guarded
        .eventsource()
        .filter_map(|event| {
            future::ready(match event {
                Ok(event) if event.data.is_empty() => None,
                Ok(event) => Some(Ok(event.data)),
                Err(EventStreamError::Transport(err)) => Some(Err(err)),
                Err(err) => Some(Err(E::from(DecodeError::Parse {
                    message: format!("malformed event stream: {}", err),
                }))),
            })
        })
        .scan(false, |failed, item| {
            let next = if *failed {
                None
            } else {
                *failed = item.is_err();
                Some(item)
            };
            future::ready(next)
        })
        .boxed()
}
