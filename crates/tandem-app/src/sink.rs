//! Producer-side handle given to streaming handlers.

use serde_json::Value;
use tandem_core::{ChannelError, Sender, StreamEvent};

/// Emits stream items with consecutive sequence numbers.
///
/// The sink cannot end the stream: the dispatcher writes the terminal marker
/// once the handler returns.
pub struct StreamSink {
    stream_id: String,
    next_seq: u64,
    sender: Sender<StreamEvent>,
}

impl StreamSink {
    pub(crate) fn new(stream_id: String, sender: Sender<StreamEvent>) -> Self {
        Self {
            stream_id,
            next_seq: 0,
            sender,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Number of items emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_seq
    }

    /// Push one item, waiting while the consumer is behind.
    ///
    /// Returns the item's sequence number. Fails once the stream is
    /// cancelled or closed; the handler should return promptly after that.
    pub async fn emit(&mut self, payload: Value) -> Result<u64, ChannelError> {
        let seq = self.next_seq;
        self.sender
            .send(StreamEvent::Item {
                stream_id: self.stream_id.clone(),
                seq,
                payload,
            })
            .await?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Cooperative cancellation point between units of work.
    pub fn check(&self) -> Result<(), ChannelError> {
        self.sender.check()
    }

    pub fn is_cancelled(&self) -> bool {
        self.sender.is_cancelled()
    }

    /// Resolves once the producer should stop: the stream was cancelled, or
    /// the supervisor ended it (lifetime exceeded). Useful inside `select!`.
    pub async fn cancelled(&self) {
        self.sender.stopped().await
    }
}
