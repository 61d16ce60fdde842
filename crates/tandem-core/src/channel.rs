//! Bounded single-producer/single-consumer stream channel.
//!
//! The channel carries items from one producer to one consumer and enforces
//! backpressure: once `capacity` items are queued the producer suspends until
//! the consumer takes one. Unlike a plain mpsc channel it distinguishes two
//! ways of ending:
//!
//! - **close**: the producer is done. Queued items are still delivered, then an
//!   optional final event, then the consumer sees [`Recv::End`].
//! - **cancel**: either side abandons the stream. Queued items are discarded,
//!   blocked operations on both sides wake immediately, and the consumer sees
//!   [`Recv::Cancelled`].
//!
//! Dropping the [`Receiver`] cancels the channel unless it was already fully
//! drained, so a consumer that walks away can never leave the producer
//! suspended on a full buffer.

use crate::error::ChannelError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closed,
    Cancelled,
}

/// What [`Receiver::recv`] produced.
#[derive(Debug, PartialEq)]
pub enum Recv<T> {
    /// The next queued item, or the final event after a close.
    Event(T),
    /// The channel was cancelled. Repeated calls keep returning this.
    Cancelled,
    /// The channel was closed and everything has been delivered.
    End,
}

struct State<T> {
    queue: VecDeque<T>,
    final_event: Option<T>,
    status: ChannelState,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
    stop_signal: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self) -> ChannelState {
        self.lock().status
    }

    fn close(&self, final_event: Option<T>) -> bool {
        {
            let mut state = self.lock();
            if state.status != ChannelState::Open {
                return false;
            }
            state.status = ChannelState::Closed;
            state.final_event = final_event;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        self.stop_signal.notify_waiters();
        true
    }

    fn cancel(&self) -> bool {
        {
            let mut state = self.lock();
            match state.status {
                ChannelState::Cancelled => return false,
                ChannelState::Closed
                    if state.queue.is_empty() && state.final_event.is_none() =>
                {
                    return false
                }
                _ => {}
            }
            state.status = ChannelState::Cancelled;
            state.queue.clear();
            state.final_event = None;
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
        self.stop_signal.notify_waiters();
        true
    }

    async fn cancelled(&self) {
        self.wait_for(|status| status == ChannelState::Cancelled).await
    }

    async fn stopped(&self) {
        self.wait_for(|status| status != ChannelState::Open).await
    }

    async fn wait_for(&self, done: impl Fn(ChannelState) -> bool) {
        loop {
            let notified = self.stop_signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if done(self.status()) {
                return;
            }
            notified.await;
        }
    }
}

/// Create a channel holding at most `capacity` queued items (minimum 1).
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            queue: VecDeque::with_capacity(capacity),
            final_event: None,
            status: ChannelState::Open,
        }),
        capacity,
        readable: Notify::new(),
        writable: Notify::new(),
        stop_signal: Notify::new(),
    });

    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

/// Producing half.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Sender<T> {
    /// Queue an item, suspending while the buffer is full.
    ///
    /// Fails with [`ChannelError::Cancelled`] if the channel is cancelled
    /// before or while waiting, and with [`ChannelError::Closed`] after close.
    pub async fn send(&self, event: T) -> Result<(), ChannelError> {
        let mut event = Some(event);
        loop {
            let writable = self.shared.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            {
                let mut state = self.shared.lock();
                match state.status {
                    ChannelState::Cancelled => return Err(ChannelError::Cancelled),
                    ChannelState::Closed => return Err(ChannelError::Closed),
                    ChannelState::Open => {}
                }
                if state.queue.len() < self.shared.capacity {
                    if let Some(event) = event.take() {
                        state.queue.push_back(event);
                    }
                    drop(state);
                    self.shared.readable.notify_waiters();
                    return Ok(());
                }
            }

            writable.await;
        }
    }

    /// Fail fast if the channel can no longer accept items.
    pub fn check(&self) -> Result<(), ChannelError> {
        match self.shared.status() {
            ChannelState::Open => Ok(()),
            ChannelState::Closed => Err(ChannelError::Closed),
            ChannelState::Cancelled => Err(ChannelError::Cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.status() == ChannelState::Cancelled
    }

    /// Resolves once the channel is cancelled.
    pub async fn cancelled(&self) {
        self.shared.cancelled().await
    }

    /// Resolves once the channel stops accepting items, whether it was
    /// cancelled or closed through a [`ChannelHandle`].
    pub async fn stopped(&self) {
        self.shared.stopped().await
    }

    /// Close after the queued items, delivering `final_event` last.
    ///
    /// Returns `false` if the channel was already closed or cancelled.
    pub fn close(&self, final_event: T) -> bool {
        self.shared.close(Some(final_event))
    }

    /// Close without a final event.
    pub fn close_empty(&self) -> bool {
        self.shared.close(None)
    }

    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Control handle usable without owning the sender.
    pub fn handle(&self) -> ChannelHandle<T> {
        ChannelHandle {
            shared: self.shared.clone(),
        }
    }
}

/// Consuming half.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Receiver<T> {
    /// Take the next item, waiting while the buffer is empty.
    pub async fn recv(&mut self) -> Recv<T> {
        loop {
            let readable = self.shared.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if let Some(event) = state.queue.pop_front() {
                    drop(state);
                    self.shared.writable.notify_waiters();
                    return Recv::Event(event);
                }
                match state.status {
                    ChannelState::Cancelled => return Recv::Cancelled,
                    ChannelState::Closed => {
                        return match state.final_event.take() {
                            Some(event) => Recv::Event(event),
                            None => Recv::End,
                        }
                    }
                    ChannelState::Open => {}
                }
            }

            readable.await;
        }
    }

    /// Abandon the stream. Returns `false` if there was nothing left to cancel.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Items currently queued.
    pub fn len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn state(&self) -> ChannelState {
        self.shared.status()
    }

    pub fn handle(&self) -> ChannelHandle<T> {
        ChannelHandle {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.shared.cancel();
    }
}

/// Shared control over a channel: close, cancel and observe.
pub struct ChannelHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ChannelHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> ChannelHandle<T> {
    pub fn close(&self, final_event: T) -> bool {
        self.shared.close(Some(final_event))
    }

    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.status() == ChannelState::Cancelled
    }

    pub async fn cancelled(&self) {
        self.shared.cancelled().await
    }

    pub fn state(&self) -> ChannelState {
        self.shared.status()
    }
}

impl<T> std::fmt::Debug for ChannelHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("state", &self.state())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}
