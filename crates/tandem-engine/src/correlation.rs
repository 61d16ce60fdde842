//! Outstanding-request table.
//!
//! A response is accepted only if its id is still pending here; completing an
//! id removes it, so a late duplicate or a stale reply from an abandoned
//! attempt is discarded instead of being matched twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tandem_core::RequestId;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Unary,
    Stream,
}

/// Bookkeeping for one in-flight request.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub method: String,
    pub kind: CallKind,
    /// 1-based attempt that issued this id.
    pub attempt: u32,
    pub started: Instant,
}

impl PendingCall {
    pub fn new(method: impl Into<String>, kind: CallKind, attempt: u32) -> Self {
        Self {
            method: method.into(),
            kind,
            attempt,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<RequestId, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new request. Returns `false` if the id is already pending.
    pub fn register(&self, id: RequestId, call: PendingCall) -> bool {
        let mut calls = self.lock();
        if calls.contains_key(&id) {
            warn!("Request id {} is already pending; keeping the original", id);
            return false;
        }
        calls.insert(id, call);
        true
    }

    /// Match a response. Unknown or already-completed ids yield `None`.
    pub fn complete(&self, id: &RequestId) -> Option<PendingCall> {
        let call = self.lock().remove(id);
        match &call {
            Some(call) => debug!(
                "Request {} ({}) completed in {:?}",
                id,
                call.method,
                call.elapsed()
            ),
            None => warn!("Discarding response for unknown or stale request id {}", id),
        }
        call
    }

    /// Forget a request that will never be answered (timeout, transport failure).
    pub fn abandon(&self, id: &RequestId) -> Option<PendingCall> {
        let call = self.lock().remove(id);
        if let Some(call) = &call {
            debug!(
                "Abandoned request {} ({}, attempt {})",
                id, call.method, call.attempt
            );
        }
        call
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
