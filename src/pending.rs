//! Pending queue & state flusher (§4.3) - the ordering-critical component.
//!
//! All mutation of `pending` and `first_failure`, and all writes to the
//! state output, happen under a single lock (§5: "if the language forces
//! truly parallel access, a single mutex guarding `pending` and
//! `first_failure` is sufficient and uncontended"). Nothing is held across
//! an `.await`, so a plain `std::sync::Mutex` is enough - the same
//! confinement discipline the teacher's `producer.rs::send_batch_locked`
//! documents for its own state lock.

use crate::dispatcher::RequestHandle;
use crate::error::TargetStitchError;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;
use tracing::{debug, error};

struct PendingEntry {
    handle: RequestHandle,
    state: Option<Value>,
}

/// The ordered queue of in-flight requests and the first-observed failure,
/// confined behind one lock (§9: replaces the source's `pendingRequests`
/// and `sendException` globals with an owned, non-static object).
pub struct PendingQueue {
    inner: Mutex<PendingQueueInner>,
}

struct PendingQueueInner {
    entries: VecDeque<PendingEntry>,
    first_failure: Option<TargetStitchError>,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PendingQueueInner {
                entries: VecDeque::new(),
                first_failure: None,
            }),
        }
    }

    /// Append a submitted request to the tail of the queue (§4.3 submission
    /// path). Called from the foreground context just before the request
    /// is scheduled.
    pub fn push(&self, handle: RequestHandle, state: Option<Value>) {
        self.inner
            .lock()
            .unwrap()
            .entries
            .push_back(PendingEntry { handle, state });
    }

    /// Whether the queue has fully drained (§4.6 EOF drain loop).
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    /// The first asynchronous failure observed so far, if any.
    pub fn first_failure(&self) -> Option<TargetStitchError> {
        self.inner.lock().unwrap().first_failure.clone()
    }

    /// Completion callback (§4.3): idempotent, re-entrant-safe walk of the
    /// queue from the head. Runs on the background execution context every
    /// time any in-flight request resolves - not just the one that just
    /// resolved, since an earlier entry may have become ready in the
    /// meantime.
    ///
    /// `result` is `Some` only on the call driven by the request that just
    /// finished; `None` lets idle re-walks (e.g. a later completion) drain
    /// entries that were already done but not yet popped. In this engine
    /// every call is driven by a completion, so `result` is always `Some`
    /// from the caller's perspective - see `dispatcher.rs`.
    pub fn on_completion(&self, state_writer: &mut dyn Write, result: Result<(), TargetStitchError>) {
        let mut inner = self.inner.lock().unwrap();

        // Snapshot-then-walk under the same lock: whichever callback
        // (a success completing the head, or a failure anywhere) takes the
        // lock first determines the outcome. This resolves the §9 open
        // question ("out-of-order error and head-of-line state") as: once
        // a failure is recorded, no further state is ever emitted.
        if inner.first_failure.is_none() {
            if let Err(err) = result {
                debug!(error = %err, "first asynchronous failure recorded");
                inner.first_failure = Some(err);
                return;
            }
        }

        if inner.first_failure.is_some() {
            return;
        }

        loop {
            let Some(front) = inner.entries.front() else {
                break;
            };
            let Some(done) = front.handle.poll_done() else {
                // Not yet resolved - stop here, ordering must be preserved.
                break;
            };
            let entry = inner.entries.pop_front().expect("front just matched");
            match done {
                Ok(()) => {
                    if let Some(state) = entry.state {
                        let line = serde_json::to_string(&state)
                            .expect("state snapshot is a JSON value and always serializes");
                        if let Err(e) = writeln!(state_writer, "{line}") {
                            error!(error = %e, "failed writing state checkpoint to stdout");
                        }
                        if let Err(e) = state_writer.flush() {
                            error!(error = %e, "failed flushing state checkpoint to stdout");
                        }
                    }
                }
                Err(err) => {
                    debug!(error = %err, "first asynchronous failure recorded while draining");
                    inner.first_failure = Some(err);
                    return;
                }
            }
        }
    }
}
