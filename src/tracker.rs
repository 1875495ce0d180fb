//! Request Tracker
//!
//! Correlates responses to outstanding requests by their opaque id.
//!
//! ## Responsibilities
//! - Allocate correlation ids, monotonically per connection
//! - Hold one completion handle per in-flight request
//! - Resolve each request exactly once: response, timeout, cancellation
//!   or connection failure
//!
//! A tracker belongs to exactly one connection; ids are only unique within
//! that connection's stream. It is plain data, driven by the connection
//! task, so it needs no locking.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::{McError, Result};
use crate::protocol::{Opcode, ResponseFrame};

/// The caller-facing half of a pending request
pub type Completion = oneshot::Sender<Result<ResponseFrame>>;

/// A request that has been written (or queued) but not yet answered
#[derive(Debug)]
pub struct PendingRequest {
    opcode: Opcode,
    deadline: Option<Instant>,
    completion: Completion,
}

impl PendingRequest {
    pub fn new(opcode: Opcode, deadline: Option<Instant>, completion: Completion) -> Self {
        Self {
            opcode,
            deadline,
            completion,
        }
    }

    fn resolve(self, result: Result<ResponseFrame>) {
        // The caller may have given up on the request; nothing to do then.
        let _ = self.completion.send(result);
    }
}

/// Outcome of a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepResult {
    /// Requests failed with `Timeout`
    pub timed_out: usize,
    /// Requests dropped because the caller stopped waiting
    pub cancelled: usize,
}

/// Maps correlation ids to pending requests for one connection
#[derive(Debug, Default)]
pub struct RequestTracker {
    pending: HashMap<u32, PendingRequest>,
    next_opaque: u32,
}

impl RequestTracker {
    /// Create an empty tracker whose first id is 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty tracker whose first id is `first`
    pub fn starting_at(first: u32) -> Self {
        Self {
            pending: HashMap::new(),
            next_opaque: first,
        }
    }

    /// Reserve the next correlation id
    ///
    /// Ids wrap at `u32::MAX`. If the wrapped id is still held by an
    /// outstanding request the allocation is refused: that request is stuck
    /// and a response for the new one would be misrouted.
    pub fn allocate(&mut self) -> Result<u32> {
        let opaque = self.next_opaque;
        self.next_opaque = self.next_opaque.wrapping_add(1);

        if self.pending.contains_key(&opaque) {
            return Err(McError::Internal(format!(
                "correlation id {} is still outstanding after wraparound",
                opaque
            )));
        }
        Ok(opaque)
    }

    /// Record a pending request under an id returned by `allocate`
    pub fn insert(&mut self, opaque: u32, request: PendingRequest) {
        if let Some(previous) = self.pending.insert(opaque, request) {
            previous.resolve(Err(McError::Internal(format!(
                "correlation id {} was registered twice",
                opaque
            ))));
        }
    }

    /// Hand a decoded response to the request that carries its id
    ///
    /// Returns `Ok(false)` when no request holds the id; the frame is simply
    /// dropped (typically a late answer to a request that already timed out).
    /// An opcode that differs from the request's means the stream is out of
    /// step: the request fails and the error is returned to the caller.
    pub fn complete(&mut self, frame: ResponseFrame) -> Result<bool> {
        let Some(request) = self.pending.remove(&frame.opaque) else {
            return Ok(false);
        };

        if request.opcode != frame.opcode {
            let message = format!(
                "response opcode {:?} does not match request opcode {:?} for id {}",
                frame.opcode, request.opcode, frame.opaque
            );
            request.resolve(Err(McError::Protocol(message.clone())));
            return Err(McError::Protocol(message));
        }

        request.resolve(Ok(frame));
        Ok(true)
    }

    /// Fail requests whose deadline has passed and forget cancelled ones
    pub fn sweep(&mut self, now: Instant) -> SweepResult {
        let mut result = SweepResult::default();

        let finished: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, r)| r.completion.is_closed() || r.deadline.is_some_and(|d| d <= now))
            .map(|(opaque, _)| *opaque)
            .collect();

        for opaque in finished {
            let Some(request) = self.pending.remove(&opaque) else {
                continue;
            };
            if request.completion.is_closed() {
                result.cancelled += 1;
            } else {
                result.timed_out += 1;
                request.resolve(Err(McError::Timeout));
            }
        }

        result
    }

    /// Fail every pending request, returning how many there were
    pub fn fail_all(&mut self, error: impl Fn() -> McError) -> usize {
        let count = self.pending.len();
        for (_, request) in self.pending.drain() {
            request.resolve(Err(error()));
        }
        count
    }

    /// Whether `opaque` belongs to an outstanding request
    pub fn contains(&self, opaque: u32) -> bool {
        self.pending.contains_key(&opaque)
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no request is outstanding
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
