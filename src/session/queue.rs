//! Deferred requests waiting on a refresh.
//!
//! # Responsibilities
//! - Hold requests that hit an auth failure while a refresh is in flight
//! - Order them high → normal → low, FIFO within a tier
//! - Enforce the size bound with low-priority eviction
//!
//! # Design Decisions
//! - Each item owns the sender that settles its caller; an item leaves the
//!   queue exactly once (dequeued, evicted, or drained)
//! - Eviction always takes the head of the low tier, so it is O(1)
//! - Nothing here blocks or awaits; the coordinator holds its lock around calls

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::GuardError;
use crate::http::request::{ApiRequest, Priority};
use crate::http::response::ApiResponse;
use crate::observability::metrics;

/// Outcome delivered to a queued caller.
pub type Completion = Result<ApiResponse, GuardError>;

/// One caller awaiting the outcome of a pending refresh.
#[derive(Debug)]
pub struct QueuedRequest {
    pub request: ApiRequest,
    pub enqueued_at: Instant,
    completion: oneshot::Sender<Completion>,
}

impl QueuedRequest {
    /// Wrap `request`, returning the receiver its caller awaits.
    pub fn new(request: ApiRequest) -> (Self, oneshot::Receiver<Completion>) {
        let (tx, rx) = oneshot::channel();
        let item = Self {
            request,
            enqueued_at: Instant::now(),
            completion: tx,
        };
        (item, rx)
    }

    pub fn priority(&self) -> Priority {
        self.request.priority
    }

    pub fn resolve(self, response: ApiResponse) {
        self.complete(Ok(response));
    }

    pub fn reject(self, error: GuardError) {
        self.complete(Err(error));
    }

    /// Settle the caller. A caller that stopped waiting is ignored.
    pub fn complete(self, outcome: Completion) {
        if self.completion.send(outcome).is_err() {
            tracing::debug!(request_id = %self.request.id, "Queued caller went away");
        }
    }
}

/// Three FIFO tiers sharing one size bound.
#[derive(Debug)]
pub struct BoundedPriorityQueue {
    high: VecDeque<QueuedRequest>,
    normal: VecDeque<QueuedRequest>,
    low: VecDeque<QueuedRequest>,
    max_size: usize,
}

impl BoundedPriorityQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
            low: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Add `item` at its priority.
    ///
    /// When full, the oldest low-priority item is rejected with
    /// [`GuardError::QueueOverflow`] to make room. With no low item to evict,
    /// `item` itself is rejected and `false` is returned.
    pub fn enqueue(&mut self, item: QueuedRequest) -> bool {
        if self.len() >= self.max_size {
            match self.low.pop_front() {
                Some(victim) => {
                    tracing::warn!(
                        evicted = %victim.request.id,
                        route = victim.request.route(),
                        "Queue full, evicting oldest low-priority request"
                    );
                    metrics::record_queue_overflow();
                    victim.reject(GuardError::QueueOverflow);
                }
                None => {
                    tracing::warn!(
                        request_id = %item.request.id,
                        priority = item.priority().as_str(),
                        max_size = self.max_size,
                        "Queue full, rejecting request"
                    );
                    metrics::record_queue_overflow();
                    item.reject(GuardError::QueueOverflow);
                    return false;
                }
            }
        }

        match item.priority() {
            Priority::High => self.high.push_back(item),
            Priority::Normal => self.normal.push_back(item),
            Priority::Low => self.low.push_back(item),
        }
        metrics::record_queue_depth(self.len());
        true
    }

    /// Next item in priority order, if any.
    pub fn dequeue_next(&mut self) -> Option<QueuedRequest> {
        let next = self
            .high
            .pop_front()
            .or_else(|| self.normal.pop_front())
            .or_else(|| self.low.pop_front());
        if next.is_some() {
            metrics::record_queue_depth(self.len());
        }
        next
    }

    /// Reject every queued item with `error`. Returns how many were rejected.
    pub fn drain_and_reject(&mut self, error: &GuardError) -> usize {
        let mut rejected = 0;
        for tier in [&mut self.high, &mut self.normal, &mut self.low] {
            for item in tier.drain(..) {
                item.reject(error.clone());
                rejected += 1;
            }
        }
        metrics::record_queue_depth(0);
        rejected
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
