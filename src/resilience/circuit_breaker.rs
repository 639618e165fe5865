//! Circuit breaker for the refresh operation.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: refresh assumed broken, calls fail fast
//! - Half-Open: one probe call decides whether to close or re-open
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: first call at or after open_until
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails
//! ```
//!
//! # Design Decisions
//! - Open → Half-Open happens lazily on the next call, never on a timer
//! - Single probe in Half-Open (concurrent callers fail fast meanwhile)
//! - The lock is never held across the guarded operation
//! - An operation dropped before completing (cancelled or panicked) counts
//!   as a failure

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;

use crate::error::GuardError;
use crate::observability::metrics;

/// Breaker position.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

/// Returned instead of running the operation while the circuit is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit breaker is open, retry in {retry_after:?}")]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

impl From<CircuitOpen> for GuardError {
    fn from(open: CircuitOpen) -> Self {
        GuardError::CircuitOpen {
            retry_after: open.retry_after,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                open_until: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Run `operation` unless the circuit is open.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitOpen>,
    {
        self.admit()?;
        let mut attempt = Attempt {
            breaker: self,
            settled: false,
        };
        let result = operation().await;
        attempt.settled = true;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result
    }

    fn admit(&self) -> Result<(), CircuitOpen> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let open_until = inner.open_until.unwrap_or(now);
                if now < open_until {
                    return Err(CircuitOpen {
                        retry_after: open_until - now,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                metrics::record_circuit_state(self.name, CircuitState::HalfOpen);
                tracing::info!(breaker = self.name, "Circuit half-open, allowing probe");
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(CircuitOpen {
                        retry_after: Duration::ZERO,
                    });
                }
                inner.probe_in_flight = true;
                Ok(())
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        let was = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.open_until = None;
        inner.probe_in_flight = false;
        if was != CircuitState::Closed {
            metrics::record_circuit_state(self.name, CircuitState::Closed);
            tracing::info!(breaker = self.name, "Circuit closed");
        }
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.probe_in_flight = false;

        let trip = inner.state == CircuitState::HalfOpen || inner.failure_count >= self.failure_threshold;
        if trip {
            inner.state = CircuitState::Open;
            inner.open_until = Some(Instant::now() + self.cooldown);
            metrics::record_circuit_state(self.name, CircuitState::Open);
            tracing::warn!(
                breaker = self.name,
                failures = inner.failure_count,
                cooldown = ?self.cooldown,
                "Circuit opened"
            );
        }
    }
}

/// Records a failure if the guarded operation never completes.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(breaker = self.breaker.name, "Guarded operation abandoned");
            self.breaker.on_failure();
        }
    }
}
