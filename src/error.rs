//! Error taxonomy for the interception layer.
//!
//! Every failure path settles a specific caller with one of these variants;
//! none of them is fatal to the coordinator. Variants are `Clone` because a
//! single refresh outcome is delivered to every request waiting on it.

use std::time::Duration;

use thiserror::Error;

use crate::http::response::TransportError;

/// Errors surfaced to callers of the session-guarded client.
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    /// The refresh breaker is open; the refresh was not attempted.
    #[error("circuit breaker is open, retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The deferred-request queue had no room for this request.
    #[error("request queue overflow")]
    QueueOverflow,

    /// The refresh endpoint rejected the refresh.
    #[error("token refresh failed: {0}")]
    RefreshFailed(TransportError),

    /// The refresh endpoint answered 401; the session cannot be recovered.
    #[error("session terminated: refresh was rejected as unauthorized")]
    SessionTerminated,

    /// The general retry policy ran out of attempts.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: TransportError },

    /// The coordinator shut down while the request was pending.
    #[error("session coordinator shut down")]
    Teardown,

    /// An in-flight refresh was aborted.
    #[error("token refresh cancelled")]
    Cancelled,

    /// The original failure, passed through untouched.
    #[error(transparent)]
    Transport(TransportError),

    /// A request replayed after a successful refresh failed again.
    #[error("replayed request failed: {0}")]
    Replay(TransportError),
}

impl GuardError {
    /// Map the final failure of a refresh call onto the taxonomy.
    pub fn from_refresh_failure(err: TransportError) -> Self {
        if err.is_auth() {
            GuardError::SessionTerminated
        } else {
            GuardError::RefreshFailed(err)
        }
    }

    /// HTTP status behind this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GuardError::RefreshFailed(e)
            | GuardError::Transport(e)
            | GuardError::Replay(e)
            | GuardError::RetryExhausted { last: e, .. } => e.status(),
            GuardError::SessionTerminated => Some(401),
            _ => None,
        }
    }

    /// Worth trying again shortly, as opposed to giving up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuardError::CircuitOpen { .. } | GuardError::QueueOverflow | GuardError::RetryExhausted { .. }
        )
    }

    /// Short machine-readable label, used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::CircuitOpen { .. } => "circuit_open",
            GuardError::QueueOverflow => "queue_overflow",
            GuardError::RefreshFailed(_) => "refresh_failed",
            GuardError::SessionTerminated => "session_terminated",
            GuardError::RetryExhausted { .. } => "retry_exhausted",
            GuardError::Teardown => "teardown",
            GuardError::Cancelled => "cancelled",
            GuardError::Transport(_) => "transport",
            GuardError::Replay(_) => "replay",
        }
    }
}
