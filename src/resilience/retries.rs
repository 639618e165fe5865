//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failure is retryable (per policy kind)
//! - Execute retries sequentially with exponential backoff + jitter
//!
//! # Design Decisions
//! - Two policies share one loop and differ only in their predicate
//! - Refresh policy: everything except 4xx is worth another try
//! - General policy: idempotent methods only, and only for connection
//!   failures, 5xx and 429
//! - Attempt `i + 1` is never issued before attempt `i` has settled

use std::future::Future;
use std::time::Duration;

use reqwest::Method;

use crate::config::{RefreshConfig, RetryConfig};
use crate::http::request::ApiRequest;
use crate::http::response::TransportError;
use crate::observability::metrics;
use crate::resilience::backoff::{calculate_backoff, exponential_delay};

/// Which predicate a [`RetryPolicy`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryKind {
    /// Retrying the credential refresh call itself.
    Refresh,
    /// Retrying an ordinary application request.
    General,
}

impl RetryKind {
    fn as_str(&self) -> &'static str {
        match self {
            RetryKind::Refresh => "refresh",
            RetryKind::General => "general",
        }
    }
}

/// Outcome of a policy run that did not succeed.
#[derive(Debug, Clone)]
pub struct RetryFailure {
    /// Calls made, including the first.
    pub attempts: u32,
    /// The failure of the final call.
    pub last: TransportError,
    /// True when the policy gave up because it ran out of attempts.
    pub exhausted: bool,
}

/// Methods safe to repeat.
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::PATCH
    )
}

/// Failure kinds the general policy retries.
pub fn is_transient(error: &TransportError) -> bool {
    error.is_connection() || error.is_server_error() || error.status() == Some(429)
}

/// Backoff retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    kind: RetryKind,
    max_retries: u32,
    base_delay: Duration,
    jitter: Duration,
}

impl RetryPolicy {
    pub fn new(kind: RetryKind, max_retries: u32, base_delay: Duration, jitter: Duration) -> Self {
        Self {
            kind,
            max_retries,
            base_delay,
            jitter,
        }
    }

    /// Policy wrapped around the refresh call.
    pub fn refresh(config: &RefreshConfig) -> Self {
        Self::new(
            RetryKind::Refresh,
            config.max_refresh_retries,
            config.refresh_base_delay(),
            config.refresh_jitter(),
        )
    }

    /// Policy for transient failures of ordinary requests.
    pub fn general(config: &RetryConfig) -> Self {
        Self::new(
            RetryKind::General,
            config.max_retries,
            config.base_delay(),
            config.jitter(),
        )
    }

    pub fn kind(&self) -> RetryKind {
        self.kind
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry `attempt` (0-indexed), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        exponential_delay(attempt, self.base_delay)
    }

    /// Whether `error` is worth another call under this policy.
    pub fn should_retry(&self, error: &TransportError) -> bool {
        match self.kind {
            RetryKind::Refresh => !error.is_client_error(),
            RetryKind::General => is_transient(error),
        }
    }

    /// Whether a failed `request` may enter the general policy at all.
    pub fn is_eligible(&self, request: &ApiRequest, error: &TransportError) -> bool {
        match self.kind {
            RetryKind::Refresh => self.should_retry(error),
            RetryKind::General => !request.is_retry && is_idempotent(&request.method) && is_transient(error),
        }
    }

    /// Call `operation` until it succeeds, the failure is not retryable, or
    /// `max_retries` retries have been spent.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.run_after(None, operation).await
    }

    /// Like [`run`](Self::run), but `first_failure` already counts as the
    /// first call, so the loop starts by backing off.
    pub async fn retry_after<T, F, Fut>(
        &self,
        first_failure: TransportError,
        operation: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.run_after(Some(first_failure), operation).await
    }

    async fn run_after<T, F, Fut>(
        &self,
        mut pending: Option<TransportError>,
        mut operation: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempts = u32::from(pending.is_some());
        let mut retry = 0u32;

        loop {
            if let Some(last) = pending.take() {
                if !self.should_retry(&last) {
                    return Err(RetryFailure {
                        attempts,
                        last,
                        exhausted: false,
                    });
                }
                if retry >= self.max_retries {
                    return Err(RetryFailure {
                        attempts,
                        last,
                        exhausted: true,
                    });
                }

                let delay = calculate_backoff(retry, self.base_delay, self.jitter);
                tracing::debug!(
                    policy = self.kind.as_str(),
                    retry,
                    delay = ?delay,
                    error = %last,
                    "Retrying after failure"
                );
                metrics::record_retry(self.kind.as_str());
                tokio::time::sleep(delay).await;
                retry += 1;
            }

            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => pending = Some(e),
            }
        }
    }
}
