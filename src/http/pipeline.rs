//! Request interception pipeline.
//!
//! # Responsibilities
//! - Issue every request through the transport
//! - Hand failures to the session coordinator first
//! - Apply the general retry policy to what the coordinator gives back
//!
//! # Design Decisions
//! - Replays are never intercepted, so no request is handled twice
//! - Auth refresh is tried before transient retries; a request is never
//!   retried twice for one root cause through two mechanisms

use std::sync::Arc;

use crate::config::RetryConfig;
use crate::error::GuardError;
use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::http::transport::Transport;
use crate::resilience::RetryPolicy;
use crate::session::TokenRefreshCoordinator;

/// Dispatcher wrapping a transport with refresh and retry handling.
#[derive(Clone)]
pub struct InterceptionPipeline {
    transport: Arc<dyn Transport>,
    coordinator: TokenRefreshCoordinator,
    general: Option<RetryPolicy>,
}

impl InterceptionPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: TokenRefreshCoordinator,
        retries: &RetryConfig,
    ) -> Self {
        Self {
            transport,
            coordinator,
            general: retries.enabled.then(|| RetryPolicy::general(retries)),
        }
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        &self.coordinator
    }

    /// Issue `request`, recovering from expired sessions and transient
    /// failures where allowed.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, GuardError> {
        let error = match self.transport.issue(&request).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if request.is_retry {
            return Err(GuardError::Transport(error));
        }

        tracing::debug!(
            request_id = %request.id,
            method = %request.method,
            route = request.route(),
            error = %error,
            "Request failed"
        );

        let declined = match self.coordinator.handle_failure(&request, error).await {
            Err(GuardError::Transport(e)) => e,
            other => return other,
        };

        let policy = match &self.general {
            Some(policy) if policy.is_eligible(&request, &declined) => policy,
            _ => return Err(GuardError::Transport(declined)),
        };

        let replay = request.as_retry();
        policy
            .retry_after(declined, || self.transport.issue(&replay))
            .await
            .map_err(|failure| {
                if failure.exhausted {
                    tracing::warn!(
                        request_id = %request.id,
                        route = request.route(),
                        attempts = failure.attempts,
                        "Retries exhausted"
                    );
                    GuardError::RetryExhausted {
                        attempts: failure.attempts,
                        last: failure.last,
                    }
                } else {
                    GuardError::Transport(failure.last)
                }
            })
    }
}
