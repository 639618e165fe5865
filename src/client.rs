//! Session-guarded HTTP client.
//!
//! Wires the transport, notifier channel, host, coordinator and pipeline
//! together from a [`GuardConfig`].

use std::sync::Arc;

use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::http::pipeline::InterceptionPipeline;
use crate::http::request::ApiRequest;
use crate::http::response::ApiResponse;
use crate::http::transport::{ReqwestTransport, Transport, TransportBuildError};
use crate::session::{BroadcastHub, HeadlessHost, SessionHost, SessionNotifier, TokenRefreshCoordinator};

#[derive(Clone)]
pub struct SessionClient {
    pipeline: InterceptionPipeline,
}

impl SessionClient {
    /// Build a client on a reqwest transport with a private hub channel and
    /// a headless host.
    pub fn from_config(config: &GuardConfig) -> Result<Self, TransportBuildError> {
        let transport = Arc::new(ReqwestTransport::new(&config.transport)?);
        let hub = BroadcastHub::new();
        let notifier = Arc::new(hub.channel(&config.notifier.channel));
        Ok(Self::with_parts(config, transport, notifier, Arc::new(HeadlessHost::default())))
    }

    /// Build a client from explicit collaborators. Starts the coordinator's
    /// background tasks, so a Tokio runtime must be running.
    pub fn with_parts(
        config: &GuardConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn SessionNotifier>,
        host: Arc<dyn SessionHost>,
    ) -> Self {
        let coordinator = TokenRefreshCoordinator::new(config, Arc::clone(&transport), notifier, host);
        coordinator.start();

        tracing::info!(
            refresh_endpoint = %config.refresh.endpoint,
            queue_size = config.queue.max_size,
            retries = config.retries.enabled,
            "Session client ready"
        );

        Self {
            pipeline: InterceptionPipeline::new(transport, coordinator, &config.retries),
        }
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, GuardError> {
        self.pipeline.send(request).await
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        self.pipeline.coordinator()
    }

    /// Tear the coordinator down. Pending requests fail with
    /// [`GuardError::Teardown`].
    pub fn shutdown(&self) {
        self.coordinator().teardown();
    }
}
