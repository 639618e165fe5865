//! Single-flight token refresh coordination.
//!
//! # Responsibilities
//! - Decide whether a failed request needs a refresh
//! - Run at most one refresh at a time, gated by the circuit breaker and
//!   retried by the refresh policy
//! - Park auth failures that arrive mid-refresh and settle them afterwards
//! - Keep the session warm with silent refreshes (timer and resume-from-idle)
//! - Drain the queue when another participant reports a refresh
//! - Terminate the session when the refresh endpoint answers 401
//!
//! # State Transitions
//! ```text
//! Idle → Refreshing: auth failure, force_refresh, or due silent refresh
//! Refreshing → Idle: refresh settled and queue drained (either outcome)
//! ```
//!
//! # Design Decisions
//! - One mutex guards the queue, the in-flight slot and the timestamps, so
//!   "refreshing? then enqueue, else start" is a single atomic step
//! - The refresh runs on its own task; callers share it through a
//!   `Shared` future and it completes even if every caller goes away
//! - The in-flight slot is cleared only once the queue is empty, so
//!   requests arriving mid-drain are replayed too
//! - Queued requests are replayed one by one in priority order

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::{GuardConfig, RefreshConfig};
use crate::error::GuardError;
use crate::http::endpoints::EndpointRules;
use crate::http::request::ApiRequest;
use crate::http::response::{ApiResponse, TransportError};
use crate::http::transport::Transport;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, CircuitState, RetryPolicy};
use crate::session::host::{login_redirect, SessionHost};
use crate::session::notifier::{SessionNotifier, SessionSignal};
use crate::session::queue::{BoundedPriorityQueue, Completion, QueuedRequest};

type SharedRefresh = Shared<BoxFuture<'static, Result<(), GuardError>>>;

const EVENT_CAPACITY: usize = 64;

/// Whether the application is in the foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Lifecycle notifications for observers (UI, logs, tests).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RefreshSucceeded,
    RefreshFailed { error: GuardError },
    /// Another participant refreshed; the local queue was drained.
    RemoteRefresh,
    /// The session is gone; the host will navigate to `redirect`.
    SessionTerminated { redirect: String },
}

struct RefreshState {
    queue: BoundedPriorityQueue,
    in_flight: Option<SharedRefresh>,
    last_refresh: Option<Instant>,
    hidden_since: Option<Instant>,
}

struct CoordinatorInner {
    config: RefreshConfig,
    rules: EndpointRules,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn SessionNotifier>,
    host: Arc<dyn SessionHost>,
    breaker: CircuitBreaker,
    refresh_policy: RetryPolicy,
    state: Mutex<RefreshState>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: Shutdown,
    started: AtomicBool,
    closed: AtomicBool,
}

enum Admission {
    Queued(tokio::sync::oneshot::Receiver<Completion>),
    Refreshing(SharedRefresh),
}

/// Owner of the session's refresh lifecycle. Cheap to clone; clones share
/// one coordinator.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        config: &GuardConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn SessionNotifier>,
        host: Arc<dyn SessionHost>,
    ) -> Self {
        let refresh = &config.refresh;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = CoordinatorInner {
            config: refresh.clone(),
            rules: EndpointRules::from_config(&config.endpoints),
            transport,
            notifier,
            host,
            breaker: CircuitBreaker::new("refresh", refresh.failure_threshold, refresh.circuit_cooldown()),
            refresh_policy: RetryPolicy::refresh(refresh),
            state: Mutex::new(RefreshState {
                queue: BoundedPriorityQueue::new(config.queue.max_size),
                in_flight: None,
                last_refresh: None,
                hidden_since: None,
            }),
            events,
            shutdown: Shutdown::new(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        Self { inner: Arc::new(inner) }
    }

    /// Entry point for a failed request.
    ///
    /// Returns the original failure untouched unless the request is an
    /// intercepted, first-time auth failure. Otherwise resolves with the
    /// replayed response once a refresh succeeds.
    pub async fn handle_failure(
        &self,
        request: &ApiRequest,
        error: TransportError,
    ) -> Result<ApiResponse, GuardError> {
        let inner = &self.inner;
        if !inner.rules.should_intercept(&request.path) {
            return Err(GuardError::Transport(error));
        }
        if !inner.rules.is_auth_failure(request, &error) {
            return Err(GuardError::Transport(error));
        }
        if request.is_retry {
            tracing::debug!(request_id = %request.id, route = request.route(), "Replay failed auth, not refreshing again");
            return Err(GuardError::Transport(error));
        }

        let admission = {
            let mut state = inner.state.lock();
            if inner.closed.load(Ordering::SeqCst) {
                return Err(GuardError::Teardown);
            }
            if state.in_flight.is_some() {
                let (item, rx) = QueuedRequest::new(request.clone());
                if state.queue.enqueue(item) {
                    tracing::debug!(
                        request_id = %request.id,
                        priority = request.priority.as_str(),
                        depth = state.queue.len(),
                        "Refresh in flight, request queued"
                    );
                }
                Admission::Queued(rx)
            } else {
                Admission::Refreshing(inner.start_refresh(&mut state))
            }
        };

        match admission {
            Admission::Queued(rx) => rx.await.unwrap_or_else(|_| Err(GuardError::Teardown)),
            Admission::Refreshing(refresh) => {
                refresh.await?;
                inner
                    .transport
                    .issue(&request.as_retry())
                    .await
                    .map_err(GuardError::Replay)
            }
        }
    }

    /// Start a refresh, or join the one in flight.
    pub async fn refresh(&self) -> Result<(), GuardError> {
        let refresh = {
            let mut state = self.inner.state.lock();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(GuardError::Teardown);
            }
            match state.in_flight.clone() {
                Some(existing) => existing,
                None => self.inner.start_refresh(&mut state),
            }
        };
        refresh.await
    }

    /// Refresh in the background if the last refresh is old enough.
    ///
    /// Skipped while a refresh is in flight, before the first refresh of the
    /// session, and within `silent_refresh_interval` of the last one. Never
    /// surfaces an error.
    pub async fn silent_refresh(&self) {
        let interval = self.inner.config.silent_refresh_interval();
        let due = {
            let state = self.inner.state.lock();
            !self.inner.closed.load(Ordering::SeqCst)
                && state.in_flight.is_none()
                && matches!(state.last_refresh, Some(at) if at.elapsed() >= interval)
        };
        if !due {
            tracing::trace!("Silent refresh not due");
            return;
        }

        tracing::debug!("Silent refresh");
        if let Err(e) = self.refresh().await {
            tracing::debug!(error = %e, "Silent refresh failed");
        }
    }

    /// Refresh now, regardless of when the last refresh happened.
    pub async fn force_refresh(&self) -> Result<(), GuardError> {
        self.inner.state.lock().last_refresh = None;
        self.refresh().await
    }

    /// Track foreground/background transitions. Returning to the foreground
    /// after at least `idle_threshold` triggers a silent refresh.
    pub async fn visibility_changed(&self, visibility: Visibility) {
        let idle_for = {
            let mut state = self.inner.state.lock();
            match visibility {
                Visibility::Hidden => {
                    state.hidden_since.get_or_insert_with(Instant::now);
                    None
                }
                Visibility::Visible => state.hidden_since.take().map(|since| since.elapsed()),
            }
        };

        if let Some(idle) = idle_for {
            if idle >= self.inner.config.idle_threshold() {
                tracing::debug!(idle = ?idle, "Resumed after idle period");
                self.silent_refresh().await;
            }
        }
    }

    /// Spawn the silent-refresh timer and the notifier listener.
    ///
    /// Idempotent. Both tasks stop on [`teardown`](Self::teardown).
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) || self.inner.shutdown.is_triggered() {
            return;
        }

        let period = self.inner.config.silent_refresh_interval();
        tokio::spawn(self.clone().run_monitor(period));
        let signals = self.inner.notifier.subscribe();
        tokio::spawn(self.clone().run_listener(signals));
        tracing::debug!(interval = ?period, "Session coordinator started");
    }

    async fn run_monitor(self, period: Duration) {
        let mut shutdown = self.inner.shutdown.subscribe();
        if self.inner.shutdown.is_triggered() {
            return;
        }
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.silent_refresh().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Silent refresh timer stopped");
    }

    async fn run_listener(self, mut signals: BoxStream<'static, SessionSignal>) {
        let mut shutdown = self.inner.shutdown.subscribe();
        if self.inner.shutdown.is_triggered() {
            return;
        }

        loop {
            tokio::select! {
                signal = signals.next() => match signal {
                    Some(SessionSignal::RefreshCompleted) => self.inner.on_remote_refresh().await,
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Notifier listener stopped");
    }

    /// Cancel the in-flight refresh, stop background tasks and reject
    /// everything queued with [`GuardError::Teardown`].
    pub fn teardown(&self) {
        let rejected = {
            let mut state = self.inner.state.lock();
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            state.queue.drain_and_reject(&GuardError::Teardown)
        };
        self.inner.shutdown.trigger();
        tracing::info!(rejected, "Session coordinator torn down");
    }

    /// Reject every queued request with [`GuardError::Cancelled`].
    pub fn clear_queue(&self) -> usize {
        self.inner.state.lock().queue.drain_and_reject(&GuardError::Cancelled)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().in_flight.is_some()
    }

    pub fn last_refresh(&self) -> Option<Instant> {
        self.inner.state.lock().last_refresh
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }
}

impl CoordinatorInner {
    /// Spawn the refresh task and occupy the in-flight slot.
    ///
    /// A supervisor releases the slot and rejects the queue if the task dies
    /// without settling, whether or not anyone awaits the shared future.
    fn start_refresh(self: &Arc<Self>, state: &mut RefreshState) -> SharedRefresh {
        let task = tokio::spawn(Arc::clone(self).run_refresh());
        let owner = Arc::clone(self);
        let supervisor = tokio::spawn(async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "Refresh task aborted");
                    owner.on_refresh_failure(&GuardError::Cancelled);
                    Err(GuardError::Cancelled)
                }
            }
        });
        let refresh = async move { supervisor.await.unwrap_or(Err(GuardError::Cancelled)) }
            .boxed()
            .shared();

        state.in_flight = Some(refresh.clone());
        tracing::debug!(endpoint = %self.config.endpoint, "Token refresh started");
        refresh
    }

    async fn run_refresh(self: Arc<Self>) -> Result<(), GuardError> {
        let started = Instant::now();
        let mut shutdown = self.shutdown.subscribe();

        let outcome = if self.shutdown.is_triggered() {
            Err(GuardError::Cancelled)
        } else {
            tokio::select! {
                result = self.call_refresh_endpoint() => result,
                _ = shutdown.recv() => Err(GuardError::Cancelled),
            }
        };

        match &outcome {
            Ok(()) => {
                let replayed = self.replay_queue(true).await;
                metrics::record_refresh("success");
                tracing::info!(elapsed = ?started.elapsed(), replayed, "Token refresh succeeded");
                self.notifier.publish(SessionSignal::RefreshCompleted);
                self.emit(SessionEvent::RefreshSucceeded);
            }
            Err(error) => self.on_refresh_failure(error),
        }
        outcome
    }

    /// One breaker-gated attempt, with backoff retries inside it.
    async fn call_refresh_endpoint(&self) -> Result<(), GuardError> {
        let request = ApiRequest::post(self.config.endpoint.clone());
        self.breaker
            .execute(|| async {
                self.refresh_policy
                    .run(|| self.transport.issue(&request))
                    .await
                    .map(|_| ())
                    .map_err(|failure| {
                        tracing::debug!(
                            attempts = failure.attempts,
                            exhausted = failure.exhausted,
                            error = %failure.last,
                            "Refresh call failed"
                        );
                        GuardError::from_refresh_failure(failure.last)
                    })
            })
            .await
    }

    fn on_refresh_failure(&self, error: &GuardError) {
        let rejected = {
            let mut state = self.state.lock();
            let rejected = state.queue.drain_and_reject(error);
            state.in_flight = None;
            rejected
        };

        metrics::record_refresh(error.kind());
        tracing::warn!(error = %error, rejected, "Token refresh failed");
        self.emit(SessionEvent::RefreshFailed { error: error.clone() });

        if matches!(error, GuardError::SessionTerminated) {
            self.terminate_session();
        }
    }

    /// Replay queued requests until the queue is empty. With
    /// `finish_refresh`, the in-flight slot is released and the refresh time
    /// recorded under the same lock that observed the empty queue.
    async fn replay_queue(&self, finish_refresh: bool) -> usize {
        let mut replayed = 0;
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.dequeue_next() {
                    Some(item) => item,
                    None => {
                        if finish_refresh {
                            state.in_flight = None;
                            state.last_refresh = Some(Instant::now());
                        }
                        break;
                    }
                }
            };

            let replay = next.request.as_retry();
            let outcome = self.transport.issue(&replay).await.map_err(GuardError::Replay);
            if let Err(e) = &outcome {
                tracing::debug!(request_id = %replay.id, route = replay.route(), error = %e, "Queued replay failed");
            }
            next.complete(outcome);
            replayed += 1;
        }
        replayed
    }

    async fn on_remote_refresh(&self) {
        self.state.lock().last_refresh = Some(Instant::now());
        let replayed = self.replay_queue(false).await;
        tracing::info!(replayed, "Refresh completed elsewhere");
        self.emit(SessionEvent::RemoteRefresh);
    }

    fn terminate_session(&self) {
        let location = self.host.location();
        self.host.clear_session();
        let redirect = login_redirect(&self.config.login_path, &location);

        metrics::record_session_terminated();
        tracing::warn!(redirect = %redirect, "Session terminated");
        self.emit(SessionEvent::SessionTerminated {
            redirect: redirect.clone(),
        });

        let host = Arc::clone(&self.host);
        let delay = self.config.redirect_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            host.navigate(&redirect);
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
