//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

use session_guard::config::GuardConfig;
use session_guard::http::{ApiRequest, ApiResponse, InterceptionPipeline, Transport, TransportError};
use session_guard::session::{BroadcastHub, SessionHost, TokenRefreshCoordinator};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync>;

/// Scripted in-memory transport.
///
/// Calls to the refresh endpoint pop the next scripted outcome (falling back
/// to `refresh_default`) after `refresh_delay`. Everything else goes to the
/// API handler. Every call is recorded with its virtual timestamp.
pub struct MockTransport {
    refresh_endpoint: String,
    refresh_delay: Mutex<Duration>,
    refresh_script: Mutex<VecDeque<Result<ApiResponse, TransportError>>>,
    refresh_default: Mutex<Result<ApiResponse, TransportError>>,
    refresh_panics: AtomicBool,
    api: Handler,
    calls: Mutex<Vec<(Instant, ApiRequest)>>,
}

impl MockTransport {
    pub fn new<F>(api: F) -> Self
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            refresh_endpoint: "/refresh".to_string(),
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_script: Mutex::new(VecDeque::new()),
            refresh_default: Mutex::new(Ok(ApiResponse::new(200, "refreshed"))),
            refresh_panics: AtomicBool::new(false),
            api: Box::new(api),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// API that rejects first attempts with 401 and accepts replays.
    pub fn expiring_session() -> Self {
        Self::new(|req| {
            if req.is_retry {
                Ok(ApiResponse::new(200, req.path.clone()))
            } else {
                Err(TransportError::from_status(401))
            }
        })
    }

    pub fn with_refresh_delay(self, delay: Duration) -> Self {
        *self.refresh_delay.lock() = delay;
        self
    }

    pub fn script_refresh(&self, outcome: Result<ApiResponse, TransportError>) {
        self.refresh_script.lock().push_back(outcome);
    }

    pub fn set_refresh_default(&self, outcome: Result<ApiResponse, TransportError>) {
        *self.refresh_default.lock() = outcome;
    }

    /// Make the next refresh call panic once its delay has elapsed.
    pub fn panic_next_refresh(&self) {
        self.refresh_panics.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn refresh_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|(_, r)| r.path == self.refresh_endpoint)
            .count()
    }

    /// Non-refresh calls carrying the retry marker, in issue order.
    pub fn replays(&self) -> Vec<ApiRequest> {
        self.calls()
            .into_iter()
            .filter(|r| r.is_retry && r.path != self.refresh_endpoint)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn issue(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        self.calls.lock().push((Instant::now(), request.clone()));

        if request.path == self.refresh_endpoint {
            let delay = *self.refresh_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.refresh_panics.swap(false, Ordering::SeqCst) {
                panic!("refresh endpoint crashed");
            }
            let scripted = self.refresh_script.lock().pop_front();
            return scripted.unwrap_or_else(|| self.refresh_default.lock().clone());
        }

        (self.api)(request)
    }
}

/// Host that records what the coordinator asks of it.
pub struct RecordingHost {
    location: String,
    pub cleared: AtomicU32,
    pub navigations: Mutex<Vec<String>>,
}

impl RecordingHost {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            cleared: AtomicU32::new(0),
            navigations: Mutex::new(Vec::new()),
        }
    }

    pub fn cleared(&self) -> u32 {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl SessionHost for RecordingHost {
    fn location(&self) -> String {
        self.location.clone()
    }

    fn clear_session(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }

    fn navigate(&self, target: &str) {
        self.navigations.lock().push(target.to_string());
    }
}

/// Config with deterministic (jitter-free) timings.
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.refresh.refresh_jitter_ms = 0;
    config.refresh.refresh_base_delay_ms = 100;
    config.retries.jitter_ms = 0;
    config
}

/// Coordinator and pipeline over a mock transport. Background tasks are
/// not started.
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub host: Arc<RecordingHost>,
    pub coordinator: TokenRefreshCoordinator,
    pub pipeline: InterceptionPipeline,
}

pub fn harness(config: &GuardConfig, transport: MockTransport) -> Harness {
    harness_on(&BroadcastHub::new(), config, transport)
}

pub fn harness_on(hub: &BroadcastHub, config: &GuardConfig, transport: MockTransport) -> Harness {
    let transport = Arc::new(transport);
    let host = Arc::new(RecordingHost::new("/servers/7?tab=chat"));
    let coordinator = TokenRefreshCoordinator::new(
        config,
        transport.clone(),
        Arc::new(hub.channel(&config.notifier.channel)),
        host.clone(),
    );
    let pipeline = InterceptionPipeline::new(transport.clone(), coordinator.clone(), &config.retries);
    Harness {
        transport,
        host,
        coordinator,
        pipeline,
    }
}

/// Yield until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// A request as seen by [`start_programmable_backend`].
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl RawRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response written by [`start_programmable_backend`].
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Start a programmable HTTP/1.1 backend on an ephemeral port.
pub async fn start_programmable_backend<F>(f: F) -> SocketAddr
where
    F: Fn(&RawRequest) -> RawResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_request(&mut socket).await else {
                            return;
                        };
                        let response = f(&request);
                        let status_text = match response.status {
                            200 => "200 OK",
                            401 => "401 Unauthorized",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let mut head = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                            status_text,
                            response.body.len()
                        );
                        for (name, value) in &response.headers {
                            head.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        head.push_str("\r\n");

                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(response.body.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<RawRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(0);
    let mut remaining = content_length.saturating_sub(buf.len() - head_end - 4);
    while remaining > 0 {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    Some(RawRequest { method, path, headers })
}
